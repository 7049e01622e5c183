//! Software driver over a UDP transport-stream feed.
//!
//! Stands in for the tuner/demux service when running against an IPTV
//! multicast: "lock" is reported once sync bytes are observed, and demux
//! filters are matched in software against CRC-validated sections pulled out
//! of payload-unit-start packets. Playback streams and volume are only
//! recorded; producing audio/video is not this crate's job.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use crc::{Crc, CRC_32_MPEG_2};
use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::constants::{TS_PACKET_SIZE, TS_SYNC_BYTE};
use crate::hw::{
    DeliverySystem, Driver, FilterHandle, HwError, LockCallback, LockStatus, SectionCallback,
    StreamCodec, StreamHandle,
};

const CRC_MPEG: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

pub struct UdpDriver {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    filters: Mutex<HashMap<u32, (u16, u8)>>,
    streams: Mutex<HashMap<u32, (u16, StreamCodec)>>,
    next_handle: AtomicU32,
    section_cb: Mutex<Option<SectionCallback>>,
    lock_cb: Mutex<Option<LockCallback>>,
    lock_requested: AtomicBool,
    synced: AtomicBool,
    volume: AtomicU32,
}

impl UdpDriver {
    /// Binds the socket (joining the group for multicast addresses) and
    /// starts the ingest task. Must run inside a tokio runtime.
    pub fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let socket = create_udp_socket(addr)?;
        let sock = UdpSocket::from_std(socket.into())?;
        let inner = Arc::new(Inner::default());
        tokio::spawn(ingest(Arc::clone(&inner), sock));
        Ok(Self { inner })
    }
}

async fn ingest(inner: Arc<Inner>, sock: UdpSocket) {
    let mut buf = [0u8; 2048];
    loop {
        let n = match sock.recv(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                warn!("TS socket error, stopping ingest: {e}");
                break;
            }
        };
        for chunk in buf[..n].chunks_exact(TS_PACKET_SIZE) {
            if chunk[0] != TS_SYNC_BYTE {
                continue;
            }
            inner.note_sync();
            if let Some((pid, section)) = section_from_packet(chunk) {
                inner.deliver(pid, section);
            }
        }
    }
}

/// Pulls one complete, CRC-valid section out of a payload-unit-start packet.
/// Sections spanning several packets are dropped; the mux repeats them.
fn section_from_packet(chunk: &[u8]) -> Option<(u16, &[u8])> {
    let pid = u16::from(chunk[1] & 0x1F) << 8 | u16::from(chunk[2]);
    let payload_unit_start = chunk[1] & 0x40 != 0;
    let adaptation_field_ctrl = (chunk[3] & 0x30) >> 4;

    if !payload_unit_start || adaptation_field_ctrl == 0 || adaptation_field_ctrl == 2 {
        return None;
    }
    let mut payload_offset = 4usize;
    if adaptation_field_ctrl == 3 {
        payload_offset += 1 + chunk[4] as usize;
        if payload_offset >= TS_PACKET_SIZE {
            return None;
        }
    }
    let payload = &chunk[payload_offset..];

    // pointer_field precedes the section on payload-unit-start packets
    let pointer = *payload.first()? as usize;
    let section = payload.get(1 + pointer..)?;
    let sec_len = (usize::from(*section.get(1)?) & 0x0F) << 8 | usize::from(*section.get(2)?);
    if sec_len < 5 {
        return None;
    }
    let section = section.get(..3 + sec_len)?;
    crc_ok(section).then_some((pid, section))
}

fn crc_ok(section: &[u8]) -> bool {
    if section.len() < 4 {
        return false;
    }
    let (body, tail) = section.split_at(section.len() - 4);
    let stored = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]);
    CRC_MPEG.checksum(body) == stored
}

impl Inner {
    fn note_sync(&self) {
        if !self.synced.swap(true, Ordering::SeqCst) && self.lock_requested.load(Ordering::SeqCst)
        {
            self.notify_locked();
        }
    }

    fn notify_locked(&self) {
        if let Some(cb) = &*self.lock_cb.lock().unwrap() {
            cb(LockStatus::Locked);
        }
    }

    fn deliver(&self, pid: u16, section: &[u8]) {
        let table_id = section[0];
        let matched = self
            .filters
            .lock()
            .unwrap()
            .values()
            .any(|&(p, t)| p == pid && t == table_id);
        if !matched {
            return;
        }
        if let Some(cb) = &*self.section_cb.lock().unwrap() {
            cb(Bytes::copy_from_slice(section));
        }
    }

    fn take_handle(&self) -> u32 {
        self.next_handle.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Driver for UdpDriver {
    fn lock_frequency(
        &self,
        frequency_hz: u32,
        bandwidth_mhz: u8,
        system: DeliverySystem,
    ) -> Result<(), HwError> {
        info!("lock request: {frequency_hz} Hz, {bandwidth_mhz} MHz, {system:?}");
        self.inner.lock_requested.store(true, Ordering::SeqCst);
        if self.inner.synced.load(Ordering::SeqCst) {
            self.inner.notify_locked();
        }
        Ok(())
    }

    fn register_lock_callback(&self, cb: LockCallback) {
        *self.inner.lock_cb.lock().unwrap() = Some(cb);
    }

    fn register_section_callback(&self, cb: SectionCallback) {
        *self.inner.section_cb.lock().unwrap() = Some(cb);
    }

    fn set_filter(&self, pid: u16, table_id: u8) -> Result<FilterHandle, HwError> {
        let handle = self.inner.take_handle();
        self.inner
            .filters
            .lock()
            .unwrap()
            .insert(handle, (pid, table_id));
        debug!("filter {handle}: pid {pid:#06x}, table {table_id:#04x}");
        Ok(FilterHandle(handle))
    }

    fn free_filter(&self, filter: FilterHandle) -> Result<(), HwError> {
        self.inner
            .filters
            .lock()
            .unwrap()
            .remove(&filter.0)
            .map(|_| ())
            .ok_or(HwError::BadFilter(filter.0))
    }

    fn create_stream(&self, pid: u16, codec: StreamCodec) -> Result<StreamHandle, HwError> {
        let handle = self.inner.take_handle();
        self.inner
            .streams
            .lock()
            .unwrap()
            .insert(handle, (pid, codec));
        info!("stream {handle}: pid {pid:#06x} as {codec:?}");
        Ok(StreamHandle(handle))
    }

    fn remove_stream(&self, stream: StreamHandle) -> Result<(), HwError> {
        self.inner
            .streams
            .lock()
            .unwrap()
            .remove(&stream.0)
            .map(|_| ())
            .ok_or(HwError::BadStream(stream.0))
    }

    fn set_volume(&self, level: u32) -> Result<(), HwError> {
        self.inner.volume.store(level, Ordering::Relaxed);
        debug!("volume set to {level}");
        Ok(())
    }
}

/// Join multicast / bind unicast socket helper
fn create_udp_socket(sock_addr: SocketAddr) -> anyhow::Result<Socket> {
    let ip = match sock_addr.ip() {
        IpAddr::V4(v4) => v4,
        _ => anyhow::bail!("only IPv4 is supported"),
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&sock_addr.into())?;

    if ip.is_multicast() {
        let iface = Ipv4Addr::UNSPECIFIED; // default interface
        socket.join_multicast_v4(&ip, &iface)?;
    }
    socket.set_nonblocking(true)?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts_packet(pid: u16, section: &[u8]) -> Vec<u8> {
        let mut pkt = vec![
            TS_SYNC_BYTE,
            0x40 | (pid >> 8) as u8,
            pid as u8,
            0x10, // payload only
            0x00, // pointer_field
        ];
        pkt.extend_from_slice(section);
        pkt.resize(TS_PACKET_SIZE, 0xFF);
        pkt
    }

    fn crc_sealed_section(table_id: u8, body: &[u8]) -> Vec<u8> {
        let sec_len = body.len() + 4;
        let mut sec = vec![
            table_id,
            0xB0 | ((sec_len >> 8) as u8 & 0x0F),
            sec_len as u8,
        ];
        sec.extend_from_slice(body);
        let crc = CRC_MPEG.checksum(&sec);
        sec.extend_from_slice(&crc.to_be_bytes());
        sec
    }

    #[test]
    fn extracts_a_crc_valid_section() {
        let sec = crc_sealed_section(0x00, &[0x00, 0x01, 0xC1, 0x00, 0x00]);
        let pkt = ts_packet(0x0000, &sec);
        let (pid, out) = section_from_packet(&pkt).unwrap();
        assert_eq!(pid, 0x0000);
        assert_eq!(out, &sec[..]);
    }

    #[test]
    fn corrupted_crc_is_dropped() {
        let mut sec = crc_sealed_section(0x00, &[0x00, 0x01, 0xC1, 0x00, 0x00]);
        let last = sec.len() - 1;
        sec[last] ^= 0xFF;
        let pkt = ts_packet(0x0000, &sec);
        assert!(section_from_packet(&pkt).is_none());
    }

    #[test]
    fn non_start_packets_are_dropped() {
        let sec = crc_sealed_section(0x00, &[0x00, 0x01, 0xC1, 0x00, 0x00]);
        let mut pkt = ts_packet(0x0000, &sec);
        pkt[1] &= !0x40;
        assert!(section_from_packet(&pkt).is_none());
    }

    #[test]
    fn adaptation_field_is_skipped() {
        let sec = crc_sealed_section(0x02, &[0x00, 0x01, 0xC1, 0x00, 0x00, 0xE1, 0x00, 0xF0, 0x00]);
        let mut pkt = vec![
            TS_SYNC_BYTE,
            0x40 | 0x01,
            0x00, // pid 0x0100
            0x30, // adaptation + payload
            0x02, // adaptation length
            0x00,
            0x00,
            0x00, // pointer_field
        ];
        pkt.extend_from_slice(&sec);
        pkt.resize(TS_PACKET_SIZE, 0xFF);
        let (pid, out) = section_from_packet(&pkt).unwrap();
        assert_eq!(pid, 0x0100);
        assert_eq!(out, &sec[..]);
    }

    #[test]
    fn delivery_respects_installed_filters() {
        let inner = Inner::default();
        let seen = Arc::new(Mutex::new(Vec::<Bytes>::new()));
        let sink = Arc::clone(&seen);
        *inner.section_cb.lock().unwrap() =
            Some(Box::new(move |buf| sink.lock().unwrap().push(buf)));

        let sec = crc_sealed_section(0x00, &[0x00, 0x01, 0xC1, 0x00, 0x00]);
        inner.deliver(0x0000, &sec);
        assert!(seen.lock().unwrap().is_empty());

        inner.filters.lock().unwrap().insert(1, (0x0000, 0x00));
        inner.deliver(0x0000, &sec);
        inner.deliver(0x0012, &sec); // wrong pid, still filtered out
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
