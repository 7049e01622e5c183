//! Event Information Table present/following decoder (table id 0x4E).
//!
//! Only the short-event descriptor (tag 0x4D) is decoded, and only for
//! events that are currently running; everything else in the descriptor
//! loop is skipped by its declared length.

use crate::constants::{RUNNING_STATUS_RUNNING, TABLE_ID_EIT_PF};
use crate::cursor::ByteCursor;
use crate::si::SiError;

/// Max events kept from one EIT section.
pub const MAX_EVENTS: usize = 20;
/// Event names are cut to this many bytes.
pub const MAX_EVENT_NAME: usize = 20;

const SHORT_EVENT_DESCRIPTOR: u8 = 0x4D;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EitHeader {
    pub table_id: u8,
    pub section_syntax_indicator: bool,
    pub section_length: u16,
    pub service_id: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub segment_last_section_number: u8,
    pub last_table_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EitEvent {
    pub event_id: u16,
    /// Raw concatenation of the two big-endian 16-bit halves of the wire
    /// field; not BCD-decoded.
    pub start_time: u32,
    pub running_status: u8,
    pub scrambled: bool,
    pub descriptors_loop_length: u16,
    /// Short-event name, present only for running events carrying tag 0x4D.
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EitTable {
    pub header: EitHeader,
    pub events: Vec<EitEvent>,
    /// Set when the section declared more events than [`MAX_EVENTS`].
    pub capacity_exceeded: bool,
}

fn decode_header(cur: &ByteCursor<'_>) -> Result<EitHeader, SiError> {
    let table_id = cur.read_u8_at(0)?;
    if table_id != TABLE_ID_EIT_PF {
        return Err(SiError::WrongTableId {
            expected: TABLE_ID_EIT_PF,
            found: table_id,
        });
    }
    Ok(EitHeader {
        table_id,
        section_syntax_indicator: cur.read_bits(8, 1)? == 1,
        section_length: cur.read_bits(12, 12)? as u16,
        service_id: cur.read_u16_at(3)?,
        version_number: cur.read_bits(42, 5)? as u8,
        current_next_indicator: cur.read_bits(47, 1)? == 1,
        section_number: cur.read_u8_at(6)?,
        last_section_number: cur.read_u8_at(7)?,
        transport_stream_id: cur.read_u16_at(8)?,
        original_network_id: cur.read_u16_at(10)?,
        segment_last_section_number: cur.read_u8_at(12)?,
        last_table_id: cur.read_u8_at(13)?,
    })
}

fn decode_event(cur: &ByteCursor<'_>, offset: usize) -> Result<EitEvent, SiError> {
    let event_id = cur.read_u16_at(offset)?;
    let start_hi = cur.read_u16_at(offset + 2)?;
    let start_lo = cur.read_u16_at(offset + 4)?;
    let start_time = (u32::from(start_hi) << 16) | u32::from(start_lo);

    let flags = cur.read_u16_at(offset + 10)?;
    let running_status = ((flags & 0xE000) >> 13) as u8;
    let scrambled = flags & 0x1000 != 0;
    let descriptors_loop_length = flags & 0x0FFF;

    let mut name = None;
    if running_status == RUNNING_STATUS_RUNNING {
        let mut doff = 0usize;
        while doff < descriptors_loop_length as usize {
            let tag = cur.read_u8_at(offset + 12 + doff)?;
            let length = cur.read_u8_at(offset + 13 + doff)?;
            if tag == SHORT_EVENT_DESCRIPTOR {
                // 3-byte ISO 639 language code, then the length-prefixed name
                let name_len = cur.read_u8_at(offset + 17 + doff)? as usize;
                let take = name_len.min(MAX_EVENT_NAME);
                let raw = cur.slice_at(offset + 18 + doff, take)?;
                name = Some(String::from_utf8_lossy(raw).into_owned());
            }
            // unknown tags are skipped by their declared length
            doff += length as usize + 2;
        }
    }

    Ok(EitEvent {
        event_id,
        start_time,
        running_status,
        scrambled,
        descriptors_loop_length,
        name,
    })
}

pub fn decode(section: &[u8]) -> Result<EitTable, SiError> {
    let cur = ByteCursor::new(section);
    let header = decode_header(&cur)?;

    // 14 fixed header bytes + 4 CRC bytes, minus the 3 bytes section_length
    // does not count.
    let mut parsed = 15u32;
    let mut offset = 14usize;
    let mut events = Vec::new();
    let mut capacity_exceeded = false;

    while parsed < u32::from(header.section_length) {
        if events.len() == MAX_EVENTS {
            capacity_exceeded = true;
            break;
        }
        let event = decode_event(&cur, offset)?;
        let advance = 12 + event.descriptors_loop_length as usize;
        events.push(event);
        offset += advance;
        parsed += advance as u32;
    }

    Ok(EitTable {
        header,
        events,
        capacity_exceeded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn short_event(name: &[u8]) -> Vec<u8> {
        let mut d = vec![0x4D, (3 + 1 + name.len() + 1) as u8];
        d.extend_from_slice(b"eng");
        d.push(name.len() as u8);
        d.extend_from_slice(name);
        d.push(0); // empty text
        d
    }

    fn eit_section(service_id: u16, events: &[(u16, u32, u8, &[u8])]) -> Vec<u8> {
        let events_total: usize = events.iter().map(|(_, _, _, d)| 12 + d.len()).sum();
        let section_length = 15 + events_total;
        let mut buf = vec![
            0x4E,
            0xF0 | ((section_length >> 8) as u8 & 0x0F),
            section_length as u8,
        ];
        buf.extend_from_slice(&service_id.to_be_bytes());
        buf.push(0xC0 | (2 << 1) | 0x01); // version 2, current_next 1
        buf.push(0x00);
        buf.push(0x00);
        buf.extend_from_slice(&0x0001u16.to_be_bytes()); // transport_stream_id
        buf.extend_from_slice(&0x2222u16.to_be_bytes()); // original_network_id
        buf.push(0x00); // segment_last_section_number
        buf.push(0x4E); // last_table_id
        for &(event_id, start_time, running_status, descriptors) in events {
            buf.extend_from_slice(&event_id.to_be_bytes());
            buf.extend_from_slice(&start_time.to_be_bytes());
            buf.extend_from_slice(&[0x00, 0x30, 0x00, 0x00]); // duration region
            let flags = (u16::from(running_status) << 13) | descriptors.len() as u16;
            buf.extend_from_slice(&flags.to_be_bytes());
            buf.extend_from_slice(descriptors);
        }
        buf.extend_from_slice(&[0; 4]);
        buf
    }

    #[test]
    fn decodes_header_fields() {
        let buf = eit_section(77, &[]);
        let eit = decode(&buf).unwrap();
        assert_eq!(eit.header.table_id, 0x4E);
        assert_eq!(eit.header.service_id, 77);
        assert_eq!(eit.header.version_number, 2);
        assert_eq!(eit.header.transport_stream_id, 0x0001);
        assert_eq!(eit.header.original_network_id, 0x2222);
        assert_eq!(eit.header.segment_last_section_number, 0);
        assert_eq!(eit.header.last_table_id, 0x4E);
        assert!(eit.events.is_empty());
    }

    #[test]
    fn running_event_name_survives_unknown_descriptors() {
        let mut descriptors = vec![0x50, 0x03, 0x01, 0x02, 0x03]; // component, skipped
        descriptors.extend_from_slice(&short_event(b"News"));
        descriptors.extend_from_slice(&[0x54, 0x02, 0x10, 0x00]); // content, skipped
        let buf = eit_section(5, &[(900, 0x1234_5678, 0x04, &descriptors)]);

        let eit = decode(&buf).unwrap();
        assert_eq!(eit.events.len(), 1);
        let ev = &eit.events[0];
        assert_eq!(ev.event_id, 900);
        assert_eq!(ev.start_time, 0x1234_5678);
        assert_eq!(ev.running_status, 0x04);
        assert!(!ev.scrambled);
        assert_eq!(ev.name.as_deref(), Some("News"));
    }

    #[test]
    fn non_running_event_keeps_no_name() {
        let descriptors = short_event(b"Later");
        let buf = eit_section(5, &[(901, 0x0000_0800, 0x01, &descriptors)]);
        let eit = decode(&buf).unwrap();
        assert_eq!(eit.events[0].running_status, 0x01);
        assert_eq!(eit.events[0].name, None);
    }

    #[test]
    fn long_names_are_cut_to_capacity() {
        let long = [b'x'; 30];
        let descriptors = short_event(&long);
        let buf = eit_section(5, &[(902, 0, 0x04, &descriptors)]);
        let eit = decode(&buf).unwrap();
        assert_eq!(eit.events[0].name.as_ref().unwrap().len(), MAX_EVENT_NAME);
    }

    #[test]
    fn rejects_wrong_table_id() {
        let mut buf = eit_section(5, &[]);
        buf[0] = 0x4F; // following, not handled
        assert_matches!(
            decode(&buf),
            Err(SiError::WrongTableId { expected: 0x4E, found: 0x4F })
        );
    }

    #[test]
    fn truncated_event_fails() {
        let buf = eit_section(5, &[(900, 0, 0x00, &[])]);
        assert_matches!(decode(&buf[..20]), Err(SiError::Truncated(_)));
    }

    #[test]
    fn overlong_event_list_is_cut_at_capacity() {
        let events: Vec<(u16, u32, u8, &[u8])> =
            (0..23).map(|i| (i as u16, 0, 0x00, &[] as &[u8])).collect();
        let buf = eit_section(5, &events);
        let eit = decode(&buf).unwrap();
        assert_eq!(eit.events.len(), MAX_EVENTS);
        assert!(eit.capacity_exceeded);
    }
}
