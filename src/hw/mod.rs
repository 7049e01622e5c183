//! Tuner / demultiplexer / playback service boundary.
//!
//! The coordinator only ever talks to this trait; real set-top hardware and
//! the UDP software backend both sit behind it.

pub mod udp;

pub use udp::UdpDriver;

use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HwError {
    #[error("unknown filter handle {0}")]
    BadFilter(u32),
    #[error("unknown stream handle {0}")]
    BadStream(u32),
    #[error("backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Locked,
    NotLocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverySystem {
    DvbT,
    DvbT2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamCodec {
    Mpeg2Video,
    H264Video,
    MpegAudio,
}

/// Raw section delivery; runs on the backend's own task and must not block.
pub type SectionCallback = Box<dyn Fn(Bytes) + Send + Sync>;
/// Tuner lock notifications, same constraints.
pub type LockCallback = Box<dyn Fn(LockStatus) + Send + Sync>;

pub trait Driver: Send + Sync {
    fn lock_frequency(
        &self,
        frequency_hz: u32,
        bandwidth_mhz: u8,
        system: DeliverySystem,
    ) -> Result<(), HwError>;

    fn register_lock_callback(&self, cb: LockCallback);
    fn register_section_callback(&self, cb: SectionCallback);

    fn set_filter(&self, pid: u16, table_id: u8) -> Result<FilterHandle, HwError>;
    fn free_filter(&self, filter: FilterHandle) -> Result<(), HwError>;

    fn create_stream(&self, pid: u16, codec: StreamCodec) -> Result<StreamHandle, HwError>;
    fn remove_stream(&self, stream: StreamHandle) -> Result<(), HwError>;

    fn set_volume(&self, level: u32) -> Result<(), HwError>;
}
