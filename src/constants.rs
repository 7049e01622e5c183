//! Constants for MPEG-TS section handling and channel acquisition

use std::time::Duration;

/// MPEG-TS packet constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Well-known PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_EIT: u16 = 0x0012;

/// Table ids handled by the acquisition protocol
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;
pub const TABLE_ID_EIT_PF: u8 = 0x4E; // present/following, actual TS

/// EIT running_status value for "running now"
pub const RUNNING_STATUS_RUNNING: u8 = 0x04;

/// Stream-type classes used when picking a channel's elementary streams
pub const VIDEO_STREAM_TYPES: &[u8] = &[0x01, 0x02, 0x1B];
pub const AUDIO_STREAM_TYPES: &[u8] = &[0x03, 0x04];
pub const STREAM_TYPE_TELETEXT: u8 = 0x06;

/// Tuner lock wait
pub const TUNER_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-table await bounds (TR 101 290 maximum repetition intervals)
pub const PAT_WAIT: Duration = Duration::from_millis(500);
pub const PMT_WAIT: Duration = Duration::from_millis(500);
pub const EIT_WAIT: Duration = Duration::from_secs(2);

/// Filter re-arm attempts per table before the step gives up
pub const SECTION_RETRY_LIMIT: u32 = 3;

/// Bounded depth of the section handoff queue; overflow drops the section
pub const SECTION_QUEUE_DEPTH: usize = 32;

/// Keypad digits are committed after this much silence
pub const DIGIT_ENTRY_WINDOW: Duration = Duration::from_millis(1500);

/// Re-run the acquisition sequence this often to refresh event metadata
pub const EVENT_REFRESH_PERIOD: Duration = Duration::from_secs(30);
