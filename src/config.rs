//! Acquisition configuration.
//!
//! Loaded once at startup; the expected pids are only enforced on the very
//! first acquisition, live channels may legitimately move theirs later.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::hw::{DeliverySystem, StreamCodec};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub frequency_hz: u32,
    pub bandwidth_mhz: u8,
    pub delivery_system: DeliverySystem,
    /// Channel shown right after startup.
    pub program_index: u16,
    pub audio_pid: u16,
    pub video_pid: u16,
    pub audio_codec: StreamCodec,
    pub video_codec: StreamCodec,
}

pub fn load(path: &Path) -> anyhow::Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    let config: Config = serde_json::from_str(&raw)
        .with_context(|| format!("cannot parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_config() {
        let raw = r#"{
            "frequency_hz": 754000000,
            "bandwidth_mhz": 8,
            "delivery_system": "dvb_t2",
            "program_index": 0,
            "audio_pid": 301,
            "video_pid": 300,
            "audio_codec": "mpeg_audio",
            "video_codec": "mpeg2_video"
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.frequency_hz, 754_000_000);
        assert_eq!(config.delivery_system, DeliverySystem::DvbT2);
        assert_eq!(config.video_codec, StreamCodec::Mpeg2Video);
        assert_eq!(config.program_index, 0);
    }
}
