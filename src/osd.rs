//! Display collaborator boundary.

use serde::Serialize;

use crate::coordinator::ResolvedChannel;

pub trait Osd: Send + Sync {
    fn channel_resolved(&self, channel: &ResolvedChannel);
    fn volume_changed(&self, level: u8, muted: bool);
}

/// Renders banners as timestamped JSON on stdout.
pub struct ConsoleOsd;

#[derive(Serialize)]
struct BannerJson<'a> {
    ts_time: String,
    channel: u16,
    audio_pid: Option<u16>,
    video_pid: Option<u16>,
    teletext: bool,
    /// No video stream means a radio service.
    radio: bool,
    event_time: &'a str,
    event_name: &'a str,
}

#[derive(Serialize)]
struct VolumeJson {
    ts_time: String,
    volume: u8,
    muted: bool,
}

impl Osd for ConsoleOsd {
    fn channel_resolved(&self, channel: &ResolvedChannel) {
        let banner = BannerJson {
            ts_time: chrono::Utc::now().to_rfc3339(),
            channel: channel.program_number,
            audio_pid: channel.audio_pid,
            video_pid: channel.video_pid,
            teletext: channel.teletext,
            radio: channel.video_pid.is_none(),
            event_time: &channel.event_time,
            event_name: &channel.event_name,
        };
        println!("{}", serde_json::to_string_pretty(&banner).unwrap());
    }

    fn volume_changed(&self, level: u8, muted: bool) {
        let json = VolumeJson {
            ts_time: chrono::Utc::now().to_rfc3339(),
            volume: level,
            muted,
        };
        println!("{}", serde_json::to_string_pretty(&json).unwrap());
    }
}
