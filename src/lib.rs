// src/lib.rs
//! DVB channel-acquisition middleware: SI table decoding (PAT/PMT/EIT), a
//! deterministic channel-switch coordinator, and a software UDP backend for
//! running against an IPTV transport stream.

pub mod zapper {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use tokio::io::{AsyncBufReadExt, BufReader};

    use crate::config::Config;
    use crate::coordinator::Coordinator;
    use crate::hw::UdpDriver;
    use crate::osd::ConsoleOsd;

    pub struct Options {
        pub addr: SocketAddr,
        pub config: Config,
    }

    /// Async entry-point; returns when the user quits or stdin closes.
    pub async fn run(opts: Options) -> anyhow::Result<()> {
        let driver = Arc::new(UdpDriver::bind(opts.addr)?);
        let coordinator = Coordinator::start(opts.config, driver, Arc::new(ConsoleOsd));

        // stdin stands in for the remote-control decoder
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let key = line.trim();
            match key {
                "" => {}
                "up" => coordinator.channel_up(),
                "down" => coordinator.channel_down(),
                "vol+" => coordinator.volume_up(),
                "vol-" => coordinator.volume_down(),
                "mute" => coordinator.toggle_mute(),
                "info" => coordinator.show_info(),
                "retune" => coordinator.retune(),
                "quit" | "exit" => break,
                _ if key.bytes().all(|b| b.is_ascii_digit()) => {
                    for b in key.bytes() {
                        coordinator.digit(b - b'0');
                    }
                }
                _ => println!("keys: up down vol+ vol- mute info retune <digits> quit"),
            }
        }

        coordinator.shutdown().await;
        Ok(())
    }
}

pub mod config;
pub mod constants;
pub mod coordinator;
pub mod cursor;
pub mod hw;
pub mod osd;
pub mod selector;
pub mod si;
pub mod si_store;
pub mod volume;
