use std::path::PathBuf;

use clap::Parser;
use dvb_zapper::config;
use dvb_zapper::zapper::{run, Options};

#[derive(Parser)]
struct Opt {
    /// Acquisition config file (JSON)
    #[clap(long)]
    config: PathBuf,

    /// UDP socket to bind + listen for the transport stream (IPv4)
    #[clap(long, default_value = "239.1.1.2:1234")]
    addr: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::parse();

    run(Options {
        addr: opt.addr.parse()?,
        config: config::load(&opt.config)?,
    })
    .await
}
