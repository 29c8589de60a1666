//! qr_relay - scan a live video stream for QR codes
//!
//! This binary:
//! 1. Loads configuration (file, environment, command line)
//! 2. Creates a recognition session for the configured engine
//! 3. Runs the frame relay on a background thread
//! 4. Prints each newly recognized code until the stream ends or Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use qr_relay::{
    create_session, spawn_relay, DefaultOpener, FrameRelay, RelayConfig, RtspTransport,
    SinkFormat,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "QR_RELAY_CONFIG")]
    config: Option<PathBuf>,
    /// Stream URL: rtsp://, http(s)://, stub:// or a local path.
    #[arg(long)]
    url: Option<String>,
    /// Recognition backend (rqrr, null).
    #[arg(long)]
    engine: Option<String>,
    /// Output format for recognized codes (plain, json, log).
    #[arg(long)]
    format: Option<String>,
    /// RTSP delivery mode (tcp, udp).
    #[arg(long)]
    rtsp_transport: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = RelayConfig::load_from(args.config.as_deref())?;
    if let Some(url) = args.url {
        cfg.url = url;
    }
    if let Some(engine) = args.engine {
        cfg.engine.backend = engine;
    }
    if let Some(format) = args.format.as_deref() {
        cfg.output = SinkFormat::parse(format)?;
    }
    if let Some(transport) = args.rtsp_transport.as_deref() {
        cfg.stream.rtsp_transport = RtspTransport::parse(transport)?;
    }
    cfg.validate()?;

    let session = create_session(&cfg.engine)?;
    log::info!(
        "engine={} symbologies={:?} duplicate_window={:?}",
        session.name(),
        cfg.engine.symbologies,
        cfg.engine.duplicate_window
    );

    let relay = FrameRelay::new(cfg.url.clone(), cfg.transport_options());
    let handle = spawn_relay(relay, DefaultOpener, session, cfg.output.build())?;

    let cancel = handle.cancel_token();
    ctrlc::set_handler(move || {
        log::info!("interrupt received; stopping relay");
        cancel.cancel();
    })?;

    handle.join()?;
    Ok(())
}
