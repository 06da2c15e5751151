//! sentryd - Scene Sentry daemon
//!
//! Opens the configured capture source, runs detection and action rules on a
//! single producer thread, raises throttled alerts and serves the annotated
//! stream plus recent events over HTTP until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scene_sentry::api::{ApiConfig, ApiServer};
use scene_sentry::{
    build_analyzer, build_detector_with_fallback, channel_from_config, open_source, DetectorKind,
    FrameSource, Pipeline, SentryConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML (or .json) configuration file.
    #[arg(long, env = "SENTRY_CONFIG")]
    config: Option<PathBuf>,
    /// Capture source: device index, /dev/video*, http(s) MJPEG url, image directory or stub://name.
    #[arg(long)]
    source: Option<String>,
    /// Detector variant: learned, classical or none.
    #[arg(long)]
    detector: Option<DetectorKind>,
    /// HTTP listen address.
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = SentryConfig::load_from(args.config.as_deref())?;
    if let Some(source) = args.source {
        cfg.source.url = source;
    }
    if let Some(kind) = args.detector {
        cfg.detector.kind = kind;
    }
    if let Some(addr) = args.addr {
        cfg.api_addr = addr;
    }
    cfg.validate()?;

    let detector = build_detector_with_fallback(&cfg.detector);
    let channel = channel_from_config(&cfg.notify);
    log::info!("notification channel: {}", channel.name());

    let source = open_source(&cfg.source).context("capture source unavailable")?;
    log::info!("capture source {} opened", source.stats().source);

    let analyzer = build_analyzer(&cfg, detector, channel);
    let pipeline = Pipeline::spawn(source, analyzer, cfg.pipeline_config())?;

    let api_config = ApiConfig {
        addr: cfg.api_addr.clone(),
        snapshot_dir: cfg.alerts.snapshot_dir.clone(),
        ..ApiConfig::default()
    };
    let api_handle = ApiServer::new(api_config, pipeline.broadcaster()).spawn()?;
    log::info!("http api listening on http://{}", api_handle.addr);

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    log::info!("sentryd running; press Ctrl-C to stop");
    while !shutdown.load(Ordering::SeqCst) {
        if !pipeline.is_running() {
            log::error!("producer exited unexpectedly");
            break;
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutdown signal received, stopping...");
    api_handle.stop()?;
    let stats = pipeline.stats();
    pipeline.stop()?;
    log::info!(
        "stopped after {} frames ({} alerts, {} read failures)",
        stats.frames_captured,
        stats.alerts_sent,
        stats.read_failures
    );
    Ok(())
}
