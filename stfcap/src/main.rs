//! stfcap entry point.
//!
//! ```text
//! stfcap                        Capture from the only attached device
//! stfcap --serial <S>           Capture from device <S>
//! stfcap --quality 480          Bound frames to 480x480
//! stfcap --config <path>        Load a custom config TOML
//! stfcap --gen-config           Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stfcap::config::AppConfig;
use stfcap::throughput::Throughput;
use stfcap_core::{CaptureSession, QualityTier};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "stfcap", about = "Live JPEG screen capture from an Android device")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "stfcap.toml")]
    config: PathBuf,

    /// adb serial of the device; overrides the config file.
    #[arg(short, long)]
    serial: Option<String>,

    /// Bounding box for captured frames: 1080, 720, 480 or 240.
    #[arg(short, long, value_parser = parse_quality)]
    quality: Option<QualityTier>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

fn parse_quality(value: &str) -> Result<QualityTier, String> {
    let side: u32 = value.parse().map_err(|e| format!("{e}"))?;
    QualityTier::try_from(side).map_err(|e| e.to_string())
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        println!("{}", AppConfig::default_toml()?);
        return Ok(());
    }

    let mut config = AppConfig::load(&cli.config);
    if let Some(serial) = cli.serial {
        config.device.serial = serial;
    }
    if let Some(quality) = cli.quality {
        config.session.supervisor.quality = quality;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("stfcap v{}", env!("CARGO_PKG_VERSION"));
    let device = config.adb_device();
    match device.serial() {
        Some(serial) => info!("device: {serial}"),
        None => info!("device: any attached"),
    }
    info!("quality: {}", config.session.supervisor.quality);
    info!("artifacts: {}", config.artifacts.base_url);

    let session = CaptureSession::new(
        Arc::new(device),
        Arc::new(config.artifact_host()),
        config.session.clone(),
    );

    if let Err(e) = session.start().await {
        error!(error = %e, "capture session failed to start");
        if let Err(stop) = session.stop().await {
            warn!(error = %stop, "cleanup after failed start");
        }
        return Err(e.into());
    }
    if let Some(info) = session.capture_info().await {
        info!(
            width = info.width,
            height = info.height,
            rotation = info.rotation,
            fps = info.fps,
            "device display"
        );
    }

    // Frames are only counted; drain the queue so delivery keeps flowing.
    let drain = session.take_frames().await.map(|mut frames| {
        tokio::spawn(async move { while frames.recv().await.is_some() {} })
    });

    let stats = session.stats();
    let mut throughput = Throughput::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;
    let mut last = Instant::now();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let rate = throughput.tick(&stats.borrow(), now - last);
                last = now;
                info!(
                    frames = rate.frames,
                    dropped = rate.dropped,
                    bytes = rate.bytes,
                    "{:.1} fps, {:.1} KiB/s",
                    rate.fps,
                    rate.kib_per_sec
                );
            }
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    warn!(error = %e, "ctrl-c handler failed");
                }
                info!("Ctrl-C received, shutting down");
                break;
            }
            outcome = session.wait() => {
                match outcome {
                    Ok(()) => info!("capture session ended"),
                    Err(e) => error!(error = %e, "capture session died"),
                }
                break;
            }
        }
    }

    let stopped = session.stop().await;
    if let Some(drain) = drain {
        drain.abort();
    }
    let totals = stats.borrow().clone();
    info!(
        delivered = totals.frames_delivered,
        dropped = totals.frames_dropped,
        bytes = totals.bytes_delivered,
        "capture totals"
    );
    stopped?;
    Ok(())
}
