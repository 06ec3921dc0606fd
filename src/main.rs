use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vision_rtc::config::ConfigStore;
use vision_rtc::overlay::Color;
use vision_rtc::video::{ReplayEncoderFactory, Resolution, TestPatternCamera};
use vision_rtc::SessionManager;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// vision-rtc command line arguments
#[derive(Parser, Debug)]
#[command(name = "vision-rtc")]
#[command(version, about = "Low-latency WebRTC camera streamer", long_about = None)]
struct CliArgs {
    /// Annex-B H.264/H.265 file replayed as the encoder output
    #[arg(short = 's', long, value_name = "FILE")]
    stream_file: PathBuf,

    /// Bind address for the bootstrap page (overrides database config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// Bootstrap HTTP port (overrides database config)
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// Signaling port (overrides database config)
    #[arg(long, value_name = "PORT")]
    signaling_port: Option<u16>,

    /// Remote signaling address; joins a rendezvous server instead of hosting one
    #[arg(long, value_name = "ADDRESS")]
    signaling_ip: Option<String>,

    /// Video codec: h264 or h265 (overrides database config)
    #[arg(short = 'c', long, value_name = "CODEC")]
    codec: Option<String>,

    /// Rate control: cbr or vbr (overrides database config)
    #[arg(long, value_name = "MODE")]
    rate_control: Option<String>,

    /// Target bitrate in bits per second (overrides database config)
    #[arg(short = 'b', long, value_name = "BPS")]
    bitrate: Option<u32>,

    /// ICE server URL, empty for host candidates only (overrides database config)
    #[arg(long, value_name = "URL")]
    stun_server: Option<String>,

    /// Camera resolution as WIDTHxHEIGHT
    #[arg(long, value_name = "WxH", default_value = "1280x720", value_parser = parse_resolution)]
    resolution: Resolution,

    /// Camera frame rate
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Data directory path (default: /etc/vision-rtc)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting vision-rtc v{}", env!("CARGO_PKG_VERSION"));

    let data_dir = args.data_dir.clone().unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    let config_store = ConfigStore::new(&data_dir.join("vision-rtc.db")).await?;
    let mut config = (*config_store.get()).clone();

    // CLI overrides are applied for this run only
    if let Some(address) = &args.address {
        config.stream.ip = address.clone();
    }
    if let Some(port) = args.http_port {
        config.stream.port = port;
    }
    if let Some(port) = args.signaling_port {
        config.stream.signaling_port = port;
    }
    if let Some(ip) = &args.signaling_ip {
        config.stream.signaling_ip = ip.clone();
    }
    if let Some(codec) = &args.codec {
        config.stream.codec = codec.clone();
    }
    if let Some(rc) = &args.rate_control {
        config.stream.rate_control = rc.clone();
    }
    if let Some(bitrate) = args.bitrate {
        config.stream.bitrate = bitrate;
    }
    if let Some(stun) = &args.stun_server {
        config.stream.stun_server = stun.clone();
    }

    let encoders = Arc::new(ReplayEncoderFactory::new(&args.stream_file));
    let manager = SessionManager::new(config, encoders)?;

    let camera = TestPatternCamera::new(args.resolution, args.fps)?;
    manager.bind_camera(Arc::new(camera))?;

    // Border region on the software overlay plane; a device build installs
    // its composition hardware with `with_overlay_backend`
    if let Err(e) = manager.draw_rect(
        0,
        0,
        0,
        args.resolution.width as i32,
        args.resolution.height as i32,
        Color::GREEN,
        4,
    ) {
        tracing::warn!("Failed to draw overlay border: {}", e);
    }

    manager.start().await?;
    for url in manager.get_urls() {
        tracing::info!("Viewer page: {}", url);
    }

    let mut events = manager.events().subscribe();
    let event_log = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!("Event: {}", event.event_name());
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    manager.stop().await?;
    event_log.abort();
    tracing::info!("Bye");
    Ok(())
}

fn parse_resolution(s: &str) -> Result<Resolution, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("Expected WIDTHxHEIGHT, got {}", s))?;
    let width = w.trim().parse().map_err(|_| format!("Invalid width: {}", w))?;
    let height = h.trim().parse().map_err(|_| format!("Invalid height: {}", h))?;
    Ok(Resolution::new(width, height))
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "vision_rtc=error,tower_http=error",
        LogLevel::Warn => "vision_rtc=warn,tower_http=warn",
        LogLevel::Info => "vision_rtc=info,tower_http=info",
        LogLevel::Verbose => "vision_rtc=debug,tower_http=info",
        LogLevel::Debug => "vision_rtc=debug,tower_http=debug,webrtc=info",
        LogLevel::Trace => "vision_rtc=trace,tower_http=debug,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("VISION_RTC_DATA_DIR") {
        return PathBuf::from(path);
    }
    PathBuf::from("/etc/vision-rtc")
}
