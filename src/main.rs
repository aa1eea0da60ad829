//! USB MIDI host - command line monitor
//!
//! Decodes captured USB-MIDI dumps, or (with the `rusb` feature) prints events
//! from every attached USB MIDI device.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use usb_midi_host::config::HostConfig;
use usb_midi_host::monitor::{self, OutputFormat};

/// USB MIDI host - decode and monitor USB-MIDI traffic
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Decode a hex dump of raw bulk-IN bytes instead of reading devices
    #[arg(long, value_name = "FILE")]
    decode: Option<PathBuf>,

    /// List attached USB devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = HostConfig::resolve(args.config.as_deref()).await?;

    let level = args.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, config.logging.json)?;

    info!("Starting USB MIDI host v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        info!("Configuration file: {}", path.display());
    }

    let format = if args.json { OutputFormat::Json } else { OutputFormat::Text };

    if let Some(path) = &args.decode {
        return monitor::run_decode(path, format, config.rpn.parameter_number).await;
    }

    run_live(&args, &config, format).await
}

#[cfg(feature = "rusb")]
async fn run_live(args: &Args, config: &HostConfig, format: OutputFormat) -> Result<()> {
    if args.list_devices {
        return monitor::list_devices(config);
    }
    monitor::run_monitor(config, format).await?;
    info!("USB MIDI host shutdown complete");
    Ok(())
}

#[cfg(not(feature = "rusb"))]
async fn run_live(args: &Args, _config: &HostConfig, _format: OutputFormat) -> Result<()> {
    if args.list_devices {
        anyhow::bail!("Listing USB devices requires the `rusb` feature");
    }
    anyhow::bail!("Reading USB devices requires the `rusb` feature; use --decode <FILE> to decode a dump")
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // Logs go to stderr so event output on stdout stays parseable
    let text_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(true)
    });
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_thread_names(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .init();

    Ok(())
}
