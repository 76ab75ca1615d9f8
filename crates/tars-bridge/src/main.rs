//! TARS bridge entry point.
//!
//! Runs the channel bridge standalone: display input is printed to stdout,
//! and every line read from stdin is broadcast to connected displays.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tars_bridge::{ChannelAccount, ChannelConfig, TarsChannel};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// TARS bridge - socket server between a host and the TARS display
#[derive(Parser, Debug)]
#[command(name = "tars-bridge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Custom socket path (defaults to the config value, then `/tmp/tars-channel.sock`)
    #[arg(long, value_name = "PATH")]
    socket_path: Option<PathBuf>,

    /// Config file (defaults to `~/.config/tars/config.json`)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Start even if the channel is disabled in the config
    #[arg(long)]
    enable: bool,
}

/// Set up logging with file output for debugging.
/// In debug builds, defaults to debug level and logs to timestamped file.
/// In release builds, defaults to info level and logs to stderr.
fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tars={default_level}")));

    if cfg!(debug_assertions) {
        let temp_dir = std::env::temp_dir();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("tars-bridge-{timestamp}.log");
        let log_path = temp_dir.join(&log_filename);

        let file_appender = tracing_appender::rolling::never(&temp_dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true);

        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer)
            .with(filter)
            .init();

        eprintln!("Logging to: {} (and stderr)", log_path.display());
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

fn load_config(args: &Args) -> Result<ChannelConfig> {
    let mut config = match args.config.clone().or_else(ChannelConfig::default_path) {
        Some(path) => ChannelConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ChannelConfig::default(),
    };

    if let Some(path) = &args.socket_path {
        config.socket_path = Some(path.clone());
    }
    if args.enable {
        config.enabled = true;
    }

    Ok(config)
}

/// Broadcast stdin lines until EOF or Ctrl-C.
async fn pump_stdin(channel: &ChannelAccount) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let receipt = channel.send_text("display", &line);
                    debug!(
                        "Broadcast {} to {} display(s)",
                        receipt.message_id, receipt.delivered_to
                    );
                }
                Ok(None) => {
                    info!("Stdin closed, shutting down");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging();

    let config = load_config(&args)?;
    let account = TarsChannel::resolve_account(&config);
    if !account.enabled {
        bail!(
            "tars-channel is disabled; set \"enabled\": true in the config or pass --enable"
        );
    }

    info!("Starting TARS bridge...");

    let channel = TarsChannel::start_account(account, |text| println!("{text}"))
        .await
        .context("Failed to start TARS bridge")?;

    pump_stdin(&channel).await;

    channel.stop().await;
    info!("TARS bridge stopped");
    Ok(())
}
