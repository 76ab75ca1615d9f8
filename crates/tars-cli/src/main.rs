//! TARS channel CLI
//!
//! A terminal stand-in for the display process. Provides:
//! - `send`: push one line of input to the host
//! - `listen`: print what the host broadcasts
//! - `chat`: both at once, reading input from stdin
//!
//! With `--retry`, `listen` and `chat` behave like the display: they wait for
//! the bridge to come up and reconnect when it goes away.
//! - `status`: check whether a bridge is listening

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tars_protocol::{BridgeClient, ClientError, MessageReceiver, OutboundMessage, socket_path};
use tokio::io::{AsyncBufReadExt, BufReader};

const STATUS_TIMEOUT: Duration = Duration::from_secs(2);
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// TARS channel CLI
#[derive(Parser)]
#[command(name = "tars")]
#[command(about = "Talk to the TARS bridge from a terminal")]
#[command(version)]
#[command(after_help = "\
Examples:
  tars send \"what's the weather\"   Send one input line to the host
  tars listen                       Print host messages as they arrive
  tars listen --count 1             Wait for a single message, then exit
  tars listen --retry               Keep listening across bridge restarts
  tars chat                         Interactive session over stdin
  tars status                       Check whether the bridge is listening
")]
struct Cli {
    /// Socket path (defaults to `/tmp/tars-channel.sock`)
    #[arg(long, global = true, value_name = "PATH")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one input line to the host
    Send {
        /// Text to send (multiple words are joined with spaces)
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Print messages broadcast by the host
    Listen {
        /// Exit after this many messages
        #[arg(long)]
        count: Option<usize>,

        /// Wait for the bridge and reconnect when it goes away
        #[arg(long)]
        retry: bool,
    },

    /// Send stdin lines as input and print host messages
    Chat {
        /// Wait for the bridge and reconnect when it goes away
        #[arg(long)]
        retry: bool,
    },

    /// Check whether a bridge is listening
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let socket = cli.socket.unwrap_or_else(socket_path);

    match cli.command {
        Commands::Send { text } => run_send(&socket, &text.join(" ")).await,
        Commands::Listen { count, retry } => run_listen(&socket, count, retry).await,
        Commands::Chat { retry } => run_chat(&socket, retry).await,
        Commands::Status => {
            run_status(&socket).await;
            Ok(())
        }
    }
}

async fn connect(socket: &Path) -> Result<BridgeClient> {
    BridgeClient::connect_to(socket)
        .await
        .with_context(|| format!("Failed to connect to bridge at {}", socket.display()))
}

/// Whether `err` means the bridge is not there, as opposed to misbehaving.
fn is_bridge_down(err: &ClientError) -> bool {
    match err {
        ClientError::ConnectionClosed => true,
        ClientError::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
        ),
        ClientError::Codec(_) => false,
    }
}

/// Connect, waiting for the bridge to come up when `retry` is set.
async fn connect_retrying(socket: &Path, retry: bool) -> Result<BridgeClient> {
    loop {
        match BridgeClient::connect_to(socket).await {
            Ok(client) => return Ok(client),
            Err(e) if retry && is_bridge_down(&e) => {
                eprintln!(
                    "Bridge unavailable ({e}), retrying in {}s",
                    RETRY_DELAY.as_secs()
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to connect to bridge at {}", socket.display())
                });
            }
        }
    }
}

fn format_message(msg: &OutboundMessage) -> String {
    let time = chrono::DateTime::from_timestamp_millis(msg.timestamp).map_or_else(
        || "--:--:--".to_string(),
        |t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string(),
    );
    format!("[{time}] {}", msg.text)
}

async fn run_send(socket: &Path, text: &str) -> Result<()> {
    let mut client = connect(socket).await?;
    client.send_input(text).await.context("Failed to send input")?;
    println!("Sent");
    Ok(())
}

async fn run_listen(socket: &Path, count: Option<usize>, retry: bool) -> Result<()> {
    let mut client = connect_retrying(socket, retry).await?;
    let mut received = 0;

    while count.is_none_or(|limit| received < limit) {
        match client.next_message().await {
            Ok(msg) => {
                println!("{}", format_message(&msg));
                received += 1;
            }
            Err(e) if retry && is_bridge_down(&e) => {
                eprintln!("Bridge closed the connection, reconnecting");
                client = connect_retrying(socket, retry).await?;
            }
            Err(ClientError::ConnectionClosed) => {
                eprintln!("Bridge closed the connection");
                break;
            }
            Err(e) => return Err(e).context("Failed to read from bridge"),
        }
    }

    Ok(())
}

/// Print broadcasts until the bridge hangs up.
async fn print_messages(mut receiver: MessageReceiver) {
    loop {
        match receiver.next_message().await {
            Ok(msg) => println!("{}", format_message(&msg)),
            Err(ClientError::ConnectionClosed) => {
                eprintln!("Bridge closed the connection");
                break;
            }
            Err(e) => {
                eprintln!("Read error: {e}");
                break;
            }
        }
    }
}

async fn run_chat(socket: &Path, retry: bool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let (mut sender, receiver) = connect_retrying(socket, retry).await?.into_split();
        let mut printer = tokio::spawn(print_messages(receiver));

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read stdin")? else {
                        printer.abort();
                        return Ok(());
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Err(e) = sender.send_input(line).await {
                        if !retry {
                            return Err(e).context("Failed to send input");
                        }
                        eprintln!("Failed to send input: {e}");
                        printer.abort();
                        break;
                    }
                }
                _ = &mut printer => break,
            }
        }

        if !retry {
            return Ok(());
        }
        eprintln!("Reconnecting to bridge");
    }
}

async fn run_status(socket: &Path) {
    if !socket.exists() {
        println!("Status: Not running");
        println!("Socket: {} (not found)", socket.display());
        return;
    }

    match tokio::time::timeout(STATUS_TIMEOUT, BridgeClient::connect_to(socket)).await {
        Ok(Ok(_client)) => {
            println!("Status: Running");
            println!("Socket: {}", socket.display());
        }
        Ok(Err(e)) => {
            println!("Status: Not running (stale socket)");
            println!("Socket: {}", socket.display());
            println!("Error: {e}");
        }
        Err(_) => {
            println!("Status: Unresponsive");
            println!("Socket: {}", socket.display());
        }
    }
}
