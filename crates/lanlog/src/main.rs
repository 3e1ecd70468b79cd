//! Lanlog CLI
//!
//! Command-line front end: chat over the local network from a terminal.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use lanlog::{EngineEvent, LogId, Node, NodeConfig, UserId};

#[derive(Parser)]
#[command(name = "lanlog")]
#[command(about = "Serverless group chat over the local network")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (defaults to ~/.config/lanlog/config.toml or LANLOG_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the group, send each stdin line as a chat message, print what arrives
    Run {
        /// Address every message to this user
        #[arg(long)]
        to: Option<String>,
    },
    /// Print this device's handshake as sent on the wire
    Handshake,
    /// Print one log from the local store
    Log {
        #[arg(long)]
        user: String,
        #[arg(long)]
        device: String,
    },
    /// List every log in the local store
    Logs,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let path = cli.config.unwrap_or_else(NodeConfig::config_file_path);
    let config = NodeConfig::load_or_init(&path)
        .with_context(|| format!("Failed to load config: {}", path.display()))?;

    match cli.command {
        Commands::Run { to } => run(config, to.map(UserId::from)).await,
        Commands::Handshake => {
            let node = Node::open(config)?;
            println!("{}", node.handshake_json().await?);
            Ok(())
        }
        Commands::Log { user, device } => {
            let node = Node::open(config)?;
            let log = LogId::new(user, device);
            for record in node.records(&log).await? {
                println!(
                    "{:>6}  {:<7}  {}",
                    record.sequence,
                    record.kind.as_str(),
                    record.payload
                );
            }
            Ok(())
        }
        Commands::Logs => {
            let node = Node::open(config)?;
            for log in node.logs().await? {
                let records = node.records(&log).await?;
                let head = records.last().map_or(0, |r| r.sequence);
                let holes = records.iter().filter(|r| r.is_placeholder()).count();
                println!("{log}  head={head}  missing={holes}");
            }
            Ok(())
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
            Ok(())
        }
    }
}

async fn run(config: NodeConfig, to: Option<UserId>) -> Result<()> {
    let node = Node::open(config)?;
    let me = node.config().identity();
    node.start().await.context("Failed to join the multicast group")?;
    tracing::info!(user = %me.user_id, device = %me.device_id, "ready, type to chat");

    let mut events = node.subscribe();
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(text) if text.trim().is_empty() => {}
                Some(text) => {
                    node.send_chat(text, to.clone()).await?;
                }
                None => break,
            },
            event = events.recv() => match event {
                Ok(EngineEvent::RecordAccepted(record)) if record.device_id != me.device_id => {
                    match &record.recipient_user_id {
                        Some(to) => println!("[{}] @{}: {}", record.user_id, to, record.payload),
                        None => println!("[{}] {}", record.user_id, record.payload),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "display fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    node.stop().await?;
    Ok(())
}
