//! frbridge-cli - Command-line interface for frbridge
//!
//! Offline frame tools plus live monitoring and control of a running bridge.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use frbridge_client::{Client, ClientError, ConnectionConfig};
use frbridge_protocol::{Encoder, Frame, Source};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "frbridge-cli")]
#[command(about = "Command-line interface for the frbridge FlexRay interceptor")]
#[command(version)]
struct Cli {
    /// Bridge address
    #[arg(short, long, default_value = "127.0.0.1:7800", env = "FRBRIDGE_SERVER")]
    server: SocketAddr,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Ecu,
    Vehicle,
}

impl From<SourceArg> for Source {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Ecu => Source::Ecu,
            SourceArg::Vehicle => Source::Vehicle,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Decode and validate raw frame bytes (offline)
    Decode {
        /// Frame bytes as hex: header, payload, trailer
        data: String,

        /// Side of the interceptor the frame was captured on
        #[arg(long, value_enum, default_value = "ecu")]
        source: SourceArg,
    },

    /// Build a frame with correct CRCs (offline)
    Encode {
        /// Frame ID (0..=2047, decimal or 0x hex)
        #[arg(short, long, value_parser = commands::parse_int::<u16>)]
        id: u16,

        /// Cycle count (0..=63)
        #[arg(short, long, value_parser = commands::parse_int::<u8>)]
        cycle: u8,

        /// Payload bytes as hex
        #[arg(short, long, default_value = "")]
        payload: String,

        /// Indicator bits (5-bit field)
        #[arg(long, default_value = "0", value_parser = commands::parse_int::<u8>)]
        indicators: u8,
    },

    /// Compute an end-to-end CRC-8 (offline)
    E2e {
        /// CRC initial value
        #[arg(long, value_parser = commands::parse_int::<u8>)]
        init: u8,

        /// Covered bytes as hex
        data: String,
    },

    /// Stream exported frames until Ctrl+C
    Monitor {
        /// Print one JSON object per frame
        #[arg(long)]
        json: bool,

        /// Stop after this many frames
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Only show this frame ID
        #[arg(long, value_parser = commands::parse_int::<u16>)]
        id: Option<u16>,
    },

    /// Save exported frames to a capture file for replay
    Record {
        /// Output file
        file: PathBuf,

        /// Stop after this many frames
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },

    /// Queue replacement bytes for the next injection of a frame
    Override {
        /// Frame ID
        #[arg(short, long, value_parser = commands::parse_int::<u16>)]
        id: u16,

        /// Cycle base the override applies to
        #[arg(short, long, default_value = "0", value_parser = commands::parse_int::<u8>)]
        base: u8,

        /// Replacement bytes as hex
        #[arg(short, long)]
        data: String,
    },

    /// Enable template injection
    Enable,

    /// Disable template injection
    Disable,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Offline commands need no bridge
    let offline = match &cli.command {
        Commands::Decode { data, source } => Some(commands::decode(data, (*source).into())),
        Commands::Encode {
            id,
            cycle,
            payload,
            indicators,
        } => Some(commands::encode(*id, *cycle, payload, *indicators)),
        Commands::E2e { init, data } => Some(commands::e2e(*init, data)),
        _ => None,
    };
    if let Some(result) = offline {
        match result {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let client = Client::new(ConnectionConfig::new(cli.server));
    client.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;

    match cli.command {
        Commands::Monitor { json, count, id } => {
            eprintln!("{} {}", "Monitoring".green(), cli.server.to_string().cyan());
            eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

            client.start_export().await?;
            let shown = stream_frames(&client, count, |frame| {
                if id.map_or(true, |want| frame.frame_id == want) {
                    println!("{}", commands::format_frame(frame, json));
                    true
                } else {
                    false
                }
            })
            .await;
            eprintln!("{} frames", shown);
        }
        Commands::Record { file, count } => {
            let mut out = tokio::fs::File::create(&file).await.map_err(|e| {
                eprintln!("{}: {}: {}", "Error".red(), file.display(), e);
                e
            })?;
            eprintln!(
                "{} to {}",
                "Recording".green(),
                file.display().to_string().cyan()
            );
            eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

            client.start_export().await?;
            let mut buf = Vec::new();
            let recorded = stream_frames(&client, count, |frame| {
                buf.extend_from_slice(&Encoder::encode_record(frame));
                true
            })
            .await;
            out.write_all(&buf).await?;
            out.flush().await?;
            eprintln!("{} {} frames", "Saved".green(), recorded);
        }
        cmd => match commands::execute(&client, cmd).await {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    client.close().await?;
    Ok(())
}

/// Receives frames until Ctrl+C, disconnect or `limit` frames accepted by
/// `on_frame`. Returns the number accepted.
async fn stream_frames<F>(client: &Client, limit: Option<u64>, mut on_frame: F) -> u64
where
    F: FnMut(&Frame) -> bool,
{
    let mut accepted = 0u64;
    loop {
        if limit.is_some_and(|n| accepted >= n) {
            break;
        }
        tokio::select! {
            result = client.next_frame() => {
                match result {
                    Ok(frame) => {
                        if on_frame(&frame) {
                            accepted += 1;
                        }
                    }
                    Err(ClientError::ConnectionClosed) => {
                        eprintln!("{}", "Connection closed".red());
                        break;
                    }
                    Err(e) => {
                        eprintln!("{}: {}", "Error".red(), e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping...".dimmed());
                break;
            }
        }
    }
    accepted
}
