//! Terminal client for the Parlor server.
//!
//! Prints every server line and forwards stdin to the server. Exits when the
//! server sends `close`, hangs up, or stdin ends.

use anyhow::Result;
use api::{CLOSE_SIGNAL, SERVER_PREFIX, split_speaker};
use clap::Parser;
use client::Client;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "parlor-client")]
#[command(about = "Chat and play Rock-Paper-Scissors on a Parlor server", long_about = None)]
struct Args {
    /// Server address.
    #[arg(short, long, default_value = "127.0.0.1:12345")]
    addr: String,

    /// Answer the username prompt automatically.
    #[arg(short, long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let (mut writer, mut reader) = Client::connect(&args.addr).await?.split();
    if let Some(name) = &args.name {
        writer.send(name).await?;
    }

    // stdin -> server
    let input = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if writer.send(&line).await.is_err() {
                return;
            }
        }
        debug!("stdin closed, leaving");
        let _ = writer.send(CLOSE_SIGNAL).await;
    });

    // server -> stdout
    while let Some(line) = reader.recv().await? {
        if line == CLOSE_SIGNAL {
            break;
        }
        match split_speaker(&line) {
            Some((SERVER_PREFIX, text)) => println!("* {text}"),
            _ => println!("{line}"),
        }
    }

    input.abort();
    Ok(())
}
