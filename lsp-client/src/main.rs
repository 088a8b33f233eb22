//! Entry point for `lsp-client`.
//!
//! Connects to an LSP server, sends each line of stdin as one message and
//! prints every message the server sends back. `main.rs` owns only process
//! setup (logging, argument parsing); all protocol work lives in the library.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use lsp_client::params::{DEFAULT_EPOCH_LIMIT, DEFAULT_EPOCH_MILLIS, DEFAULT_WINDOW_SIZE};
use lsp_client::{Client, Params};

/// Line-oriented client for the LSP protocol.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Server address (e.g. localhost:9999).
    #[arg(short, long)]
    server: String,

    /// Maximum number of unacknowledged messages in flight.
    #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
    window_size: usize,

    /// Epoch length in milliseconds.
    #[arg(long, default_value_t = DEFAULT_EPOCH_MILLIS)]
    epoch_millis: u64,

    /// Epochs without an answer before the connection is abandoned.
    #[arg(long, default_value_t = DEFAULT_EPOCH_LIMIT)]
    epoch_limit: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let params = Params {
        window_size: cli.window_size,
        epoch_millis: cli.epoch_millis,
        epoch_limit: cli.epoch_limit,
    };

    let mut client = Client::connect(&cli.server, params)
        .await
        .with_context(|| format!("connecting to {}", cli.server))?;
    println!("connected, conn_id={}", client.conn_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("reading stdin")? {
                Some(line) => client.write(line.as_bytes()).await?,
                None => break,
            },
            payload = client.read() => {
                let payload = payload?;
                println!("{}", String::from_utf8_lossy(&payload));
            }
        }
    }

    log::info!("stdin closed, draining conn {}", client.conn_id());
    client.join().await?;
    Ok(())
}
