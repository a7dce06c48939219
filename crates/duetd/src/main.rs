//! Duet Daemon (duetd)
//!
//! The relay process for Duet: holds the canonical document and fans out
//! edits and cursor presence between connected editors.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (WebSocket on 0.0.0.0:5264, empty document)
//! duetd
//!
//! # Custom port and initial text
//! duetd --port 7000 --seed "This is the Starting Document"
//!
//! # With configuration file
//! duetd --config /etc/duet/duet.toml
//! ```

mod config;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use duet_transport::{BroadcastHub, WebSocketServer};

use crate::config::{Args, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_args(Args::parse())?;

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(config.level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner();

    let addr = config.addr()?;
    let hub = Arc::new(BroadcastHub::new(&config.seed));
    info!(addr = %addr, seed_len = config.seed.len(), "Starting Duet relay");

    let server = WebSocketServer::new(hub.clone(), addr);
    let mut handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "WebSocket server error");
        }
    });

    // Wait for shutdown signal or server failure
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down...");
            handle.abort();
        }
        _ = &mut handle => {}
    }

    let stats = hub.stats();
    info!(
        connections = stats.connections,
        document_len = stats.document_len,
        "Relay stopped"
    );
    Ok(())
}

fn print_banner() {
    println!(
        r#"
  ╔╦╗╦ ╦╔═╗╔╦╗
   ║║║ ║║╣  ║
  ═╩╝╚═╝╚═╝ ╩
  Collaborative plain-text sync
  Version {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
