//! ferryd — Ferry reliable block transfer daemon.
//!
//!   ferryd send <file>   deliver a file to network.peer_addr
//!   ferryd recv <file>   append in-order payloads to <file> until Ctrl-C

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::net::UdpSocket;

use ferry_core::config::FerryConfig;

mod transfer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = FerryConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = FerryConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        FerryConfig::default()
    });

    let mut args = std::env::args().skip(1);
    let (mode, path) = match (args.next(), args.next()) {
        (Some(mode), Some(path)) => (mode, PathBuf::from(path)),
        _ => bail!("usage: ferryd <send|recv> <file>"),
    };

    tracing::info!(
        mode = %mode,
        path = %path.display(),
        checksum = %config.transport.checksum,
        "ferryd starting"
    );

    match mode.as_str() {
        "send" => {
            // Ephemeral local port; acks come back to it.
            let bind = if config.network.peer_addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
            let socket = Arc::new(
                UdpSocket::bind(bind)
                    .await
                    .context("failed to bind send socket")?,
            );
            transfer::send_file(socket, &config, &path, ctrl_c()).await
        }
        "recv" => {
            let socket = Arc::new(
                UdpSocket::bind(config.network.bind_addr)
                    .await
                    .with_context(|| format!("failed to bind {}", config.network.bind_addr))?,
            );
            tracing::info!(addr = %socket.local_addr()?, "listening");
            transfer::receive_file(socket, &config, &path, ctrl_c()).await
        }
        other => bail!("unknown mode {other:?}, expected send or recv"),
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
