//! File transfer — the two daemon modes on top of the transport loops.
//!
//! Both modes take a `shutdown` future (Ctrl-C in the daemon). A send that
//! is interrupted before every block is acknowledged is an error.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use ferry_core::config::FerryConfig;
use ferry_core::{IntegrityChecker, Seq};
use ferry_services::{new_connection_table, Delivery, Receiver, Sender, TransportError};

/// How often the in-flight / connection snapshots are logged.
const STATS_INTERVAL: Duration = Duration::from_secs(5);

pub async fn send_file(
    socket: Arc<UdpSocket>,
    config: &FerryConfig,
    path: &Path,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read file: {}", path.display()))?;

    let sender = Sender::start(socket, config.network.peer_addr, &config.transport)?;

    let stats_printer = {
        let tracker = sender.tracker().clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            loop {
                interval.tick().await;
                let in_flight = tracker.len().await;
                let base = tracker.base().await;
                tracing::info!(in_flight, base = %base, "in-flight snapshot");
            }
        })
    };

    let started = tokio::time::Instant::now();
    let blocks = sender
        .send_all(&data)
        .await
        .context("failed to queue blocks")?;
    tracing::info!(blocks, bytes = data.len(), peer = %sender.peer(), "file queued");

    let outcome = tokio::select! {
        r = sender.wait_idle() => r.context("transfer failed"),
        _ = shutdown => {
            tracing::info!("shutdown signal received, cancelling transfer");
            sender.cancel().await;
            Err::<(), _>(TransportError::Cancelled).context("transfer cancelled")
        }
    };
    stats_printer.abort();
    outcome?;

    tracing::info!(
        blocks,
        bytes = data.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "transfer complete"
    );
    Ok(())
}

pub async fn receive_file(
    socket: Arc<UdpSocket>,
    config: &FerryConfig,
    path: &Path,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("failed to open output: {}", path.display()))?;

    let initial = Seq::new(config.transport.initial_sequence)?;
    let connections = new_connection_table();
    let (delivered_tx, mut delivered_rx) = mpsc::channel::<Delivery>(256);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    {
        let tx = shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown.await;
            tracing::info!("shutdown signal received");
            let _ = tx.send(());
        });
    }

    let receive_task = tokio::spawn(
        Receiver::new(
            socket,
            IntegrityChecker::new(config.transport.checksum),
            initial,
            connections.clone(),
            delivered_tx,
            shutdown_tx.subscribe(),
        )
        .with_window_limit(config.transport.receive_window)
        .with_idle_timeout(config.transport.peer_idle_timeout())
        .run(),
    );

    let connection_printer = {
        let connections = connections.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            loop {
                interval.tick().await;
                tracing::info!(count = connections.len(), "connection table snapshot");
                for c in connections.iter() {
                    tracing::info!(
                        peer = %c.key(),
                        base = %c.value().base(),
                        pending = c.value().pending(),
                        "  connection"
                    );
                }
            }
        })
    };

    let mut written = 0u64;
    while let Some(delivery) = delivered_rx.recv().await {
        file.write_all(&delivery.payload)
            .await
            .context("failed to write payload")?;
        written += delivery.payload.len() as u64;
        tracing::debug!(peer = %delivery.peer, sequence = %delivery.sequence, written, "payload written");
    }
    file.flush().await.context("failed to flush output")?;
    connection_printer.abort();

    match receive_task.await {
        Ok(r) => r?,
        Err(e) => tracing::error!(error = %e, "receive loop panicked"),
    }
    tracing::info!(written, path = %path.display(), "receiver stopped");
    Ok(())
}
