//! rallyd: Rally peer daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};

use rally_core::{PeerId, RallyConfig};
use rally_services::{Node, NodeSettings, SystemClock};

mod multicast;
mod sink;

use multicast::MulticastTransport;

/// Datagrams buffered between the socket and the node.
const INBOUND_QUEUE: usize = 1024;

/// Completed payloads buffered between the node and the sink.
const DELIVERY_QUEUE: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = RallyConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = RallyConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        RallyConfig::default()
    });

    let interface = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.network.interface.clone());
    let interface_index = multicast::if_index(&interface)?;

    // A fresh identity per process unless one is pinned in config.
    let local = if config.identity.peer_id.is_empty() {
        PeerId::generate()
    } else {
        PeerId::new(config.identity.peer_id.clone())
    };
    tracing::info!(
        peer = %local,
        display_name = %config.identity.display_name,
        interface,
        port = config.network.port,
        "rallyd starting"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Transport ────────────────────────────────────────────────────────────
    let transport = MulticastTransport::open(interface_index, config.network.port)
        .context("failed to open multicast transport")?;
    let listener_socket = multicast::make_listener_socket(interface_index, config.network.port)
        .context("failed to create multicast listener socket")?;
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);

    // ── Node ─────────────────────────────────────────────────────────────────
    let (mut node, handle) = Node::new(
        local,
        NodeSettings::from_config(&config),
        Arc::new(transport),
        inbound_rx,
        Arc::new(SystemClock),
        shutdown_tx.subscribe(),
    );
    let deliveries = node.deliveries(DELIVERY_QUEUE);

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let listener_task = tokio::spawn(multicast::listener_loop(
        listener_socket,
        inbound_tx,
        shutdown_tx.subscribe(),
    ));

    let sink_task = tokio::spawn(sink::sink_loop(
        deliveries,
        config.transfer.storage_path.clone(),
        shutdown_tx.subscribe(),
    ));

    let node_task = tokio::spawn(node.run());

    let api_port = config.network.api_port;
    let api_task = {
        let state = rally_api::ApiState {
            node: handle.clone(),
            clock: Arc::new(SystemClock),
            shutdown: shutdown_tx.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = rally_api::serve(state, api_port).await {
                tracing::error!(error = %e, "api server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = listener_task      => tracing::error!("multicast listener exited: {:?}", r),
        r = sink_task          => tracing::error!("transfer sink exited: {:?}", r),
        r = node_task          => tracing::error!("node exited: {:?}", r),
        r = api_task           => tracing::error!("api server exited: {:?}", r),
    }

    Ok(())
}
