//! Rally integration test harness.
//!
//! Most tests run several nodes in-process on a shared `LocalBus` with
//! tokio's clock paused, so timeouts and TTLs elapse instantly and
//! deterministically. The `netns` module drives real `rallyd` processes
//! and skips itself unless the namespace environment is up:
//!
//!   sudo ./scripts/netns-up.sh
//!   sudo cargo test --test integration

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;

use rally_core::PeerId;
use rally_services::{LocalBus, Node, NodeEvent, NodeHandle, NodeSettings, TokioClock};

mod latency;
mod netns;
mod presence;
mod scoreboard;
mod transfers;

// ── Harness ───────────────────────────────────────────────────────────────────

/// A running node plus the switch that stops it.
pub struct TestNode {
    pub handle: NodeHandle,
    stop: broadcast::Sender<()>,
}

impl TestNode {
    pub fn id(&self) -> PeerId {
        self.handle.local_id().clone()
    }

    /// Stop the node. Its bus subscription closes once the task exits.
    pub fn stop(&self) {
        let _ = self.stop.send(());
    }
}

/// Nodes sharing one bus and one clock.
pub struct Cluster {
    pub bus: LocalBus,
    clock: TokioClock,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            bus: LocalBus::new(),
            clock: TokioClock::new(),
        }
    }

    pub fn spawn(&self, id: &str) -> TestNode {
        self.spawn_with(id, NodeSettings::default())
    }

    pub fn spawn_with(&self, id: &str, settings: NodeSettings) -> TestNode {
        let (stop, stop_rx) = broadcast::channel(1);
        let (node, handle) = Node::new(
            PeerId::from(id),
            NodeSettings {
                display_name: id.to_string(),
                ..settings
            },
            Arc::new(self.bus.clone()),
            self.bus.subscribe(),
            Arc::new(self.clock),
            stop_rx,
        );
        tokio::spawn(node.run());
        TestNode { handle, stop }
    }
}

/// Let virtual time pass.
pub async fn settle(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Wait (in virtual time) for the first event matching `pick`.
pub async fn wait_for<T>(
    events: &mut broadcast::Receiver<NodeEvent>,
    within: Duration,
    mut pick: impl FnMut(NodeEvent) -> Option<T>,
) -> Option<T> {
    tokio::time::timeout(within, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(event) {
                        return Some(found);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Deterministic, non-repeating-looking test payload.
pub fn pattern(len: usize) -> Bytes {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8)
        .collect::<Vec<u8>>()
        .into()
}
