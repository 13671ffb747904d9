//! Node: the single task that owns one peer's dispatcher and timers.
//!
//! Inbound frames, caller commands and every periodic job are arms of one
//! `select!` loop, so protocol state is never shared or locked. Callers hold a
//! [`NodeHandle`]: commands travel over mpsc with oneshot replies, the read
//! model is published on a `watch` channel after every step, and state
//! transitions go out on a `broadcast` event feed. Completed inbound payloads
//! also go out on a dedicated bounded channel that never drops.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rally_core::{PeerId, RallyConfig, Timestamp, TransferId};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::dispatch::Dispatcher;
use crate::event::NodeEvent;
use crate::game_state::{GameState, MatchClock};
use crate::latency::LatencyStats;
use crate::peer::PeerRecord;
use crate::transfer::{
    CompletedTransfer, Direction, TransferError, TransferProgress, TransferSettings,
};
use crate::transport::{Inbound, Transport};

const COMMAND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 256;

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub display_name: String,
    pub heartbeat_interval: Duration,
    pub peer_ttl: Duration,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    /// How often inbound transfers are checked for inactivity.
    pub stall_check_interval: Duration,
    pub inactivity_timeout: Duration,
    pub transfer: TransferSettings,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            display_name: "player".to_string(),
            heartbeat_interval: Duration::from_secs(5),
            peer_ttl: Duration::from_secs(10),
            probe_interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(5),
            stall_check_interval: Duration::from_secs(1),
            inactivity_timeout: Duration::from_secs(30),
            transfer: TransferSettings::default(),
        }
    }
}

impl NodeSettings {
    pub fn from_config(config: &RallyConfig) -> Self {
        Self {
            display_name: config.identity.display_name.clone(),
            heartbeat_interval: config.presence.heartbeat_interval(),
            peer_ttl: config.presence.peer_ttl(),
            probe_interval: config.latency.probe_interval(),
            probe_timeout: config.latency.probe_timeout(),
            stall_check_interval: Duration::from_secs(1),
            inactivity_timeout: config.transfer.inactivity_timeout(),
            transfer: TransferSettings {
                chunk_size: config.transfer.chunk_size,
                chunk_delay: config.transfer.chunk_delay(),
                max_transfer_bytes: config.transfer.max_transfer_bytes,
            },
        }
    }

    /// Presence sweep cadence: half the ttl.
    pub fn sweep_interval(&self) -> Duration {
        (self.peer_ttl / 2).max(Duration::from_millis(1))
    }
}

// ── Read model ────────────────────────────────────────────────────────────────

/// Everything a caller can observe about a node at one instant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub local_id: PeerId,
    pub display_name: String,
    pub taken_at: Timestamp,
    pub active_peers: usize,
    pub peers: Vec<PeerRecord>,
    pub latency: LatencyStats,
    pub transfers: Vec<TransferProgress>,
    pub game: GameState,
    /// Effective chunk size for outbound transfers.
    pub chunk_size: u32,
}

// ── Commands ──────────────────────────────────────────────────────────────────

enum NodeCommand {
    SendPayload {
        name: String,
        mime_hint: Option<String>,
        payload: Bytes,
        reply: oneshot::Sender<Result<TransferId, TransferError>>,
    },
    CancelTransfer {
        id: TransferId,
        reply: oneshot::Sender<Result<TransferProgress, TransferError>>,
    },
    Join {
        display_name: String,
        reply: oneshot::Sender<()>,
    },
    ReportScore {
        score: u64,
        reply: oneshot::Sender<()>,
    },
    Award {
        points: u64,
        reply: oneshot::Sender<u64>,
    },
    StartMatch {
        duration_seconds: u32,
        reply: oneshot::Sender<MatchClock>,
    },
    ResetMatch {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("node has stopped")]
    Stopped,
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cheap, cloneable access to a running node.
#[derive(Clone)]
pub struct NodeHandle {
    local: PeerId,
    commands: mpsc::Sender<NodeCommand>,
    snapshots: watch::Receiver<NodeSnapshot>,
    events: broadcast::Sender<NodeEvent>,
}

impl NodeHandle {
    pub fn local_id(&self) -> &PeerId {
        &self.local
    }

    /// Latest published read model.
    pub fn snapshot(&self) -> NodeSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<NodeSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> NodeCommand,
    ) -> Result<T, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| NodeError::Stopped)?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    /// Start an outbound transfer to every peer.
    pub async fn send_payload(
        &self,
        name: impl Into<String>,
        mime_hint: Option<String>,
        payload: Bytes,
    ) -> Result<TransferId, NodeError> {
        let name = name.into();
        Ok(self
            .request(|reply| NodeCommand::SendPayload {
                name,
                mime_hint,
                payload,
                reply,
            })
            .await??)
    }

    pub async fn cancel_transfer(&self, id: TransferId) -> Result<TransferProgress, NodeError> {
        Ok(self
            .request(|reply| NodeCommand::CancelTransfer { id, reply })
            .await??)
    }

    pub async fn join(&self, display_name: impl Into<String>) -> Result<(), NodeError> {
        let display_name = display_name.into();
        self.request(|reply| NodeCommand::Join {
            display_name,
            reply,
        })
        .await
    }

    pub async fn report_score(&self, score: u64) -> Result<(), NodeError> {
        self.request(|reply| NodeCommand::ReportScore { score, reply })
            .await
    }

    /// Returns the new cumulative score.
    pub async fn award(&self, points: u64) -> Result<u64, NodeError> {
        self.request(|reply| NodeCommand::Award { points, reply })
            .await
    }

    pub async fn start_match(&self, duration_seconds: u32) -> Result<MatchClock, NodeError> {
        self.request(|reply| NodeCommand::StartMatch {
            duration_seconds,
            reply,
        })
        .await
    }

    pub async fn reset_match(&self) -> Result<(), NodeError> {
        self.request(|reply| NodeCommand::ResetMatch { reply }).await
    }
}

// ── Node ──────────────────────────────────────────────────────────────────────

pub struct Node {
    dispatcher: Dispatcher,
    settings: NodeSettings,
    clock: Arc<dyn Clock>,
    inbound: Inbound,
    commands: mpsc::Receiver<NodeCommand>,
    snapshots: watch::Sender<NodeSnapshot>,
    events: broadcast::Sender<NodeEvent>,
    shutdown: broadcast::Receiver<()>,
    deliveries: Option<mpsc::Sender<CompletedTransfer>>,
    /// Completed inbound payloads waiting for room in `deliveries`.
    undelivered: VecDeque<CompletedTransfer>,
}

impl Node {
    /// Build a node and its handle. Nothing runs until [`Node::run`].
    pub fn new(
        local: PeerId,
        settings: NodeSettings,
        transport: Arc<dyn Transport>,
        inbound: Inbound,
        clock: Arc<dyn Clock>,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, NodeHandle) {
        let dispatcher = Dispatcher::new(
            local.clone(),
            settings.display_name.clone(),
            settings.transfer.clone(),
            transport,
            clock.clone(),
        );
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (snapshot_tx, snapshot_rx) = watch::channel(dispatcher.snapshot());
        let (event_tx, _) = broadcast::channel(EVENT_QUEUE);

        let handle = NodeHandle {
            local,
            commands: command_tx,
            snapshots: snapshot_rx,
            events: event_tx.clone(),
        };
        let node = Self {
            dispatcher,
            settings,
            clock,
            inbound,
            commands: command_rx,
            snapshots: snapshot_tx,
            events: event_tx,
            shutdown,
            deliveries: None,
            undelivered: VecDeque::new(),
        };
        (node, handle)
    }

    /// Completed inbound payloads in completion order. Unlike the event
    /// feed, nothing is lost when the receiver falls behind: payloads wait in
    /// the node until the channel has room.
    pub fn deliveries(&mut self, capacity: usize) -> mpsc::Receiver<CompletedTransfer> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.deliveries = Some(tx);
        rx
    }

    pub async fn run(mut self) {
        let mut heartbeat = ticker(self.settings.heartbeat_interval);
        let mut sweep = ticker(self.settings.sweep_interval());
        let mut probe = ticker(self.settings.probe_interval);
        let mut stall = ticker(self.settings.stall_check_interval);

        tracing::info!(
            peer = %self.dispatcher.local_id(),
            chunk_size = self.dispatcher.chunk_size(),
            "node started"
        );
        let display_name = self.settings.display_name.clone();
        self.dispatcher.join(&display_name);
        self.publish();

        let mut commands_open = true;
        loop {
            let pacing = self
                .dispatcher
                .next_due()
                .map(|due| Duration::from_millis(due.saturating_sub(self.clock.now())));
            let delivery = match &self.deliveries {
                Some(tx) if !self.undelivered.is_empty() => Some(tx.clone()),
                _ => None,
            };

            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("node shutting down");
                    break;
                }

                frame = self.inbound.recv() => match frame {
                    Some(frame) => self.dispatcher.dispatch(&frame),
                    None => {
                        tracing::warn!("transport closed, node stopping");
                        break;
                    }
                },

                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.execute(command),
                    None => commands_open = false,
                },

                _ = heartbeat.tick() => self.dispatcher.heartbeat(),
                _ = sweep.tick() => self.dispatcher.sweep(self.settings.peer_ttl),
                _ = probe.tick() => self.dispatcher.probe(self.settings.probe_timeout),
                _ = stall.tick() => self.dispatcher.check_stalled(self.settings.inactivity_timeout),

                _ = tokio::time::sleep(pacing.unwrap_or_default()), if pacing.is_some() => {
                    self.dispatcher.pace();
                }

                permit = reserve(&delivery), if delivery.is_some() => match permit {
                    Ok(permit) => {
                        if let Some(done) = self.undelivered.pop_front() {
                            permit.send(done);
                        }
                    }
                    Err(_) => {
                        tracing::warn!(
                            dropped = self.undelivered.len(),
                            "delivery receiver gone, payloads discarded"
                        );
                        self.deliveries = None;
                        self.undelivered.clear();
                    }
                },
            }

            self.publish();
        }
    }

    /// Apply a command, publish its effects, then reply. A dropped reply
    /// receiver only means the caller stopped waiting.
    fn execute(&mut self, command: NodeCommand) {
        match command {
            NodeCommand::SendPayload {
                name,
                mime_hint,
                payload,
                reply,
            } => {
                let result = self.dispatcher.send_payload(name, mime_hint, payload);
                self.publish();
                let _ = reply.send(result);
            }
            NodeCommand::CancelTransfer { id, reply } => {
                let result = self.dispatcher.cancel_transfer(&id);
                self.publish();
                let _ = reply.send(result);
            }
            NodeCommand::Join {
                display_name,
                reply,
            } => {
                self.dispatcher.join(&display_name);
                self.publish();
                let _ = reply.send(());
            }
            NodeCommand::ReportScore { score, reply } => {
                self.dispatcher.report_score(score);
                self.publish();
                let _ = reply.send(());
            }
            NodeCommand::Award { points, reply } => {
                let total = self.dispatcher.award(points);
                self.publish();
                let _ = reply.send(total);
            }
            NodeCommand::StartMatch {
                duration_seconds,
                reply,
            } => {
                let clock = self.dispatcher.start_match(duration_seconds);
                self.publish();
                let _ = reply.send(clock);
            }
            NodeCommand::ResetMatch { reply } => {
                self.dispatcher.reset_match();
                self.publish();
                let _ = reply.send(());
            }
        }
    }

    /// Push pending events and a fresh snapshot to observers.
    fn publish(&mut self) {
        for event in self.dispatcher.drain_events() {
            if let (
                Some(_),
                NodeEvent::TransferCompleted {
                    id,
                    direction: Direction::Inbound,
                    peer,
                    metadata,
                    payload,
                },
            ) = (&self.deliveries, &event)
            {
                self.undelivered.push_back(CompletedTransfer {
                    id: id.clone(),
                    direction: Direction::Inbound,
                    peer: peer.clone(),
                    metadata: metadata.clone(),
                    payload: payload.clone(),
                });
            }
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        self.snapshots.send_replace(self.dispatcher.snapshot());
    }
}

async fn reserve(
    tx: &Option<mpsc::Sender<CompletedTransfer>>,
) -> Result<mpsc::Permit<'_, CompletedTransfer>, mpsc::error::SendError<()>> {
    match tx {
        Some(tx) => tx.reserve().await,
        None => std::future::pending().await,
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
