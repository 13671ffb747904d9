//! Envelope dispatcher: decodes inbound frames and routes them by kind.
//!
//! The dispatcher is the only component that touches the transport. It owns
//! the registry, prober, transfer coordinator and scoreboard, feeds each
//! decoded Envelope to exactly one of them, and sends whatever they answer
//! with. Nothing a remote peer sends can make it fail: bad input is logged
//! and dropped.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rally_core::wire::{
    chunk_capacity, StateJoin, StateMatchStart, StateScore, TransferComplete, TransferStart,
};
use rally_core::{Body, Envelope, PeerId, Timestamp, TransferId, WireError};

use crate::clock::Clock;
use crate::event::{AbandonReason, NodeEvent};
use crate::game_state::{MatchClock, StateChange, StateReplicator};
use crate::latency::{EchoOutcome, LatencyProber};
use crate::node::NodeSnapshot;
use crate::peer::PeerRegistry;
use crate::transfer::{
    ChunkOutcome, Direction, StartOutcome, TransferCoordinator, TransferError, TransferProgress,
    TransferSettings,
};
use crate::transport::Transport;

pub struct Dispatcher {
    local: PeerId,
    display_name: String,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    registry: PeerRegistry,
    prober: LatencyProber,
    transfers: TransferCoordinator,
    state: StateReplicator,
    events: Vec<NodeEvent>,
}

impl Dispatcher {
    /// The chunk size is clamped so one encoded chunk fits the transport.
    pub fn new(
        local: PeerId,
        display_name: String,
        mut transfer: TransferSettings,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let capacity = match chunk_capacity(&local, transport.max_message_bytes()) {
            Ok(capacity) => capacity,
            Err(e) => {
                tracing::warn!(error = %e, "cannot size chunks for this peer id, sending disabled");
                0
            }
        };
        if transfer.chunk_size as usize > capacity {
            tracing::warn!(
                configured = transfer.chunk_size,
                clamped = capacity,
                "chunk size exceeds transport ceiling, clamping"
            );
            transfer.chunk_size = capacity as u32;
        }

        Self {
            registry: PeerRegistry::new(local.clone()),
            prober: LatencyProber::new(local.clone()),
            transfers: TransferCoordinator::new(local.clone(), transfer),
            state: StateReplicator::new(),
            events: Vec::new(),
            local,
            display_name,
            transport,
            clock,
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local
    }

    /// Effective chunk size after clamping.
    pub fn chunk_size(&self) -> u32 {
        self.transfers.settings().chunk_size
    }

    /// Events produced since the last drain, in order.
    pub fn drain_events(&mut self) -> Vec<NodeEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Handle one raw frame from the transport.
    pub fn dispatch(&mut self, raw: &[u8]) {
        let envelope = match Envelope::from_bytes(raw) {
            Ok(envelope) => envelope,
            Err(WireError::UnknownKind(kind)) => {
                tracing::trace!(kind, "unknown envelope kind dropped");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, len = raw.len(), "malformed envelope dropped");
                return;
            }
        };
        if envelope.sender_id == self.local {
            return;
        }

        let now = self.clock.now();
        let Envelope {
            sender_id: sender,
            sent_at,
            body,
        } = envelope;
        tracing::trace!(peer = %sender, kind = %body.kind(), "routing envelope");

        let newcomer = self.registry.touch(&sender, now);
        if newcomer {
            tracing::info!(peer = %sender, "peer joined");
            self.events.push(NodeEvent::PeerJoined(sender.clone()));
        }

        self.route(sender, sent_at, now, body);

        // Catch-up reflects the state after the newcomer's own message.
        if newcomer {
            self.announce_self();
        }
    }

    fn route(&mut self, sender: PeerId, sent_at: Timestamp, now: Timestamp, body: Body) {
        match body {
            Body::Heartbeat => {}
            Body::Probe(probe) => {
                if let Some(reply) = self.prober.on_probe(&sender, sent_at, &probe) {
                    self.emit(reply);
                }
            }
            Body::Echo(echo) => match self.prober.on_echo(&sender, &echo, now) {
                EchoOutcome::Sample(rtt) => {
                    tracing::debug!(peer = %sender, rtt_ms = rtt, "latency sample")
                }
                EchoOutcome::Invalid => {
                    tracing::warn!(peer = %sender, "echo from the future dropped")
                }
                EchoOutcome::NotOurs | EchoOutcome::Unknown | EchoOutcome::Duplicate => {}
            },
            Body::TransferStart(start) => self.on_transfer_start(sender, start, now),
            Body::TransferChunk(chunk) => {
                let id = chunk.transfer_id.clone();
                match self.transfers.on_chunk(&sender, chunk, now) {
                    Ok(ChunkOutcome::Completed(done)) => self.complete(done.into()),
                    Ok(ChunkOutcome::Progress { done, total }) => {
                        tracing::trace!(transfer = %id, done, total, "chunk stored")
                    }
                    Ok(ChunkOutcome::Duplicate) => {
                        tracing::debug!(transfer = %id, "duplicate chunk ignored")
                    }
                    Err(e) => transfer_rejected(&sender, &e),
                }
            }
            Body::TransferComplete(TransferComplete { transfer_id }) => {
                match self.transfers.missing_chunks(&sender, &transfer_id) {
                    Some(missing) if missing > 0 => tracing::debug!(
                        transfer = %transfer_id,
                        missing,
                        "completion hint arrived before all chunks"
                    ),
                    _ => {}
                }
            }
            Body::StateJoin(join) => {
                let changes = self.state.apply_join(&sender, &join.display_name);
                self.record(changes);
            }
            Body::StateScore(report) => {
                let changes = self.state.apply_score_report(&sender, report.score);
                self.record(changes);
            }
            Body::StateMatchStart(start) => {
                let changes = self
                    .state
                    .apply_match_start(start.started_at, start.duration_seconds);
                self.record(changes);
            }
            Body::StateReset => {
                tracing::info!(peer = %sender, "match reset by peer");
                let changes = self.state.apply_reset();
                self.record(changes);
            }
        }
    }

    fn on_transfer_start(&mut self, sender: PeerId, start: TransferStart, now: Timestamp) {
        let id = start.transfer_id.clone();
        let metadata = start.metadata.clone();
        match self.transfers.on_start(&sender, start, now) {
            Ok(StartOutcome::Started(progress)) => {
                tracing::info!(
                    transfer = %id,
                    peer = %sender,
                    name = %metadata.name,
                    bytes = metadata.byte_size,
                    chunks = progress.total_chunks,
                    "inbound transfer announced"
                );
                self.events.push(NodeEvent::TransferStarted {
                    id,
                    direction: Direction::Inbound,
                    peer: sender,
                    metadata,
                });
            }
            Ok(StartOutcome::Completed(done)) => {
                self.events.push(NodeEvent::TransferStarted {
                    id,
                    direction: Direction::Inbound,
                    peer: sender,
                    metadata,
                });
                self.complete(done.into());
            }
            Ok(StartOutcome::Duplicate | StartOutcome::AlreadyFinished) => {
                tracing::debug!(transfer = %id, peer = %sender, "redelivered transfer start ignored");
            }
            Err(e) => transfer_rejected(&sender, &e),
        }
    }

    fn complete(&mut self, event: NodeEvent) {
        if let NodeEvent::TransferCompleted {
            id,
            direction,
            peer,
            metadata,
            ..
        } = &event
        {
            tracing::info!(
                transfer = %id,
                ?direction,
                peer = %peer,
                name = %metadata.name,
                bytes = metadata.byte_size,
                "transfer complete"
            );
        }
        self.events.push(event);
    }

    fn record(&mut self, changes: Vec<StateChange>) {
        self.events.extend(changes.into_iter().map(NodeEvent::from));
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Wrap `body` in an Envelope from this peer and hand it to the transport.
    /// Returns false when the frame never left.
    fn emit(&self, body: Body) -> bool {
        let kind = body.kind();
        let envelope = Envelope::new(self.local.clone(), self.clock.now(), body);
        let frame = match envelope.to_bytes() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(%kind, error = %e, "failed to encode envelope");
                return false;
            }
        };
        match self.transport.send(Bytes::from(frame)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%kind, error = %e, "send failed");
                false
            }
        }
    }

    /// Re-broadcast this peer's own replicated state for a newcomer.
    fn announce_self(&self) {
        let state = self.state.current();
        if let Some(me) = state.players.get(&self.local) {
            self.emit(Body::StateJoin(StateJoin {
                display_name: me.display_name.clone(),
            }));
            self.emit(Body::StateScore(StateScore { score: me.score }));
        }
        if let Some(clock) = state.match_clock {
            if clock.is_running(self.clock.now()) {
                self.emit(Body::StateMatchStart(StateMatchStart {
                    started_at: clock.started_at,
                    duration_seconds: clock.duration_seconds,
                }));
            }
        }
    }

    // ── Timers ────────────────────────────────────────────────────────────────

    pub fn heartbeat(&self) {
        self.emit(Body::Heartbeat);
    }

    /// Expire silent peers.
    pub fn sweep(&mut self, ttl: Duration) {
        for peer in self.registry.sweep(self.clock.now(), ttl) {
            tracing::info!(peer = %peer, "peer expired");
            self.events.push(NodeEvent::PeerExpired(peer));
        }
    }

    /// Forget stale probes, then send a fresh one. Skipped while alone.
    pub fn probe(&mut self, timeout: Duration) {
        let now = self.clock.now();
        let unanswered = self.prober.expire(now, timeout);
        if unanswered > 0 {
            tracing::debug!(unanswered, "probes timed out");
        }
        if self.registry.active_count() == 0 {
            return;
        }
        let (probe_id, body) = self.prober.send_probe(now);
        tracing::trace!(probe_id, "probe sent");
        self.emit(body);
    }

    /// Abandon inbound transfers that stopped making progress.
    pub fn check_stalled(&mut self, timeout: Duration) {
        for progress in self.transfers.expire_stalled(self.clock.now(), timeout) {
            tracing::warn!(
                transfer = %progress.id,
                peer = %progress.peer,
                done = progress.done_chunks,
                total = progress.total_chunks,
                "inbound transfer stalled, abandoning"
            );
            self.abandoned(progress, AbandonReason::Stalled);
        }
    }

    /// When the next outbound chunk is due.
    pub fn next_due(&self) -> Option<Timestamp> {
        self.transfers.next_due()
    }

    /// Send every outbound chunk that is due. A transfer whose chunk the
    /// transport refuses is abandoned, never reported complete.
    pub fn pace(&mut self) {
        let poll = self.transfers.poll_outbound(self.clock.now());
        let mut refused: Vec<(TransferId, u32)> = Vec::new();
        for frame in poll.frames {
            match frame {
                Body::TransferChunk(ref chunk) => {
                    let (id, index) = (chunk.transfer_id.clone(), chunk.index);
                    if !self.emit(frame) {
                        refused.push((id, index));
                    }
                }
                Body::TransferComplete(ref hint)
                    if refused.iter().any(|(id, _)| *id == hint.transfer_id) => {}
                other => {
                    self.emit(other);
                }
            }
        }
        for done in poll.finished {
            if !refused.iter().any(|(id, _)| *id == done.id) {
                self.complete(done.into());
            }
        }
        for (id, delivered) in refused {
            self.send_failed(&id, delivered);
        }
    }

    fn send_failed(&mut self, id: &TransferId, delivered: u32) {
        if let Some(progress) = self.transfers.fail_outbound(id, delivered) {
            tracing::warn!(
                transfer = %id,
                done = delivered,
                total = progress.total_chunks,
                "transport refused outbound transfer, abandoning"
            );
            self.abandoned(progress, AbandonReason::SendFailed);
        }
    }

    fn abandoned(&mut self, progress: TransferProgress, reason: AbandonReason) {
        self.events.push(NodeEvent::TransferAbandoned {
            id: progress.id,
            direction: progress.direction,
            peer: progress.peer,
            reason,
        });
    }

    // ── Local operations ──────────────────────────────────────────────────────

    pub fn send_payload(
        &mut self,
        name: String,
        mime_hint: Option<String>,
        payload: Bytes,
    ) -> Result<TransferId, TransferError> {
        let (id, start) = self
            .transfers
            .begin_send(self.clock.now(), name, mime_hint, payload)?;
        if let Body::TransferStart(ref announced) = start {
            tracing::info!(
                transfer = %id,
                name = %announced.metadata.name,
                bytes = announced.metadata.byte_size,
                chunks = announced.total_chunks,
                "outbound transfer started"
            );
            self.events.push(NodeEvent::TransferStarted {
                id: id.clone(),
                direction: Direction::Outbound,
                peer: self.local.clone(),
                metadata: announced.metadata.clone(),
            });
        }
        if !self.emit(start) {
            self.send_failed(&id, 0);
        }
        Ok(id)
    }

    pub fn cancel_transfer(&mut self, id: &TransferId) -> Result<TransferProgress, TransferError> {
        let progress = self.transfers.cancel(id)?;
        tracing::info!(transfer = %id, direction = ?progress.direction, "transfer cancelled");
        self.abandoned(progress.clone(), AbandonReason::Cancelled);
        Ok(progress)
    }

    pub fn join(&mut self, display_name: &str) {
        self.display_name = display_name.to_string();
        let changes = self.state.apply_join(&self.local, display_name);
        self.record(changes);
        self.emit(Body::StateJoin(StateJoin {
            display_name: display_name.to_string(),
        }));
    }

    /// Publish this peer's cumulative score, joining first if needed.
    pub fn report_score(&mut self, score: u64) {
        if !self.state.current().players.contains_key(&self.local) {
            let name = self.display_name.clone();
            self.join(&name);
        }
        let changes = self.state.apply_score_report(&self.local, score);
        self.record(changes);
        self.emit(Body::StateScore(StateScore { score }));
    }

    /// Add `points` to this peer's score. Returns the new total.
    pub fn award(&mut self, points: u64) -> u64 {
        let total = self.state.current().score_of(&self.local).saturating_add(points);
        self.report_score(total);
        total
    }

    pub fn start_match(&mut self, duration_seconds: u32) -> MatchClock {
        let started_at = self.clock.now();
        let changes = self.state.apply_match_start(started_at, duration_seconds);
        self.record(changes);
        self.emit(Body::StateMatchStart(StateMatchStart {
            started_at,
            duration_seconds,
        }));
        MatchClock {
            started_at,
            duration_seconds,
        }
    }

    pub fn reset_match(&mut self) {
        let changes = self.state.apply_reset();
        self.record(changes);
        self.emit(Body::StateReset);
    }

    // ── Read model ────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            local_id: self.local.clone(),
            display_name: self.display_name.clone(),
            taken_at: self.clock.now(),
            active_peers: self.registry.active_count(),
            peers: self.registry.snapshot(),
            latency: self.prober.stats(),
            transfers: self.transfers.progress(),
            game: self.state.current().clone(),
            chunk_size: self.chunk_size(),
        }
    }
}

fn transfer_rejected(sender: &PeerId, e: &TransferError) {
    if e.is_malformed() {
        tracing::warn!(peer = %sender, error = %e, "malformed transfer message dropped");
    } else {
        tracing::debug!(peer = %sender, error = %e, "transfer message dropped");
    }
}
