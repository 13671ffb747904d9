//! Transfer coordinator: chunked payload moves between peers.
//!
//! Outbound: a payload is announced with `transferStart`, paced out one chunk
//! per due step, and closed with `transferComplete`. Inbound: chunks are
//! written into a zero-filled buffer at `index * chunkSize` and marked in a
//! bitset; a full bitset is the only completion rule.
//!
//! Every transfer moves through `Announced → InProgress → Complete | Abandoned`.
//! Finished transfers are kept in a small archive so a redelivered start can
//! never produce a second completion.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use rally_core::wire::{TransferChunk, TransferComplete, TransferStart, DEFAULT_CHUNK_SIZE};
use rally_core::{Body, PeerId, Timestamp, TransferId, TransferMetadata};
use serde::Serialize;

/// Finished transfers remembered per coordinator.
pub const ARCHIVE_CAPACITY: usize = 64;

/// Upper bound on a single payload (256 MiB).
pub const DEFAULT_MAX_TRANSFER_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub chunk_size: u32,
    /// Gap between consecutive chunks of one outbound transfer.
    pub chunk_delay: Duration,
    pub max_transfer_bytes: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: Duration::from_millis(10),
            max_transfer_bytes: DEFAULT_MAX_TRANSFER_BYTES,
        }
    }
}

// ── Read model ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Announced,
    InProgress,
    Complete,
    Abandoned,
}

impl TransferState {
    pub fn is_final(&self) -> bool {
        matches!(self, TransferState::Complete | TransferState::Abandoned)
    }
}

/// Point-in-time view of one transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub id: TransferId,
    pub direction: Direction,
    /// Sender for inbound transfers, the local peer for outbound ones.
    pub peer: PeerId,
    pub name: String,
    pub byte_size: u64,
    pub total_chunks: u32,
    pub done_chunks: u32,
    /// 0.0..=1.0
    pub progress: f64,
    pub state: TransferState,
}

/// A payload that finished moving, in either direction.
#[derive(Debug, Clone)]
pub struct CompletedTransfer {
    pub id: TransferId,
    pub direction: Direction,
    pub peer: PeerId,
    pub metadata: TransferMetadata,
    pub payload: Bytes,
}

// ── Outcomes and errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum StartOutcome {
    Started(TransferProgress),
    /// Zero-byte payloads complete on their announcement.
    Completed(CompletedTransfer),
    /// Already receiving this id.
    Duplicate,
    /// This id finished recently; the announcement is a redelivery.
    AlreadyFinished,
}

#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    Progress { done: u32, total: u32 },
    Completed(CompletedTransfer),
    /// Chunk already held; buffer untouched.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("unknown transfer {0}")]
    UnknownTransfer(TransferId),
    #[error("transfer announces {announced} chunks but its size needs {expected}")]
    ChunkCountMismatch { announced: u32, expected: u64 },
    #[error("transfer of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },
    #[error("chunk size must be non-zero")]
    ZeroChunkSize,
    #[error("chunk index {index} out of range for {total} chunks")]
    IndexOutOfRange { index: u32, total: u32 },
    #[error("chunk {index} carries {actual} bytes, expected {expected}")]
    ChunkLength {
        index: u32,
        expected: usize,
        actual: usize,
    },
}

impl TransferError {
    /// True when the offending message itself is invalid, as opposed to
    /// merely referring to a transfer this peer does not know.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, TransferError::UnknownTransfer(_))
    }
}

/// Frames produced by one pacing step.
#[derive(Debug, Default)]
pub struct OutboundPoll {
    pub frames: Vec<Body>,
    pub finished: Vec<CompletedTransfer>,
}

// ── Internal state ────────────────────────────────────────────────────────────

#[derive(Debug)]
struct InboundTransfer {
    sender: PeerId,
    metadata: TransferMetadata,
    chunk_size: u32,
    total_chunks: u32,
    received: Vec<bool>,
    done: u32,
    buffer: Vec<u8>,
    last_activity: Timestamp,
}

impl InboundTransfer {
    fn expected_len(&self, index: u32) -> usize {
        let offset = index as u64 * self.chunk_size as u64;
        (self.metadata.byte_size - offset).min(self.chunk_size as u64) as usize
    }
}

#[derive(Debug)]
struct OutboundTransfer {
    metadata: TransferMetadata,
    chunk_size: u32,
    total_chunks: u32,
    payload: Bytes,
    next_index: u32,
    next_due: Timestamp,
}

fn chunk_count(byte_size: u64, chunk_size: u32) -> u64 {
    byte_size.div_ceil(chunk_size as u64)
}

fn fraction(done: u32, total: u32, state: TransferState) -> f64 {
    if total == 0 {
        return if state == TransferState::Complete { 1.0 } else { 0.0 };
    }
    done as f64 / total as f64
}

// ── Coordinator ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TransferCoordinator {
    local: PeerId,
    settings: TransferSettings,
    next_seq: u64,
    inbound: HashMap<TransferId, InboundTransfer>,
    outbound: HashMap<TransferId, OutboundTransfer>,
    archive: VecDeque<TransferProgress>,
}

impl TransferCoordinator {
    pub fn new(local: PeerId, settings: TransferSettings) -> Self {
        Self {
            local,
            settings,
            next_seq: 0,
            inbound: HashMap::new(),
            outbound: HashMap::new(),
            archive: VecDeque::with_capacity(ARCHIVE_CAPACITY),
        }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    // ── Send path ─────────────────────────────────────────────────────────────

    /// Register an outbound transfer. The returned announcement must be sent
    /// before anything `poll_outbound` hands out; the first chunk is due now.
    pub fn begin_send(
        &mut self,
        now: Timestamp,
        name: String,
        mime_hint: Option<String>,
        payload: Bytes,
    ) -> Result<(TransferId, Body), TransferError> {
        let byte_size = payload.len() as u64;
        if byte_size > self.settings.max_transfer_bytes {
            return Err(TransferError::TooLarge {
                size: byte_size,
                limit: self.settings.max_transfer_bytes,
            });
        }
        let chunk_size = self.settings.chunk_size;
        if chunk_size == 0 {
            return Err(TransferError::ZeroChunkSize);
        }
        let total_chunks = chunk_count(byte_size, chunk_size) as u32;

        self.next_seq += 1;
        let id = TransferId::derive(&self.local, &name, now, self.next_seq);
        let metadata = TransferMetadata {
            name,
            byte_size,
            mime_hint,
        };

        let start = Body::TransferStart(TransferStart {
            transfer_id: id.clone(),
            total_chunks,
            chunk_size,
            metadata: metadata.clone(),
        });
        self.outbound.insert(
            id.clone(),
            OutboundTransfer {
                metadata,
                chunk_size,
                total_chunks,
                payload,
                next_index: 0,
                next_due: now,
            },
        );
        Ok((id, start))
    }

    /// Earliest instant at which `poll_outbound` has work.
    pub fn next_due(&self) -> Option<Timestamp> {
        self.outbound.values().map(|t| t.next_due).min()
    }

    /// Emit one chunk for every outbound transfer that is due. The closing
    /// `transferComplete` follows a transfer's last chunk in the same step.
    pub fn poll_outbound(&mut self, now: Timestamp) -> OutboundPoll {
        let delay = self.settings.chunk_delay.as_millis() as u64;
        let mut poll = OutboundPoll::default();
        let mut done = Vec::new();

        let mut due: Vec<&TransferId> = self
            .outbound
            .iter()
            .filter(|(_, t)| t.next_due <= now)
            .map(|(id, _)| id)
            .collect();
        due.sort();
        let due: Vec<TransferId> = due.into_iter().cloned().collect();

        for id in due {
            let Some(transfer) = self.outbound.get_mut(&id) else {
                continue;
            };
            if transfer.next_index < transfer.total_chunks {
                let index = transfer.next_index;
                let start = index as usize * transfer.chunk_size as usize;
                let end = (start + transfer.chunk_size as usize).min(transfer.payload.len());
                poll.frames.push(Body::TransferChunk(TransferChunk {
                    transfer_id: id.clone(),
                    index,
                    bytes: transfer.payload.slice(start..end).to_vec(),
                }));
                transfer.next_index += 1;
                transfer.next_due = now + delay;
            }
            if transfer.next_index == transfer.total_chunks {
                poll.frames.push(Body::TransferComplete(TransferComplete {
                    transfer_id: id.clone(),
                }));
                done.push(id);
            }
        }

        for id in done {
            if let Some(transfer) = self.outbound.remove(&id) {
                self.archive_progress(self.outbound_progress(&id, &transfer, TransferState::Complete));
                poll.finished.push(CompletedTransfer {
                    id,
                    direction: Direction::Outbound,
                    peer: self.local.clone(),
                    metadata: transfer.metadata,
                    payload: transfer.payload,
                });
            }
        }
        poll
    }

    // ── Receive path ──────────────────────────────────────────────────────────

    pub fn on_start(
        &mut self,
        sender: &PeerId,
        start: TransferStart,
        now: Timestamp,
    ) -> Result<StartOutcome, TransferError> {
        let byte_size = start.metadata.byte_size;
        if byte_size > self.settings.max_transfer_bytes {
            return Err(TransferError::TooLarge {
                size: byte_size,
                limit: self.settings.max_transfer_bytes,
            });
        }
        if start.chunk_size == 0 {
            return Err(TransferError::ZeroChunkSize);
        }
        let expected = chunk_count(byte_size, start.chunk_size);
        if expected != start.total_chunks as u64 {
            return Err(TransferError::ChunkCountMismatch {
                announced: start.total_chunks,
                expected,
            });
        }

        let id = start.transfer_id;
        if self.inbound.contains_key(&id) {
            return Ok(StartOutcome::Duplicate);
        }
        if self.is_archived(&id, Direction::Inbound) {
            return Ok(StartOutcome::AlreadyFinished);
        }

        let transfer = InboundTransfer {
            sender: sender.clone(),
            metadata: start.metadata,
            chunk_size: start.chunk_size,
            total_chunks: start.total_chunks,
            received: vec![false; start.total_chunks as usize],
            done: 0,
            buffer: vec![0u8; byte_size as usize],
            last_activity: now,
        };

        if transfer.total_chunks == 0 {
            return Ok(StartOutcome::Completed(self.finish_inbound(id, transfer)));
        }

        let progress = self.inbound_progress(&id, &transfer, TransferState::InProgress);
        self.inbound.insert(id, transfer);
        Ok(StartOutcome::Started(progress))
    }

    pub fn on_chunk(
        &mut self,
        sender: &PeerId,
        chunk: TransferChunk,
        now: Timestamp,
    ) -> Result<ChunkOutcome, TransferError> {
        let id = chunk.transfer_id;
        let transfer = match self.inbound.get_mut(&id) {
            Some(t) if t.sender == *sender => t,
            _ => return Err(TransferError::UnknownTransfer(id)),
        };

        let index = chunk.index;
        if index >= transfer.total_chunks {
            return Err(TransferError::IndexOutOfRange {
                index,
                total: transfer.total_chunks,
            });
        }
        let expected = transfer.expected_len(index);
        if chunk.bytes.len() != expected {
            return Err(TransferError::ChunkLength {
                index,
                expected,
                actual: chunk.bytes.len(),
            });
        }
        if transfer.received[index as usize] {
            return Ok(ChunkOutcome::Duplicate);
        }

        let offset = index as usize * transfer.chunk_size as usize;
        transfer.buffer[offset..offset + expected].copy_from_slice(&chunk.bytes);
        transfer.received[index as usize] = true;
        transfer.done += 1;
        transfer.last_activity = now;

        if transfer.done < transfer.total_chunks {
            return Ok(ChunkOutcome::Progress {
                done: transfer.done,
                total: transfer.total_chunks,
            });
        }

        match self.inbound.remove(&id) {
            Some(transfer) => Ok(ChunkOutcome::Completed(self.finish_inbound(id, transfer))),
            None => Err(TransferError::UnknownTransfer(id)),
        }
    }

    /// Chunks still missing for a live inbound transfer from `sender`.
    /// `None` when no such transfer is live.
    pub fn missing_chunks(&self, sender: &PeerId, id: &TransferId) -> Option<u32> {
        self.inbound
            .get(id)
            .filter(|t| t.sender == *sender)
            .map(|t| t.total_chunks - t.done)
    }

    // ── Eviction ──────────────────────────────────────────────────────────────

    /// Abandon a live transfer in either direction. An outbound transfer stops
    /// before its next chunk.
    pub fn cancel(&mut self, id: &TransferId) -> Result<TransferProgress, TransferError> {
        if let Some(transfer) = self.outbound.remove(id) {
            let progress = self.outbound_progress(id, &transfer, TransferState::Abandoned);
            self.archive_progress(progress.clone());
            return Ok(progress);
        }
        if let Some(transfer) = self.inbound.remove(id) {
            let progress = self.inbound_progress(id, &transfer, TransferState::Abandoned);
            self.archive_progress(progress.clone());
            return Ok(progress);
        }
        Err(TransferError::UnknownTransfer(id.clone()))
    }

    /// Abandon an outbound transfer after the transport refused chunk
    /// `delivered`. Also reverses the completion `poll_outbound` recorded when
    /// the refused chunk was the last one.
    pub fn fail_outbound(&mut self, id: &TransferId, delivered: u32) -> Option<TransferProgress> {
        if let Some(transfer) = self.outbound.remove(id) {
            let mut progress = self.outbound_progress(id, &transfer, TransferState::Abandoned);
            progress.done_chunks = delivered;
            progress.progress = fraction(delivered, progress.total_chunks, TransferState::Abandoned);
            self.archive_progress(progress.clone());
            return Some(progress);
        }
        let archived = self
            .archive
            .iter_mut()
            .find(|p| p.id == *id && p.direction == Direction::Outbound)?;
        archived.state = TransferState::Abandoned;
        archived.done_chunks = delivered;
        archived.progress = fraction(delivered, archived.total_chunks, TransferState::Abandoned);
        Some(archived.clone())
    }

    /// Abandon inbound transfers with no new chunk for `timeout`.
    pub fn expire_stalled(&mut self, now: Timestamp, timeout: Duration) -> Vec<TransferProgress> {
        let timeout_ms = timeout.as_millis() as u64;
        let mut stalled: Vec<TransferId> = self
            .inbound
            .iter()
            .filter(|(_, t)| now.saturating_sub(t.last_activity) >= timeout_ms)
            .map(|(id, _)| id.clone())
            .collect();
        stalled.sort();

        let mut abandoned = Vec::with_capacity(stalled.len());
        for id in stalled {
            if let Some(transfer) = self.inbound.remove(&id) {
                let progress = self.inbound_progress(&id, &transfer, TransferState::Abandoned);
                self.archive_progress(progress.clone());
                abandoned.push(progress);
            }
        }
        abandoned
    }

    // ── Snapshots ─────────────────────────────────────────────────────────────

    /// Live transfers ordered by id, then recently finished ones, newest first.
    pub fn progress(&self) -> Vec<TransferProgress> {
        let mut live: Vec<TransferProgress> = self
            .inbound
            .iter()
            .map(|(id, t)| self.inbound_progress(id, t, TransferState::InProgress))
            .chain(self.outbound.iter().map(|(id, t)| {
                let state = if t.next_index == 0 {
                    TransferState::Announced
                } else {
                    TransferState::InProgress
                };
                self.outbound_progress(id, t, state)
            }))
            .collect();
        live.sort_by(|a, b| a.id.cmp(&b.id));
        live.extend(self.archive.iter().cloned());
        live
    }

    pub fn live_count(&self) -> usize {
        self.inbound.len() + self.outbound.len()
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn finish_inbound(&mut self, id: TransferId, transfer: InboundTransfer) -> CompletedTransfer {
        self.archive_progress(self.inbound_progress(&id, &transfer, TransferState::Complete));
        CompletedTransfer {
            id,
            direction: Direction::Inbound,
            peer: transfer.sender,
            metadata: transfer.metadata,
            payload: Bytes::from(transfer.buffer),
        }
    }

    fn is_archived(&self, id: &TransferId, direction: Direction) -> bool {
        self.archive
            .iter()
            .any(|p| p.id == *id && p.direction == direction)
    }

    fn archive_progress(&mut self, progress: TransferProgress) {
        if self.archive.len() == ARCHIVE_CAPACITY {
            self.archive.pop_back();
        }
        self.archive.push_front(progress);
    }

    fn inbound_progress(
        &self,
        id: &TransferId,
        t: &InboundTransfer,
        state: TransferState,
    ) -> TransferProgress {
        TransferProgress {
            id: id.clone(),
            direction: Direction::Inbound,
            peer: t.sender.clone(),
            name: t.metadata.name.clone(),
            byte_size: t.metadata.byte_size,
            total_chunks: t.total_chunks,
            done_chunks: t.done,
            progress: fraction(t.done, t.total_chunks, state),
            state,
        }
    }

    fn outbound_progress(
        &self,
        id: &TransferId,
        t: &OutboundTransfer,
        state: TransferState,
    ) -> TransferProgress {
        TransferProgress {
            id: id.clone(),
            direction: Direction::Outbound,
            peer: self.local.clone(),
            name: t.metadata.name.clone(),
            byte_size: t.metadata.byte_size,
            total_chunks: t.total_chunks,
            done_chunks: t.next_index,
            progress: fraction(t.next_index, t.total_chunks, state),
            state,
        }
    }
}

/// Reduce a peer-supplied name to a single safe path component.
pub fn safe_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let trimmed = base.trim_start_matches('.');
    let clean: String = trimmed
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if clean.is_empty() {
        "transfer".to_string()
    } else {
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(10);

    fn coordinator(local: &str) -> TransferCoordinator {
        TransferCoordinator::new(
            PeerId::from(local),
            TransferSettings {
                chunk_size: 65_536,
                chunk_delay: DELAY,
                max_transfer_bytes: DEFAULT_MAX_TRANSFER_BYTES,
            },
        )
    }

    fn pattern(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    /// Run a sender's pacing loop to the end, collecting every frame.
    fn drain(sender: &mut TransferCoordinator, mut now: Timestamp) -> Vec<Body> {
        let mut frames = Vec::new();
        while let Some(due) = sender.next_due() {
            now = now.max(due);
            frames.extend(sender.poll_outbound(now).frames);
        }
        frames
    }

    fn start_of(body: Body) -> TransferStart {
        match body {
            Body::TransferStart(start) => start,
            other => panic!("expected transferStart, got {other:?}"),
        }
    }

    fn chunks_of(frames: Vec<Body>) -> Vec<TransferChunk> {
        frames
            .into_iter()
            .filter_map(|b| match b {
                Body::TransferChunk(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn payload_of_150000_bytes_is_three_chunks_in_any_order() {
        let payload = pattern(150_000);
        let mut sender = coordinator("alice");
        let (_, start) = sender
            .begin_send(0, "map.bin".into(), None, payload.clone())
            .unwrap();
        let start = start_of(start);
        assert_eq!(start.total_chunks, 3);
        assert_eq!(start.chunk_size, 65_536);

        let mut chunks = chunks_of(drain(&mut sender, 0));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].bytes.len(), 150_000 - 2 * 65_536);

        let mut receiver = coordinator("bob");
        let alice = PeerId::from("alice");
        assert!(matches!(
            receiver.on_start(&alice, start, 0).unwrap(),
            StartOutcome::Started(_)
        ));

        let c1 = chunks.remove(1);
        let c0 = chunks.remove(0);
        let c2 = chunks.remove(0);
        assert!(matches!(
            receiver.on_chunk(&alice, c2, 1).unwrap(),
            ChunkOutcome::Progress { done: 1, total: 3 }
        ));
        assert!(matches!(
            receiver.on_chunk(&alice, c0, 2).unwrap(),
            ChunkOutcome::Progress { done: 2, total: 3 }
        ));
        match receiver.on_chunk(&alice, c1, 3).unwrap() {
            ChunkOutcome::Completed(done) => {
                assert_eq!(done.payload, payload);
                assert_eq!(done.metadata.name, "map.bin");
                assert_eq!(done.direction, Direction::Inbound);
                assert_eq!(done.peer, alice);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(receiver.live_count(), 0);
    }

    #[test]
    fn redelivered_chunk_leaves_buffer_alone_and_completes_once() {
        let payload = pattern(100_000);
        let mut sender = coordinator("alice");
        let (_, start) = sender.begin_send(0, "a".into(), None, payload.clone()).unwrap();
        let chunks = chunks_of(drain(&mut sender, 0));

        let alice = PeerId::from("alice");
        let mut receiver = coordinator("bob");
        receiver.on_start(&alice, start_of(start.clone()), 0).unwrap();

        receiver.on_chunk(&alice, chunks[0].clone(), 1).unwrap();
        let mut tampered = chunks[0].clone();
        tampered.bytes.iter_mut().for_each(|b| *b = 0xAA);
        assert!(matches!(
            receiver.on_chunk(&alice, tampered, 2).unwrap(),
            ChunkOutcome::Duplicate
        ));

        let completed = match receiver.on_chunk(&alice, chunks[1].clone(), 3).unwrap() {
            ChunkOutcome::Completed(c) => c,
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(completed.payload, payload);

        // Redelivery after completion: neither the chunk nor the start revives it.
        assert!(matches!(
            receiver.on_chunk(&alice, chunks[1].clone(), 4),
            Err(TransferError::UnknownTransfer(_))
        ));
        assert!(matches!(
            receiver.on_start(&alice, start_of(start), 5).unwrap(),
            StartOutcome::AlreadyFinished
        ));
    }

    #[test]
    fn duplicate_start_for_live_transfer_is_ignored() {
        let mut sender = coordinator("alice");
        let (_, start) = sender.begin_send(0, "a".into(), None, pattern(10)).unwrap();
        let alice = PeerId::from("alice");
        let mut receiver = coordinator("bob");
        receiver.on_start(&alice, start_of(start.clone()), 0).unwrap();
        assert!(matches!(
            receiver.on_start(&alice, start_of(start), 1).unwrap(),
            StartOutcome::Duplicate
        ));
    }

    #[test]
    fn zero_byte_payload_completes_on_start() {
        let mut sender = coordinator("alice");
        let (_, start) = sender.begin_send(0, "empty".into(), None, Bytes::new()).unwrap();
        let start = start_of(start);
        assert_eq!(start.total_chunks, 0);

        let poll = sender.poll_outbound(0);
        assert_eq!(poll.frames.len(), 1);
        assert!(matches!(poll.frames[0], Body::TransferComplete(_)));
        assert_eq!(poll.finished.len(), 1);

        let mut receiver = coordinator("bob");
        match receiver.on_start(&PeerId::from("alice"), start, 0).unwrap() {
            StartOutcome::Completed(c) => assert!(c.payload.is_empty()),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn inconsistent_announcements_are_malformed() {
        let alice = PeerId::from("alice");
        let mut receiver = coordinator("bob");
        let start = |total_chunks, chunk_size, byte_size| TransferStart {
            transfer_id: TransferId::from("t"),
            total_chunks,
            chunk_size,
            metadata: TransferMetadata {
                name: "x".into(),
                byte_size,
                mime_hint: None,
            },
        };

        let err = receiver.on_start(&alice, start(2, 65_536, 150_000), 0).unwrap_err();
        assert_eq!(err, TransferError::ChunkCountMismatch { announced: 2, expected: 3 });
        assert!(err.is_malformed());

        let err = receiver.on_start(&alice, start(0, 0, 10), 0).unwrap_err();
        assert_eq!(err, TransferError::ZeroChunkSize);

        let err = receiver
            .on_start(&alice, start(1, u32::MAX, DEFAULT_MAX_TRANSFER_BYTES + 1), 0)
            .unwrap_err();
        assert!(matches!(err, TransferError::TooLarge { .. }));
    }

    #[test]
    fn bad_chunks_are_rejected() {
        let alice = PeerId::from("alice");
        let mut sender = coordinator("alice");
        let (id, start) = sender.begin_send(0, "a".into(), None, pattern(70_000)).unwrap();
        let mut receiver = coordinator("bob");
        receiver.on_start(&alice, start_of(start), 0).unwrap();

        let chunk = |index, len| TransferChunk {
            transfer_id: id.clone(),
            index,
            bytes: vec![1; len],
        };
        assert_eq!(
            receiver.on_chunk(&alice, chunk(2, 10), 1).unwrap_err(),
            TransferError::IndexOutOfRange { index: 2, total: 2 }
        );
        assert_eq!(
            receiver.on_chunk(&alice, chunk(1, 10), 1).unwrap_err(),
            TransferError::ChunkLength { index: 1, expected: 70_000 - 65_536, actual: 10 }
        );

        // Right id, wrong sender.
        let err = receiver
            .on_chunk(&PeerId::from("mallory"), chunk(0, 65_536), 1)
            .unwrap_err();
        assert!(!err.is_malformed());
        assert_eq!(receiver.missing_chunks(&alice, &id), Some(2));
    }

    #[test]
    fn pacing_spaces_chunks_and_interleaves_transfers() {
        let mut sender = coordinator("alice");
        sender.begin_send(100, "one".into(), None, pattern(65_536 * 2)).unwrap();
        sender.begin_send(100, "two".into(), None, pattern(65_536 * 2)).unwrap();
        assert_eq!(sender.next_due(), Some(100));

        let first = sender.poll_outbound(100);
        assert_eq!(chunks_of(first.frames).len(), 2);
        assert_eq!(sender.next_due(), Some(110));
        assert!(sender.poll_outbound(105).frames.is_empty());

        let second = sender.poll_outbound(110);
        // Last chunk plus closing frame for each transfer.
        assert_eq!(second.frames.len(), 4);
        assert_eq!(second.finished.len(), 2);
        assert_eq!(sender.next_due(), None);
    }

    #[test]
    fn cancel_stops_outbound_before_next_chunk() {
        let mut sender = coordinator("alice");
        let (id, _) = sender.begin_send(0, "a".into(), None, pattern(200_000)).unwrap();
        sender.poll_outbound(0);

        let progress = sender.cancel(&id).unwrap();
        assert_eq!(progress.state, TransferState::Abandoned);
        assert_eq!(progress.done_chunks, 1);
        assert!(sender.poll_outbound(1_000).frames.is_empty());
        assert_eq!(sender.cancel(&id), Err(TransferError::UnknownTransfer(id)));
    }

    #[test]
    fn refused_chunks_abandon_outbound_transfers() {
        let mut sender = coordinator("alice");
        let (live, _) = sender.begin_send(0, "a".into(), None, pattern(200_000)).unwrap();
        sender.poll_outbound(0);
        let progress = sender.fail_outbound(&live, 0).unwrap();
        assert_eq!(progress.state, TransferState::Abandoned);
        assert_eq!(progress.done_chunks, 0);
        assert_eq!(sender.next_due(), None);

        // Refusal of the last chunk reverses the completion just recorded.
        let (last, _) = sender.begin_send(100, "b".into(), None, pattern(65_536 * 2)).unwrap();
        sender.poll_outbound(100);
        assert_eq!(sender.poll_outbound(110).finished.len(), 1);
        let progress = sender.fail_outbound(&last, 1).unwrap();
        assert_eq!(progress.state, TransferState::Abandoned);
        assert_eq!(progress.progress, 0.5);

        let listed = sender.progress();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|p| p.state == TransferState::Abandoned));
        assert_eq!(sender.fail_outbound(&TransferId::new("nope"), 0), None);
    }

    #[test]
    fn stalled_inbound_transfers_are_abandoned() {
        let alice = PeerId::from("alice");
        let mut sender = coordinator("alice");
        let (id, start) = sender.begin_send(0, "a".into(), None, pattern(200_000)).unwrap();
        let chunks = chunks_of(drain(&mut sender, 0));

        let mut receiver = coordinator("bob");
        receiver.on_start(&alice, start_of(start), 0).unwrap();
        receiver.on_chunk(&alice, chunks[0].clone(), 20_000).unwrap();

        let timeout = Duration::from_secs(30);
        assert!(receiver.expire_stalled(49_999, timeout).is_empty());
        let abandoned = receiver.expire_stalled(50_000, timeout);
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].id, id);
        assert_eq!(abandoned[0].state, TransferState::Abandoned);

        let progress = receiver.progress();
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].state, TransferState::Abandoned);
    }

    #[test]
    fn progress_reports_fraction_and_state() {
        let alice = PeerId::from("alice");
        let mut sender = coordinator("alice");
        let (_, start) = sender.begin_send(0, "a".into(), None, pattern(65_536 * 4)).unwrap();
        assert_eq!(sender.progress()[0].state, TransferState::Announced);

        let chunks = chunks_of(drain(&mut sender, 0));
        let mut receiver = coordinator("bob");
        receiver.on_start(&alice, start_of(start), 0).unwrap();
        receiver.on_chunk(&alice, chunks[3].clone(), 1).unwrap();

        let view = &receiver.progress()[0];
        assert_eq!(view.state, TransferState::InProgress);
        assert_eq!(view.done_chunks, 1);
        assert_eq!(view.progress, 0.25);

        let sent = &sender.progress()[0];
        assert_eq!(sent.state, TransferState::Complete);
        assert_eq!(sent.progress, 1.0);
    }

    #[test]
    fn archive_is_bounded() {
        let mut sender = coordinator("alice");
        for i in 0..(ARCHIVE_CAPACITY + 10) {
            sender.begin_send(i as u64, format!("f{i}"), None, Bytes::new()).unwrap();
            sender.poll_outbound(i as u64);
        }
        assert_eq!(sender.progress().len(), ARCHIVE_CAPACITY);
    }

    #[test]
    fn file_names_lose_paths_and_dots() {
        assert_eq!(safe_file_name("../../../etc/passwd"), "passwd");
        assert_eq!(safe_file_name("..\\..\\windows\\system32"), "system32");
        assert_eq!(safe_file_name(".hidden"), "hidden");
        assert_eq!(safe_file_name("map v2 (final).png"), "map_v2__final_.png");
        assert_eq!(safe_file_name("my-doc_v2.pdf"), "my-doc_v2.pdf");
        assert_eq!(safe_file_name(""), "transfer");
        assert_eq!(safe_file_name("..."), "transfer");
    }
}
