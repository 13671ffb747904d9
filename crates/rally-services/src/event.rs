//! Events published by a node as its read model changes.

use bytes::Bytes;
use rally_core::{PeerId, TransferId, TransferMetadata};

use crate::game_state::{MatchClock, StateChange};
use crate::transfer::{CompletedTransfer, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// Evicted by a local caller.
    Cancelled,
    /// No new chunk within the inactivity timeout.
    Stalled,
    /// The transport refused one of our outbound frames.
    SendFailed,
}

#[derive(Debug, Clone)]
pub enum NodeEvent {
    PeerJoined(PeerId),
    PeerExpired(PeerId),
    TransferStarted {
        id: TransferId,
        direction: Direction,
        peer: PeerId,
        metadata: TransferMetadata,
    },
    /// For inbound transfers `payload` is the reassembled buffer.
    TransferCompleted {
        id: TransferId,
        direction: Direction,
        peer: PeerId,
        metadata: TransferMetadata,
        payload: Bytes,
    },
    TransferAbandoned {
        id: TransferId,
        direction: Direction,
        peer: PeerId,
        reason: AbandonReason,
    },
    PlayerJoined {
        peer: PeerId,
        display_name: String,
    },
    ScoreChanged {
        peer: PeerId,
        score: u64,
    },
    MatchStarted(MatchClock),
    StateReset,
}

impl From<StateChange> for NodeEvent {
    fn from(change: StateChange) -> Self {
        match change {
            StateChange::PlayerJoined { peer, display_name } => {
                NodeEvent::PlayerJoined { peer, display_name }
            }
            StateChange::ScoreChanged { peer, score } => NodeEvent::ScoreChanged { peer, score },
            StateChange::MatchStarted(clock) => NodeEvent::MatchStarted(clock),
            StateChange::Reset => NodeEvent::StateReset,
        }
    }
}

impl From<CompletedTransfer> for NodeEvent {
    fn from(done: CompletedTransfer) -> Self {
        NodeEvent::TransferCompleted {
            id: done.id,
            direction: done.direction,
            peer: done.peer,
            metadata: done.metadata,
            payload: done.payload,
        }
    }
}
