//! rally-services: the protocols a peer runs over the broadcast bus.

pub mod clock;
pub mod dispatch;
pub mod event;
pub mod game_state;
pub mod latency;
pub mod node;
pub mod peer;
pub mod transfer;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use dispatch::Dispatcher;
pub use event::{AbandonReason, NodeEvent};
pub use game_state::{
    GameState, LeaderboardEntry, MatchClock, PlayerRecord, StateChange, StateReplicator,
};
pub use latency::{EchoOutcome, LatencyProber, LatencyStats, LATENCY_RING_CAPACITY};
pub use node::{Node, NodeError, NodeHandle, NodeSettings, NodeSnapshot};
pub use peer::{PeerRecord, PeerRegistry};
pub use transfer::{
    safe_file_name, ChunkOutcome, CompletedTransfer, Direction, StartOutcome, TransferCoordinator,
    TransferError, TransferProgress, TransferSettings, TransferState,
};
pub use transport::{Inbound, LocalBus, Transport, TransportError, LOCAL_BUS_MAX_MESSAGE};
