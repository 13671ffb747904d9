//! HTTP API handlers: exposes the node's read model as JSON and forwards
//! local operations to it.

pub mod game;
pub mod status;
pub mod transfers;

use std::sync::Arc;

use axum::http::StatusCode;

use rally_services::{Clock, NodeError, NodeHandle, TransferError};

#[derive(Clone)]
pub struct ApiState {
    pub node: NodeHandle,
    /// Time source for derived values such as remaining match time.
    pub clock: Arc<dyn Clock>,
    /// Shutdown broadcast sender, signals graceful daemon shutdown.
    pub shutdown: tokio::sync::broadcast::Sender<()>,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

pub type ApiError = (StatusCode, String);

/// Map a node failure onto an HTTP status.
fn node_error(e: NodeError) -> ApiError {
    let status = match &e {
        NodeError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
        NodeError::Transfer(TransferError::UnknownTransfer(_)) => StatusCode::NOT_FOUND,
        NodeError::Transfer(TransferError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
        NodeError::Transfer(_) => StatusCode::BAD_REQUEST,
    };
    (status, e.to_string())
}

// Re-export handler functions for use in router setup.
pub use game::{
    handle_award, handle_game, handle_join, handle_match_reset, handle_match_start, handle_score,
};
pub use status::{handle_latency, handle_peers, handle_shutdown, handle_status};
pub use transfers::{handle_cancel, handle_send, handle_transfers, MAX_UPLOAD_BYTES};
