//! /transfers handlers: outbound uploads, progress and cancellation.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use serde::Serialize;

use rally_core::TransferId;
use rally_services::{safe_file_name, TransferProgress};

use super::{node_error, ApiError, ApiState};

/// Maximum upload size per file (256 MB).
pub const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

// ── GET /transfers ────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct TransfersResponse {
    pub transfers: Vec<TransferProgress>,
}

pub async fn handle_transfers(State(state): State<ApiState>) -> Json<TransfersResponse> {
    Json(TransfersResponse {
        transfers: state.node.snapshot().transfers,
    })
}

// ── POST /transfers ───────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub id: String,
    pub name: String,
    pub bytes: u64,
    pub chunks: u64,
}

pub async fn handle_send(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<Json<SendResponse>, ApiError> {
    let mut file_data = Vec::new();
    let mut name = String::from("upload");
    let mut mime_hint = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        if let Some(file_name) = field.file_name() {
            name = safe_file_name(file_name);
        }
        mime_hint = field.content_type().map(str::to_string);

        let data = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
        if file_data.len() + data.len() > MAX_UPLOAD_BYTES {
            return Err((
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("file exceeds {} byte limit", MAX_UPLOAD_BYTES),
            ));
        }
        file_data.extend_from_slice(&data);
    }

    let bytes = file_data.len() as u64;
    let chunk_size = state.node.snapshot().chunk_size.max(1) as u64;
    let id = state
        .node
        .send_payload(name.clone(), mime_hint, Bytes::from(file_data))
        .await
        .map_err(node_error)?;

    tracing::info!(transfer = %id, name, bytes, "upload queued for broadcast");

    Ok(Json(SendResponse {
        id: id.to_string(),
        name,
        bytes,
        chunks: bytes.div_ceil(chunk_size),
    }))
}

// ── DELETE /transfers/{id} ────────────────────────────────────────────────────

pub async fn handle_cancel(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<TransferProgress>, ApiError> {
    let progress = state
        .node
        .cancel_transfer(TransferId::new(id))
        .await
        .map_err(node_error)?;
    Ok(Json(progress))
}
