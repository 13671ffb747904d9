//! /status, /peers, /latency, /daemon/shutdown handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use rally_services::{Clock, LatencyStats};

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub peer_id: String,
    pub display_name: String,
    pub active_peers: usize,
    pub average_latency_ms: Option<f64>,
    pub probe_success_ratio: f64,
    pub live_transfers: usize,
    pub chunk_size: u32,
    pub players: usize,
    pub match_running: bool,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let snapshot = state.node.snapshot();
    let now = state.clock.now();

    let live_transfers = snapshot
        .transfers
        .iter()
        .filter(|t| !t.state.is_final())
        .count();
    let match_running = snapshot
        .game
        .match_clock
        .map(|clock| clock.is_running(now))
        .unwrap_or(false);

    Json(StatusResponse {
        peer_id: snapshot.local_id.to_string(),
        display_name: snapshot.display_name,
        active_peers: snapshot.active_peers,
        average_latency_ms: snapshot.latency.average_ms,
        probe_success_ratio: snapshot.latency.success_ratio,
        live_transfers,
        chunk_size: snapshot.chunk_size,
        players: snapshot.game.players.len(),
        match_running,
    })
}

// ── /peers ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeersResponse {
    pub active: usize,
    pub peers: Vec<PeerInfo>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: String,
    pub display_name: Option<String>,
    pub last_seen_at: u64,
    pub silent_ms: u64,
}

pub async fn handle_peers(State(state): State<ApiState>) -> Json<PeersResponse> {
    let snapshot = state.node.snapshot();
    let now = state.clock.now();

    let peers = snapshot
        .peers
        .iter()
        .map(|record| PeerInfo {
            id: record.id.to_string(),
            display_name: snapshot
                .game
                .players
                .get(&record.id)
                .map(|p| p.display_name.clone()),
            last_seen_at: record.last_seen_at,
            silent_ms: now.saturating_sub(record.last_seen_at),
        })
        .collect();

    Json(PeersResponse {
        active: snapshot.active_peers,
        peers,
    })
}

// ── /latency ──────────────────────────────────────────────────────────────────

pub async fn handle_latency(State(state): State<ApiState>) -> Json<LatencyStats> {
    Json(state.node.snapshot().latency)
}

// ── /daemon/shutdown ──────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ShutdownResponse {
    pub message: String,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    let _ = state.shutdown.send(());

    Json(ShutdownResponse {
        message: "Shutdown initiated".to_string(),
    })
}
