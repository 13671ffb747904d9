//! /game handlers: scoreboard, match clock and local player actions.

use std::collections::BTreeSet;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use rally_services::{Clock, MatchClock};

use super::{node_error, ApiError, ApiState};

/// Longest match the API will start (one day).
const MAX_MATCH_SECONDS: u32 = 86_400;

// ── GET /game ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchView {
    pub started_at: u64,
    pub duration_seconds: u32,
    pub remaining_seconds: u64,
    pub running: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreView {
    pub peer: String,
    pub display_name: String,
    pub score: u64,
    /// The peer is this node or currently heard on the bus.
    pub present: bool,
    pub is_local: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameResponse {
    #[serde(rename = "match")]
    pub match_view: Option<MatchView>,
    pub leaderboard: Vec<ScoreView>,
}

pub async fn handle_game(State(state): State<ApiState>) -> Json<GameResponse> {
    let snapshot = state.node.snapshot();
    let now = state.clock.now();

    let active: BTreeSet<_> = snapshot.peers.iter().map(|p| &p.id).collect();
    let leaderboard = snapshot
        .game
        .leaderboard()
        .into_iter()
        .map(|entry| {
            let is_local = entry.peer == snapshot.local_id;
            ScoreView {
                present: is_local || active.contains(&entry.peer),
                is_local,
                peer: entry.peer.to_string(),
                display_name: entry.display_name,
                score: entry.score,
            }
        })
        .collect();

    Json(GameResponse {
        match_view: snapshot.game.match_clock.map(|clock| MatchView {
            started_at: clock.started_at,
            duration_seconds: clock.duration_seconds,
            remaining_seconds: clock.remaining_seconds(now),
            running: clock.is_running(now),
        }),
        leaderboard,
    })
}

// ── POST /game/join ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

pub async fn handle_join(
    State(state): State<ApiState>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let display_name = req.display_name.trim();
    if display_name.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "displayName must not be empty".to_string(),
        ));
    }
    state.node.join(display_name).await.map_err(node_error)?;
    Ok(Json(OkResponse { ok: true }))
}

// ── POST /game/score, /game/award ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ScoreRequest {
    pub score: u64,
}

#[derive(Deserialize)]
pub struct AwardRequest {
    pub points: u64,
}

#[derive(Serialize)]
pub struct ScoreResponse {
    pub score: u64,
}

pub async fn handle_score(
    State(state): State<ApiState>,
    Json(req): Json<ScoreRequest>,
) -> Result<Json<ScoreResponse>, ApiError> {
    state
        .node
        .report_score(req.score)
        .await
        .map_err(node_error)?;
    Ok(Json(ScoreResponse { score: req.score }))
}

pub async fn handle_award(
    State(state): State<ApiState>,
    Json(req): Json<AwardRequest>,
) -> Result<Json<ScoreResponse>, ApiError> {
    let score = state.node.award(req.points).await.map_err(node_error)?;
    Ok(Json(ScoreResponse { score }))
}

// ── POST /game/match, /game/reset ─────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequest {
    pub duration_seconds: u32,
}

pub async fn handle_match_start(
    State(state): State<ApiState>,
    Json(req): Json<MatchRequest>,
) -> Result<Json<MatchClock>, ApiError> {
    if req.duration_seconds == 0 || req.duration_seconds > MAX_MATCH_SECONDS {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("durationSeconds must be between 1 and {MAX_MATCH_SECONDS}"),
        ));
    }
    let clock = state
        .node
        .start_match(req.duration_seconds)
        .await
        .map_err(node_error)?;
    tracing::info!(duration_seconds = clock.duration_seconds, "match started via API");
    Ok(Json(clock))
}

pub async fn handle_match_reset(
    State(state): State<ApiState>,
) -> Result<Json<OkResponse>, ApiError> {
    state.node.reset_match().await.map_err(node_error)?;
    Ok(Json(OkResponse { ok: true }))
}
