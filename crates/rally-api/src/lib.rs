//! rally-api: local HTTP control surface for a running node.

pub mod handlers;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

/// Build the `/api` router.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/peers", get(handlers::handle_peers))
        .route("/latency", get(handlers::handle_latency))
        .route(
            "/transfers",
            get(handlers::handle_transfers).post(handlers::handle_send).layer(
                DefaultBodyLimit::max(handlers::MAX_UPLOAD_BYTES + 64 * 1024),
            ),
        )
        .route("/transfers/{id}", delete(handlers::handle_cancel))
        .route("/game", get(handlers::handle_game))
        .route("/game/join", post(handlers::handle_join))
        .route("/game/score", post(handlers::handle_score))
        .route("/game/award", post(handlers::handle_award))
        .route("/game/match", post(handlers::handle_match_start))
        .route("/game/reset", post(handlers::handle_match_reset))
        .route("/daemon/shutdown", post(handlers::handle_shutdown))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "API listening on 127.0.0.1");
    axum::serve(listener, app).await?;
    Ok(())
}
