//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, Method},
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::app::AppState;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.client_origin))
        .with_state(state)
}

/// CORS for the comma-separated origin list, any origin when the list is empty
fn cors_layer(client_origin: &str) -> CorsLayer {
    let allowed_origins: Vec<header::HeaderValue> = client_origin
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new().allow_methods([Method::GET, Method::OPTIONS]);
    if allowed_origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(allowed_origins)
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true)
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    active_players: usize,
    connected_sessions: usize,
    queue_size: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue_size = state.matchmaking.queue_size().await;

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.match_registry.active_matches(),
        active_players: state.match_registry.total_players(),
        connected_sessions: state.matchmaking.session_count(),
        queue_size,
    })
}
