//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    /// Field registry this deployment normalizes against
    pub schema: String,
    /// Read strategy (`latest_row` or `producer`)
    pub source: String,
}

/// GET /health
///
/// Does not touch the local or remote store.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "recsync-svc".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        schema: state.schema().to_string(),
        source: state.pipeline.source_mode().to_string(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
