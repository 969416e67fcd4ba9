//! recsync-svc library - recommendation pipeline service
//!
//! Reads the latest upstream result, normalizes it against the deployment's
//! field registry, persists it remotely and returns it to the caller.

use axum::Router;
use recsync_common::SchemaVersion;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;
pub mod normalize;
pub mod persist;
pub mod pipeline;
pub mod source;

use pipeline::Pipeline;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn schema(&self) -> SchemaVersion {
        self.pipeline.normalizer().schema()
    }
}

/// Build application router
///
/// `cors_permissive` mirrors any origin and allows credentials.
pub fn build_router(state: AppState, cors_permissive: bool) -> Router {
    use axum::routing::{get, post};

    let router = Router::new()
        .route("/generate-recommendation", post(api::generate_recommendation))
        .route("/api/buildinfo", get(api::get_build_info))
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_permissive {
        router.layer(CorsLayer::very_permissive())
    } else {
        router
    }
}
