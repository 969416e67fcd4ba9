//! Recommendation endpoint

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use recsync_common::CanonicalRecord;

use crate::error::PipelineError;
use crate::pipeline::GenerateRequest;
use crate::AppState;

/// POST /generate-recommendation
///
/// Body: `{"user_id": "...", "steps": 8000, "heart_rate": 72.5}` (`steps`
/// and `heart_rate` optional). Responds with the record that was persisted.
pub async fn generate_recommendation(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<CanonicalRecord>, PipelineError> {
    let Json(input) = payload.map_err(|e| PipelineError::InvalidRequest(e.body_text()))?;
    let record = state.pipeline.generate(input).await?;
    Ok(Json(record))
}
