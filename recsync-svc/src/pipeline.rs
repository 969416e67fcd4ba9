//! Pipeline orchestrator
//!
//! Per request: `READ → NORMALIZE → PERSIST → RESPOND`. READ and PERSIST may
//! fail; NORMALIZE cannot. The record returned to the caller is the record
//! handed to the persister.

use recsync_common::{CallerRequest, CanonicalRecord};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::normalize::Normalizer;
use crate::persist::Persister;
use crate::source::{SourceError, SourceReader};

/// Independent bounds for the two blocking stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTimeouts {
    pub read: Duration,
    pub persist: Duration,
}

impl Default for PipelineTimeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(5),
            persist: Duration::from_secs(10),
        }
    }
}

/// Unvalidated caller input as it arrives over the transport
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest {
    pub user_id: Option<String>,
    pub steps: Option<i64>,
    pub heart_rate: Option<f64>,
}

impl GenerateRequest {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn validate(self) -> Result<CallerRequest, PipelineError> {
        let user_id = self
            .user_id
            .ok_or_else(|| PipelineError::InvalidRequest("user_id is required".to_string()))?;
        Ok(CallerRequest::new(user_id, self.steps, self.heart_rate)?)
    }
}

/// Reader → Normalizer → Persister, wired at construction time
pub struct Pipeline {
    source: Arc<dyn SourceReader>,
    normalizer: Normalizer,
    persister: Arc<dyn Persister>,
    timeouts: PipelineTimeouts,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn SourceReader>,
        normalizer: Normalizer,
        persister: Arc<dyn Persister>,
        timeouts: PipelineTimeouts,
    ) -> Self {
        Self {
            source,
            normalizer,
            persister,
            timeouts,
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn source_mode(&self) -> &'static str {
        self.source.mode()
    }

    /// Validate caller input, then run
    pub async fn generate(&self, input: GenerateRequest) -> Result<CanonicalRecord, PipelineError> {
        let request = input.validate()?;
        self.run(request).await
    }

    /// Run one request through every stage
    pub async fn run(&self, request: CallerRequest) -> Result<CanonicalRecord, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", %run_id, user_id = %request.user_id());
        self.run_stages(request).instrument(span).await
    }

    async fn run_stages(&self, request: CallerRequest) -> Result<CanonicalRecord, PipelineError> {
        // READ
        let raw = match timeout(self.timeouts.read, self.source.read_latest(&request)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(stage = "read", mode = self.source.mode(), "{}", e);
                return Err(e.into());
            }
            Err(_) => {
                let e = SourceError::Unavailable(format!(
                    "Read timed out after {} ms",
                    self.timeouts.read.as_millis()
                ));
                warn!(stage = "read", mode = self.source.mode(), "{}", e);
                return Err(e.into());
            }
        };

        // NORMALIZE
        let record = self.normalizer.normalize(raw, &request);

        // PERSIST in its own task: a dropped caller must not abandon the write
        let persister = Arc::clone(&self.persister);
        let to_store = record.clone();
        let write = tokio::spawn(
            async move { persister.persist(&to_store).await }.in_current_span(),
        );

        match timeout(self.timeouts.persist, write).await {
            Ok(Ok(Ok(row))) => {
                info!(
                    stage = "persist",
                    backend = self.persister.backend(),
                    table = %row.table,
                    row_id = ?row.id(),
                    "Recommendation generated"
                );
                Ok(record)
            }
            Ok(Ok(Err(e))) => {
                warn!(stage = "persist", backend = self.persister.backend(), "{}", e);
                Err(PipelineError::persist(e, record))
            }
            Ok(Err(join_err)) => {
                warn!(stage = "persist", "Persist task failed: {}", join_err);
                Err(PipelineError::Persist {
                    cause: "write_failed",
                    message: format!("Persist task failed: {}", join_err),
                    record,
                })
            }
            Err(_) => {
                // The write keeps running; its outcome is only logged by the persister
                warn!(
                    stage = "persist",
                    timeout_ms = self.timeouts.persist.as_millis() as u64,
                    "Persist timed out"
                );
                Err(PipelineError::Persist {
                    cause: "timeout",
                    message: format!(
                        "Persist timed out after {} ms",
                        self.timeouts.persist.as_millis()
                    ),
                    record,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_user_id() {
        let err = GenerateRequest::default().validate().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));
    }

    #[test]
    fn test_validate_rejects_bad_sensor_values() {
        let input = GenerateRequest {
            user_id: Some("alice".to_string()),
            steps: Some(-5),
            heart_rate: None,
        };
        assert!(matches!(input.validate(), Err(PipelineError::InvalidRequest(_))));

        let input = GenerateRequest {
            user_id: Some("alice".to_string()),
            steps: None,
            heart_rate: Some(-60.0),
        };
        assert!(matches!(input.validate(), Err(PipelineError::InvalidRequest(_))));
    }

    #[test]
    fn test_validate_accepts_identity_only() {
        let request = GenerateRequest::for_user("alice").validate().unwrap();
        assert_eq!(request.user_id(), "alice");
        assert_eq!(request.steps(), None);
    }
}
