//! Pipeline error taxonomy and HTTP mapping
//!
//! Every stage failure becomes exactly one [`ErrorKind`] plus the underlying
//! message. Responses always carry the kind so a machine caller can tell
//! "retry me" from "fix your input" from "no data yet".

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use recsync_common::CanonicalRecord;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::persist::PersistError;
use crate::source::SourceError;

/// Caller-facing failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    SourceUnavailable,
    SourceEmpty,
    SourceCorrupt,
    PersistFailed,
    InvalidRequest,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::SourceUnavailable => "SourceUnavailable",
            ErrorKind::SourceEmpty => "SourceEmpty",
            ErrorKind::SourceCorrupt => "SourceCorrupt",
            ErrorKind::PersistFailed => "PersistFailed",
            ErrorKind::InvalidRequest => "InvalidRequest",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::SourceUnavailable => "SOURCE_UNAVAILABLE",
            ErrorKind::SourceEmpty => "SOURCE_EMPTY",
            ErrorKind::SourceCorrupt => "SOURCE_CORRUPT",
            ErrorKind::PersistFailed => "PERSIST_FAILED",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
        }
    }

    /// Caused by the caller rather than a dependency
    pub fn is_client_error(self) -> bool {
        self == ErrorKind::InvalidRequest
    }

    /// Worth retrying unchanged later
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::SourceUnavailable | ErrorKind::PersistFailed)
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::SourceUnavailable | ErrorKind::SourceEmpty => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::SourceCorrupt | ErrorKind::PersistFailed => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Failure of one pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Caller input missing or malformed (checked before READ)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// READ stage failure
    #[error(transparent)]
    Source(#[from] SourceError),

    /// PERSIST stage failure; the record was computed but not saved
    #[error("Record computed but not saved ({cause}): {message}")]
    Persist {
        cause: &'static str,
        message: String,
        record: CanonicalRecord,
    },
}

impl PipelineError {
    pub fn persist(error: PersistError, record: CanonicalRecord) -> Self {
        PipelineError::Persist {
            cause: error.cause(),
            message: error.to_string(),
            record,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            PipelineError::Source(SourceError::Unavailable(_)) => ErrorKind::SourceUnavailable,
            PipelineError::Source(SourceError::Empty(_)) => ErrorKind::SourceEmpty,
            PipelineError::Source(SourceError::Corrupt(_)) => ErrorKind::SourceCorrupt,
            PipelineError::Persist { .. } => ErrorKind::PersistFailed,
        }
    }

    /// Diagnostic payload attached to the error response
    pub fn detail(&self) -> Value {
        match self {
            PipelineError::Persist { cause, record, .. } => json!({
                "cause": cause,
                "user_id": record.user_id(),
                "record": record,
            }),
            _ => Value::Null,
        }
    }

    pub fn to_body(&self) -> Value {
        let kind = self.kind();
        json!({
            "error": {
                "kind": kind.as_str(),
                "code": kind.code(),
                "message": self.to_string(),
                "retryable": kind.is_retryable(),
                "class": if kind.is_client_error() { "client" } else { "dependency" },
                "detail": self.detail(),
            }
        })
    }
}

impl From<recsync_common::Error> for PipelineError {
    fn from(err: recsync_common::Error) -> Self {
        match err {
            recsync_common::Error::InvalidInput(msg) => PipelineError::InvalidRequest(msg),
            other => PipelineError::InvalidRequest(other.to_string()),
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        (self.kind().status(), Json(self.to_body())).into_response()
    }
}
