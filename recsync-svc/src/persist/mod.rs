//! Remote persistence
//!
//! One insert per pipeline run: no batching, and no upsert unless the
//! deployment opts into [`PersistMode::UpsertByUser`].

use async_trait::async_trait;
use recsync_common::CanonicalRecord;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub mod supabase;

pub use recsync_common::config::PersistMode;
pub use supabase::SupabasePersister;

/// Remote write failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistError {
    /// Network, auth, timeout or remote-side failure
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Remote table disagrees with the record's field set or types
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),
}

impl PersistError {
    /// Short machine-readable cause
    pub fn cause(&self) -> &'static str {
        match self {
            PersistError::WriteFailed(_) => "write_failed",
            PersistError::SchemaMismatch(_) => "schema_mismatch",
        }
    }
}

/// Remote store's view of an inserted record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedRow {
    pub table: String,
    /// Row as echoed by the store (includes store-assigned columns)
    pub row: Value,
}

impl PersistedRow {
    /// Store-assigned primary key, when the store echoes one
    pub fn id(&self) -> Option<&Value> {
        self.row.get("id").filter(|v| !v.is_null())
    }
}

/// Capability that durably records one canonical record
#[async_trait]
pub trait Persister: Send + Sync {
    /// Short identifier for logs
    fn backend(&self) -> &'static str;

    async fn persist(&self, record: &CanonicalRecord) -> Result<PersistedRow, PersistError>;
}
