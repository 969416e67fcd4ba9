//! Source readers
//!
//! A deployment reads the latest raw result one of two ways:
//! - [`LatestRowSource`]: newest row of a local append-only SQLite table
//! - [`ProducerSource`]: direct invocation of an upstream producer
//!
//! Both sit behind [`SourceReader`], so the pipeline never branches on mode.

use async_trait::async_trait;
use recsync_common::{CallerRequest, RawResult};
use thiserror::Error;

pub mod latest_row;
pub mod producer;

pub use latest_row::LatestRowSource;
pub use producer::{CommandProducer, Producer, ProducerSource};

/// Source read failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Store missing, unreachable, or producer not runnable
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// Store reachable but holds no record
    #[error("Source empty: {0}")]
    Empty(String),

    /// Record present but structurally unreadable
    #[error("Source corrupt: {0}")]
    Corrupt(String),
}

/// Capability that yields the single most recent raw result
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Short identifier for logs ("latest_row", "producer")
    fn mode(&self) -> &'static str;

    /// Read exactly one raw result
    ///
    /// `request` is only consulted by on-demand producers; table readers
    /// ignore it.
    async fn read_latest(&self, request: &CallerRequest) -> Result<RawResult, SourceError>;
}
