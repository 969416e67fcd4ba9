//! # recsync Common Library
//!
//! Shared code for the recsync service crates:
//! - Canonical record model and the per-version field registry
//! - Caller request type and validation
//! - Configuration loading (TOML + environment + defaults)
//! - Common error type

pub mod config;
pub mod error;
pub mod record;

pub use error::{Error, Result};
pub use record::{CallerRequest, CanonicalRecord, RawResult, SchemaVersion};
