//! Common error types for recsync

use thiserror::Error;

/// Common result type for recsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across recsync crates
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid caller input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
