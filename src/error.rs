//! Error types for the Floodgate service.

use thiserror::Error;

/// Main error type for Floodgate operations.
///
/// Only startup concerns can fail. Admission checks never return errors:
/// an exceeded limit is reported as a structured 429 response, not an `Err`.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
