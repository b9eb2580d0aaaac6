//! Error types for the retained storage cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the retained storage cache
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Unknown record key, unknown namespace, or malformed caller input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Value does not fit: a write larger than the record's configured
    /// maximum, or a read into a buffer smaller than the stored value
    #[error("size out of range for '{key}': {size} exceeds {limit}")]
    InvalidSize {
        /// Record key the size check failed for
        key: String,
        /// Offending size in bytes
        size: usize,
        /// Limit the size was checked against
        limit: usize,
    },

    /// Record is known but currently holds no value
    #[error("no value for '{key}'")]
    NotFound {
        /// Record key that has no value
        key: String,
    },

    /// Backing non-volatile store reported a failure
    #[error("backend failure: {0}")]
    Backend(String),

    /// Operation is not valid for the current synchronization mode
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

// =============================================================================
// Tests
// =============================================================================
