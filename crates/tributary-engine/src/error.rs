//! Engine error taxonomy.
//!
//! Errors are split along the retry boundary: transient HTTP failures
//! are retried by the backfill driver with backoff, while permanent
//! HTTP failures, shape mismatches, and invalid-state errors surface to
//! the caller immediately. Core-crate errors bridge in via `From` so
//! the pipeline can use `?` throughout.

use tributary_core::error::{ConvertError, ExtractError, SchemaError};

/// Errors produced by the replication engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Value extraction from a payload failed.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// A converter or defaulter failed.
    #[error(transparent)]
    Convert(#[from] ConvertError),

    /// A schema operation failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// An outbound HTTP call failed in a way worth retrying
    /// (5xx, 429, timeouts, connection resets).
    #[error("transient http error (status {status}): {message}")]
    TransientHttp {
        /// HTTP status code, or 0 for transport-level failures.
        status: u16,
        /// Upstream error detail.
        message: String,
    },

    /// An outbound HTTP call failed in a way retrying cannot fix
    /// (auth failures, 4xx other than 429).
    #[error("permanent http error (status {status}): {message}")]
    PermanentHttp {
        /// HTTP status code.
        status: u16,
        /// Upstream error detail.
        message: String,
    },

    /// A response parsed but did not have the expected fields.
    #[error("unexpected response shape: {0}")]
    ShapeMismatch(String),

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// An operation was invoked against an integration in a state
    /// that cannot support it (missing credentials, no table).
    #[error("invalid integration state: {0}")]
    InvalidState(String),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns `true` if the error is worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientHttp { .. })
    }

    /// HTTP status code carried by the error, if any.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::TransientHttp { status, .. } | Self::PermanentHttp { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

/// Convenience alias for engine results.
pub type EngineResult<T> = Result<T, EngineError>;
