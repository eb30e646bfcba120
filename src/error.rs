//! Error taxonomy for the tuning core.
//!
//! Fatal/configuration errors abort the current invocation with nothing
//! partially persisted. Recoverable conditions (`EmptySearchSpace`,
//! exhausted candidate batches) are handled by defined fallbacks in the
//! session controller and never surface as crashes.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Errors from tuning-core operations
#[derive(Debug, Error)]
pub enum RetuneError {
    #[error("existing tuning data found at {0}; use a fresh run directory or resume the run")]
    CheckpointExists(PathBuf),

    #[error(
        "received {received} feedback values but {expected} configurations \
         were generated in the previous iteration"
    )]
    FeedbackMismatch { expected: usize, received: usize },

    #[error("cannot finalize without an optimal configuration")]
    NoBestConfiguration,

    #[error("file is writable by other users (potential security risk): {0}")]
    InsecurePermissions(PathBuf),

    #[error("{0} configurations are still awaiting feedback")]
    BatchPending(usize),

    #[error("no tuning opportunities provided; compile with opportunity generation enabled")]
    NoOpportunities,

    #[error("empty search space")]
    EmptySearchSpace,

    #[error("search engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for tuning-core operations
pub type Result<T> = std::result::Result<T, RetuneError>;
