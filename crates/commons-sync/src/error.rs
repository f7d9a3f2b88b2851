use commons_core::{Said, SpaceId};
use commons_store::StoreError;

/// Replicated log errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// No log exists for the space yet. Callers fall back to the local store.
    #[error("no credential log for space {0}")]
    NoLog(SpaceId),

    #[error("log operation timed out: {0}")]
    Timeout(String),

    #[error("log substrate error: {0}")]
    Substrate(String),

    #[error("malformed change: {0}")]
    Malformed(String),

    /// Private credentials never leave the local store.
    #[error("credential {0} is private and cannot be published")]
    Private(Said),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Worth retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Substrate(_))
    }
}
