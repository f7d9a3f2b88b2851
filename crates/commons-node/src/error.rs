use commons_core::{Aid, CoreError};
use commons_store::StoreError;
use commons_sync::SyncError;
use commons_trust::TrustError;
use commons_verify::VerifyError;

/// Errors surfaced by [`crate::CommunityService`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("no community configured for organisation {0}")]
    UnknownCommunity(Aid),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Config(#[from] CoreError),
}
