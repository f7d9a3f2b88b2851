use commons_core::Aid;

use crate::build_state::{BuildEvent, BuildState};

/// Trust graph errors.
///
/// `Clone` so a single build result can be handed to every coalesced reader.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrustError {
    #[error("credential source error: {0}")]
    Source(String),

    #[error("graph build timed out: {0}")]
    Timeout(String),

    #[error("invalid build state transition from {from} on {event:?}")]
    InvalidTransition { from: BuildState, event: BuildEvent },

    #[error("node not in graph: {0}")]
    UnknownNode(Aid),
}

impl From<commons_store::StoreError> for TrustError {
    fn from(e: commons_store::StoreError) -> Self {
        Self::Source(e.to_string())
    }
}
