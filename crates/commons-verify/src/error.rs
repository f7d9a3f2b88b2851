use commons_core::{Aid, Said};
use commons_store::StoreError;

/// Verification gate and identity agent errors.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("record not found: {0}")]
    NotFound(Said),

    #[error("issuer {aid} unresolvable: {reason}")]
    IssuerUnresolvable { aid: Aid, reason: String },

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("record {0} replaced during verification")]
    ContentChanged(Said),

    #[error("identity agent error: {0}")]
    Agent(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] commons_crypto::CryptoError),
}

impl VerifyError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::IssuerUnresolvable { .. } | Self::Timeout(_) | Self::ContentChanged(_)
        )
    }
}

impl From<StoreError> for VerifyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(said) => Self::NotFound(said),
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(VerifyError::Timeout("agent".into()).is_transient());
        assert!(VerifyError::IssuerUnresolvable {
            aid: Aid::from("EOrg"),
            reason: "offline".into()
        }
        .is_transient());
        assert!(VerifyError::ContentChanged(Said::from("EA")).is_transient());
        assert!(!VerifyError::NotFound(Said::from("EA")).is_transient());
        assert!(!VerifyError::Agent("bad".into()).is_transient());
    }

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err: VerifyError = StoreError::NotFound(Said::from("EA")).into();
        assert!(matches!(err, VerifyError::NotFound(_)));
        let err: VerifyError = StoreError::Backend("disk".into()).into();
        assert!(matches!(err, VerifyError::Store(_)));
    }
}
