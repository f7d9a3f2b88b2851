//! Commons Core: identifiers, credential records, and configuration shared
//! by every layer of the credential store and trust graph engine.

pub mod config;
pub mod error;
pub mod record;
pub mod types;

pub use config::{
    CommunityConfig, EngineConfig, ScoreWeights, SyncConfig, TrustConfig, VerificationConfig,
};
pub use error::CoreError;
pub use record::{CredentialRecord, Revocation, SyncStatus, Verification, VerificationStatus};
pub use types::{Aid, CredentialKind, Said, SchemaId, SpaceId, Visibility};
