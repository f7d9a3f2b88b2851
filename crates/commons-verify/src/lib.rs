//! Commons Verify: the verification gate between cached credential records
//! and the trust graph: issuer key-state resolution through an external
//! identity agent, signature validation and revocation checks.

pub mod agent;
pub mod error;
pub mod gate;
pub mod retry;

pub use agent::{
    CompositeResolver, KeyState, KeyStateResolver, LocalIdentityAgent, RevocationNotice,
    RevocationRegistry,
};
pub use error::VerifyError;
pub use gate::{PendingReport, VerificationCheck, VerificationGate, VerificationOutcome};
pub use retry::{bounded, retry_transient};
