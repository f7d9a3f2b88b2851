//! Commons Sync: projects community-visible credentials onto a replicated,
//! append-only log per community space and reconciles log content with the
//! local credential store.

pub mod adapter;
pub mod error;
pub mod reconciler;
pub mod substrate;

pub use adapter::{CredentialChange, ReplicatedLogAdapter, RetryReport};
pub use error::SyncError;
pub use reconciler::SyncReconciler;
pub use substrate::{AppendResult, Change, ChangeId, LogId, LogSubstrate, MemoryLogSubstrate};
