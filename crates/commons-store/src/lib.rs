//! Commons Store: indexed local cache of verifiable-credential records with
//! revocation tracking, expiry cleanup and a schema/visibility registry.

pub mod backend;
pub mod error;
pub mod query;
pub mod schema;
pub mod store;

pub use backend::{CountingBackend, MemoryBackend, RecordBackend};
pub use error::StoreError;
pub use query::{ReadMode, RecordQuery};
pub use schema::{SchemaDefinition, SchemaRegistry};
pub use store::{CredentialStore, PutOutcome};
