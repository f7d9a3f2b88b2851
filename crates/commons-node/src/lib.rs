//! Commons Node: wires the credential store, verification gate, replicated
//! log and trust graph cache into one community service, with a RocksDB
//! record backend and periodic maintenance.

pub mod config;
pub mod error;
pub mod node;
pub mod service;
pub mod storage;

pub use config::NodeConfig;
pub use error::ServiceError;
pub use node::CommonsNode;
pub use service::{CommunityService, IngestReport, MaintenanceReport};
pub use storage::RocksBackend;
