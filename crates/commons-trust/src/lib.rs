//! Commons Trust: derives a directed trust graph from verified membership,
//! steward and endorsement credentials, with per-organisation caching that
//! coalesces concurrent builds.

pub mod build_state;
pub mod cache;
pub mod error;
pub mod graph;
pub mod score;
pub mod source;
pub mod summary;

pub use build_state::{BuildEvent, BuildState, BuildStateMachine};
pub use cache::TrustGraphCache;
pub use error::TrustError;
pub use graph::{build_graph, EdgeKind, TrustEdge, TrustGraph, TrustNode};
pub use score::ScorePolicy;
pub use source::{CredentialSource, LocalStoreSource};
pub use summary::{NodeScore, ScoreSummary};
