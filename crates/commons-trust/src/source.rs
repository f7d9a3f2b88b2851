use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use commons_core::{Aid, CredentialRecord, Said};
use commons_store::{CredentialStore, ReadMode};

use crate::error::TrustError;

/// Where the graph builder reads an organisation's credentials from.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credentials_for(&self, org: &Aid) -> Result<Vec<CredentialRecord>, TrustError>;

    /// Monotonic counter that moves whenever the returned set may change.
    fn generation(&self) -> u64;
}

/// Reads trusted community-visible credentials straight from the local store.
pub struct LocalStoreSource {
    store: Arc<CredentialStore>,
}

impl LocalStoreSource {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CredentialSource for LocalStoreSource {
    async fn credentials_for(&self, _org: &Aid) -> Result<Vec<CredentialRecord>, TrustError> {
        let mut by_said: BTreeMap<Said, CredentialRecord> = BTreeMap::new();
        for schema in self.store.schemas().community_schemas() {
            for record in self.store.query_by_schema(&schema, ReadMode::Trusted).iter() {
                let record = record?;
                by_said.insert(record.said.clone(), record);
            }
        }
        Ok(by_said.into_values().collect())
    }

    fn generation(&self) -> u64 {
        self.store.generation()
    }
}
