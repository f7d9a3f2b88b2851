use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use commons_core::{Aid, CredentialRecord, Said, SpaceId};
use commons_store::{CredentialStore, ReadMode, StoreError};
use commons_trust::{CredentialSource, TrustError};

use crate::adapter::ReplicatedLogAdapter;
use crate::error::SyncError;

/// Merges the community log with the local store.
///
/// The log is authoritative for credential content when it has any; the store
/// supplies locally derived state and is the fallback when the log is
/// missing, unreachable or empty.
pub struct SyncReconciler {
    adapter: Arc<ReplicatedLogAdapter>,
    store: Arc<CredentialStore>,
    spaces: HashMap<Aid, SpaceId>,
    inconsistencies: AtomicU64,
}

impl SyncReconciler {
    pub fn new(
        adapter: Arc<ReplicatedLogAdapter>,
        store: Arc<CredentialStore>,
        spaces: HashMap<Aid, SpaceId>,
    ) -> Self {
        Self {
            adapter,
            store,
            spaces,
            inconsistencies: AtomicU64::new(0),
        }
    }

    pub fn space_for(&self, org: &Aid) -> Option<&SpaceId> {
        self.spaces.get(org)
    }

    /// Log/store divergences observed so far.
    pub fn inconsistency_count(&self) -> u64 {
        self.inconsistencies.load(Ordering::SeqCst)
    }

    /// Community-visible credentials of `space` admitted by `mode`, ordered
    /// by SAID.
    pub async fn community_credentials(
        &self,
        space: &SpaceId,
        mode: ReadMode,
    ) -> Result<Vec<CredentialRecord>, SyncError> {
        match self.adapter.read_all(space).await {
            Ok(records) if !records.is_empty() => self.merge(space, records, mode),
            Ok(_) => {
                tracing::debug!(space = %space, "credential log empty, reading local store");
                self.from_store(mode)
            }
            Err(SyncError::NoLog(_)) => {
                tracing::debug!(space = %space, "no credential log, reading local store");
                self.from_store(mode)
            }
            Err(e) => {
                tracing::warn!(space = %space, error = %e, "credential log unavailable, reading local store");
                self.from_store(mode)
            }
        }
    }

    fn merge(
        &self,
        space: &SpaceId,
        log_records: Vec<CredentialRecord>,
        mode: ReadMode,
    ) -> Result<Vec<CredentialRecord>, SyncError> {
        let schemas = self.store.schemas();
        let mut merged: BTreeMap<Said, CredentialRecord> = BTreeMap::new();

        for delivered in log_records {
            if !schemas.is_community_visible(&delivered.schema) {
                continue;
            }
            let local = match self.store.get(&delivered.said) {
                Ok(local) => Some(local),
                Err(StoreError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            };
            let record = match local {
                Some(local) if local.same_content(&delivered) => overlay(delivered, &local),
                local => {
                    if local.is_some() {
                        self.inconsistencies.fetch_add(1, Ordering::SeqCst);
                        tracing::warn!(
                            target: "commons::inconsistency",
                            space = %space,
                            said = %delivered.said,
                            "log content diverges from local record, re-verifying"
                        );
                    }
                    // New content is stored unverified; the gate picks it up.
                    match self.store.put(delivered.clone()) {
                        Ok(_) => self.store.get(&delivered.said)?,
                        Err(e) => {
                            tracing::warn!(space = %space, said = %delivered.said, error = %e, "rejected credential from log");
                            continue;
                        }
                    }
                }
            };
            if self.store.admits(mode, &record) {
                merged.insert(record.said.clone(), record);
            }
        }

        Ok(merged.into_values().collect())
    }

    fn from_store(&self, mode: ReadMode) -> Result<Vec<CredentialRecord>, SyncError> {
        let mut by_said: BTreeMap<Said, CredentialRecord> = BTreeMap::new();
        for schema in self.store.schemas().community_schemas() {
            for record in self.store.query_by_schema(&schema, mode).iter() {
                let record = record?;
                by_said.insert(record.said.clone(), record);
            }
        }
        Ok(by_said.into_values().collect())
    }
}

/// Log content with the local record's derived state.
fn overlay(mut delivered: CredentialRecord, local: &CredentialRecord) -> CredentialRecord {
    delivered.verification = local.verification.clone();
    delivered.revocation = local.revocation.clone();
    delivered.tombstoned = local.tombstoned;
    delivered.cached_at = local.cached_at;
    delivered
}

#[async_trait]
impl CredentialSource for SyncReconciler {
    async fn credentials_for(&self, org: &Aid) -> Result<Vec<CredentialRecord>, TrustError> {
        let result = match self.spaces.get(org) {
            Some(space) => self.community_credentials(space, ReadMode::Trusted).await,
            None => self.from_store(ReadMode::Trusted),
        };
        result.map_err(|e| TrustError::Source(e.to_string()))
    }

    fn generation(&self) -> u64 {
        self.store.generation()
    }
}
