use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use commons_core::{Aid, CredentialRecord, Said, SchemaId, SpaceId, SyncConfig, SyncStatus};
use commons_crypto::KeyPair;
use commons_store::{CredentialStore, StoreError};

use crate::error::SyncError;
use crate::substrate::{Change, ChangeId, LogId, LogSubstrate};

/// Credential content as carried by a log change.
///
/// Locally derived state (verification, revocation, sync) never travels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialChange {
    pub said: Said,
    pub issuer: Aid,
    pub subject: Aid,
    pub schema: SchemaId,
    pub payload: serde_json::Value,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub references: Vec<Said>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialChange {
    pub fn from_record(record: &CredentialRecord) -> Self {
        Self {
            said: record.said.clone(),
            issuer: record.issuer.clone(),
            subject: record.subject.clone(),
            schema: record.schema.clone(),
            payload: record.payload.clone(),
            issued_at: record.issued_at,
            signature: record.signature.clone(),
            references: record.references.clone(),
            expires_at: record.expires_at,
        }
    }

    /// Unverified record delivered through the log.
    pub fn into_record(self, change_id: &ChangeId) -> CredentialRecord {
        let mut record =
            CredentialRecord::new(self.said, self.issuer, self.subject, self.schema, self.payload)
                .with_issued_at(self.issued_at);
        record.signature = self.signature;
        record.references = self.references;
        record.expires_at = self.expires_at;
        record.sync = SyncStatus::Synced {
            change_id: change_id.0.clone(),
        };
        record
    }
}

/// Outcome of one pass over the pending-sync queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub synced: usize,
    pub still_pending: usize,
    pub abandoned: usize,
}

/// Projects community-visible credentials onto one replicated log per space.
///
/// Appends take the log's lock exclusively, replays take it shared. Every
/// substrate call runs under the configured deadline.
pub struct ReplicatedLogAdapter {
    substrate: Arc<dyn LogSubstrate>,
    store: Arc<CredentialStore>,
    config: SyncConfig,
    logs: DashMap<SpaceId, LogId>,
    log_locks: DashMap<LogId, Arc<RwLock<()>>>,
    create_lock: Mutex<()>,
    next_attempt: DashMap<Said, Instant>,
}

impl ReplicatedLogAdapter {
    pub fn new(
        substrate: Arc<dyn LogSubstrate>,
        store: Arc<CredentialStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            substrate,
            store,
            config,
            logs: DashMap::new(),
            log_locks: DashMap::new(),
            create_lock: Mutex::new(()),
            next_attempt: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Log of `space`, created on first use.
    pub async fn ensure_log(&self, space: &SpaceId, signing_key: &KeyPair) -> Result<LogId, SyncError> {
        if let Some(log) = self.logs.get(space) {
            return Ok(log.value().clone());
        }

        let _creating = self.create_lock.lock().await;
        if let Some(log) = self.find_log(space).await? {
            return Ok(log);
        }

        let seed: [u8; 32] = rand::random();
        let log = self
            .bounded(
                "create_log",
                self.substrate
                    .create_log(space, &self.config.change_type, true, seed, signing_key),
            )
            .await?;
        self.logs.insert(space.clone(), log.clone());
        Ok(log)
    }

    /// Append a record to the log of `space` and return the new head.
    pub async fn append(
        &self,
        space: &SpaceId,
        record: &CredentialRecord,
        signing_key: &KeyPair,
    ) -> Result<ChangeId, SyncError> {
        let log = self.ensure_log(space, signing_key).await?;
        let payload = serde_json::to_vec(&CredentialChange::from_record(record))?;

        let lock = self.log_lock(&log);
        let _guard = lock.write().await;
        let result = self
            .bounded(
                "append_change",
                self.substrate
                    .append_change(&log, signing_key, &self.config.change_type, true, payload),
            )
            .await?;

        let head = result
            .new_heads
            .last()
            .cloned()
            .ok_or_else(|| SyncError::Substrate("append returned no heads".into()))?;
        tracing::debug!(space = %space, said = %record.said, change = %head, "credential appended");
        Ok(head)
    }

    /// Replay the log of `space` from its root.
    ///
    /// Changes of other types are ignored, malformed ones skipped with a
    /// warning. The first change carrying a SAID wins.
    pub async fn read_all(&self, space: &SpaceId) -> Result<Vec<CredentialRecord>, SyncError> {
        let log = self
            .find_log(space)
            .await?
            .ok_or_else(|| SyncError::NoLog(space.clone()))?;

        let mut changes: Vec<Change> = Vec::new();
        {
            let lock = self.log_lock(&log);
            let _guard = lock.read().await;
            let mut collect = |change: &Change| {
                if !change.is_root {
                    changes.push(change.clone());
                }
                true
            };
            self.bounded(
                "iterate_from_root",
                self.substrate.iterate_from_root(&log, &mut collect),
            )
            .await?;
        }

        let mut seen: HashSet<Said> = HashSet::new();
        let mut records = Vec::with_capacity(changes.len());
        for change in changes {
            if change.data_type != self.config.change_type || change.payload.is_empty() {
                continue;
            }
            match serde_json::from_slice::<CredentialChange>(&change.payload) {
                Ok(decoded) => {
                    if seen.insert(decoded.said.clone()) {
                        records.push(decoded.into_record(&change.id));
                    }
                }
                Err(e) => {
                    tracing::warn!(space = %space, change = %change.id, error = %e, "skipping malformed change");
                }
            }
        }
        Ok(records)
    }

    /// Append a stored community credential.
    ///
    /// On failure the record is flagged pending for [`Self::retry_pending`].
    pub async fn publish(
        &self,
        space: &SpaceId,
        said: &Said,
        signing_key: &KeyPair,
    ) -> Result<ChangeId, SyncError> {
        let record = self.store.get(said)?;
        if !self.store.schemas().is_community_visible(&record.schema) {
            return Err(SyncError::Private(said.clone()));
        }

        match self.append(space, &record, signing_key).await {
            Ok(change) => {
                self.store.set_sync_status(
                    said,
                    SyncStatus::Synced {
                        change_id: change.0.clone(),
                    },
                )?;
                self.next_attempt.remove(said);
                tracing::info!(space = %space, said = %said, change = %change, "credential published");
                Ok(change)
            }
            Err(e) => {
                let attempts = match &record.sync {
                    SyncStatus::Pending { attempts, .. } => attempts + 1,
                    _ => 1,
                };
                self.store.set_sync_status(
                    said,
                    SyncStatus::Pending {
                        space: space.clone(),
                        attempts,
                    },
                )?;
                let delay = self.config.retry_base_delay() * 2u32.saturating_pow(attempts - 1);
                self.next_attempt.insert(said.clone(), Instant::now() + delay);
                tracing::warn!(
                    space = %space,
                    said = %said,
                    attempts,
                    "publish failed, retry in {delay:?}: {e}"
                );
                Err(e)
            }
        }
    }

    /// Retry every pending record whose backoff has elapsed.
    ///
    /// A record that reaches the configured attempt limit is given up on and
    /// stays local only.
    pub async fn retry_pending(&self, signing_key: &KeyPair) -> Result<RetryReport, SyncError> {
        let mut report = RetryReport::default();
        let now = Instant::now();

        for said in self.store.pending_sync() {
            let record = match self.store.get(&said) {
                Ok(record) => record,
                Err(StoreError::NotFound(_)) => {
                    self.next_attempt.remove(&said);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let SyncStatus::Pending { space, attempts } = record.sync else {
                continue;
            };

            if attempts >= self.config.max_sync_attempts {
                self.abandon(&said, attempts)?;
                report.abandoned += 1;
                continue;
            }
            let due = self
                .next_attempt
                .get(&said)
                .map(|at| *at.value() <= now)
                .unwrap_or(true);
            if !due {
                report.still_pending += 1;
                continue;
            }

            match self.publish(&space, &said, signing_key).await {
                Ok(_) => report.synced += 1,
                Err(_) if attempts + 1 >= self.config.max_sync_attempts => {
                    self.abandon(&said, attempts + 1)?;
                    report.abandoned += 1;
                }
                Err(_) => report.still_pending += 1,
            }
        }

        if report != RetryReport::default() {
            tracing::info!(
                synced = report.synced,
                still_pending = report.still_pending,
                abandoned = report.abandoned,
                "pending sync pass finished"
            );
        }
        Ok(report)
    }

    fn abandon(&self, said: &Said, attempts: u32) -> Result<(), SyncError> {
        self.store.set_sync_status(said, SyncStatus::LocalOnly)?;
        self.next_attempt.remove(said);
        tracing::warn!(said = %said, attempts, "giving up on publishing credential");
        Ok(())
    }

    async fn find_log(&self, space: &SpaceId) -> Result<Option<LogId>, SyncError> {
        if let Some(log) = self.logs.get(space) {
            return Ok(Some(log.value().clone()));
        }
        let found = self
            .bounded(
                "find_log",
                self.substrate.find_log(space, &self.config.change_type),
            )
            .await?;
        if let Some(log) = &found {
            self.logs.insert(space.clone(), log.clone());
        }
        Ok(found)
    }

    fn log_lock(&self, log: &LogId) -> Arc<RwLock<()>> {
        self.log_locks
            .entry(log.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .value()
            .clone()
    }

    async fn bounded<T, Fut>(&self, operation: &str, fut: Fut) -> Result<T, SyncError>
    where
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let timeout = self.config.log_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(format!(
                "{} did not complete within {:?}",
                operation, timeout
            ))),
        }
    }
}
