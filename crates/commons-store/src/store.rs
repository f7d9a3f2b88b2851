use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use commons_core::{
    Aid, CredentialKind, CredentialRecord, Revocation, Said, SchemaId, SyncStatus, Verification,
    VerificationConfig,
};

use crate::backend::{MemoryBackend, RecordBackend};
use crate::error::StoreError;
use crate::query::{ReadMode, RecordQuery};
use crate::schema::SchemaRegistry;

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Updated,
}

/// Secondary indices, derived from the primary records.
#[derive(Default)]
struct Indices {
    by_issuer: BTreeMap<Aid, BTreeSet<Said>>,
    by_subject: BTreeMap<Aid, BTreeSet<Said>>,
    by_schema: BTreeMap<SchemaId, BTreeSet<Said>>,
    by_expiry: BTreeSet<(DateTime<Utc>, Said)>,
    /// target -> records referencing it
    referenced_by: BTreeMap<Said, BTreeSet<Said>>,
    /// target -> revocation, kept even when the target is not stored yet
    revocations: BTreeMap<Said, Revocation>,
    pending_sync: BTreeSet<Said>,
}

impl Indices {
    fn insert(&mut self, record: &CredentialRecord) {
        let said = &record.said;
        self.by_issuer
            .entry(record.issuer.clone())
            .or_default()
            .insert(said.clone());
        self.by_subject
            .entry(record.subject.clone())
            .or_default()
            .insert(said.clone());
        self.by_schema
            .entry(record.schema.clone())
            .or_default()
            .insert(said.clone());
        if let Some(exp) = record.expires_at {
            self.by_expiry.insert((exp, said.clone()));
        }
        for target in &record.references {
            self.referenced_by
                .entry(target.clone())
                .or_default()
                .insert(said.clone());
        }
        if matches!(record.sync, SyncStatus::Pending { .. }) {
            self.pending_sync.insert(said.clone());
        }
    }

    fn remove(&mut self, record: &CredentialRecord) {
        let said = &record.said;
        remove_from(&mut self.by_issuer, &record.issuer, said);
        remove_from(&mut self.by_subject, &record.subject, said);
        remove_from(&mut self.by_schema, &record.schema, said);
        if let Some(exp) = record.expires_at {
            self.by_expiry.remove(&(exp, said.clone()));
        }
        for target in &record.references {
            remove_from(&mut self.referenced_by, target, said);
        }
        self.pending_sync.remove(said);
    }

    fn lookup<K: Ord>(map: &BTreeMap<K, BTreeSet<Said>>, key: &K) -> Vec<Said> {
        map.get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn remove_from<K: Ord + Clone>(map: &mut BTreeMap<K, BTreeSet<Said>>, key: &K, said: &Said) {
    if let Some(set) = map.get_mut(key) {
        set.remove(said);
        if set.is_empty() {
            map.remove(key);
        }
    }
}

/// Indexed local cache of credential records.
///
/// Primary records live in a [`RecordBackend`]. Issuer, subject, schema and
/// expiry indices are ordered maps rebuilt from the backend on open, so every
/// query costs one index lookup plus one backend read per match.
///
/// Lock order: per-record lock, then the index lock.
pub struct CredentialStore {
    backend: Arc<dyn RecordBackend>,
    schemas: Arc<SchemaRegistry>,
    indices: RwLock<Indices>,
    record_locks: DashMap<Said, Arc<Mutex<()>>>,
    generation: AtomicU64,
    staleness_window: Duration,
}

impl CredentialStore {
    /// Open a store over a backend and rebuild its indices.
    pub fn open(
        backend: Arc<dyn RecordBackend>,
        schemas: Arc<SchemaRegistry>,
    ) -> Result<Self, StoreError> {
        let store = Self {
            backend,
            schemas,
            indices: RwLock::new(Indices::default()),
            record_locks: DashMap::new(),
            generation: AtomicU64::new(0),
            staleness_window: VerificationConfig::default().staleness_window(),
        };
        let count = store.rebuild_indices()?;
        tracing::info!(records = count, "credential store opened");
        Ok(store)
    }

    /// Empty store over a [`MemoryBackend`] with the built-in schemas.
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryBackend::new()),
            schemas: Arc::new(SchemaRegistry::new()),
            indices: RwLock::new(Indices::default()),
            record_locks: DashMap::new(),
            generation: AtomicU64::new(0),
            staleness_window: VerificationConfig::default().staleness_window(),
        }
    }

    /// How long a `Verified` outcome satisfies [`ReadMode::Trusted`] reads.
    pub fn with_staleness_window(mut self, window: Duration) -> Self {
        self.staleness_window = window;
        self
    }

    pub fn staleness_window(&self) -> Duration {
        self.staleness_window
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    /// Whether `mode` admits `record` right now under this store's
    /// staleness window.
    pub fn admits(&self, mode: ReadMode, record: &CredentialRecord) -> bool {
        mode.admits(record, Utc::now(), self.staleness_window)
    }

    /// Store-wide mutation counter.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Idempotent upsert keyed by SAID.
    ///
    /// Verification starts as unverified on insert. A re-put keeps the locally
    /// derived state (verification, revocation, sync status, tombstone) and
    /// refreshes `cached_at`. A revocation-schema record revokes each record
    /// it references, including ones that arrive later.
    pub fn put(&self, record: CredentialRecord) -> Result<PutOutcome, StoreError> {
        self.schemas.validate(&record)?;
        let kind = self.schemas.kind_of(&record.schema);
        let said = record.said.clone();
        let revokes = if kind == CredentialKind::Revocation {
            let reason = record.payload_str("reason").unwrap_or_default().to_string();
            Some((record.references.clone(), reason))
        } else {
            None
        };

        let outcome = {
            let lock = self.record_lock(&said);
            let _guard = lock_mutex(&lock);

            let existing = self.backend.get(&said)?;
            let mut record = record;
            record.cached_at = Utc::now();

            let outcome = match &existing {
                Some(prev) => {
                    if prev.same_content(&record) {
                        record.verification = prev.verification.clone();
                    } else {
                        tracing::warn!(said = %said, "record content replaced, verification reset");
                        record.verification = Verification::unverified();
                    }
                    record.revocation = prev.revocation.clone();
                    record.tombstoned = prev.tombstoned;
                    if !record.is_synced() {
                        record.sync = prev.sync.clone();
                    }
                    PutOutcome::Updated
                }
                None => {
                    record.verification = Verification::unverified();
                    record.revocation = None;
                    record.tombstoned = false;
                    PutOutcome::Inserted
                }
            };
            // Held across the write; pairs with `register_revocation`.
            let mut indices = self.write_indices();
            if record.revocation.is_none() {
                record.revocation = indices.revocations.get(&said).cloned();
            }

            self.backend.put(&record)?;
            if let Some(prev) = &existing {
                indices.remove(prev);
            }
            indices.insert(&record);
            outcome
        };

        if let Some((targets, reason)) = revokes {
            for target in targets {
                let revocation = Revocation {
                    revocation_said: said.clone(),
                    reason: reason.clone(),
                    revoked_at: Utc::now(),
                };
                self.register_revocation(&target, revocation)?;
            }
        }

        self.bump();
        tracing::debug!(said = %said, schema_kind = %kind, outcome = ?outcome, "record stored");
        Ok(outcome)
    }

    /// Fetch a record regardless of its verification state.
    pub fn get(&self, said: &Said) -> Result<CredentialRecord, StoreError> {
        self.backend
            .get(said)?
            .ok_or_else(|| StoreError::NotFound(said.clone()))
    }

    /// Fetch a record if the read mode admits it.
    pub fn find(&self, said: &Said, mode: ReadMode) -> Result<CredentialRecord, StoreError> {
        let record = self.get(said)?;
        if self.admits(mode, &record) {
            Ok(record)
        } else {
            Err(StoreError::NotFound(said.clone()))
        }
    }

    pub fn contains(&self, said: &Said) -> Result<bool, StoreError> {
        Ok(self.backend.get(said)?.is_some())
    }

    pub fn query_by_issuer(&self, issuer: &Aid, mode: ReadMode) -> RecordQuery {
        let saids = Indices::lookup(&self.read_indices().by_issuer, issuer);
        RecordQuery::new(self.backend.clone(), saids, mode, self.staleness_window)
    }

    pub fn query_by_subject(&self, subject: &Aid, mode: ReadMode) -> RecordQuery {
        let saids = Indices::lookup(&self.read_indices().by_subject, subject);
        RecordQuery::new(self.backend.clone(), saids, mode, self.staleness_window)
    }

    pub fn query_by_schema(&self, schema: &SchemaId, mode: ReadMode) -> RecordQuery {
        let saids = Indices::lookup(&self.read_indices().by_schema, schema);
        RecordQuery::new(self.backend.clone(), saids, mode, self.staleness_window)
    }

    /// Records with `expires_at < t`, soonest first.
    pub fn query_expiring_before(&self, t: DateTime<Utc>, mode: ReadMode) -> RecordQuery {
        let saids = Self::expiring_before(&self.read_indices(), t);
        RecordQuery::new(self.backend.clone(), saids, mode, self.staleness_window)
    }

    fn expiring_before(indices: &Indices, t: DateTime<Utc>) -> Vec<Said> {
        indices
            .by_expiry
            .range(..(t, Said::new(String::new())))
            .map(|(_, said)| said.clone())
            .collect()
    }

    /// Mark a stored record revoked. Idempotent: the first revocation wins.
    pub fn mark_revoked(
        &self,
        said: &Said,
        revocation_said: Said,
        reason: impl Into<String>,
    ) -> Result<bool, StoreError> {
        if !self.contains(said)? {
            return Err(StoreError::NotFound(said.clone()));
        }
        let revocation = Revocation {
            revocation_said,
            reason: reason.into(),
            revoked_at: Utc::now(),
        };
        let changed = self.register_revocation(said, revocation)?;
        if changed {
            self.bump();
        }
        Ok(changed)
    }

    fn register_revocation(&self, target: &Said, revocation: Revocation) -> Result<bool, StoreError> {
        // An absent target only gets an index entry; `put` applies it on arrival.
        {
            let mut indices = self.write_indices();
            indices
                .revocations
                .entry(target.clone())
                .or_insert(revocation);
            if self.backend.get(target)?.is_none() {
                tracing::debug!(target_said = %target, "revocation recorded for absent record");
                return Ok(false);
            }
        }

        let lock = self.record_lock(target);
        let _guard = lock_mutex(&lock);
        let Some(revocation) = self.read_indices().revocations.get(target).cloned() else {
            return Ok(false);
        };
        let Some(mut record) = self.backend.get(target)? else {
            return Ok(false);
        };
        if record.revocation.is_some() {
            return Ok(false);
        }
        tracing::info!(
            said = %target,
            revocation_said = %revocation.revocation_said,
            reason = %revocation.reason,
            "record revoked"
        );
        record.revocation = Some(revocation);
        self.backend.put(&record)?;
        Ok(true)
    }

    /// Remove records with `expires_at < now`.
    ///
    /// A record still referenced by an unexpired, non-tombstoned record is
    /// tombstoned instead. Returns the number of records removed.
    pub fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let candidates = Self::expiring_before(&self.read_indices(), now);
        let mut removed = 0;
        let mut tombstoned = 0;

        for said in candidates {
            let referrers: Vec<Said> = self
                .read_indices()
                .referenced_by
                .get(&said)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();

            let mut still_referenced = false;
            for referrer in &referrers {
                if let Some(r) = self.backend.get(referrer)? {
                    if !r.is_expired(now) && !r.tombstoned {
                        still_referenced = true;
                        break;
                    }
                }
            }

            let gone = {
                let lock = self.record_lock(&said);
                let _guard = lock_mutex(&lock);
                match self.backend.get(&said)? {
                    None => true,
                    Some(record) if !record.is_expired(now) => false,
                    Some(mut record) if still_referenced => {
                        if !record.tombstoned {
                            record.tombstoned = true;
                            self.backend.put(&record)?;
                            tombstoned += 1;
                        }
                        false
                    }
                    Some(record) => {
                        self.backend.delete(&said)?;
                        self.write_indices().remove(&record);
                        removed += 1;
                        true
                    }
                }
            };
            if gone {
                self.record_locks.remove(&said);
            }
        }

        if removed > 0 || tombstoned > 0 {
            self.bump();
            tracing::info!(removed, tombstoned, "expired records cleaned up");
        }
        Ok(removed)
    }

    /// Explicitly delete a record.
    pub fn delete(&self, said: &Said) -> Result<CredentialRecord, StoreError> {
        let record = {
            let lock = self.record_lock(said);
            let _guard = lock_mutex(&lock);
            let record = self.get(said)?;
            self.backend.delete(said)?;
            self.write_indices().remove(&record);
            record
        };
        self.record_locks.remove(said);
        self.bump();
        tracing::debug!(said = %said, "record deleted");
        Ok(record)
    }

    /// Persist a verification outcome. Only the verification gate calls this.
    pub fn set_verification(
        &self,
        said: &Said,
        verification: Verification,
    ) -> Result<(), StoreError> {
        self.update(said, |record| record.verification = verification)
    }

    /// Persist a verification outcome only if the stored content still
    /// matches `evaluated`, the record the outcome was computed for.
    ///
    /// Returns `false` and leaves the record untouched when the content was
    /// replaced after evaluation.
    pub fn set_verification_if(
        &self,
        evaluated: &CredentialRecord,
        verification: Verification,
    ) -> Result<bool, StoreError> {
        let said = &evaluated.said;
        let applied = {
            let lock = self.record_lock(said);
            let _guard = lock_mutex(&lock);
            let mut record = self.get(said)?;
            if record.same_content(evaluated) {
                record.verification = verification;
                self.backend.put(&record)?;
                true
            } else {
                tracing::debug!(said = %said, "content changed during verification, outcome dropped");
                false
            }
        };
        if applied {
            self.bump();
        }
        Ok(applied)
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.record_locks.len()
    }

    /// Persist the replication state. Only the log adapter calls this.
    pub fn set_sync_status(&self, said: &Said, status: SyncStatus) -> Result<(), StoreError> {
        self.update(said, |record| record.sync = status)?;
        let mut indices = self.write_indices();
        if let Ok(record) = self.get(said) {
            if matches!(record.sync, SyncStatus::Pending { .. }) {
                indices.pending_sync.insert(said.clone());
            } else {
                indices.pending_sync.remove(said);
            }
        }
        Ok(())
    }

    fn update(
        &self,
        said: &Said,
        apply: impl FnOnce(&mut CredentialRecord),
    ) -> Result<(), StoreError> {
        {
            let lock = self.record_lock(said);
            let _guard = lock_mutex(&lock);
            let mut record = self.get(said)?;
            apply(&mut record);
            self.backend.put(&record)?;
        }
        self.bump();
        Ok(())
    }

    /// SAIDs waiting for a log append retry.
    pub fn pending_sync(&self) -> Vec<Said> {
        self.read_indices().pending_sync.iter().cloned().collect()
    }

    /// Records whose verification is missing or older than `window`.
    ///
    /// Invalid and tombstoned records are skipped. Scans the backend.
    pub fn pending_verification(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<CredentialRecord>, StoreError> {
        let mut records: Vec<CredentialRecord> = self
            .backend
            .scan()?
            .into_iter()
            .filter(|r| !r.tombstoned && r.verification.is_stale(now, window, None))
            .collect();
        records.sort_by(|a, b| a.said.cmp(&b.said));
        Ok(records)
    }

    /// Rebuild every secondary index from the primary records.
    pub fn rebuild_indices(&self) -> Result<usize, StoreError> {
        let records = self.backend.scan()?;
        let mut fresh = Indices::default();
        for record in &records {
            fresh.insert(record);
            if let Some(revocation) = &record.revocation {
                fresh
                    .revocations
                    .insert(record.said.clone(), revocation.clone());
            }
        }
        for record in &records {
            if self.schemas.kind_of(&record.schema) != CredentialKind::Revocation {
                continue;
            }
            let reason = record.payload_str("reason").unwrap_or_default();
            for target in &record.references {
                fresh
                    .revocations
                    .entry(target.clone())
                    .or_insert_with(|| Revocation {
                        revocation_said: record.said.clone(),
                        reason: reason.to_string(),
                        revoked_at: record.cached_at,
                    });
            }
        }

        *self.write_indices() = fresh;
        self.bump();
        tracing::debug!(records = records.len(), "store indices rebuilt");
        Ok(records.len())
    }

    /// Number of stored records, tombstones included.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.backend.scan()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn record_lock(&self, said: &Said) -> Arc<Mutex<()>> {
        self.record_locks
            .entry(said.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn read_indices(&self) -> RwLockReadGuard<'_, Indices> {
        self.indices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_indices(&self) -> RwLockWriteGuard<'_, Indices> {
        self.indices.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

fn lock_mutex(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}
