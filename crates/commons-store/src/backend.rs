use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use commons_core::{CredentialRecord, Said};

use crate::error::StoreError;

/// Primary record storage behind the credential store.
///
/// Backends only hold records keyed by SAID. Secondary indices live in the
/// store and are rebuilt from [`RecordBackend::scan`] on open.
pub trait RecordBackend: Send + Sync {
    /// Fetch a record by SAID.
    fn get(&self, said: &Said) -> Result<Option<CredentialRecord>, StoreError>;

    /// Insert or replace a record.
    fn put(&self, record: &CredentialRecord) -> Result<(), StoreError>;

    /// Remove a record. Returns whether it existed.
    fn delete(&self, said: &Said) -> Result<bool, StoreError>;

    /// Every stored record, in no particular order.
    fn scan(&self) -> Result<Vec<CredentialRecord>, StoreError>;
}

/// In-memory record backend.
#[derive(Default)]
pub struct MemoryBackend {
    records: DashMap<Said, CredentialRecord>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordBackend for MemoryBackend {
    fn get(&self, said: &Said) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.records.get(said).map(|e| e.value().clone()))
    }

    fn put(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        self.records.insert(record.said.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, said: &Said) -> Result<bool, StoreError> {
        Ok(self.records.remove(said).is_some())
    }

    fn scan(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        Ok(self.records.iter().map(|e| e.value().clone()).collect())
    }
}

/// Backend wrapper that counts calls, for checking index usage.
pub struct CountingBackend<B> {
    inner: B,
    gets: AtomicUsize,
    puts: AtomicUsize,
    scans: AtomicUsize,
}

impl<B: RecordBackend> CountingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            scans: AtomicUsize::new(0),
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.gets.store(0, Ordering::SeqCst);
        self.puts.store(0, Ordering::SeqCst);
        self.scans.store(0, Ordering::SeqCst);
    }
}

impl<B: RecordBackend> RecordBackend for CountingBackend<B> {
    fn get(&self, said: &Said) -> Result<Option<CredentialRecord>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(said)
    }

    fn put(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(record)
    }

    fn delete(&self, said: &Said) -> Result<bool, StoreError> {
        self.inner.delete(said)
    }

    fn scan(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.inner.scan()
    }
}
