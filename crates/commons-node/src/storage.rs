//! RocksDB record backend for the Commons node.

use anyhow::Result;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, DB};
use std::path::Path;

use commons_core::{CredentialRecord, Said};
use commons_store::{RecordBackend, StoreError};

/// Column family holding credential records, keyed by SAID.
const CF_CREDENTIALS: &str = "credentials";

/// Credential records persisted as JSON in RocksDB.
pub struct RocksBackend {
    db: DB,
}

impl RocksBackend {
    /// Open or create a RocksDB database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(
            CF_CREDENTIALS,
            Options::default(),
        )];
        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "record database opened");
        Ok(Self { db })
    }

    fn credentials(&self) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(CF_CREDENTIALS)
            .ok_or_else(|| StoreError::Backend(format!("column family '{}' not found", CF_CREDENTIALS)))
    }
}

fn backend_error(e: rocksdb::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl RecordBackend for RocksBackend {
    fn get(&self, said: &Said) -> Result<Option<CredentialRecord>, StoreError> {
        let cf = self.credentials()?;
        match self
            .db
            .get_cf(cf, said.as_str().as_bytes())
            .map_err(backend_error)?
        {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let cf = self.credentials()?;
        let bytes = serde_json::to_vec(record)?;
        self.db
            .put_cf(cf, record.said.as_str().as_bytes(), bytes)
            .map_err(backend_error)
    }

    fn delete(&self, said: &Said) -> Result<bool, StoreError> {
        let cf = self.credentials()?;
        let key = said.as_str().as_bytes();
        let existed = self.db.get_cf(cf, key).map_err(backend_error)?.is_some();
        if existed {
            self.db.delete_cf(cf, key).map_err(backend_error)?;
        }
        Ok(existed)
    }

    fn scan(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        let cf = self.credentials()?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(backend_error)?;
            match serde_json::from_slice::<CredentialRecord>(&value) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    key = %String::from_utf8_lossy(&key),
                    error = %e,
                    "skipping undecodable record"
                ),
            }
        }
        Ok(records)
    }
}
