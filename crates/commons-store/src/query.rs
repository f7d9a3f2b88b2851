use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use commons_core::{CredentialRecord, Said};

use crate::backend::RecordBackend;
use crate::error::StoreError;

/// Which records a read may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadMode {
    /// Freshly verified, unexpired, not revoked, not tombstoned.
    #[default]
    Trusted,
    /// Also records that are unverified or whose verification went stale.
    /// Never invalid or expired ones.
    IncludeUnverified,
    /// Everything, including invalid, revoked, expired and tombstoned records.
    All,
}

impl ReadMode {
    /// Whether `record` may be returned at `now`.
    ///
    /// A `Verified` outcome older than `staleness_window` counts as
    /// unverified until the gate recomputes it.
    pub fn admits(
        &self,
        record: &CredentialRecord,
        now: DateTime<Utc>,
        staleness_window: Duration,
    ) -> bool {
        match self {
            Self::Trusted => record.is_trusted_at(now, staleness_window),
            Self::IncludeUnverified => {
                !record.verification.is_invalid()
                    && !record.is_revoked()
                    && !record.tombstoned
                    && !record.is_expired(now)
            }
            Self::All => true,
        }
    }
}

/// Lazy, restartable result of an index lookup.
///
/// Holds the matching SAIDs as of the lookup. Records are fetched from the
/// backend one at a time during iteration, so a record deleted after the
/// lookup is skipped and an updated one is seen in its latest state.
#[derive(Clone)]
pub struct RecordQuery {
    backend: Arc<dyn RecordBackend>,
    saids: Arc<[Said]>,
    mode: ReadMode,
    staleness_window: Duration,
}

impl RecordQuery {
    pub(crate) fn new(
        backend: Arc<dyn RecordBackend>,
        saids: Vec<Said>,
        mode: ReadMode,
        staleness_window: Duration,
    ) -> Self {
        Self {
            backend,
            saids: saids.into(),
            mode,
            staleness_window,
        }
    }

    /// Iterate matching records. May be called any number of times; each
    /// pass applies the read mode as of its start.
    pub fn iter(&self) -> impl Iterator<Item = Result<CredentialRecord, StoreError>> + '_ {
        let mode = self.mode;
        let window = self.staleness_window;
        let now = Utc::now();
        self.saids
            .iter()
            .filter_map(move |said| match self.backend.get(said) {
                Ok(Some(record)) if mode.admits(&record, now, window) => Some(Ok(record)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
    }

    /// Collect matching records, failing on the first backend error.
    pub fn records(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        self.iter().collect()
    }

    /// Index hits before read-mode filtering.
    pub fn candidates(&self) -> &[Said] {
        &self.saids
    }

    pub fn mode(&self) -> ReadMode {
        self.mode
    }
}

impl std::fmt::Debug for RecordQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordQuery")
            .field("candidates", &self.saids.len())
            .field("mode", &self.mode)
            .finish()
    }
}
