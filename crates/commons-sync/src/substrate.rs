use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use commons_core::SpaceId;
use commons_crypto::{hash, sign, KeyPair};

use crate::error::SyncError;

/// Handle of a log on the substrate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogId(pub String);

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one appended change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeId(pub String);

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Heads of the log before and after an append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendResult {
    pub old_heads: Vec<ChangeId>,
    pub new_heads: Vec<ChangeId>,
}

/// One change as delivered by [`LogSubstrate::iterate_from_root`].
#[derive(Debug, Clone)]
pub struct Change {
    pub id: ChangeId,
    pub data_type: String,
    pub payload: Vec<u8>,
    /// Creation change of the log; carries no credential.
    pub is_root: bool,
    /// Qualified public key of the author.
    pub author: String,
    /// Hex signature over the payload.
    pub signature: String,
}

/// Replicated, append-only, signed log provided by the sync network.
///
/// Ordering, replication and encryption are the substrate's business.
#[async_trait]
pub trait LogSubstrate: Send + Sync {
    /// Create a log in `space` declaring `change_type`.
    async fn create_log(
        &self,
        space: &SpaceId,
        change_type: &str,
        encrypted: bool,
        seed: [u8; 32],
        signing_key: &KeyPair,
    ) -> Result<LogId, SyncError>;

    /// Existing log of `space` with the given change type, if any.
    async fn find_log(&self, space: &SpaceId, change_type: &str)
        -> Result<Option<LogId>, SyncError>;

    async fn append_change(
        &self,
        log: &LogId,
        signing_key: &KeyPair,
        data_type: &str,
        encrypted: bool,
        payload: Vec<u8>,
    ) -> Result<AppendResult, SyncError>;

    /// Visit changes in log order starting at the root. Stops early when
    /// `visit` returns `false`.
    async fn iterate_from_root(
        &self,
        log: &LogId,
        visit: &mut (dyn for<'c> FnMut(&'c Change) -> bool + Send),
    ) -> Result<(), SyncError>;
}

struct MemoryLog {
    space: SpaceId,
    change_type: String,
    changes: Vec<Change>,
}

/// In-memory substrate with fault injection.
#[derive(Default)]
pub struct MemoryLogSubstrate {
    logs: DashMap<LogId, MemoryLog>,
    offline: AtomicBool,
    failing_appends: AtomicU32,
    latency_ms: AtomicU64,
    appends: AtomicU64,
}

impl MemoryLogSubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `count` appends.
    pub fn fail_next_appends(&self, count: u32) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Successful appends so far.
    pub fn append_count(&self) -> u64 {
        self.appends.load(Ordering::SeqCst)
    }

    /// Number of changes in a log, root included.
    pub fn change_count(&self, log: &LogId) -> usize {
        self.logs.get(log).map(|l| l.changes.len()).unwrap_or(0)
    }

    /// Append unsigned bytes, bypassing every check.
    pub fn append_raw(&self, log: &LogId, data_type: &str, payload: Vec<u8>) -> Option<ChangeId> {
        let mut entry = self.logs.get_mut(log)?;
        let id = next_change_id(&entry.changes, data_type, &payload);
        entry.changes.push(Change {
            id: id.clone(),
            data_type: data_type.to_string(),
            payload,
            is_root: false,
            author: String::new(),
            signature: String::new(),
        });
        Some(id)
    }

    async fn reach(&self) -> Result<(), SyncError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Substrate("sync network unreachable".into()));
        }
        Ok(())
    }
}

fn next_change_id(changes: &[Change], data_type: &str, payload: &[u8]) -> ChangeId {
    let parent = changes.last().map(|c| c.id.0.as_str()).unwrap_or("");
    let mut material = Vec::with_capacity(parent.len() + data_type.len() + payload.len());
    material.extend_from_slice(parent.as_bytes());
    material.extend_from_slice(data_type.as_bytes());
    material.extend_from_slice(payload);
    ChangeId(hex::encode(hash(&material)))
}

#[async_trait]
impl LogSubstrate for MemoryLogSubstrate {
    async fn create_log(
        &self,
        space: &SpaceId,
        change_type: &str,
        encrypted: bool,
        seed: [u8; 32],
        signing_key: &KeyPair,
    ) -> Result<LogId, SyncError> {
        self.reach().await?;

        let mut material = Vec::new();
        material.extend_from_slice(space.as_str().as_bytes());
        material.extend_from_slice(change_type.as_bytes());
        material.extend_from_slice(&seed);
        let id = LogId(hex::encode(hash(&material)));

        let root = Change {
            id: ChangeId(id.0.clone()),
            data_type: change_type.to_string(),
            payload: Vec::new(),
            is_root: true,
            author: signing_key.public_key().to_qualified(),
            signature: sign(id.0.as_bytes(), signing_key).to_hex(),
        };
        self.logs.insert(
            id.clone(),
            MemoryLog {
                space: space.clone(),
                change_type: change_type.to_string(),
                changes: vec![root],
            },
        );
        tracing::info!(space = %space, log = %id, encrypted, "credential log created");
        Ok(id)
    }

    async fn find_log(
        &self,
        space: &SpaceId,
        change_type: &str,
    ) -> Result<Option<LogId>, SyncError> {
        self.reach().await?;
        let mut found: Vec<LogId> = self
            .logs
            .iter()
            .filter(|e| &e.space == space && e.change_type == change_type)
            .map(|e| e.key().clone())
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found.into_iter().next())
    }

    async fn append_change(
        &self,
        log: &LogId,
        signing_key: &KeyPair,
        data_type: &str,
        _encrypted: bool,
        payload: Vec<u8>,
    ) -> Result<AppendResult, SyncError> {
        self.reach().await?;
        let failing = self.failing_appends.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_appends.store(failing - 1, Ordering::SeqCst);
            return Err(SyncError::Substrate("append rejected".into()));
        }

        let mut entry = self
            .logs
            .get_mut(log)
            .ok_or_else(|| SyncError::Substrate(format!("unknown log {}", log)))?;
        let old_heads: Vec<ChangeId> = entry.changes.last().map(|c| c.id.clone()).into_iter().collect();
        let id = next_change_id(&entry.changes, data_type, &payload);
        let signature = sign(&payload, signing_key).to_hex();
        entry.changes.push(Change {
            id: id.clone(),
            data_type: data_type.to_string(),
            payload,
            is_root: false,
            author: signing_key.public_key().to_qualified(),
            signature,
        });
        self.appends.fetch_add(1, Ordering::SeqCst);

        Ok(AppendResult {
            old_heads,
            new_heads: vec![id],
        })
    }

    async fn iterate_from_root(
        &self,
        log: &LogId,
        visit: &mut (dyn for<'c> FnMut(&'c Change) -> bool + Send),
    ) -> Result<(), SyncError> {
        self.reach().await?;
        let changes = self
            .logs
            .get(log)
            .map(|l| l.changes.clone())
            .ok_or_else(|| SyncError::Substrate(format!("unknown log {}", log)))?;
        for change in &changes {
            if !visit(change) {
                break;
            }
        }
        Ok(())
    }
}
