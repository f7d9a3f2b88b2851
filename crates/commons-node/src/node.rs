//! The Commons node orchestrator.
//!
//! Opens the record database, wires the community service and runs the
//! periodic maintenance loop.

use anyhow::Result;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};

use commons_crypto::KeyPair;
use commons_store::{CredentialStore, SchemaRegistry};
use commons_sync::MemoryLogSubstrate;
use commons_verify::LocalIdentityAgent;

use crate::config::NodeConfig;
use crate::service::CommunityService;
use crate::storage::RocksBackend;

/// A running Commons node.
pub struct CommonsNode {
    config: NodeConfig,
    agent: Arc<LocalIdentityAgent>,
    service: Arc<CommunityService>,
}

impl CommonsNode {
    /// Open storage and build the service stack.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let signing_key = match &config.identity.keypair_path {
            Some(path) => Self::load_or_generate_keypair(path)?,
            None => {
                tracing::info!("generating ephemeral signing key");
                KeyPair::generate()
            }
        };

        let backend = Arc::new(RocksBackend::open(&config.records_path())?);
        let store = Arc::new(
            CredentialStore::open(backend, Arc::new(SchemaRegistry::new()))?
                .with_staleness_window(config.engine.verification.staleness_window()),
        );

        let agent = Arc::new(LocalIdentityAgent::new());
        let substrate = Arc::new(MemoryLogSubstrate::new());
        let service = Arc::new(CommunityService::new(
            config.engine.clone(),
            store,
            agent.clone(),
            Some(agent.clone()),
            substrate,
            signing_key,
        )?);

        tracing::info!(
            data_dir = %config.storage.data_dir.display(),
            "Commons node created"
        );

        Ok(Self {
            config,
            agent,
            service,
        })
    }

    pub fn service(&self) -> &Arc<CommunityService> {
        &self.service
    }

    /// Identity agent holding the key states used for verification.
    pub fn agent(&self) -> &Arc<LocalIdentityAgent> {
        &self.agent
    }

    /// Run maintenance until the task is dropped.
    pub async fn run(&self) -> Result<()> {
        let maintenance = &self.config.maintenance;
        let mut expiry = interval(maintenance.expiry_interval());
        let mut sync_retry = interval(maintenance.sync_retry_interval());
        let mut reverify = interval(maintenance.verify_interval());
        for timer in [&mut expiry, &mut sync_retry, &mut reverify] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        tracing::info!("entering maintenance loop");

        loop {
            tokio::select! {
                _ = expiry.tick() => {
                    match self.service.delete_expired(Utc::now()) {
                        Ok(0) => {}
                        Ok(removed) => tracing::info!(removed, "expired credentials removed"),
                        Err(e) => tracing::error!(error = %e, "expiry cleanup failed"),
                    }
                }
                _ = sync_retry.tick() => {
                    if let Err(e) = self.service.retry_pending().await {
                        tracing::error!(error = %e, "pending sync retry failed");
                    }
                }
                _ = reverify.tick() => {
                    if let Err(e) = self.service.verify_pending().await {
                        tracing::error!(error = %e, "re-verification pass failed");
                    }
                }
            }
        }
    }

    /// Load a signing key from disk, or generate and save a new one.
    fn load_or_generate_keypair(path: &Path) -> Result<KeyPair> {
        if path.exists() {
            let bytes = std::fs::read(path)?;
            let keypair = KeyPair::from_bytes(&bytes)
                .map_err(|e| anyhow::anyhow!("failed to decode signing key: {}", e))?;
            tracing::info!(path = %path.display(), "loaded signing key from disk");
            Ok(keypair)
        } else {
            let keypair = KeyPair::generate();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, keypair.secret_bytes())?;
            tracing::info!(path = %path.display(), "generated and saved new signing key");
            Ok(keypair)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("commons-node-{}", rand::random::<u64>()))
    }

    fn config(dir: &Path) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.storage.data_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn test_node_creation() {
        let dir = temp_dir();
        let node = CommonsNode::new(config(&dir)).unwrap();
        assert!(node.service().store().is_empty().unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_signing_key_persists() {
        let dir = temp_dir();
        let key_path = dir.join("keys").join("signing.key");
        let first = CommonsNode::load_or_generate_keypair(&key_path).unwrap();
        let second = CommonsNode::load_or_generate_keypair(&key_path).unwrap();
        assert_eq!(first.public_key(), second.public_key());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_run_can_be_cancelled() {
        let dir = temp_dir();
        let node = CommonsNode::new(config(&dir)).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_millis(50), node.run()).await;
        assert!(result.is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
