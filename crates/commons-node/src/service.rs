//! Community service facade: the one surface consumers read through.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use commons_core::{Aid, CredentialRecord, EngineConfig, Said, SchemaId, SpaceId};
use commons_crypto::KeyPair;
use commons_store::{CredentialStore, PutOutcome, ReadMode};
use commons_sync::{ChangeId, LogSubstrate, ReplicatedLogAdapter, RetryReport, SyncReconciler};
use commons_trust::{NodeScore, ScoreSummary, TrustGraph, TrustGraphCache};
use commons_verify::{
    KeyStateResolver, PendingReport, RevocationRegistry, VerificationGate, VerificationOutcome,
};

use crate::error::ServiceError;

/// What happened to one ingested credential.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub said: Said,
    pub outcome: PutOutcome,
    /// `None` when verification was deferred by a transient failure.
    pub verification: Option<VerificationOutcome>,
    /// Log change the credential was appended as.
    pub published: Option<ChangeId>,
}

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub verification: PendingReport,
    pub sync: RetryReport,
}

/// Credential store, verification gate, replicated log and trust graph cache
/// behind one API.
///
/// Every read takes a [`ReadMode`]; invalid records only surface under
/// [`ReadMode::All`].
pub struct CommunityService {
    config: EngineConfig,
    store: Arc<CredentialStore>,
    gate: VerificationGate,
    adapter: Arc<ReplicatedLogAdapter>,
    reconciler: Arc<SyncReconciler>,
    cache: TrustGraphCache,
    signing_key: KeyPair,
}

impl CommunityService {
    pub fn new(
        config: EngineConfig,
        store: Arc<CredentialStore>,
        resolver: Arc<dyn KeyStateResolver>,
        revocations: Option<Arc<dyn RevocationRegistry>>,
        substrate: Arc<dyn LogSubstrate>,
        signing_key: KeyPair,
    ) -> Result<Self, ServiceError> {
        config.validate()?;

        let mut gate = VerificationGate::new(store.clone(), resolver, config.verification.clone());
        if let Some(registry) = revocations {
            gate = gate.with_revocation_registry(registry);
        }

        let adapter = Arc::new(ReplicatedLogAdapter::new(
            substrate,
            store.clone(),
            config.sync.clone(),
        ));
        let spaces: HashMap<Aid, SpaceId> = config
            .communities
            .iter()
            .map(|c| (c.org.clone(), c.space.clone()))
            .collect();
        let reconciler = Arc::new(SyncReconciler::new(adapter.clone(), store.clone(), spaces));
        let cache = TrustGraphCache::new(
            reconciler.clone(),
            store.schemas().clone(),
            config.trust.clone(),
        );

        tracing::info!(
            communities = config.communities.len(),
            signer = %signing_key.public_key().to_qualified(),
            "community service ready"
        );

        Ok(Self {
            config,
            store,
            gate,
            adapter,
            reconciler,
            cache,
            signing_key,
        })
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn adapter(&self) -> &Arc<ReplicatedLogAdapter> {
        &self.adapter
    }

    pub fn reconciler(&self) -> &Arc<SyncReconciler> {
        &self.reconciler
    }

    pub fn cache(&self) -> &TrustGraphCache {
        &self.cache
    }

    pub fn get(&self, said: &Said, mode: ReadMode) -> Result<CredentialRecord, ServiceError> {
        Ok(self.store.find(said, mode)?)
    }

    pub fn query_by_issuer(
        &self,
        issuer: &Aid,
        mode: ReadMode,
    ) -> Result<Vec<CredentialRecord>, ServiceError> {
        Ok(self.store.query_by_issuer(issuer, mode).records()?)
    }

    pub fn query_by_subject(
        &self,
        subject: &Aid,
        mode: ReadMode,
    ) -> Result<Vec<CredentialRecord>, ServiceError> {
        Ok(self.store.query_by_subject(subject, mode).records()?)
    }

    pub fn query_by_schema(
        &self,
        schema: &SchemaId,
        mode: ReadMode,
    ) -> Result<Vec<CredentialRecord>, ServiceError> {
        Ok(self.store.query_by_schema(schema, mode).records()?)
    }

    pub fn query_expiring_before(
        &self,
        t: DateTime<Utc>,
        mode: ReadMode,
    ) -> Result<Vec<CredentialRecord>, ServiceError> {
        Ok(self.store.query_expiring_before(t, mode).records()?)
    }

    /// Community-visible credentials of `org`'s space.
    pub async fn community_credentials(
        &self,
        org: &Aid,
        mode: ReadMode,
    ) -> Result<Vec<CredentialRecord>, ServiceError> {
        let space = self
            .config
            .space_for(org)
            .ok_or_else(|| ServiceError::UnknownCommunity(org.clone()))?;
        Ok(self.reconciler.community_credentials(space, mode).await?)
    }

    /// Trust graph of `org`, possibly stale while a rebuild runs.
    pub async fn graph_for(&self, org: &Aid) -> Result<Arc<TrustGraph>, ServiceError> {
        Ok(self.cache.graph_for(org).await?)
    }

    /// Trust graph of `org` reflecting every mutation so far.
    pub async fn fresh_graph_for(&self, org: &Aid) -> Result<Arc<TrustGraph>, ServiceError> {
        Ok(self.cache.fresh_graph_for(org).await?)
    }

    pub async fn summary(&self, org: &Aid) -> Result<ScoreSummary, ServiceError> {
        let graph = self.cache.graph_for(org).await?;
        Ok(ScoreSummary::of(&graph))
    }

    pub async fn top_scores(&self, org: &Aid, limit: usize) -> Result<Vec<NodeScore>, ServiceError> {
        let graph = self.cache.graph_for(org).await?;
        Ok(graph.top_scores(limit).into_iter().map(NodeScore::from).collect())
    }

    /// Revoke a stored credential. Returns whether it was newly revoked.
    pub fn revoke(
        &self,
        said: &Said,
        revocation_said: Said,
        reason: impl Into<String>,
    ) -> Result<bool, ServiceError> {
        let revoked = self.store.mark_revoked(said, revocation_said, reason)?;
        if revoked {
            self.cache.invalidate_all();
            tracing::info!(said = %said, "credential revoked");
        }
        Ok(revoked)
    }

    /// Store, verify and publish a credential.
    ///
    /// Transient verification failures leave the record unverified for the
    /// next maintenance pass. Failed appends leave it pending for the sync
    /// retry queue. Invalid and private credentials are never published.
    pub async fn ingest(&self, record: CredentialRecord) -> Result<IngestReport, ServiceError> {
        let said = record.said.clone();
        let issuer = record.issuer.clone();
        let community = self.store.schemas().is_community_visible(&record.schema);
        let outcome = self.store.put(record)?;

        let verification = match self.gate.verify(&said, self.gate.default_deadline()).await {
            Ok(outcome) => Some(outcome),
            Err(e) if e.is_transient() => {
                tracing::warn!(said = %said, error = %e, "verification deferred");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let invalid = verification.as_ref().is_some_and(|v| v.is_invalid());
        let published = match self.space_for_issuer(&issuer) {
            Some(space) if community && !invalid => {
                match self.adapter.publish(space, &said, &self.signing_key).await {
                    Ok(change) => Some(change),
                    Err(e) => {
                        tracing::warn!(said = %said, space = %space, error = %e, "publish queued for retry");
                        None
                    }
                }
            }
            _ => None,
        };

        self.cache.invalidate_all();
        Ok(IngestReport {
            said,
            outcome,
            verification,
            published,
        })
    }

    /// Expiry cleanup, re-verification and pending-sync retries.
    pub async fn run_maintenance(&self, now: DateTime<Utc>) -> Result<MaintenanceReport, ServiceError> {
        let report = MaintenanceReport {
            expired: self.delete_expired(now)?,
            verification: self.verify_pending().await?,
            sync: self.retry_pending().await?,
        };
        Ok(report)
    }

    pub fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, ServiceError> {
        let removed = self.store.delete_expired(now)?;
        if removed > 0 {
            self.cache.invalidate_all();
        }
        Ok(removed)
    }

    pub async fn verify_pending(&self) -> Result<PendingReport, ServiceError> {
        let report = self.gate.verify_pending().await?;
        if report.verified + report.invalid > 0 {
            self.cache.invalidate_all();
        }
        Ok(report)
    }

    pub async fn retry_pending(&self) -> Result<RetryReport, ServiceError> {
        Ok(self.adapter.retry_pending(&self.signing_key).await?)
    }

    /// The issuer's own space when it is a configured organisation, else the
    /// first configured community.
    fn space_for_issuer(&self, issuer: &Aid) -> Option<&SpaceId> {
        self.config
            .space_for(issuer)
            .or_else(|| self.config.communities.first().map(|c| &c.space))
    }
}
