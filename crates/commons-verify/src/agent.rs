use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use commons_core::{Aid, Said};
use commons_crypto::PublicKey;

use crate::error::VerifyError;

/// Signing key of an identifier from one establishment event onwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyState {
    pub aid: Aid,
    /// Establishment sequence number; 0 is the inception.
    pub sequence: u64,
    pub public_key: PublicKey,
    pub established_at: DateTime<Utc>,
}

/// Revocation reported by the identity agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationNotice {
    pub revocation_said: Said,
    pub reason: String,
}

/// Resolves witness-backed key state through the identity agent.
#[async_trait]
pub trait KeyStateResolver: Send + Sync {
    /// Key state of `aid` in effect at `as_of`.
    async fn resolve_key_state(
        &self,
        aid: &Aid,
        as_of: DateTime<Utc>,
    ) -> Result<KeyState, VerifyError>;

    /// Latest establishment sequence number of `aid`.
    async fn latest_sequence(&self, aid: &Aid) -> Result<u64, VerifyError>;
}

/// Revocation lookup through the identity agent.
#[async_trait]
pub trait RevocationRegistry: Send + Sync {
    async fn is_revoked(&self, said: &Said) -> Result<Option<RevocationNotice>, VerifyError>;
}

#[async_trait]
impl<T: KeyStateResolver + ?Sized> KeyStateResolver for Arc<T> {
    async fn resolve_key_state(
        &self,
        aid: &Aid,
        as_of: DateTime<Utc>,
    ) -> Result<KeyState, VerifyError> {
        (**self).resolve_key_state(aid, as_of).await
    }

    async fn latest_sequence(&self, aid: &Aid) -> Result<u64, VerifyError> {
        (**self).latest_sequence(aid).await
    }
}

/// In-memory identity agent: key-state history with rotation, and a
/// revocation registry.
///
/// Can be switched offline or given artificial latency.
#[derive(Default)]
pub struct LocalIdentityAgent {
    key_states: DashMap<Aid, Vec<KeyState>>,
    revoked: DashMap<Said, RevocationNotice>,
    offline: AtomicBool,
    latency_ms: AtomicU64,
}

impl LocalIdentityAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the inception key of an identifier.
    pub fn incept(&self, aid: Aid, public_key: PublicKey) {
        self.incept_at(aid, public_key, Utc::now());
    }

    pub fn incept_at(&self, aid: Aid, public_key: PublicKey, at: DateTime<Utc>) {
        let state = KeyState {
            aid: aid.clone(),
            sequence: 0,
            public_key,
            established_at: at,
        };
        tracing::debug!(aid = %aid, "identifier incepted");
        self.key_states.insert(aid, vec![state]);
    }

    /// Rotate to a new signing key. Returns the new sequence number.
    pub fn rotate(&self, aid: &Aid, public_key: PublicKey) -> Result<u64, VerifyError> {
        self.rotate_at(aid, public_key, Utc::now())
    }

    pub fn rotate_at(
        &self,
        aid: &Aid,
        public_key: PublicKey,
        at: DateTime<Utc>,
    ) -> Result<u64, VerifyError> {
        let mut history = self
            .key_states
            .get_mut(aid)
            .ok_or_else(|| VerifyError::Agent(format!("unknown identifier: {}", aid)))?;
        let sequence = history.len() as u64;
        history.push(KeyState {
            aid: aid.clone(),
            sequence,
            public_key,
            established_at: at,
        });
        tracing::info!(aid = %aid, sequence, "key rotated");
        Ok(sequence)
    }

    pub fn revoke(&self, said: Said, revocation_said: Said, reason: impl Into<String>) {
        self.revoked.insert(
            said,
            RevocationNotice {
                revocation_said,
                reason: reason.into(),
            },
        );
    }

    /// Make every call fail as unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn reach(&self, aid: &Aid) -> Result<(), VerifyError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(VerifyError::IssuerUnresolvable {
                aid: aid.clone(),
                reason: "identity agent unreachable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KeyStateResolver for LocalIdentityAgent {
    async fn resolve_key_state(
        &self,
        aid: &Aid,
        as_of: DateTime<Utc>,
    ) -> Result<KeyState, VerifyError> {
        self.reach(aid).await?;
        let history = self
            .key_states
            .get(aid)
            .ok_or_else(|| VerifyError::IssuerUnresolvable {
                aid: aid.clone(),
                reason: "no key state known".into(),
            })?;
        // Falls back to the inception state for times before it.
        history
            .iter()
            .rev()
            .find(|s| s.established_at <= as_of)
            .or_else(|| history.first())
            .cloned()
            .ok_or_else(|| VerifyError::IssuerUnresolvable {
                aid: aid.clone(),
                reason: "empty key-state history".into(),
            })
    }

    async fn latest_sequence(&self, aid: &Aid) -> Result<u64, VerifyError> {
        self.reach(aid).await?;
        self.key_states
            .get(aid)
            .and_then(|h| h.last().map(|s| s.sequence))
            .ok_or_else(|| VerifyError::IssuerUnresolvable {
                aid: aid.clone(),
                reason: "no key state known".into(),
            })
    }
}

#[async_trait]
impl RevocationRegistry for LocalIdentityAgent {
    async fn is_revoked(&self, said: &Said) -> Result<Option<RevocationNotice>, VerifyError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(VerifyError::Timeout("revocation lookup unreachable".into()));
        }
        Ok(self.revoked.get(said).map(|e| e.value().clone()))
    }
}

/// Resolver that tries multiple resolvers in order.
///
/// Returns the first successful resolution, or the last error.
pub struct CompositeResolver {
    resolvers: Vec<Box<dyn KeyStateResolver>>,
}

impl CompositeResolver {
    pub fn new() -> Self {
        Self {
            resolvers: Vec::new(),
        }
    }

    /// Add a resolver to the chain.
    pub fn add_resolver(&mut self, resolver: Box<dyn KeyStateResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn resolver_count(&self) -> usize {
        self.resolvers.len()
    }

    fn no_resolvers(aid: &Aid) -> VerifyError {
        VerifyError::IssuerUnresolvable {
            aid: aid.clone(),
            reason: "no resolvers configured".into(),
        }
    }
}

impl Default for CompositeResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyStateResolver for CompositeResolver {
    async fn resolve_key_state(
        &self,
        aid: &Aid,
        as_of: DateTime<Utc>,
    ) -> Result<KeyState, VerifyError> {
        let mut last_error = Self::no_resolvers(aid);
        for resolver in &self.resolvers {
            match resolver.resolve_key_state(aid, as_of).await {
                Ok(state) => return Ok(state),
                Err(e) => {
                    tracing::debug!(aid = %aid, error = %e, "resolver failed, trying next");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    async fn latest_sequence(&self, aid: &Aid) -> Result<u64, VerifyError> {
        let mut last_error = Self::no_resolvers(aid);
        for resolver in &self.resolvers {
            match resolver.latest_sequence(aid).await {
                Ok(seq) => return Ok(seq),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use commons_crypto::KeyPair;

    #[tokio::test]
    async fn test_resolve_incepted_key() {
        let agent = LocalIdentityAgent::new();
        let kp = KeyPair::generate();
        agent.incept(Aid::from("EOrg"), kp.public_key());

        let state = agent
            .resolve_key_state(&Aid::from("EOrg"), Utc::now())
            .await
            .unwrap();
        assert_eq!(state.sequence, 0);
        assert_eq!(state.public_key, kp.public_key());
    }

    #[tokio::test]
    async fn test_resolve_as_of_after_rotation() {
        let agent = LocalIdentityAgent::new();
        let t0 = Utc::now() - ChronoDuration::days(2);
        let t1 = Utc::now() - ChronoDuration::days(1);
        let old = KeyPair::generate();
        let new = KeyPair::generate();
        let aid = Aid::from("EOrg");
        agent.incept_at(aid.clone(), old.public_key(), t0);
        assert_eq!(agent.rotate_at(&aid, new.public_key(), t1).unwrap(), 1);

        let before = agent
            .resolve_key_state(&aid, t1 - ChronoDuration::hours(1))
            .await
            .unwrap();
        assert_eq!(before.public_key, old.public_key());

        let after = agent.resolve_key_state(&aid, Utc::now()).await.unwrap();
        assert_eq!(after.public_key, new.public_key());
        assert_eq!(agent.latest_sequence(&aid).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_identifier_is_unresolvable() {
        let agent = LocalIdentityAgent::new();
        let err = agent
            .resolve_key_state(&Aid::from("ENobody"), Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(agent.rotate(&Aid::from("ENobody"), KeyPair::generate().public_key()).is_err());
    }

    #[tokio::test]
    async fn test_offline_agent() {
        let agent = LocalIdentityAgent::new();
        agent.incept(Aid::from("EOrg"), KeyPair::generate().public_key());
        agent.set_offline(true);
        assert!(matches!(
            agent.latest_sequence(&Aid::from("EOrg")).await,
            Err(VerifyError::IssuerUnresolvable { .. })
        ));
        agent.set_offline(false);
        assert!(agent.latest_sequence(&Aid::from("EOrg")).await.is_ok());
    }

    #[tokio::test]
    async fn test_revocation_registry() {
        let agent = LocalIdentityAgent::new();
        agent.revoke(Said::from("EA"), Said::from("ER"), "left");
        let notice = agent.is_revoked(&Said::from("EA")).await.unwrap().unwrap();
        assert_eq!(notice.reason, "left");
        assert!(agent.is_revoked(&Said::from("EB")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_composite_resolver_fallback() {
        let empty = Arc::new(LocalIdentityAgent::new());
        let full = Arc::new(LocalIdentityAgent::new());
        full.incept(Aid::from("EOrg"), KeyPair::generate().public_key());

        let mut composite = CompositeResolver::new();
        composite.add_resolver(Box::new(empty));
        composite.add_resolver(Box::new(full));
        assert_eq!(composite.resolver_count(), 2);

        assert!(composite
            .resolve_key_state(&Aid::from("EOrg"), Utc::now())
            .await
            .is_ok());
        assert_eq!(composite.latest_sequence(&Aid::from("EOrg")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_composite_resolver_empty() {
        let composite = CompositeResolver::default();
        assert!(composite
            .resolve_key_state(&Aid::from("EOrg"), Utc::now())
            .await
            .is_err());
    }
}
