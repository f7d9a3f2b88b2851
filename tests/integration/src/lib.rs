//! Shared fixtures for the Commons integration tests.

use std::sync::Arc;

use chrono::{Duration, Utc};

use commons_core::{Aid, CommunityConfig, CredentialRecord, EngineConfig, Said, SchemaId, SpaceId};
use commons_crypto::{sign_record, KeyPair};
use commons_node::CommunityService;
use commons_store::CredentialStore;
use commons_sync::MemoryLogSubstrate;
use commons_verify::LocalIdentityAgent;

pub const ORG: &str = "EOrg";
pub const SPACE: &str = "space-1";

/// One community wired end to end over in-memory collaborators.
pub struct Harness {
    pub agent: Arc<LocalIdentityAgent>,
    pub substrate: Arc<MemoryLogSubstrate>,
    pub store: Arc<CredentialStore>,
    pub service: CommunityService,
    pub org_key: KeyPair,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Self::community_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let agent = Arc::new(LocalIdentityAgent::new());
        let substrate = Arc::new(MemoryLogSubstrate::new());
        let harness = Self::assemble(config, agent, substrate, KeyPair::generate());
        harness.incept(ORG, &harness.org_key);
        harness
    }

    /// A second node with its own store that shares this node's identity
    /// agent and log substrate.
    pub fn peer(&self, config: EngineConfig) -> Self {
        Self::assemble(
            config,
            self.agent.clone(),
            self.substrate.clone(),
            KeyPair::from_seed(&self.org_key.secret_bytes()),
        )
    }

    fn assemble(
        config: EngineConfig,
        agent: Arc<LocalIdentityAgent>,
        substrate: Arc<MemoryLogSubstrate>,
        org_key: KeyPair,
    ) -> Self {
        let store = Arc::new(CredentialStore::in_memory());
        let service = CommunityService::new(
            config,
            store.clone(),
            agent.clone(),
            Some(agent.clone()),
            substrate.clone(),
            KeyPair::generate(),
        )
        .expect("valid engine config");

        Self {
            agent,
            substrate,
            store,
            service,
            org_key,
        }
    }

    /// Default engine settings for the single test community.
    pub fn community_config() -> EngineConfig {
        EngineConfig {
            communities: vec![CommunityConfig {
                org: Aid::from(ORG),
                space: SpaceId::from(SPACE),
            }],
            ..EngineConfig::default()
        }
    }

    pub fn org(&self) -> Aid {
        Aid::from(ORG)
    }

    pub fn space(&self) -> SpaceId {
        SpaceId::from(SPACE)
    }

    /// Register an identifier whose key predates every test credential.
    pub fn incept(&self, aid: &str, key: &KeyPair) {
        self.agent
            .incept_at(Aid::from(aid), key.public_key(), Utc::now() - Duration::days(1));
    }

    /// A fresh member identifier with its own incepted key.
    pub fn member(&self, aid: &str) -> KeyPair {
        let key = KeyPair::generate();
        self.incept(aid, &key);
        key
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// An unsigned record with a placeholder SAID.
pub fn draft(issuer: &str, subject: &str, schema: &str, payload: serde_json::Value) -> CredentialRecord {
    CredentialRecord::new(
        Said::from("Edraft"),
        Aid::from(issuer),
        Aid::from(subject),
        SchemaId::from(schema),
        payload,
    )
}

/// A record with its content-derived SAID and issuer signature.
pub fn signed(
    issuer: &str,
    subject: &str,
    schema: &str,
    payload: serde_json::Value,
    key: &KeyPair,
) -> CredentialRecord {
    sign_record(draft(issuer, subject, schema, payload), key).expect("signable record")
}
