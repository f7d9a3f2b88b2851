use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CoreError;
use crate::types::{Aid, SpaceId};

/// Configuration for the credential store and trust graph engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Verification gate settings.
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Replicated log settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Trust graph settings.
    #[serde(default)]
    pub trust: TrustConfig,

    /// Organisations and the community space each one publishes to.
    #[serde(default)]
    pub communities: Vec<CommunityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// How long a `Verified` outcome is trusted before it is recomputed.
    #[serde(default = "default_staleness_secs")]
    pub staleness_window_secs: u64,
    /// Deadline for a single identity agent call.
    #[serde(default = "default_agent_timeout_ms")]
    pub agent_timeout_ms: u64,
    /// Retries after the first failed key-state resolution.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay between retries (doubles each attempt).
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Change type tag declared when a credential log is created.
    #[serde(default = "default_change_type")]
    pub change_type: String,
    /// Deadline for a single substrate call.
    #[serde(default = "default_log_timeout_ms")]
    pub log_timeout_ms: u64,
    /// Maximum append attempts for a pending record before giving up.
    #[serde(default = "default_max_sync_attempts")]
    pub max_sync_attempts: u32,
    /// Base delay between pending-sync retries (doubles each attempt).
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Serve the previous graph while a rebuild is in flight.
    #[serde(default = "default_true")]
    pub stale_while_revalidate: bool,
    /// Deadline for a reader waiting on a build.
    #[serde(default = "default_build_timeout_ms")]
    pub build_timeout_ms: u64,
    /// Trust score weighting.
    #[serde(default)]
    pub weights: ScoreWeights,
}

/// Weights of the trust score function.
///
/// `score = incoming * incoming_credential
///        + bidirectional * bidirectional_relation
///        + depth_proximity / (1 + depth)`
///
/// The defaults are configurable starting points, not calibrated values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_incoming_weight")]
    pub incoming_credential: f64,
    #[serde(default = "default_bidirectional_weight")]
    pub bidirectional_relation: f64,
    #[serde(default = "default_depth_weight")]
    pub depth_proximity: f64,
}

/// An organisation and the community space its credentials replicate into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityConfig {
    /// Root organisation AID.
    pub org: Aid,
    /// Community space on the sync network.
    pub space: SpaceId,
}

// Default value functions
fn default_staleness_secs() -> u64 {
    15 * 60
}
fn default_agent_timeout_ms() -> u64 {
    5_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    200
}
fn default_change_type() -> String {
    "commons.credential.v1".into()
}
fn default_log_timeout_ms() -> u64 {
    10_000
}
fn default_max_sync_attempts() -> u32 {
    5
}
fn default_true() -> bool {
    true
}
fn default_build_timeout_ms() -> u64 {
    30_000
}
fn default_incoming_weight() -> f64 {
    1.0
}
fn default_bidirectional_weight() -> f64 {
    3.0
}
fn default_depth_weight() -> f64 {
    2.0
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            staleness_window_secs: default_staleness_secs(),
            agent_timeout_ms: default_agent_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            change_type: default_change_type(),
            log_timeout_ms: default_log_timeout_ms(),
            max_sync_attempts: default_max_sync_attempts(),
            retry_base_delay_ms: default_retry_base_ms(),
        }
    }
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            stale_while_revalidate: true,
            build_timeout_ms: default_build_timeout_ms(),
            weights: ScoreWeights::default(),
        }
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            incoming_credential: default_incoming_weight(),
            bidirectional_relation: default_bidirectional_weight(),
            depth_proximity: default_depth_weight(),
        }
    }
}

impl VerificationConfig {
    pub fn staleness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_window_secs as i64)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl SyncConfig {
    pub fn log_timeout(&self) -> Duration {
        Duration::from_millis(self.log_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl TrustConfig {
    pub fn build_timeout(&self) -> Duration {
        Duration::from_millis(self.build_timeout_ms)
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        let w = &self.trust.weights;
        for (name, value) in [
            ("incoming_credential", w.incoming_credential),
            ("bidirectional_relation", w.bidirectional_relation),
            ("depth_proximity", w.depth_proximity),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::InvalidConfig(format!(
                    "score weight {} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.sync.change_type.is_empty() {
            return Err(CoreError::InvalidConfig("sync.change_type is empty".into()));
        }
        if self.sync.max_sync_attempts == 0 {
            return Err(CoreError::InvalidConfig(
                "sync.max_sync_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Community space configured for an organisation.
    pub fn space_for(&self, org: &Aid) -> Option<&SpaceId> {
        self.communities
            .iter()
            .find(|c| &c.org == org)
            .map(|c| &c.space)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.verification.staleness_window_secs, 900);
        assert_eq!(config.sync.change_type, "commons.credential.v1");
        assert!(config.trust.stale_while_revalidate);
        assert!(config.communities.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = EngineConfig {
            communities: vec![CommunityConfig {
                org: Aid::from("EOrg"),
                space: SpaceId::from("space-community"),
            }],
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.communities, config.communities);
        assert_eq!(back.trust.weights, config.trust.weights);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let back: EngineConfig =
            serde_json::from_str(r#"{"trust":{"weights":{"incoming_credential":0.5}}}"#).unwrap();
        assert_eq!(back.trust.weights.incoming_credential, 0.5);
        assert_eq!(back.trust.weights.bidirectional_relation, 3.0);
        assert_eq!(back.sync.max_sync_attempts, 5);
    }

    #[test]
    fn test_validate_rejects_negative_weight() {
        let mut config = EngineConfig::default();
        config.trust.weights.depth_proximity = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sync_attempts() {
        let mut config = EngineConfig::default();
        config.sync.max_sync_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_space_for() {
        let config = EngineConfig {
            communities: vec![CommunityConfig {
                org: Aid::from("EOrg"),
                space: SpaceId::from("space-1"),
            }],
            ..Default::default()
        };
        assert_eq!(
            config.space_for(&Aid::from("EOrg")),
            Some(&SpaceId::from("space-1"))
        );
        assert!(config.space_for(&Aid::from("EOther")).is_none());
    }

    #[test]
    fn test_durations() {
        let config = EngineConfig::default();
        assert_eq!(config.verification.agent_timeout(), Duration::from_millis(5_000));
        assert_eq!(config.sync.log_timeout(), Duration::from_millis(10_000));
        assert_eq!(
            config.verification.staleness_window(),
            chrono::Duration::minutes(15)
        );
    }
}
