use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::types::{Aid, Said, SchemaId, SpaceId};

/// Outcome of the most recent verification of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    /// Not yet checked, or the last check is no longer trusted.
    Unverified,
    /// Signature chain valid and no revocation found.
    Verified,
    /// Permanently rejected (bad signature or revoked).
    Invalid { reason: String },
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unverified => write!(f, "unverified"),
            Self::Verified => write!(f, "verified"),
            Self::Invalid { reason } => write!(f, "invalid({})", reason),
        }
    }
}

/// Time-aware verification state attached to a record.
///
/// A `Verified` status is only trusted while it is fresh: it goes stale once
/// the staleness window elapses or the issuer's key state moves past
/// `key_sequence`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub status: VerificationStatus,
    /// When the gate last produced this outcome.
    pub checked_at: Option<DateTime<Utc>>,
    /// Issuer key-state sequence number the outcome was computed against.
    pub key_sequence: Option<u64>,
}

impl Verification {
    pub fn unverified() -> Self {
        Self {
            status: VerificationStatus::Unverified,
            checked_at: None,
            key_sequence: None,
        }
    }

    pub fn verified(checked_at: DateTime<Utc>, key_sequence: u64) -> Self {
        Self {
            status: VerificationStatus::Verified,
            checked_at: Some(checked_at),
            key_sequence: Some(key_sequence),
        }
    }

    pub fn invalid(checked_at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            status: VerificationStatus::Invalid {
                reason: reason.into(),
            },
            checked_at: Some(checked_at),
            key_sequence: None,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.status == VerificationStatus::Verified
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self.status, VerificationStatus::Invalid { .. })
    }

    /// Whether a `Verified` outcome must be recomputed.
    ///
    /// Unverified outcomes are always stale; invalid outcomes never are.
    pub fn is_stale(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        current_key_sequence: Option<u64>,
    ) -> bool {
        match self.status {
            VerificationStatus::Invalid { .. } => false,
            VerificationStatus::Unverified => true,
            VerificationStatus::Verified => {
                let expired = self
                    .checked_at
                    .map(|at| now - at > window)
                    .unwrap_or(true);
                let rotated = match (current_key_sequence, self.key_sequence) {
                    (Some(current), Some(seen)) => current > seen,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                expired || rotated
            }
        }
    }
}

impl Default for Verification {
    fn default() -> Self {
        Self::unverified()
    }
}

/// Revocation applied to a record by a companion revocation credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    /// SAID of the revocation record.
    pub revocation_said: Said,
    /// Reason given by the revoker.
    pub reason: String,
    /// When the revocation was recorded locally.
    pub revoked_at: DateTime<Utc>,
}

/// Replication state of a record with respect to the community log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Private record, or not yet offered to the log.
    #[default]
    LocalOnly,
    /// Append to the space's log failed; waiting for a retry.
    Pending { space: SpaceId, attempts: u32 },
    /// Appended to the log as the given change.
    Synced { change_id: String },
}

/// A verifiable credential as cached in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Content-derived primary key.
    pub said: Said,
    /// AID of the issuing key state.
    pub issuer: Aid,
    /// AID of the credential holder.
    pub subject: Aid,
    /// Schema the payload conforms to.
    pub schema: SchemaId,
    /// Attribute data, opaque to the store.
    pub payload: serde_json::Value,
    /// Issuance time stated by the credential.
    pub issued_at: DateTime<Utc>,
    /// Issuer signature over [`CredentialRecord::signing_payload`] (hex).
    #[serde(default)]
    pub signature: Option<String>,
    /// SAIDs this record points at (membership edge, revocation target).
    #[serde(default)]
    pub references: Vec<Said>,
    /// When the record was first persisted locally.
    pub cached_at: DateTime<Utc>,
    /// Expiry; `None` never expires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verification: Verification,
    #[serde(default)]
    pub revocation: Option<Revocation>,
    #[serde(default)]
    pub sync: SyncStatus,
    /// Expired but kept because a live record still references it.
    #[serde(default)]
    pub tombstoned: bool,
}

impl CredentialRecord {
    /// Create an unsigned record with a known SAID, issued now.
    pub fn new(
        said: Said,
        issuer: Aid,
        subject: Aid,
        schema: SchemaId,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            said,
            issuer,
            subject,
            schema,
            payload,
            issued_at: now,
            signature: None,
            references: Vec::new(),
            cached_at: now,
            expires_at: None,
            verification: Verification::unverified(),
            revocation: None,
            sync: SyncStatus::LocalOnly,
            tombstoned: false,
        }
    }

    /// Set the expiration date.
    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set the stated issuance time.
    pub fn with_issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = issued_at;
        self
    }

    /// Add an edge reference to another credential.
    pub fn with_reference(mut self, said: Said) -> Self {
        if !self.references.contains(&said) {
            self.references.push(said);
        }
        self
    }

    /// Canonical bytes covered by the SAID and the issuer signature.
    ///
    /// Excludes the SAID itself, the signature and all locally derived state.
    pub fn signing_payload(&self) -> Result<Vec<u8>, CoreError> {
        let canonical = serde_json::json!({
            "issuer": self.issuer,
            "subject": self.subject,
            "schema": self.schema,
            "payload": self.payload,
            "issuedAt": self.issued_at.to_rfc3339(),
            "expiresAt": self.expires_at.map(|d| d.to_rfc3339()),
            "references": self.references,
        });
        Ok(serde_json::to_vec(&canonical)?)
    }

    /// Same credential content, ignoring locally derived state.
    pub fn same_content(&self, other: &CredentialRecord) -> bool {
        self.said == other.said
            && self.issuer == other.issuer
            && self.subject == other.subject
            && self.schema == other.schema
            && self.payload == other.payload
            && self.issued_at == other.issued_at
            && self.signature == other.signature
            && self.references == other.references
            && self.expires_at == other.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp < now).unwrap_or(false)
    }

    pub fn is_revoked(&self) -> bool {
        self.revocation.is_some()
    }

    /// Verified, not revoked, not tombstoned.
    pub fn is_trusted(&self) -> bool {
        self.verification.is_verified() && !self.is_revoked() && !self.tombstoned
    }

    /// Trusted, unexpired, and verified within `window` of `now`.
    pub fn is_trusted_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.is_trusted()
            && !self.is_expired(now)
            && !self.verification.is_stale(now, window, None)
    }

    pub fn is_synced(&self) -> bool {
        matches!(self.sync, SyncStatus::Synced { .. })
    }

    /// Read a string attribute from the payload.
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(|v| v.as_str())
    }
}
