use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Self-addressing identifier (SAID) of a credential.
///
/// Content-derived, so it is globally unique and never reassigned.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Said(pub String);

impl Said {
    /// Wrap an existing SAID string.
    pub fn new(said: impl Into<String>) -> Self {
        Self(said.into())
    }

    /// Parse a SAID, rejecting empty or whitespace-bearing input.
    pub fn parse(said: &str) -> Result<Self, CoreError> {
        if said.is_empty() || said.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidIdentifier(format!(
                "SAID must be a non-empty token, got: {:?}",
                said
            )));
        }
        Ok(Self(said.to_string()))
    }

    /// Get the SAID string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the SAID is usable as a primary key.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && !self.0.chars().any(char::is_whitespace)
    }
}

impl fmt::Display for Said {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Said {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Autonomic identifier (AID) of an issuer, subject, or organisation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Aid(pub String);

impl Aid {
    /// Wrap an AID prefix.
    pub fn new(aid: impl Into<String>) -> Self {
        Self(aid.into())
    }

    /// Parse an AID, rejecting empty input.
    pub fn parse(aid: &str) -> Result<Self, CoreError> {
        if aid.trim().is_empty() {
            return Err(CoreError::InvalidIdentifier("AID must not be empty".into()));
        }
        Ok(Self(aid.to_string()))
    }

    /// Get the AID prefix.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the AID is non-empty.
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl fmt::Display for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Aid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier for a credential schema.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(pub String);

impl SchemaId {
    /// Create a new schema identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the schema ID string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SchemaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a community space on the sync network.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceId(pub String);

impl SpaceId {
    /// Create a new space identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the space ID string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SpaceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What a credential asserts about its subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialKind {
    /// Organisation admits the subject as a member.
    Membership,
    /// Organisation grants the subject operations-steward rights.
    Steward,
    /// A member vouches for another member.
    Endorsement,
    /// Invitation to join; not a trust relation.
    Invitation,
    /// Claims a subject makes about itself (display name, bio).
    SelfClaim,
    /// Companion record revoking another credential.
    Revocation,
    /// Schema unknown to the registry.
    Other,
}

impl CredentialKind {
    /// Whether credentials of this kind become edges in the trust graph.
    pub fn is_trust_edge(&self) -> bool {
        matches!(self, Self::Membership | Self::Steward | Self::Endorsement)
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Membership => write!(f, "membership"),
            Self::Steward => write!(f, "steward"),
            Self::Endorsement => write!(f, "endorsement"),
            Self::Invitation => write!(f, "invitation"),
            Self::SelfClaim => write!(f, "self_claim"),
            Self::Revocation => write!(f, "revocation"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Who may see credentials of a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    /// Projected onto the community's replicated log.
    Community,
    /// Kept in the local store only.
    Private,
}
