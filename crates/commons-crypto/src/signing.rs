use ed25519_dalek::Signer;
use ed25519_dalek::Verifier;

use commons_core::CredentialRecord;

use crate::error::CryptoError;
use crate::hashing::derive_said;
use crate::keys::{KeyPair, PublicKey};

/// Ed25519 signature (64 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    inner: ed25519_dalek::Signature,
}

impl Signature {
    /// Get the raw bytes (64 bytes).
    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }

    /// Create from raw bytes (64 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_arr: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidInput(format!("signature must be 64 bytes, got {}", bytes.len()))
        })?;
        let inner = ed25519_dalek::Signature::from_bytes(&bytes_arr);
        Ok(Self { inner })
    }

    /// Encode as hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Decode from hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid signature hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }
}

/// Sign a message using Ed25519.
pub fn sign(message: &[u8], keypair: &KeyPair) -> Signature {
    Signature {
        inner: keypair.signing_key().sign(message),
    }
}

/// Verify an Ed25519 signature.
pub fn verify(
    message: &[u8],
    signature: &Signature,
    pubkey: &PublicKey,
) -> Result<(), CryptoError> {
    pubkey
        .verifying_key()
        .verify(message, &signature.inner)
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}

/// Assign the content-derived SAID and the issuer signature to a record.
pub fn sign_record(
    mut record: CredentialRecord,
    keypair: &KeyPair,
) -> Result<CredentialRecord, CryptoError> {
    let payload = record.signing_payload()?;
    record.said = derive_said(&payload);
    record.signature = Some(sign(&payload, keypair).to_hex());

    tracing::debug!(
        said = %record.said,
        issuer = %record.issuer,
        schema = %record.schema,
        "credential record signed"
    );

    Ok(record)
}

/// Verify a record's issuer signature against a public key.
pub fn verify_record(record: &CredentialRecord, pubkey: &PublicKey) -> Result<(), CryptoError> {
    let signature_hex = record
        .signature
        .as_deref()
        .ok_or(CryptoError::MissingSignature)?;
    let signature = Signature::from_hex(signature_hex)?;
    let payload = record.signing_payload()?;
    verify(&payload, &signature, pubkey)
}
