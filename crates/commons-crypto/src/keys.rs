use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Prefix for a qualified, base64url-encoded Ed25519 public key.
const ED25519_KEY_PREFIX: char = 'D';

/// Ed25519 key pair for signing credentials and log changes.
/// Private key material is zeroized on drop by ed25519-dalek.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random key pair using OS-provided entropy.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create a key pair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Create a key pair from raw bytes (32 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(bytes);
        let kp = Self::from_seed(&seed);
        seed.zeroize();
        Ok(kp)
    }

    /// Get the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Get the raw private key bytes (32 bytes).
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        let mut seed = self.signing_key.to_bytes();
        let kp = Self::from_seed(&seed);
        seed.zeroize();
        kp
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key().to_qualified())
            .finish()
    }
}

/// Ed25519 public key for verification operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl PublicKey {
    /// Create from raw bytes (32 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        let verifying_key = VerifyingKey::from_bytes(&bytes_arr)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid public key: {}", e)))?;
        Ok(Self { verifying_key })
    }

    /// Get the raw bytes (32 bytes).
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.verifying_key.as_bytes()
    }

    /// Encode as hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Decode from hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Encode as a qualified key: `D` + base64url(key).
    pub fn to_qualified(&self) -> String {
        format!("{}{}", ED25519_KEY_PREFIX, URL_SAFE_NO_PAD.encode(self.as_bytes()))
    }

    /// Decode a qualified key produced by [`PublicKey::to_qualified`].
    pub fn from_qualified(qualified: &str) -> Result<Self, CryptoError> {
        let encoded = qualified.strip_prefix(ED25519_KEY_PREFIX).ok_or_else(|| {
            CryptoError::InvalidInput(format!("not an Ed25519 qualified key: {}", qualified))
        })?;
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid base64url: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_keypair() {
        let kp = KeyPair::generate();
        assert_eq!(kp.public_key().as_bytes().len(), 32);
    }

    #[test]
    fn test_from_seed_deterministic() {
        let seed = [42u8; 32];
        assert_eq!(
            KeyPair::from_seed(&seed).public_key(),
            KeyPair::from_seed(&seed).public_key()
        );
    }

    #[test]
    fn test_from_bytes_invalid_length() {
        assert!(KeyPair::from_bytes(&[0u8; 16]).is_err());
        assert!(PublicKey::from_bytes(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_clone_keeps_identity() {
        let kp = KeyPair::generate();
        assert_eq!(kp.clone().public_key(), kp.public_key());
    }

    #[test]
    fn test_public_key_hex_roundtrip() {
        let pk = KeyPair::generate().public_key();
        assert_eq!(PublicKey::from_hex(&pk.to_hex()).unwrap(), pk);
    }

    #[test]
    fn test_qualified_key_roundtrip() {
        let pk = KeyPair::from_seed(&[7u8; 32]).public_key();
        let qualified = pk.to_qualified();
        assert!(qualified.starts_with('D'));
        assert_eq!(PublicKey::from_qualified(&qualified).unwrap(), pk);
    }

    #[test]
    fn test_qualified_key_wrong_prefix() {
        let pk = KeyPair::generate().public_key();
        let mut qualified = pk.to_qualified();
        qualified.replace_range(0..1, "B");
        assert!(PublicKey::from_qualified(&qualified).is_err());
    }
}
