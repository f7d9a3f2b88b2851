use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use commons_core::{CredentialRecord, Said};

use crate::error::CryptoError;

/// BLAKE3 hash (32 bytes).
pub type Hash = [u8; 32];

/// Derivation code prefixed to BLAKE3-256 SAIDs.
const BLAKE3_SAID_CODE: char = 'E';

/// Hash arbitrary data using BLAKE3.
pub fn hash(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

/// Derive a self-addressing identifier: `E` + base64url(BLAKE3(data)).
pub fn derive_said(data: &[u8]) -> Said {
    Said::new(format!(
        "{}{}",
        BLAKE3_SAID_CODE,
        URL_SAFE_NO_PAD.encode(hash(data))
    ))
}

/// Whether a record's SAID matches its content.
pub fn said_matches(record: &CredentialRecord) -> Result<bool, CryptoError> {
    let payload = record.signing_payload()?;
    Ok(derive_said(&payload) == record.said)
}
