//! Commons Crypto: Ed25519 keys and credential signatures, BLAKE3
//! self-addressing identifiers.

pub mod error;
pub mod hashing;
pub mod keys;
pub mod signing;

pub use error::CryptoError;
pub use hashing::{derive_said, hash, said_matches};
pub use keys::{KeyPair, PublicKey};
pub use signing::{sign, sign_record, verify, verify_record, Signature};
