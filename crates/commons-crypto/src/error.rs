/// Cryptographic operation errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("credential is not signed")]
    MissingSignature,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("core error: {0}")]
    Core(#[from] commons_core::CoreError),
}
