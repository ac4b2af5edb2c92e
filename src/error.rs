/// Errors from key material, nonce generation, and authenticated encryption.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("randomness source unavailable: {0}")]
    RandomnessUnavailable(String),

    #[error("invalid serialized key material: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("HKDF expand failed: invalid length")]
    HkdfExpandFailed,

    #[error("AEAD encryption failed")]
    SealFailed,

    #[error("AEAD decryption failed: ciphertext is invalid or tampered")]
    AuthenticationFailed,

    #[error("non-contributory key exchange: peer sent small-subgroup or identity point")]
    NonContributoryKey,
}

/// Errors from attestation document decoding, verification, and issuance.
#[derive(Debug, thiserror::Error)]
pub enum AttestError {
    #[error("malformed attestation document: {0}")]
    MalformedDocument(String),

    #[error("certificate chain does not reach the trusted root: {0}")]
    UntrustedChain(String),

    #[error("certificate validity window does not contain the reference time")]
    ExpiredCertificate,

    #[error("invalid certificate chain: {0}")]
    InvalidChain(String),

    #[error("envelope signature verification failed")]
    InvalidSignature,

    #[error("attestation issuance failed: {0}")]
    IssuanceFailed(String),
}

/// Errors from the key sync protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("key sync request not authorized")]
    NotAuthorized,

    #[error("nonce or measurement binding mismatch in peer response")]
    ReplayOrMismatch,

    #[error("malformed key sync message: {0}")]
    MalformedMessage(String),
}

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Attestation(#[from] AttestError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub type Result<T> = std::result::Result<T, Error>;
