pub mod document;
pub mod policy;
pub mod verifier;

#[cfg(feature = "nsm")]
pub mod nsm;

use crate::error::AttestError;

/// Issues attestation documents about the running enclave.
///
/// Implemented by the hypervisor-backed provider when running inside an
/// enclave. The core only consumes the resulting bytes; it never fabricates
/// statements about itself outside this trait.
pub trait AttestationProvider: Send + Sync {
    /// Request a signed attestation document, optionally binding caller
    /// data, a nonce, and a public key into the signed payload.
    fn attest(
        &self,
        user_data: Option<&[u8]>,
        nonce: Option<&[u8]>,
        public_key: Option<&[u8]>,
    ) -> Result<Vec<u8>, AttestError>;
}
