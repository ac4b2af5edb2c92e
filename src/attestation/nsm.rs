use aws_nitro_enclaves_nsm_api::api::{Request, Response};
use serde_bytes::ByteBuf;

use super::AttestationProvider;
use crate::error::AttestError;

/// Attestation provider backed by the Nitro Secure Module (NSM) device.
///
/// Only works inside an AWS Nitro Enclave where `/dev/nsm` is available.
/// The NSM file descriptor is opened on construction and closed on drop.
#[derive(Debug)]
pub struct NsmProvider {
    fd: i32,
}

impl NsmProvider {
    /// Open a connection to the NSM device.
    ///
    /// Returns an error if `/dev/nsm` is not available (i.e., not running
    /// inside a Nitro Enclave).
    pub fn new() -> Result<Self, AttestError> {
        let fd = aws_nitro_enclaves_nsm_api::driver::nsm_init();
        if fd < 0 {
            return Err(AttestError::IssuanceFailed(
                "failed to open /dev/nsm — not running inside a Nitro Enclave?".into(),
            ));
        }
        Ok(Self { fd })
    }
}

impl Drop for NsmProvider {
    fn drop(&mut self) {
        aws_nitro_enclaves_nsm_api::driver::nsm_exit(self.fd);
    }
}

impl AttestationProvider for NsmProvider {
    fn attest(
        &self,
        user_data: Option<&[u8]>,
        nonce: Option<&[u8]>,
        public_key: Option<&[u8]>,
    ) -> Result<Vec<u8>, AttestError> {
        let request = Request::Attestation {
            user_data: user_data.map(|d| ByteBuf::from(d.to_vec())),
            nonce: nonce.map(|d| ByteBuf::from(d.to_vec())),
            public_key: public_key.map(|d| ByteBuf::from(d.to_vec())),
        };

        let response = aws_nitro_enclaves_nsm_api::driver::nsm_process_request(self.fd, request);

        match response {
            Response::Attestation { document } => Ok(document),
            Response::Error(code) => Err(AttestError::IssuanceFailed(format!(
                "NSM attestation request failed: {code:?}"
            ))),
            other => Err(AttestError::IssuanceFailed(format!(
                "unexpected NSM response: {other:?}"
            ))),
        }
    }
}
