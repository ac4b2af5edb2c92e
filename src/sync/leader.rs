use x25519_dalek::PublicKey;
use zeroize::Zeroize;

use super::wire::{KeySyncRequest, KeySyncResponse};
use super::LeaderState;
use crate::attestation::policy::MeasurementPolicy;
use crate::attestation::verifier::Verifier;
use crate::attestation::AttestationProvider;
use crate::crypto::entropy::EntropySource;
use crate::crypto::exchange::{derive_exchange_key, ExchangeKeyPair};
use crate::crypto::material::{KeyMaterial, Nonce};
use crate::error::{Error, KeyError, SyncError};

/// Leader side of the key sync protocol: holds the authoritative key and
/// releases it only to followers whose attestation verifies and whose
/// measurements match the configured policy.
///
/// Each [`handle_request`](KeySyncLeader::handle_request) call is a pure
/// request/response computation; the struct itself is read-only
/// configuration and safe to share across concurrent exchanges.
pub struct KeySyncLeader<P> {
    verifier: Verifier,
    policy: MeasurementPolicy,
    provider: P,
}

impl<P: AttestationProvider> KeySyncLeader<P> {
    /// `policy` describes the measurements a follower must present;
    /// `provider` issues this leader's own attestation documents.
    pub fn new(verifier: Verifier, policy: MeasurementPolicy, provider: P) -> Self {
        Self {
            verifier,
            policy,
            provider,
        }
    }

    /// Handle a follower's key request.
    ///
    /// Every verification and authorization failure is collapsed into the
    /// generic [`SyncError::NotAuthorized`] so the requester cannot probe
    /// which check failed; the specific cause is recorded in the log.
    /// Failures of this leader's own machinery (entropy, issuance) surface
    /// as their own error kinds.
    pub fn handle_request(
        &self,
        request: &KeySyncRequest,
        key: &KeyMaterial,
        entropy: &dyn EntropySource,
    ) -> crate::error::Result<KeySyncResponse> {
        tracing::debug!(
            state = ?LeaderState::VerifyingPeer,
            document_len = request.document.len(),
            "verifying follower attestation"
        );
        let doc = match self.verifier.verify_at_document_time(&request.document) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(state = ?LeaderState::Failed, %err, "follower attestation rejected");
                return Err(SyncError::NotAuthorized.into());
            }
        };

        tracing::debug!(
            state = ?LeaderState::Authorizing,
            module_id = %doc.module_id,
            "checking follower measurements"
        );
        if !self.policy.matches(&doc.pcrs) {
            tracing::warn!(
                state = ?LeaderState::Failed,
                module_id = %doc.module_id,
                presented = ?doc
                    .pcrs
                    .iter()
                    .map(|(k, v)| (*k, hex::encode(v)))
                    .collect::<Vec<_>>(),
                "follower measurements do not match policy"
            );
            return Err(SyncError::NotAuthorized.into());
        }

        let follower_nonce = match doc.nonce.as_deref().map(Nonce::from_slice) {
            Some(Ok(nonce)) => nonce,
            _ => {
                tracing::warn!(
                    state = ?LeaderState::Failed,
                    module_id = %doc.module_id,
                    "follower document carries no usable nonce"
                );
                return Err(SyncError::NotAuthorized.into());
            }
        };
        let follower_public: [u8; 32] = match doc
            .public_key
            .as_deref()
            .and_then(|b| <[u8; 32]>::try_from(b).ok())
        {
            Some(pk) => pk,
            None => {
                tracing::warn!(
                    state = ?LeaderState::Failed,
                    module_id = %doc.module_id,
                    "follower document carries no usable exchange key"
                );
                return Err(SyncError::NotAuthorized.into());
            }
        };

        // Fresh ephemeral per exchange; the derived key protects exactly one
        // hand-off, bound to the follower's nonce.
        let keypair = ExchangeKeyPair::generate(entropy)?;
        let exchange_key = match derive_exchange_key(
            &keypair.secret,
            &PublicKey::from(follower_public),
            &follower_nonce,
        ) {
            Ok(material) => material,
            Err(KeyError::NonContributoryKey) => {
                tracing::warn!(
                    state = ?LeaderState::Failed,
                    module_id = %doc.module_id,
                    "follower supplied a non-contributory exchange key"
                );
                return Err(SyncError::NotAuthorized.into());
            }
            Err(err) => return Err(err.into()),
        };

        let mut key_bytes = key.to_bytes();
        let sealed = exchange_key.seal(&key_bytes, follower_nonce.as_bytes());
        key_bytes.zeroize();
        let ciphertext = sealed?;

        let document = self
            .provider
            .attest(
                None,
                Some(follower_nonce.as_bytes()),
                Some(keypair.public.as_bytes()),
            )
            .map_err(Error::Attestation)?;

        tracing::info!(
            state = ?LeaderState::Complete,
            module_id = %doc.module_id,
            nonce = %follower_nonce,
            "key released to attested follower"
        );

        Ok(KeySyncResponse {
            ciphertext,
            document,
        })
    }
}
