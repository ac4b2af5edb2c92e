use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use super::wire::{KeySyncRequest, KeySyncResponse};
use super::FollowerState;
use crate::attestation::policy::MeasurementPolicy;
use crate::attestation::verifier::Verifier;
use crate::attestation::AttestationProvider;
use crate::crypto::entropy::EntropySource;
use crate::crypto::exchange::{derive_exchange_key, ExchangeKeyPair};
use crate::crypto::material::{KeyMaterial, Nonce};
use crate::error::{Error, KeyError, SyncError};

/// Follower side of the key sync protocol: requests the authoritative key
/// from the leader and verifies the leader's identity before accepting it.
pub struct KeySyncFollower<P> {
    verifier: Verifier,
    policy: MeasurementPolicy,
    provider: P,
}

/// The `AwaitingResponse` state of one follower exchange, created by
/// [`begin`](KeySyncFollower::begin) and consumed by
/// [`complete`](KeySyncFollower::complete).
///
/// The exchange secret never leaves this struct; dropping it (on success or
/// failure) zeroes the secret. Because `complete` consumes it, every failure
/// is terminal for the exchange — a retry starts over with a fresh nonce.
pub struct PendingExchange {
    nonce: Nonce,
    secret: StaticSecret,
}

impl PendingExchange {
    /// The freshness nonce this exchange is bound to.
    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }
}

impl<P: AttestationProvider> KeySyncFollower<P> {
    /// `policy` describes the measurements the LEADER is expected to
    /// present; `provider` issues this follower's own attestation documents.
    pub fn new(verifier: Verifier, policy: MeasurementPolicy, provider: P) -> Self {
        Self {
            verifier,
            policy,
            provider,
        }
    }

    /// Start an exchange: generate a fresh nonce and ephemeral exchange key,
    /// and obtain an attestation document binding both.
    pub fn begin(
        &self,
        entropy: &dyn EntropySource,
    ) -> crate::error::Result<(PendingExchange, KeySyncRequest)> {
        let nonce = Nonce::generate(entropy)?;
        let keypair = ExchangeKeyPair::generate(entropy)?;

        let document = self
            .provider
            .attest(None, Some(nonce.as_bytes()), Some(keypair.public.as_bytes()))
            .map_err(Error::Attestation)?;

        tracing::debug!(
            state = ?FollowerState::AwaitingResponse,
            nonce = %nonce,
            "key sync request prepared"
        );

        Ok((
            PendingExchange {
                nonce,
                secret: keypair.secret,
            },
            KeySyncRequest { document },
        ))
    }

    /// Verify the leader's response and recover the key material.
    ///
    /// The leader's document must verify against the trusted root, match the
    /// expected leader measurements, and echo the nonce from `begin`; the
    /// ciphertext must authenticate under the derived exchange key. Any
    /// partially-decrypted buffer is zeroed before returning.
    pub fn complete(
        &self,
        pending: PendingExchange,
        response: &KeySyncResponse,
    ) -> crate::error::Result<KeyMaterial> {
        let doc = self
            .verifier
            .verify_at_document_time(&response.document)
            .map_err(|err| {
                tracing::warn!(state = ?FollowerState::Failed, %err, "leader attestation rejected");
                Error::Attestation(err)
            })?;

        if !self.policy.matches(&doc.pcrs) {
            tracing::warn!(
                state = ?FollowerState::Failed,
                module_id = %doc.module_id,
                "leader measurements do not match policy"
            );
            return Err(SyncError::ReplayOrMismatch.into());
        }

        if doc.nonce.as_deref() != Some(pending.nonce.as_bytes().as_slice()) {
            tracing::warn!(
                state = ?FollowerState::Failed,
                expected = %pending.nonce,
                "leader response does not echo our nonce"
            );
            return Err(SyncError::ReplayOrMismatch.into());
        }

        let leader_public: [u8; 32] = match doc
            .public_key
            .as_deref()
            .and_then(|b| <[u8; 32]>::try_from(b).ok())
        {
            Some(pk) => pk,
            None => {
                tracing::warn!(
                    state = ?FollowerState::Failed,
                    "leader document carries no usable exchange key"
                );
                return Err(SyncError::ReplayOrMismatch.into());
            }
        };

        let exchange_key = match derive_exchange_key(
            &pending.secret,
            &PublicKey::from(leader_public),
            &pending.nonce,
        ) {
            Ok(material) => material,
            Err(KeyError::NonContributoryKey) => {
                tracing::warn!(
                    state = ?FollowerState::Failed,
                    "leader supplied a non-contributory exchange key"
                );
                return Err(SyncError::ReplayOrMismatch.into());
            }
            Err(err) => return Err(err.into()),
        };

        let mut plaintext = exchange_key
            .open(&response.ciphertext, pending.nonce.as_bytes())
            .map_err(|err| {
                tracing::warn!(state = ?FollowerState::Failed, "ciphertext failed to authenticate");
                Error::Key(err)
            })?;

        let material = KeyMaterial::from_bytes(&plaintext);
        plaintext.zeroize();
        let material = material?;

        tracing::info!(
            state = ?FollowerState::Complete,
            nonce = %pending.nonce,
            "key material received from attested leader"
        );
        Ok(material)
    }
}
