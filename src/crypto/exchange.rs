use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use super::entropy::EntropySource;
use super::material::{KeyMaterial, Nonce};
use super::KEY_MATERIAL_LEN;
use crate::error::KeyError;

/// Ephemeral X25519 key pair covering a single key sync exchange.
///
/// The public half rides inside the attestation document's `public_key`
/// field, binding it under the hypervisor's signature; the secret half never
/// leaves the process and is zeroed on drop.
pub struct ExchangeKeyPair {
    pub secret: StaticSecret,
    pub public: PublicKey,
}

impl ExchangeKeyPair {
    /// Generate a fresh key pair from the given entropy source.
    pub fn generate(entropy: &dyn EntropySource) -> Result<Self, KeyError> {
        let mut seed = [0u8; 32];
        entropy.fill(&mut seed)?;
        let secret = StaticSecret::from(seed);
        seed.zeroize();
        let public = PublicKey::from(&secret);
        Ok(Self { secret, public })
    }
}

/// Derive the AEAD key material protecting one key hand-off.
///
/// X25519 Diffie-Hellman followed by HKDF-SHA256, salted with the exchange
/// nonce. Both parties compute the identical result from their own secret
/// and the peer's public key, so only attestation documents and ciphertext
/// cross the wire. Each side contributes a fresh ephemeral key per exchange,
/// which makes the derived key unique and the derived nonce single-use.
pub fn derive_exchange_key(
    our_secret: &StaticSecret,
    their_public: &PublicKey,
    binding: &Nonce,
) -> Result<KeyMaterial, KeyError> {
    let shared = our_secret.diffie_hellman(their_public);
    if !shared.was_contributory() {
        return Err(KeyError::NonContributoryKey);
    }

    let hkdf = Hkdf::<Sha256>::new(Some(binding.as_bytes()), shared.as_bytes());
    let mut okm = [0u8; KEY_MATERIAL_LEN];
    hkdf.expand(b"enclave-keysync exchange v1", &mut okm)
        .map_err(|_| KeyError::HkdfExpandFailed)?;

    let material = KeyMaterial::from_bytes(&okm).expect("okm length matches");
    okm.zeroize();
    Ok(material)
}
