use std::fmt;

use base64::prelude::*;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use zeroize::Zeroize;

use super::entropy::{EntropySource, SystemEntropy};
use super::{KEY_LEN, KEY_MATERIAL_LEN, KEY_NONCE_LEN, NONCE_LEN};
use crate::error::KeyError;

/// Freshness token for a single key sync exchange.
///
/// Not a secret: it travels inside attestation documents and may appear in
/// logs. It is created per protocol round and discarded afterwards.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Draw a fresh nonce from the given entropy source.
    pub fn generate(entropy: &dyn EntropySource) -> Result<Self, KeyError> {
        let mut bytes = [0u8; NONCE_LEN];
        entropy.fill(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Reconstruct a nonce from raw bytes, e.g. one embedded in a peer's
    /// attestation document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != NONCE_LEN {
            return Err(KeyError::InvalidLength {
                expected: NONCE_LEN,
                actual: bytes.len(),
            });
        }
        let mut inner = [0u8; NONCE_LEN];
        inner.copy_from_slice(bytes);
        Ok(Self(inner))
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }

    /// Canonical text encoding (standard base64, no whitespace).
    pub fn b64(&self) -> String {
        BASE64_STANDARD.encode(self.0)
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Nonce").field(&self.b64()).finish()
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.b64())
    }
}

/// A symmetric authenticated-encryption key paired with its nonce.
///
/// The pair is generated atomically from one entropy read; a key is never
/// combined with a nonce from a different generation. Both halves are
/// overwritten on drop.
pub struct KeyMaterial {
    key: [u8; KEY_LEN],
    nonce: [u8; KEY_NONCE_LEN],
}

impl KeyMaterial {
    /// Generate fresh key material from the system CSPRNG.
    pub fn generate() -> Result<Self, KeyError> {
        Self::generate_with(&SystemEntropy)
    }

    /// Generate fresh key material from the given entropy source.
    pub fn generate_with(entropy: &dyn EntropySource) -> Result<Self, KeyError> {
        let mut buf = [0u8; KEY_MATERIAL_LEN];
        entropy.fill(&mut buf)?;
        let material = Self::from_bytes(&buf).expect("buffer length matches");
        buf.zeroize();
        Ok(material)
    }

    /// Serialize as `key || nonce`.
    pub fn to_bytes(&self) -> [u8; KEY_MATERIAL_LEN] {
        let mut out = [0u8; KEY_MATERIAL_LEN];
        out[..KEY_LEN].copy_from_slice(&self.key);
        out[KEY_LEN..].copy_from_slice(&self.nonce);
        out
    }

    /// Deserialize from `key || nonce`. Fails closed on any length mismatch,
    /// including empty input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != KEY_MATERIAL_LEN {
            return Err(KeyError::InvalidLength {
                expected: KEY_MATERIAL_LEN,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_LEN];
        let mut nonce = [0u8; KEY_NONCE_LEN];
        key.copy_from_slice(&bytes[..KEY_LEN]);
        nonce.copy_from_slice(&bytes[KEY_LEN..]);
        Ok(Self { key, nonce })
    }

    /// Authenticated encryption of `plaintext`, binding `aad` into the tag.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, KeyError> {
        let cipher = XChaCha20Poly1305::new_from_slice(&self.key).expect("key length is 32");
        cipher
            .encrypt(
                XNonce::from_slice(&self.nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| KeyError::SealFailed)
    }

    /// Authenticated decryption. Fails closed on tag mismatch or truncated
    /// input; no partial plaintext is ever returned.
    pub fn open(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, KeyError> {
        let cipher = XChaCha20Poly1305::new_from_slice(&self.key).expect("key length is 32");
        cipher
            .decrypt(
                XNonce::from_slice(&self.nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| KeyError::AuthenticationFailed)
    }
}

impl Zeroize for KeyMaterial {
    fn zeroize(&mut self) {
        self.key.zeroize();
        self.nonce.zeroize();
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key bytes must never reach logs.
        f.write_str("KeyMaterial(..)")
    }
}
