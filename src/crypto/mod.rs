pub mod entropy;
pub mod exchange;
pub mod material;

/// AEAD key length in bytes.
pub const KEY_LEN: usize = 32;

/// AEAD nonce length in bytes (XChaCha20-Poly1305).
pub const KEY_NONCE_LEN: usize = 24;

/// Serialized key material length: `key || nonce`.
pub const KEY_MATERIAL_LEN: usize = KEY_LEN + KEY_NONCE_LEN;

/// Length of the freshness nonce used to bind a key sync exchange.
pub const NONCE_LEN: usize = 16;
