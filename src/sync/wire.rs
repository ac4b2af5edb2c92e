use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::SyncError;

/// Maximum attestation document size accepted on the wire (64 KiB).
///
/// Real Nitro attestation documents are typically <16 KiB; the cap prevents
/// an adversary from sending a multi-megabyte document to exhaust memory.
pub const MAX_DOCUMENT_SIZE: usize = 64 * 1024;

/// Maximum encrypted-key size accepted on the wire. Serialized key material
/// is 56 bytes plus the AEAD tag; 1 KiB leaves generous headroom.
pub const MAX_CIPHERTEXT_SIZE: usize = 1024;

const REQUEST_TAG: u8 = 1;
const RESPONSE_TAG: u8 = 2;

/// Follower → leader: the follower's attestation document, carrying its
/// fresh nonce and ephemeral exchange key under the hypervisor's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySyncRequest {
    pub document: Vec<u8>,
}

impl KeySyncRequest {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + 4 + self.document.len());
        buf.put_u8(REQUEST_TAG);
        buf.put_u32(self.document.len() as u32);
        buf.put_slice(&self.document);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, SyncError> {
        let mut cursor = check_header(payload, REQUEST_TAG, "key sync request")?;
        let document = read_block(&mut cursor, MAX_DOCUMENT_SIZE, "document")?;
        check_exhausted(cursor, "key sync request")?;
        Ok(Self { document })
    }
}

/// Leader → follower: the key material sealed under the exchange key, plus
/// the leader's own attestation document echoing the follower's nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySyncResponse {
    pub ciphertext: Vec<u8>,
    pub document: Vec<u8>,
}

impl KeySyncResponse {
    pub fn encode(&self) -> Bytes {
        let mut buf =
            BytesMut::with_capacity(1 + 4 + self.ciphertext.len() + 4 + self.document.len());
        buf.put_u8(RESPONSE_TAG);
        buf.put_u32(self.ciphertext.len() as u32);
        buf.put_slice(&self.ciphertext);
        buf.put_u32(self.document.len() as u32);
        buf.put_slice(&self.document);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, SyncError> {
        let mut cursor = check_header(payload, RESPONSE_TAG, "key sync response")?;
        let ciphertext = read_block(&mut cursor, MAX_CIPHERTEXT_SIZE, "ciphertext")?;
        let document = read_block(&mut cursor, MAX_DOCUMENT_SIZE, "document")?;
        check_exhausted(cursor, "key sync response")?;
        Ok(Self {
            ciphertext,
            document,
        })
    }
}

fn check_header<'a>(payload: &'a [u8], tag: u8, what: &str) -> Result<&'a [u8], SyncError> {
    match payload.first() {
        None => Err(SyncError::MalformedMessage(format!("empty {what}"))),
        Some(&t) if t != tag => Err(SyncError::MalformedMessage(format!(
            "unexpected message tag: expected {tag}, got {t}"
        ))),
        Some(_) => Ok(&payload[1..]),
    }
}

fn read_block(cursor: &mut &[u8], max: usize, what: &str) -> Result<Vec<u8>, SyncError> {
    if cursor.remaining() < 4 {
        return Err(SyncError::MalformedMessage(format!(
            "truncated {what} length"
        )));
    }
    let len = cursor.get_u32() as usize;
    if len > max {
        return Err(SyncError::MalformedMessage(format!(
            "{what} too large: {len} bytes (max {max})"
        )));
    }
    if cursor.remaining() < len {
        return Err(SyncError::MalformedMessage(format!(
            "truncated {what}: expected {len} bytes, got {}",
            cursor.remaining()
        )));
    }
    let block = cursor[..len].to_vec();
    cursor.advance(len);
    Ok(block)
}

fn check_exhausted(cursor: &[u8], what: &str) -> Result<(), SyncError> {
    if cursor.is_empty() {
        Ok(())
    } else {
        Err(SyncError::MalformedMessage(format!(
            "{} trailing bytes after {what}",
            cursor.len()
        )))
    }
}
