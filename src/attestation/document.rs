use std::collections::BTreeMap;

use ciborium::value::Value;
use coset::{CborSerializable, CoseSign1, TaggedCborSerializable};

use crate::error::AttestError;

/// Highest measurement register index carried by an attestation document.
pub const MAX_PCR_INDEX: usize = 15;

/// Decoded attestation document payload.
///
/// The fields are meaningful only together with a verification outcome; an
/// unverified document must never be used to authorize key release. Obtain
/// a trustworthy instance through [`crate::attestation::verifier::Verifier`].
#[derive(Debug, Clone)]
pub struct AttestationDocument {
    /// Hypervisor-issued session identifier.
    pub module_id: String,

    /// Name of the hash algorithm used for the measurements.
    pub digest: String,

    /// Document issuance time, milliseconds since the Unix epoch.
    pub timestamp: u64,

    /// Measurement registers, indexed 0..=15. Unpopulated registers are
    /// all-zero and must never be taken to match a non-zero expectation.
    pub pcrs: BTreeMap<usize, Vec<u8>>,

    /// DER-encoded leaf certificate that signed this document.
    pub certificate: Vec<u8>,

    /// DER-encoded CA certificates. The array order carries no meaning; the
    /// verifier chains them by issuer/subject matching.
    pub cabundle: Vec<Vec<u8>>,

    /// Caller-supplied public key, if one was bound into the document.
    pub public_key: Option<Vec<u8>>,

    /// Caller-supplied opaque payload, if present.
    pub user_data: Option<Vec<u8>>,

    /// Caller-supplied freshness nonce, if present.
    pub nonce: Option<Vec<u8>>,
}

impl AttestationDocument {
    /// Decode a signed envelope WITHOUT verifying it.
    ///
    /// Useful for reading the issuance timestamp before verification; any
    /// other use of the fields requires a successful
    /// [`Verifier::verify`](crate::attestation::verifier::Verifier::verify).
    pub fn from_bytes(raw: &[u8]) -> Result<Self, AttestError> {
        let sign1 = decode_envelope(raw)?;
        let payload = sign1
            .payload
            .as_ref()
            .ok_or_else(|| AttestError::MalformedDocument("envelope payload is absent".into()))?;
        parse_payload(payload)
    }
}

/// Decode the outer COSE_Sign1 envelope.
///
/// The NSM returns an untagged CBOR array; tooling commonly wraps it with
/// CBOR tag 18. Accept both.
pub(crate) fn decode_envelope(raw: &[u8]) -> Result<CoseSign1, AttestError> {
    CoseSign1::from_tagged_slice(raw)
        .or_else(|_| CoseSign1::from_slice(raw))
        .map_err(|e| AttestError::MalformedDocument(format!("invalid COSE_Sign1 envelope: {e}")))
}

/// Decode the inner CBOR map into an [`AttestationDocument`].
///
/// Every structural defect — missing required field, wrong type, trailing
/// bytes — is a [`AttestError::MalformedDocument`]; no defaults are ever
/// substituted for security-relevant fields.
pub(crate) fn parse_payload(payload: &[u8]) -> Result<AttestationDocument, AttestError> {
    let mut reader: &[u8] = payload;
    let value: Value = ciborium::de::from_reader(&mut reader)
        .map_err(|e| AttestError::MalformedDocument(format!("invalid payload CBOR: {e}")))?;
    if !reader.is_empty() {
        return Err(AttestError::MalformedDocument(format!(
            "{} trailing bytes after payload",
            reader.len()
        )));
    }

    let map = match value {
        Value::Map(m) => m,
        _ => {
            return Err(AttestError::MalformedDocument(
                "payload is not a CBOR map".into(),
            ))
        }
    };

    let module_id = get_text_field(&map, "module_id")?;
    if module_id.is_empty() {
        return Err(AttestError::MalformedDocument("module_id is empty".into()));
    }

    let digest = get_text_field(&map, "digest")?;
    if digest != "SHA384" {
        return Err(AttestError::MalformedDocument(format!(
            "unsupported digest: expected SHA384, got {digest}"
        )));
    }

    let timestamp = get_uint_field(&map, "timestamp")?;
    if timestamp == 0 {
        return Err(AttestError::MalformedDocument(
            "timestamp must be non-zero".into(),
        ));
    }

    let pcrs = get_pcrs_field(&map)?;
    let certificate = get_bytes_field(&map, "certificate")?;
    let cabundle = get_bytes_array_field(&map, "cabundle")?;

    let public_key = get_optional_bytes_field(&map, "public_key")?;
    let user_data = get_optional_bytes_field(&map, "user_data")?;
    let nonce = get_optional_bytes_field(&map, "nonce")?;

    Ok(AttestationDocument {
        module_id,
        digest,
        timestamp,
        pcrs,
        certificate,
        cabundle,
        public_key,
        user_data,
        nonce,
    })
}

fn find_field<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Text(s) if s == key))
        .map(|(_, v)| v)
}

fn get_text_field(map: &[(Value, Value)], key: &str) -> Result<String, AttestError> {
    match find_field(map, key) {
        Some(Value::Text(s)) => Ok(s.clone()),
        Some(_) => Err(AttestError::MalformedDocument(format!(
            "field '{key}' is not a text string"
        ))),
        None => Err(AttestError::MalformedDocument(format!(
            "missing required field '{key}'"
        ))),
    }
}

fn get_uint_field(map: &[(Value, Value)], key: &str) -> Result<u64, AttestError> {
    match find_field(map, key) {
        Some(Value::Integer(i)) => {
            let val: i128 = (*i).into();
            u64::try_from(val).map_err(|_| {
                AttestError::MalformedDocument(format!("field '{key}' is out of range"))
            })
        }
        Some(_) => Err(AttestError::MalformedDocument(format!(
            "field '{key}' is not an integer"
        ))),
        None => Err(AttestError::MalformedDocument(format!(
            "missing required field '{key}'"
        ))),
    }
}

fn get_bytes_field(map: &[(Value, Value)], key: &str) -> Result<Vec<u8>, AttestError> {
    match find_field(map, key) {
        Some(Value::Bytes(b)) => Ok(b.clone()),
        Some(_) => Err(AttestError::MalformedDocument(format!(
            "field '{key}' is not a byte string"
        ))),
        None => Err(AttestError::MalformedDocument(format!(
            "missing required field '{key}'"
        ))),
    }
}

/// Optional fields decode to an explicit absent marker; CBOR null and a
/// missing entry both mean "not supplied", anything else must be bytes.
fn get_optional_bytes_field(
    map: &[(Value, Value)],
    key: &str,
) -> Result<Option<Vec<u8>>, AttestError> {
    match find_field(map, key) {
        Some(Value::Bytes(b)) => Ok(Some(b.clone())),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(AttestError::MalformedDocument(format!(
            "field '{key}' is neither bytes nor null"
        ))),
    }
}

fn get_bytes_array_field(map: &[(Value, Value)], key: &str) -> Result<Vec<Vec<u8>>, AttestError> {
    match find_field(map, key) {
        Some(Value::Array(arr)) => {
            let mut result = Vec::with_capacity(arr.len());
            for (i, item) in arr.iter().enumerate() {
                match item {
                    Value::Bytes(b) => result.push(b.clone()),
                    _ => {
                        return Err(AttestError::MalformedDocument(format!(
                            "{key}[{i}] is not a byte string"
                        )))
                    }
                }
            }
            Ok(result)
        }
        Some(_) => Err(AttestError::MalformedDocument(format!(
            "field '{key}' is not an array"
        ))),
        None => Err(AttestError::MalformedDocument(format!(
            "missing required field '{key}'"
        ))),
    }
}

fn get_pcrs_field(map: &[(Value, Value)]) -> Result<BTreeMap<usize, Vec<u8>>, AttestError> {
    let pcrs_value = find_field(map, "pcrs")
        .ok_or_else(|| AttestError::MalformedDocument("missing required field 'pcrs'".into()))?;

    let pcrs_map = match pcrs_value {
        Value::Map(m) => m,
        _ => {
            return Err(AttestError::MalformedDocument(
                "field 'pcrs' is not a map".into(),
            ))
        }
    };

    let mut result = BTreeMap::new();
    for (k, v) in pcrs_map {
        let idx = match k {
            Value::Integer(i) => {
                let val: i128 = (*i).into();
                if !(0..=MAX_PCR_INDEX as i128).contains(&val) {
                    return Err(AttestError::MalformedDocument(format!(
                        "PCR index {val} out of range [0, {MAX_PCR_INDEX}]"
                    )));
                }
                val as usize
            }
            _ => {
                return Err(AttestError::MalformedDocument(
                    "PCR key is not an integer".into(),
                ))
            }
        };
        let bytes = match v {
            Value::Bytes(b) => b.clone(),
            _ => {
                return Err(AttestError::MalformedDocument(format!(
                    "PCR{idx} value is not a byte string"
                )))
            }
        };
        // Measurement registers are SHA-256/384/512 sized.
        if bytes.len() != 32 && bytes.len() != 48 && bytes.len() != 64 {
            return Err(AttestError::MalformedDocument(format!(
                "PCR{idx} has invalid size: {} bytes (expected 32, 48, or 64)",
                bytes.len()
            )));
        }
        result.insert(idx, bytes);
    }

    Ok(result)
}

/// Encode an attestation payload to CBOR bytes (for test helpers).
#[doc(hidden)]
#[allow(clippy::too_many_arguments)]
pub fn encode_attestation_doc(
    module_id: &str,
    digest: &str,
    timestamp: u64,
    pcrs: &BTreeMap<usize, Vec<u8>>,
    certificate: &[u8],
    cabundle: &[Vec<u8>],
    public_key: Option<&[u8]>,
    user_data: Option<&[u8]>,
    nonce: Option<&[u8]>,
) -> Vec<u8> {
    let mut map_entries: Vec<(Value, Value)> = Vec::new();

    map_entries.push((
        Value::Text("module_id".into()),
        Value::Text(module_id.into()),
    ));
    map_entries.push((Value::Text("digest".into()), Value::Text(digest.into())));
    map_entries.push((
        Value::Text("timestamp".into()),
        Value::Integer(timestamp.into()),
    ));

    let pcr_entries: Vec<(Value, Value)> = pcrs
        .iter()
        .map(|(k, v)| (Value::Integer((*k as u64).into()), Value::Bytes(v.clone())))
        .collect();
    map_entries.push((Value::Text("pcrs".into()), Value::Map(pcr_entries)));

    map_entries.push((
        Value::Text("certificate".into()),
        Value::Bytes(certificate.to_vec()),
    ));

    let bundle: Vec<Value> = cabundle.iter().map(|c| Value::Bytes(c.clone())).collect();
    map_entries.push((Value::Text("cabundle".into()), Value::Array(bundle)));

    for (key, field) in [
        ("public_key", public_key),
        ("user_data", user_data),
        ("nonce", nonce),
    ] {
        match field {
            Some(data) => map_entries.push((Value::Text(key.into()), Value::Bytes(data.to_vec()))),
            None => map_entries.push((Value::Text(key.into()), Value::Null)),
        }
    }

    let mut buf = Vec::new();
    ciborium::ser::into_writer(&Value::Map(map_entries), &mut buf)
        .expect("CBOR serialization should not fail");
    buf
}

#[cfg(test)]
mod tests {
    use coset::{CoseSign1Builder, HeaderBuilder};

    use super::*;

    fn default_pcrs() -> BTreeMap<usize, Vec<u8>> {
        let mut pcrs = BTreeMap::new();
        pcrs.insert(0, vec![0xAA; 48]);
        pcrs.insert(1, vec![0xBB; 48]);
        pcrs.insert(2, vec![0x00; 48]);
        pcrs
    }

    /// Wrap a payload in an (unsigned) COSE_Sign1 envelope; decoding does
    /// not look at the signature bytes.
    fn wrap_envelope(payload: Vec<u8>) -> Vec<u8> {
        let protected = HeaderBuilder::new()
            .algorithm(coset::iana::Algorithm::ES384)
            .build();
        CoseSign1Builder::new()
            .protected(protected)
            .payload(payload)
            .signature(vec![0u8; 96])
            .build()
            .to_tagged_vec()
            .unwrap()
    }

    fn default_payload() -> Vec<u8> {
        encode_attestation_doc(
            "i-0123456789abcdef0-enc0123456789abcdef",
            "SHA384",
            1_700_000_000_000,
            &default_pcrs(),
            &[0x30, 0x82],
            &[vec![0x30, 0x81]],
            Some(&[7u8; 32]),
            None,
            Some(b"fresh-nonce"),
        )
    }

    #[test]
    fn decode_roundtrip() {
        let raw = wrap_envelope(default_payload());
        let doc = AttestationDocument::from_bytes(&raw).unwrap();

        assert_eq!(doc.module_id, "i-0123456789abcdef0-enc0123456789abcdef");
        assert_eq!(doc.digest, "SHA384");
        assert_eq!(doc.timestamp, 1_700_000_000_000);
        assert_eq!(doc.pcrs.len(), 3);
        assert_eq!(doc.pcrs[&0], vec![0xAA; 48]);
        assert_eq!(doc.certificate, vec![0x30, 0x82]);
        assert_eq!(doc.cabundle, vec![vec![0x30, 0x81]]);
        assert_eq!(doc.public_key.as_deref(), Some([7u8; 32].as_ref()));
        assert!(doc.user_data.is_none());
        assert_eq!(doc.nonce.as_deref(), Some(b"fresh-nonce".as_ref()));
    }

    #[test]
    fn garbage_is_malformed() {
        let result = AttestationDocument::from_bytes(b"not an envelope");
        assert!(matches!(result, Err(AttestError::MalformedDocument(_))));
    }

    #[test]
    fn missing_required_field_is_malformed() {
        for dropped in ["module_id", "digest", "timestamp", "pcrs", "certificate"] {
            let payload = default_payload();
            let mut reader: &[u8] = &payload;
            let value: Value = ciborium::de::from_reader(&mut reader).unwrap();
            let Value::Map(entries) = value else {
                unreachable!()
            };
            let filtered: Vec<(Value, Value)> = entries
                .into_iter()
                .filter(|(k, _)| !matches!(k, Value::Text(s) if s == dropped))
                .collect();
            let mut stripped = Vec::new();
            ciborium::ser::into_writer(&Value::Map(filtered), &mut stripped).unwrap();

            let result = AttestationDocument::from_bytes(&wrap_envelope(stripped));
            match result {
                Err(AttestError::MalformedDocument(msg)) => {
                    assert!(msg.contains(dropped), "error should mention {dropped}: {msg}")
                }
                other => panic!("expected MalformedDocument for {dropped}, got {other:?}"),
            }
        }
    }

    #[test]
    fn wrong_field_type_is_malformed() {
        let payload = encode_attestation_doc(
            "i-module",
            "SHA384",
            1,
            &default_pcrs(),
            &[1],
            &[],
            None,
            None,
            None,
        );
        let mut reader: &[u8] = &payload;
        let value: Value = ciborium::de::from_reader(&mut reader).unwrap();
        let Value::Map(mut entries) = value else {
            unreachable!()
        };
        for (k, v) in entries.iter_mut() {
            if matches!(k, Value::Text(s) if s == "certificate") {
                *v = Value::Text("not bytes".into());
            }
        }
        let mut tampered = Vec::new();
        ciborium::ser::into_writer(&Value::Map(entries), &mut tampered).unwrap();

        let result = AttestationDocument::from_bytes(&wrap_envelope(tampered));
        assert!(matches!(result, Err(AttestError::MalformedDocument(_))));
    }

    #[test]
    fn trailing_payload_bytes_are_malformed() {
        let mut payload = default_payload();
        payload.push(0x00);
        let result = AttestationDocument::from_bytes(&wrap_envelope(payload));
        match result {
            Err(AttestError::MalformedDocument(msg)) => {
                assert!(msg.contains("trailing"), "unexpected message: {msg}")
            }
            other => panic!("expected MalformedDocument, got {other:?}"),
        }
    }

    #[test]
    fn zero_timestamp_is_malformed() {
        let payload = encode_attestation_doc(
            "i-module",
            "SHA384",
            0,
            &default_pcrs(),
            &[1],
            &[],
            None,
            None,
            None,
        );
        let result = AttestationDocument::from_bytes(&wrap_envelope(payload));
        assert!(matches!(result, Err(AttestError::MalformedDocument(_))));
    }

    #[test]
    fn unsupported_digest_is_malformed() {
        let payload = encode_attestation_doc(
            "i-module",
            "SHA256",
            1,
            &default_pcrs(),
            &[1],
            &[],
            None,
            None,
            None,
        );
        let result = AttestationDocument::from_bytes(&wrap_envelope(payload));
        assert!(matches!(result, Err(AttestError::MalformedDocument(_))));
    }

    #[test]
    fn oversized_pcr_index_is_malformed() {
        let mut pcrs = default_pcrs();
        pcrs.insert(MAX_PCR_INDEX + 1, vec![0xCC; 48]);
        let payload = encode_attestation_doc(
            "i-module", "SHA384", 1, &pcrs, &[1], &[], None, None, None,
        );
        let result = AttestationDocument::from_bytes(&wrap_envelope(payload));
        assert!(matches!(result, Err(AttestError::MalformedDocument(_))));
    }

    #[test]
    fn bad_pcr_size_is_malformed() {
        let mut pcrs = BTreeMap::new();
        pcrs.insert(0, vec![0xAA; 20]);
        let payload = encode_attestation_doc(
            "i-module", "SHA384", 1, &pcrs, &[1], &[], None, None, None,
        );
        let result = AttestationDocument::from_bytes(&wrap_envelope(payload));
        assert!(matches!(result, Err(AttestError::MalformedDocument(_))));
    }

    #[test]
    fn untagged_envelope_accepted() {
        let protected = HeaderBuilder::new()
            .algorithm(coset::iana::Algorithm::ES384)
            .build();
        let raw = CoseSign1Builder::new()
            .protected(protected)
            .payload(default_payload())
            .signature(vec![0u8; 96])
            .build()
            .to_vec()
            .unwrap();
        assert!(AttestationDocument::from_bytes(&raw).is_ok());
    }
}
