use coset::CoseSign1;
use p384::ecdsa::signature::Verifier as _;
use p384::ecdsa::{Signature, VerifyingKey};
use x509_cert::der::asn1::ObjectIdentifier;
use x509_cert::der::{Decode, DecodePem, Encode};
use x509_cert::ext::pkix::BasicConstraints;
use x509_cert::time::Time;
use x509_cert::Certificate;

use super::document::{self, AttestationDocument};
use crate::error::AttestError;

/// Bundled AWS Nitro Enclaves root CA certificate (PEM).
const AWS_NITRO_ROOT_CA_PEM: &[u8] = include_bytes!("aws_nitro_root_ca.pem");

/// Upper bound on issuer→subject hops from leaf to root.
///
/// Real Nitro chains carry four CA certificates; the bound caps the walk
/// over adversarial bundles.
pub const MAX_CHAIN_DEPTH: usize = 8;

const BASIC_CONSTRAINTS_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.19");

/// Verifies signed attestation documents against a pinned trust anchor.
///
/// The trust anchor is an explicit, immutable configuration value; tests
/// construct verifiers over synthetic certificate hierarchies via
/// [`Verifier::from_root_pem`].
pub struct Verifier {
    root: Certificate,
}

impl Verifier {
    /// Verifier pinned to the bundled AWS Nitro Enclaves root CA.
    pub fn aws_nitro() -> Result<Self, AttestError> {
        Self::from_root_pem(AWS_NITRO_ROOT_CA_PEM)
    }

    /// Verifier pinned to a caller-supplied PEM root certificate.
    pub fn from_root_pem(pem: &[u8]) -> Result<Self, AttestError> {
        let root = Certificate::from_pem(pem).map_err(|e| {
            AttestError::InvalidChain(format!("failed to parse trusted root PEM: {e}"))
        })?;
        Ok(Self { root })
    }

    /// Verifier pinned to a caller-supplied DER root certificate.
    pub fn from_root_der(der: &[u8]) -> Result<Self, AttestError> {
        let root = Certificate::from_der(der).map_err(|e| {
            AttestError::InvalidChain(format!("failed to parse trusted root DER: {e}"))
        })?;
        Ok(Self { root })
    }

    /// Verify a signed attestation document.
    ///
    /// Each step is a hard gate; the first failure aborts with its error
    /// kind and no partially-verified document is ever returned:
    ///
    /// 1. structural decode;
    /// 2. certificate chain built from the leaf and the (unordered)
    ///    cabundle, terminating at the pinned root;
    /// 3. every chain certificate valid at `reference_time_ms`;
    /// 4. basic-constraints consistent with chain position, and each
    ///    certificate's signature valid under its issuer's key;
    /// 5. envelope signature over the exact payload bytes, using the leaf
    ///    key and the declared algorithm.
    ///
    /// The returned document's fields are trustworthy only after this
    /// function succeeds.
    pub fn verify(
        &self,
        raw: &[u8],
        reference_time_ms: u64,
    ) -> Result<AttestationDocument, AttestError> {
        let sign1 = document::decode_envelope(raw)?;
        let payload = sign1
            .payload
            .as_ref()
            .ok_or_else(|| AttestError::MalformedDocument("envelope payload is absent".into()))?;
        let doc = document::parse_payload(payload)?;

        let chain = build_chain(&doc.certificate, &doc.cabundle, &self.root)?;
        check_validity_windows(&chain, &self.root, reference_time_ms)?;
        check_constraints_and_signatures(&chain, &self.root)?;
        verify_envelope_signature(&sign1, &chain[0])?;

        tracing::debug!(
            module_id = %doc.module_id,
            chain_len = chain.len(),
            pcr_count = doc.pcrs.len(),
            "attestation document verified"
        );

        Ok(doc)
    }

    /// Verify using the document's own issuance timestamp as the reference
    /// time, keeping verification deterministic and replayable.
    pub fn verify_at_document_time(&self, raw: &[u8]) -> Result<AttestationDocument, AttestError> {
        let timestamp = AttestationDocument::from_bytes(raw)?.timestamp;
        self.verify(raw, timestamp)
    }
}

/// Order the leaf and cabundle certificates into a chain ending just below
/// the trusted root.
///
/// The bundle's array order is untrusted; candidates are selected purely by
/// subject/issuer name matching, each used at most once, with the walk
/// bounded by [`MAX_CHAIN_DEPTH`].
fn build_chain(
    leaf_der: &[u8],
    cabundle: &[Vec<u8>],
    root: &Certificate,
) -> Result<Vec<Certificate>, AttestError> {
    let leaf = Certificate::from_der(leaf_der)
        .map_err(|e| AttestError::MalformedDocument(format!("leaf certificate: {e}")))?;

    let mut candidates = Vec::with_capacity(cabundle.len());
    for (i, der) in cabundle.iter().enumerate() {
        let cert = Certificate::from_der(der)
            .map_err(|e| AttestError::MalformedDocument(format!("cabundle[{i}]: {e}")))?;
        candidates.push(cert);
    }

    let root_subject = &root.tbs_certificate.subject;
    let mut used = vec![false; candidates.len()];
    let mut chain = vec![leaf];

    loop {
        let issuer = chain
            .last()
            .expect("chain is never empty")
            .tbs_certificate
            .issuer
            .clone();
        if issuer == *root_subject {
            return Ok(chain);
        }
        if chain.len() >= MAX_CHAIN_DEPTH {
            return Err(AttestError::UntrustedChain(format!(
                "no path to trusted root within {MAX_CHAIN_DEPTH} certificates"
            )));
        }
        let next = candidates
            .iter()
            .enumerate()
            .position(|(i, c)| !used[i] && c.tbs_certificate.subject == issuer);
        match next {
            Some(i) => {
                used[i] = true;
                chain.push(candidates[i].clone());
            }
            None => {
                return Err(AttestError::UntrustedChain(format!(
                    "no issuer certificate found for '{issuer}'"
                )))
            }
        }
    }
}

fn validity_window_secs(cert: &Certificate) -> (u64, u64) {
    let to_secs = |t: &Time| match t {
        Time::UtcTime(t) => t.to_unix_duration().as_secs(),
        Time::GeneralTime(t) => t.to_unix_duration().as_secs(),
    };
    let validity = &cert.tbs_certificate.validity;
    (
        to_secs(&validity.not_before),
        to_secs(&validity.not_after),
    )
}

/// Every certificate in the chain, and the root itself, must be valid at the
/// reference time. The reference time is the document's issuance timestamp,
/// not wall-clock.
fn check_validity_windows(
    chain: &[Certificate],
    root: &Certificate,
    reference_time_ms: u64,
) -> Result<(), AttestError> {
    let reference_secs = reference_time_ms / 1000;
    for cert in chain.iter().chain(std::iter::once(root)) {
        let (not_before, not_after) = validity_window_secs(cert);
        if reference_secs < not_before || reference_secs > not_after {
            return Err(AttestError::ExpiredCertificate);
        }
    }
    Ok(())
}

fn is_ca(cert: &Certificate) -> Result<bool, AttestError> {
    let Some(extensions) = &cert.tbs_certificate.extensions else {
        return Ok(false);
    };
    for ext in extensions {
        if ext.extn_id == BASIC_CONSTRAINTS_OID {
            let bc = BasicConstraints::from_der(ext.extn_value.as_bytes())
                .map_err(|e| AttestError::InvalidChain(format!("basic constraints: {e}")))?;
            return Ok(bc.ca);
        }
    }
    Ok(false)
}

/// The leaf must not be a CA; intermediates and the root must be. Each
/// non-root certificate's signature must verify under its issuer's key.
fn check_constraints_and_signatures(
    chain: &[Certificate],
    root: &Certificate,
) -> Result<(), AttestError> {
    if is_ca(&chain[0])? {
        return Err(AttestError::InvalidChain(
            "leaf certificate is marked as a CA".into(),
        ));
    }
    for (i, cert) in chain.iter().enumerate().skip(1) {
        if !is_ca(cert)? {
            return Err(AttestError::InvalidChain(format!(
                "intermediate certificate {i} is not marked as a CA"
            )));
        }
    }
    if !is_ca(root)? {
        return Err(AttestError::InvalidChain(
            "trusted root is not marked as a CA".into(),
        ));
    }

    for (i, cert) in chain.iter().enumerate() {
        let issuer = chain.get(i + 1).unwrap_or(root);
        verify_cert_signature(cert, issuer)?;
    }
    Ok(())
}

/// Verify `subject`'s ECDSA P-384 signature under `issuer`'s public key.
fn verify_cert_signature(subject: &Certificate, issuer: &Certificate) -> Result<(), AttestError> {
    let issuer_spki = issuer
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| AttestError::InvalidChain("issuer public key is not byte-aligned".into()))?;
    let verifying_key = VerifyingKey::from_sec1_bytes(issuer_spki)
        .map_err(|_| AttestError::InvalidChain("issuer public key is not P-384".into()))?;

    let signature_bytes = subject
        .signature
        .as_bytes()
        .ok_or_else(|| AttestError::InvalidChain("certificate signature is not byte-aligned".into()))?;
    let signature = Signature::from_der(signature_bytes)
        .map_err(|_| AttestError::InvalidChain("certificate signature is not DER ECDSA".into()))?;

    let tbs = subject
        .tbs_certificate
        .to_der()
        .map_err(|e| AttestError::InvalidChain(format!("re-encoding TBS certificate: {e}")))?;

    verifying_key
        .verify(&tbs, &signature)
        .map_err(|_| AttestError::InvalidChain("certificate signature verification failed".into()))
}

/// Verify the COSE_Sign1 signature over the exact payload bytes using the
/// leaf certificate's key. The declared algorithm must be ES384; the
/// signature is the raw 96-byte `r || s` form.
fn verify_envelope_signature(sign1: &CoseSign1, leaf: &Certificate) -> Result<(), AttestError> {
    let es384 = matches!(
        sign1.protected.header.alg,
        Some(coset::RegisteredLabelWithPrivate::Assigned(
            coset::iana::Algorithm::ES384
        ))
    );
    if !es384 {
        return Err(AttestError::InvalidSignature);
    }

    let leaf_spki = leaf
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .as_bytes()
        .ok_or(AttestError::InvalidSignature)?;
    let verifying_key =
        VerifyingKey::from_sec1_bytes(leaf_spki).map_err(|_| AttestError::InvalidSignature)?;

    if sign1.signature.len() != 96 {
        return Err(AttestError::InvalidSignature);
    }
    let signature =
        Signature::from_slice(&sign1.signature).map_err(|_| AttestError::InvalidSignature)?;

    let tbs = sign1.tbs_data(b"");
    verifying_key
        .verify(&tbs, &signature)
        .map_err(|_| AttestError::InvalidSignature)
}
