//! Synthetic certificate hierarchy and attestation document builders shared
//! by the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use enclave_keysync::attestation::document::encode_attestation_doc;
use enclave_keysync::{AttestError, AttestationProvider};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Builder, X509NameBuilder, X509};

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

fn p384_key() -> EcKey<Private> {
    let group = EcGroup::from_curve_name(Nid::SECP384R1).unwrap();
    EcKey::generate(&group).unwrap()
}

fn name(cn: &str) -> openssl::x509::X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder.append_entry_by_text("CN", cn).unwrap();
    builder.build()
}

fn base_builder(cn: &str, serial: u32, days: u32) -> X509Builder {
    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = Asn1Integer::from_bn(&BigNum::from_u32(serial).unwrap()).unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name(cn)).unwrap();

    let not_before = Asn1Time::days_from_now(0).unwrap();
    let not_after = Asn1Time::days_from_now(days).unwrap();
    builder.set_not_before(&not_before).unwrap();
    builder.set_not_after(&not_after).unwrap();
    builder
}

/// Generate a self-signed P-384 CA certificate.
pub fn generate_ca(cn: &str) -> (EcKey<Private>, X509) {
    let ec_key = p384_key();
    let pkey = PKey::from_ec_key(ec_key.clone()).unwrap();

    let mut builder = base_builder(cn, 1, 3650);
    builder.set_issuer_name(&name(cn)).unwrap();
    builder.set_pubkey(&pkey).unwrap();

    let bc = BasicConstraints::new().critical().ca().build().unwrap();
    builder.append_extension(bc).unwrap();
    let ku = KeyUsage::new()
        .critical()
        .key_cert_sign()
        .crl_sign()
        .build()
        .unwrap();
    builder.append_extension(ku).unwrap();

    builder.sign(&pkey, MessageDigest::sha384()).unwrap();
    (ec_key, builder.build())
}

/// Generate an intermediate CA certificate signed by `parent`.
pub fn generate_intermediate(
    cn: &str,
    parent_key: &EcKey<Private>,
    parent_cert: &X509,
) -> (EcKey<Private>, X509) {
    let ec_key = p384_key();
    let pkey = PKey::from_ec_key(ec_key.clone()).unwrap();
    let parent_pkey = PKey::from_ec_key(parent_key.clone()).unwrap();

    let mut builder = base_builder(cn, 2, 3650);
    builder.set_issuer_name(parent_cert.subject_name()).unwrap();
    builder.set_pubkey(&pkey).unwrap();

    let bc = BasicConstraints::new().critical().ca().build().unwrap();
    builder.append_extension(bc).unwrap();
    let ku = KeyUsage::new()
        .critical()
        .key_cert_sign()
        .crl_sign()
        .build()
        .unwrap();
    builder.append_extension(ku).unwrap();

    builder.sign(&parent_pkey, MessageDigest::sha384()).unwrap();
    (ec_key, builder.build())
}

/// Generate a leaf certificate signed by `parent`. `ca` marks the leaf as a
/// CA, which a correct verifier must reject.
pub fn generate_leaf(
    cn: &str,
    parent_key: &EcKey<Private>,
    parent_cert: &X509,
    ca: bool,
) -> (EcKey<Private>, X509) {
    let ec_key = p384_key();
    let pkey = PKey::from_ec_key(ec_key.clone()).unwrap();
    let parent_pkey = PKey::from_ec_key(parent_key.clone()).unwrap();

    let mut builder = base_builder(cn, 3, 3650);
    builder.set_issuer_name(parent_cert.subject_name()).unwrap();
    builder.set_pubkey(&pkey).unwrap();

    if ca {
        let bc = BasicConstraints::new().critical().ca().build().unwrap();
        builder.append_extension(bc).unwrap();
    }
    let ku = KeyUsage::new()
        .critical()
        .digital_signature()
        .build()
        .unwrap();
    builder.append_extension(ku).unwrap();

    builder.sign(&parent_pkey, MessageDigest::sha384()).unwrap();
    (ec_key, builder.build())
}

/// Sign a CBOR payload as COSE_Sign1 with an EC P-384 key. Returns tagged
/// CBOR bytes (COSE tag 18) with the raw 96-byte `r || s` signature.
pub fn sign_cose_es384(ec_key: &EcKey<Private>, payload: &[u8]) -> Vec<u8> {
    use coset::{CoseSign1Builder, HeaderBuilder, TaggedCborSerializable};

    let protected = HeaderBuilder::new()
        .algorithm(coset::iana::Algorithm::ES384)
        .build();

    let cose = CoseSign1Builder::new()
        .protected(protected)
        .payload(payload.to_vec())
        .create_signature(b"", |tbs| {
            let hash =
                openssl::hash::hash(MessageDigest::sha384(), tbs).expect("SHA-384 hash failed");
            let sig = EcdsaSig::sign(&hash, ec_key).expect("ECDSA sign failed");
            let r = sig.r().to_vec_padded(48).expect("r padding failed");
            let s = sig.s().to_vec_padded(48).expect("s padding failed");
            let mut raw_sig = Vec::with_capacity(96);
            raw_sig.extend_from_slice(&r);
            raw_sig.extend_from_slice(&s);
            raw_sig
        })
        .build();

    cose.to_tagged_vec().expect("COSE_Sign1 serialization failed")
}

pub fn default_pcrs() -> BTreeMap<usize, Vec<u8>> {
    let mut pcrs = BTreeMap::new();
    pcrs.insert(0, vec![0xAA; 48]);
    pcrs.insert(1, vec![0xBB; 48]);
    pcrs.insert(2, vec![0xCC; 48]);
    pcrs
}

/// A complete synthetic hierarchy: pinned root, one intermediate, and a
/// document-signing leaf.
pub struct TestHierarchy {
    pub root_cert: X509,
    pub intermediate_cert: X509,
    pub leaf_key: EcKey<Private>,
    pub leaf_cert: X509,
}

impl TestHierarchy {
    pub fn generate() -> Self {
        Self::generate_named("Test Hypervisor")
    }

    /// Distinct name prefixes keep unrelated hierarchies from colliding in
    /// the verifier's subject/issuer walk.
    pub fn generate_named(prefix: &str) -> Self {
        let (root_key, root_cert) = generate_ca(&format!("{prefix} Root CA"));
        let (intermediate_key, intermediate_cert) =
            generate_intermediate(&format!("{prefix} Zonal CA"), &root_key, &root_cert);
        let (leaf_key, leaf_cert) =
            generate_leaf(&format!("{prefix} Enclave Leaf"), &intermediate_key, &intermediate_cert, false);
        Self {
            root_cert,
            intermediate_cert,
            leaf_key,
            leaf_cert,
        }
    }

    pub fn root_pem(&self) -> Vec<u8> {
        self.root_cert.to_pem().unwrap()
    }

    /// Certificates for the document's `cabundle` field, deliberately NOT in
    /// chain order: verifiers must order them by issuer/subject matching.
    pub fn cabundle(&self) -> Vec<Vec<u8>> {
        vec![
            self.intermediate_cert.to_der().unwrap(),
            self.root_cert.to_der().unwrap(),
        ]
    }

    /// Build a signed attestation document with the given caller fields.
    pub fn signed_document(
        &self,
        module_id: &str,
        timestamp: u64,
        pcrs: &BTreeMap<usize, Vec<u8>>,
        public_key: Option<&[u8]>,
        user_data: Option<&[u8]>,
        nonce: Option<&[u8]>,
    ) -> Vec<u8> {
        let payload = encode_attestation_doc(
            module_id,
            "SHA384",
            timestamp,
            pcrs,
            &self.leaf_cert.to_der().unwrap(),
            &self.cabundle(),
            public_key,
            user_data,
            nonce,
        );
        sign_cose_es384(&self.leaf_key, &payload)
    }
}

/// Attestation provider issuing documents signed by a [`TestHierarchy`],
/// standing in for the hypervisor in end-to-end tests.
pub struct TestProvider {
    pub module_id: String,
    pub pcrs: BTreeMap<usize, Vec<u8>>,
    leaf_key: EcKey<Private>,
    leaf_der: Vec<u8>,
    cabundle: Vec<Vec<u8>>,
}

impl TestProvider {
    pub fn new(hierarchy: &TestHierarchy, module_id: &str, pcrs: BTreeMap<usize, Vec<u8>>) -> Self {
        Self {
            module_id: module_id.to_string(),
            pcrs,
            leaf_key: hierarchy.leaf_key.clone(),
            leaf_der: hierarchy.leaf_cert.to_der().unwrap(),
            cabundle: hierarchy.cabundle(),
        }
    }
}

impl AttestationProvider for TestProvider {
    fn attest(
        &self,
        user_data: Option<&[u8]>,
        nonce: Option<&[u8]>,
        public_key: Option<&[u8]>,
    ) -> Result<Vec<u8>, AttestError> {
        let payload = encode_attestation_doc(
            &self.module_id,
            "SHA384",
            now_ms(),
            &self.pcrs,
            &self.leaf_der,
            &self.cabundle,
            public_key,
            user_data,
            nonce,
        );
        Ok(sign_cose_es384(&self.leaf_key, &payload))
    }
}
