#![allow(dead_code)]

use async_trait::async_trait;
use pki_common::{Component, Logger};
use pki_store::{Certificate, Crl, HttpFetcher, Key, StoreError};
use rcgen::{
    date_time_ymd, BasicConstraints, CertificateParams, CertificateRevocationList,
    CertificateRevocationListParams, CrlDistributionPoint, DistinguishedName, DnType, IsCa, KeyIdMethod,
    KeyUsagePurpose, RevocationReason, RevokedCertParams, SerialNumber, PKCS_ECDSA_P256_SHA256,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const CRL_URL: &str = "http://crl.test.invalid/intermediate.crl";
pub const BACKUP_CRL_URL: &str = "http://backup.test.invalid/intermediate.crl";
pub const LEAF_SERIAL: u64 = 0x1001;

pub fn test_logger() -> Logger {
    Logger::new_root(Component::Store, "test")
}

/// A three-level ECDSA P-256 hierarchy plus CRLs from the intermediate.
///
/// Every rcgen certificate is serialized exactly once: ECDSA signatures are
/// randomized, so a second serialization would produce a different DER.
pub struct TestPki {
    pub root: Certificate,
    pub intermediate: Certificate,
    pub leaf: Certificate,
    pub leaf_key: Key,
    pub intermediate_key: Key,
    /// Issued by the intermediate, lists nothing
    pub crl_empty: Crl,
    /// Issued by the intermediate, revokes the leaf
    pub crl_revoking_leaf: Crl,
    /// Issued by the intermediate, nextUpdate in the past
    pub crl_stale: Crl,
    /// Issued by the root, covers the intermediate only
    pub crl_from_root: Crl,
    /// Leaf signed by the intermediate but expired
    pub expired_leaf: Certificate,
    /// Leaf whose issuer is not in the hierarchy
    pub orphan: Certificate,
}

fn name(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn.push(DnType::OrganizationName, "Test PKI");
    dn
}

pub fn ca_params(cn: &str, serial: u64) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::new());
    params.alg = &PKCS_ECDSA_P256_SHA256;
    params.distinguished_name = name(cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_before = date_time_ymd(2020, 1, 1);
    params.not_after = date_time_ymd(2045, 1, 1);
    params.serial_number = Some(SerialNumber::from(serial));
    params
}

fn leaf_params(cn: &str, serial: u64) -> CertificateParams {
    let mut params = CertificateParams::new(vec![format!("{}.test.invalid", cn.to_lowercase())]);
    params.alg = &PKCS_ECDSA_P256_SHA256;
    params.distinguished_name = name(cn);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.not_before = date_time_ymd(2020, 1, 1);
    params.not_after = date_time_ymd(2040, 1, 1);
    params.serial_number = Some(SerialNumber::from(serial));
    params
}

fn crl(
    issuer: &rcgen::Certificate,
    number: u64,
    next_update_year: i32,
    revoked: Vec<RevokedCertParams>,
) -> Crl {
    let params = CertificateRevocationListParams {
        this_update: date_time_ymd(2024, 1, 1),
        next_update: date_time_ymd(next_update_year, 1, 1),
        crl_number: SerialNumber::from(number),
        issuing_distribution_point: None,
        revoked_certs: revoked,
        alg: &PKCS_ECDSA_P256_SHA256,
        key_identifier_method: KeyIdMethod::Sha256,
    };
    let list = CertificateRevocationList::from_params(params).expect("crl params");
    let der = list.serialize_der_with_signer(issuer).expect("sign crl");
    Crl::from_der(der).expect("parse crl")
}

pub fn build_pki() -> TestPki {
    let root = rcgen::Certificate::from_params(ca_params("Test Root", 1)).expect("root");
    let intermediate =
        rcgen::Certificate::from_params(ca_params("Test Intermediate", 2)).expect("intermediate");

    let mut params = leaf_params("Leaf", LEAF_SERIAL);
    params.crl_distribution_points = vec![CrlDistributionPoint {
        uris: vec![CRL_URL.to_string(), BACKUP_CRL_URL.to_string()],
    }];
    let leaf = rcgen::Certificate::from_params(params).expect("leaf");

    let mut params = leaf_params("Expired", 0x1002);
    params.not_before = date_time_ymd(2019, 1, 1);
    params.not_after = date_time_ymd(2020, 1, 1);
    let expired = rcgen::Certificate::from_params(params).expect("expired");

    let stranger = rcgen::Certificate::from_params(ca_params("Unrelated CA", 9)).expect("stranger");
    let orphan = rcgen::Certificate::from_params(leaf_params("Orphan", 0x2001)).expect("orphan");

    let root_der = root.serialize_der().expect("serialize root");
    let intermediate_der = intermediate
        .serialize_der_with_signer(&root)
        .expect("serialize intermediate");
    let leaf_der = leaf
        .serialize_der_with_signer(&intermediate)
        .expect("serialize leaf");
    let expired_der = expired
        .serialize_der_with_signer(&intermediate)
        .expect("serialize expired");
    let orphan_der = orphan
        .serialize_der_with_signer(&stranger)
        .expect("serialize orphan");

    let revoked_leaf = RevokedCertParams {
        serial_number: SerialNumber::from(LEAF_SERIAL),
        revocation_time: date_time_ymd(2024, 1, 1),
        reason_code: Some(RevocationReason::KeyCompromise),
        invalidity_date: None,
    };

    TestPki {
        root: Certificate::from_der(root_der).expect("parse root"),
        intermediate: Certificate::from_der(intermediate_der).expect("parse intermediate"),
        leaf: Certificate::from_der(leaf_der).expect("parse leaf"),
        leaf_key: Key::from_private_der(&leaf.serialize_private_key_der()).expect("leaf key"),
        intermediate_key: Key::from_private_der(&intermediate.serialize_private_key_der())
            .expect("intermediate key"),
        crl_empty: crl(&intermediate, 1, 2099, Vec::new()),
        crl_revoking_leaf: crl(&intermediate, 2, 2099, vec![revoked_leaf]),
        crl_stale: crl(&intermediate, 3, 2025, Vec::new()),
        crl_from_root: crl(&root, 4, 2099, Vec::new()),
        expired_leaf: Certificate::from_der(expired_der).expect("parse expired"),
        orphan: Certificate::from_der(orphan_der).expect("parse orphan"),
    }
}

#[derive(Clone)]
pub enum Reply {
    Body(Vec<u8>),
    Fail,
    Hang,
}

/// Canned responses per uri, recording every request
#[derive(Default)]
pub struct MockFetcher {
    replies: HashMap<String, Reply>,
    requests: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn reply(mut self, uri: &str, reply: Reply) -> Self {
        self.replies.insert(uri.to_string(), reply);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests").clone()
    }
}

#[async_trait]
impl HttpFetcher for MockFetcher {
    async fn fetch(&self, uri: &str) -> pki_store::Result<Vec<u8>> {
        self.requests.lock().expect("requests").push(uri.to_string());
        match self.replies.get(uri).cloned() {
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(StoreError::Timeout(uri.to_string()))
            }
            Some(Reply::Fail) | None => Err(StoreError::Unreachable(uri.to_string())),
        }
    }
}
