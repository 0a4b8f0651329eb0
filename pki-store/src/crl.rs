//! Certificate revocation lists

use crate::certificate::{normalize_dn, to_utc, Certificate};
use crate::codec::{self, label, DataFormat};
use crate::crypto::CryptoProvider;
use crate::error::{Result, StoreError};
use crate::oid::{DigestAlgorithm, Oid};
use chrono::{DateTime, Utc};
use pki_common::fingerprint::{normalize_serial, serial_hex, sha1_hex};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use x509_parser::prelude::*;

/// One entry of a CRL's revoked list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedCertificate {
    pub serial: String,
    pub revocation_date: DateTime<Utc>,
    /// RFC 5280 CRLReason code, when the entry carries one
    pub reason: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct Crl {
    der: Vec<u8>,
    issuer: String,
    issuer_der: Vec<u8>,
    issuer_friendly_name: String,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
    revoked: BTreeMap<String, RevokedCertificate>,
    crl_number: Option<String>,
    thumbprint: String,
    signature_algorithm: Oid,
    version: u32,
}

impl Crl {
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        let (_, parsed) = CertificateRevocationList::from_der(&der)
            .map_err(|e| StoreError::Malformed(format!("Failed to parse CRL: {e}")))?;

        let mut revoked = BTreeMap::new();
        for entry in parsed.iter_revoked_certificates() {
            let serial = serial_hex(entry.raw_serial());
            revoked.insert(
                serial.clone(),
                RevokedCertificate {
                    serial,
                    revocation_date: to_utc(entry.revocation_date.timestamp())?,
                    reason: entry.reason_code().map(|(_, code)| code.0),
                },
            );
        }

        let next_update = match parsed.next_update() {
            Some(time) => Some(to_utc(time.timestamp())?),
            None => None,
        };

        let issuer_friendly_name = parsed
            .issuer()
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .unwrap_or("No common name")
            .to_string();

        Ok(Self {
            issuer: parsed.issuer().to_string(),
            issuer_der: parsed.issuer().as_raw().to_vec(),
            issuer_friendly_name,
            this_update: to_utc(parsed.last_update().timestamp())?,
            next_update,
            revoked,
            crl_number: parsed
                .crl_number()
                .map(|number| number.to_str_radix(16).to_uppercase()),
            thumbprint: sha1_hex(&der),
            signature_algorithm: Oid::new(&parsed.signature_algorithm.algorithm.to_id_string())?,
            version: parsed.version().map(|v| v.0 + 1).unwrap_or(1),
            der,
        })
    }

    pub fn import(data: &[u8]) -> Result<Self> {
        Self::from_der(codec::decode_any(data, label::CRL)?)
    }

    pub fn export(&self, format: DataFormat) -> Vec<u8> {
        codec::encode(&self.der, format, label::CRL)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_der(codec::read_file(path, label::CRL)?)
    }

    pub fn save(&self, path: &Path, format: DataFormat) -> Result<()> {
        codec::write_file(path, &self.der, format, label::CRL)
    }

    pub fn parsed(&self) -> Result<CertificateRevocationList<'_>> {
        let (_, crl) = CertificateRevocationList::from_der(&self.der)
            .map_err(|e| StoreError::Malformed(format!("Failed to parse CRL: {e}")))?;
        Ok(crl)
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn issuer_name(&self) -> &str {
        &self.issuer
    }

    pub fn issuer_friendly_name(&self) -> &str {
        &self.issuer_friendly_name
    }

    pub fn this_update(&self) -> DateTime<Utc> {
        self.this_update
    }

    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.next_update
    }

    pub fn crl_number(&self) -> Option<&str> {
        self.crl_number.as_deref()
    }

    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn signature_algorithm(&self) -> &Oid {
        &self.signature_algorithm
    }

    /// Revoked entries ordered by serial
    pub fn revoked(&self) -> impl Iterator<Item = &RevokedCertificate> {
        self.revoked.values()
    }

    /// Look up an entry by serial in any common textual form
    pub fn get_revoked(&self, serial: &str) -> Option<&RevokedCertificate> {
        self.revoked.get(&normalize_serial(serial))
    }

    /// Entry for `cert`, when this CRL was issued by `cert`'s issuer
    pub fn get_revoked_for(&self, cert: &Certificate) -> Option<&RevokedCertificate> {
        if !self.covers(cert) {
            return None;
        }
        self.revoked.get(cert.serial_number())
    }

    /// This CRL's issuer is `cert`'s issuer
    pub fn covers(&self, cert: &Certificate) -> bool {
        self.issuer_der == cert.issuer_der()
            || normalize_dn(&self.issuer) == normalize_dn(cert.issuer_name())
    }

    /// This CRL's issuer is `issuer`'s subject
    pub fn issued_by(&self, issuer: &Certificate) -> bool {
        self.issuer_der == issuer.subject_der()
            || normalize_dn(&self.issuer) == normalize_dn(issuer.subject_name())
    }

    /// `thisUpdate <= at` and, when present, `at <= nextUpdate`
    pub fn is_current_at(&self, at: DateTime<Utc>) -> bool {
        self.this_update <= at && self.next_update.map_or(true, |next| at <= next)
    }

    /// Check the CRL signature against the issuer certificate's key
    pub fn verify_signature(&self, issuer: &Certificate, crypto: &dyn CryptoProvider) -> Result<bool> {
        let parsed = self.parsed()?;
        let digest = DigestAlgorithm::from_signature_oid(self.signature_algorithm.value())
            .unwrap_or_default();
        crypto.verify(
            digest,
            parsed.tbs_cert_list.as_ref(),
            &parsed.signature_value.data,
            issuer.public_key_der(),
        )
    }

    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    pub fn compare(&self, other: &Self) -> Ordering {
        self.der
            .cmp(&other.der)
            .then_with(|| self.thumbprint.cmp(&other.thumbprint))
    }

    pub fn equals(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl PartialEq for Crl {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for Crl {}
