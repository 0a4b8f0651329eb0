//! X.509 certificates
//!
//! A [`Certificate`] is parsed once when loaded; the DER body is kept verbatim
//! and the metadata the catalogue, chain builder and revocation resolver need
//! is extracted into owned fields. Use [`Certificate::parsed`] for anything
//! else.

use crate::codec::{self, label, DataFormat};
use crate::crypto::CryptoProvider;
use crate::error::{Result, StoreError};
use crate::key::Key;
use crate::oid::{DigestAlgorithm, KeyAlgorithm, Oid};
use chrono::{DateTime, Utc};
use pki_common::fingerprint::{serial_hex, sha1_hex};
use std::cmp::Ordering;
use std::path::Path;
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::prelude::*;

const NO_COMMON_NAME: &str = "No common name";
const OID_AD_OCSP: &str = "1.3.6.1.5.5.7.48.1";
const OID_AD_CA_ISSUERS: &str = "1.3.6.1.5.5.7.48.2";

/// Parsed X.509 certificate
#[derive(Debug, Clone)]
pub struct Certificate {
    der: Vec<u8>,
    subject: String,
    issuer: String,
    subject_der: Vec<u8>,
    issuer_der: Vec<u8>,
    subject_friendly_name: String,
    issuer_friendly_name: String,
    organization: Option<String>,
    serial: String,
    raw_serial: Vec<u8>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    thumbprint: String,
    key_thumbprint: String,
    key_usage: Option<u16>,
    signature_algorithm: Oid,
    public_key_algorithm: KeyAlgorithm,
    version: u32,
    is_ca: bool,
    public_key: Vec<u8>,
    crl_dist_points: Vec<String>,
    ocsp_urls: Vec<String>,
    ca_issuers_urls: Vec<String>,
}

impl Certificate {
    /// Parse a DER certificate
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        let (_, parsed) = X509Certificate::from_der(&der)
            .map_err(|e| StoreError::Malformed(format!("Failed to parse certificate: {e}")))?;

        let validity = parsed.validity();
        let not_before = to_utc(validity.not_before.timestamp())?;
        let not_after = to_utc(validity.not_after.timestamp())?;

        let key_usage = parsed
            .key_usage()
            .map_err(|e| StoreError::Malformed(format!("Invalid keyUsage: {e}")))?
            .map(|ext| ext.value.flags);
        let is_ca = parsed
            .basic_constraints()
            .map_err(|e| StoreError::Malformed(format!("Invalid basicConstraints: {e}")))?
            .map(|ext| ext.value.ca)
            .unwrap_or(false);

        let mut crl_dist_points = Vec::new();
        let mut ocsp_urls = Vec::new();
        let mut ca_issuers_urls = Vec::new();
        for ext in parsed.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::CRLDistributionPoints(cdp) => {
                    for point in cdp.points.iter() {
                        if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                            for name in names {
                                if let GeneralName::URI(uri) = name {
                                    crl_dist_points.push(uri.to_string());
                                }
                            }
                        }
                    }
                }
                ParsedExtension::AuthorityInfoAccess(aia) => {
                    for desc in &aia.accessdescs {
                        if let GeneralName::URI(uri) = &desc.access_location {
                            match desc.access_method.to_id_string().as_str() {
                                OID_AD_OCSP => ocsp_urls.push(uri.to_string()),
                                OID_AD_CA_ISSUERS => ca_issuers_urls.push(uri.to_string()),
                                _ => {}
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        let spki = parsed.public_key();
        let signature_algorithm = Oid::new(&parsed.signature_algorithm.algorithm.to_id_string())?;
        let organization = parsed
            .subject()
            .iter_organization()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .map(str::to_string);

        Ok(Self {
            subject: parsed.subject().to_string(),
            issuer: parsed.issuer().to_string(),
            subject_der: parsed.subject().as_raw().to_vec(),
            issuer_der: parsed.issuer().as_raw().to_vec(),
            subject_friendly_name: common_name(parsed.subject()),
            issuer_friendly_name: common_name(parsed.issuer()),
            organization,
            serial: serial_hex(parsed.raw_serial()),
            raw_serial: parsed.raw_serial().to_vec(),
            not_before,
            not_after,
            thumbprint: sha1_hex(&der),
            key_thumbprint: sha1_hex(&spki.subject_public_key.data),
            key_usage,
            signature_algorithm,
            public_key_algorithm: KeyAlgorithm::from_oid(&spki.algorithm.algorithm.to_id_string()),
            version: parsed.version().0 + 1,
            is_ca,
            public_key: spki.raw.to_vec(),
            crl_dist_points,
            ocsp_urls,
            ca_issuers_urls,
            der,
        })
    }

    /// Parse DER or PEM
    pub fn import(data: &[u8]) -> Result<Self> {
        Self::from_der(codec::decode_any(data, label::CERTIFICATE)?)
    }

    pub fn export(&self, format: DataFormat) -> Vec<u8> {
        codec::encode(&self.der, format, label::CERTIFICATE)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_der(codec::read_file(path, label::CERTIFICATE)?)
    }

    pub fn save(&self, path: &Path, format: DataFormat) -> Result<()> {
        codec::write_file(path, &self.der, format, label::CERTIFICATE)
    }

    /// Re-parse the DER body
    pub fn parsed(&self) -> Result<X509Certificate<'_>> {
        let (_, cert) = X509Certificate::from_der(&self.der)
            .map_err(|e| StoreError::Malformed(format!("Failed to parse certificate: {e}")))?;
        Ok(cert)
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject_name(&self) -> &str {
        &self.subject
    }

    pub fn issuer_name(&self) -> &str {
        &self.issuer
    }

    pub(crate) fn subject_der(&self) -> &[u8] {
        &self.subject_der
    }

    pub(crate) fn issuer_der(&self) -> &[u8] {
        &self.issuer_der
    }

    pub fn subject_friendly_name(&self) -> &str {
        &self.subject_friendly_name
    }

    pub fn issuer_friendly_name(&self) -> &str {
        &self.issuer_friendly_name
    }

    pub fn organization_name(&self) -> Option<&str> {
        self.organization.as_deref()
    }

    /// Serial number as uppercase hex
    pub fn serial_number(&self) -> &str {
        &self.serial
    }

    pub(crate) fn raw_serial(&self) -> &[u8] {
        &self.raw_serial
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// SHA-1 of the DER body, lowercase hex
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// SHA-1 of the subject public key bits; equals the paired key's thumbprint
    pub fn key_thumbprint(&self) -> &str {
        &self.key_thumbprint
    }

    pub fn key_usage(&self) -> Option<u16> {
        self.key_usage
    }

    pub fn signature_algorithm(&self) -> &Oid {
        &self.signature_algorithm
    }

    /// Digest named by the signature algorithm, if any
    pub fn signature_digest(&self) -> Option<DigestAlgorithm> {
        DigestAlgorithm::from_signature_oid(self.signature_algorithm.value())
    }

    pub fn public_key_algorithm(&self) -> KeyAlgorithm {
        self.public_key_algorithm
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// SubjectPublicKeyInfo DER
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key
    }

    pub fn public_key(&self) -> Result<Key> {
        Key::from_public_der(&self.public_key)
    }

    pub fn crl_dist_points(&self) -> &[String] {
        &self.crl_dist_points
    }

    pub fn ocsp_urls(&self) -> &[String] {
        &self.ocsp_urls
    }

    pub fn ca_issuers_urls(&self) -> &[String] {
        &self.ca_issuers_urls
    }

    /// Digest of the DER body
    pub fn hash(&self, crypto: &dyn CryptoProvider, algorithm: DigestAlgorithm) -> Result<String> {
        Ok(hex::encode(crypto.digest(algorithm, &self.der)?))
    }

    /// `notBefore <= at <= notAfter`
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    /// Subject and issuer names match
    pub fn is_self_issued(&self) -> bool {
        self.subject_der == self.issuer_der
            || normalize_dn(&self.subject) == normalize_dn(&self.issuer)
    }

    /// Self-issued and the signature verifies with the certificate's own key
    pub fn is_self_signed(&self, crypto: &dyn CryptoProvider) -> Result<bool> {
        if !self.is_self_issued() {
            return Ok(false);
        }
        self.verify_signed_by(self, crypto)
    }

    /// Check this certificate's signature against `issuer`'s public key
    pub fn verify_signed_by(&self, issuer: &Certificate, crypto: &dyn CryptoProvider) -> Result<bool> {
        let parsed = self.parsed()?;
        let digest = self.signature_digest().unwrap_or_default();
        crypto.verify(
            digest,
            parsed.tbs_certificate.as_ref(),
            &parsed.signature_value.data,
            issuer.public_key_der(),
        )
    }

    /// `issuer` names the subject this certificate was issued by
    pub fn issued_by(&self, issuer: &Certificate) -> bool {
        self.issuer_der == issuer.subject_der
            || normalize_dn(&self.issuer) == normalize_dn(&issuer.subject)
    }

    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Byte-exact order of the DER body, then thumbprint
    pub fn compare(&self, other: &Self) -> Ordering {
        self.der
            .cmp(&other.der)
            .then_with(|| self.thumbprint.cmp(&other.thumbprint))
    }

    pub fn equals(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for Certificate {}

impl PartialOrd for Certificate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for Certificate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

/// Normalize DN string to handle component order and spacing differences
pub fn normalize_dn(dn: &str) -> String {
    let mut components: Vec<String> = dn
        .split(',')
        .map(|component| component.trim())
        .filter(|component| !component.is_empty())
        .map(|component| match component.split_once('=') {
            Some((attr, value)) => format!("{}={}", attr.trim().to_uppercase(), value.trim()),
            None => component.to_string(),
        })
        .collect();
    components.sort();
    components.join(",")
}

fn common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| NO_COMMON_NAME.to_string())
}

pub(crate) fn to_utc(timestamp: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| StoreError::Malformed(format!("Timestamp out of range: {timestamp}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_dn_ignores_order_and_spacing() {
        assert_eq!(
            normalize_dn("CN=Leaf, O=Acme"),
            normalize_dn("o=Acme,CN=Leaf")
        );
        assert_ne!(normalize_dn("CN=Leaf"), normalize_dn("CN=Other"));
    }

    #[test]
    fn test_self_signed_metadata() {
        let mut params = rcgen::CertificateParams::new(vec!["example.org".to_string()]);
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "Example Root");
        params
            .distinguished_name
            .push(rcgen::DnType::OrganizationName, "Example Org");
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.serial_number = Some(rcgen::SerialNumber::from(0x1a2u64));
        let generated = rcgen::Certificate::from_params(params).unwrap();
        let der = generated.serialize_der().unwrap();

        let cert = Certificate::from_der(der.clone()).unwrap();
        assert_eq!(cert.subject_friendly_name(), "Example Root");
        assert_eq!(cert.organization_name(), Some("Example Org"));
        assert_eq!(cert.serial_number(), "01A2");
        assert_eq!(cert.version(), 3);
        assert!(cert.is_ca());
        assert!(cert.is_self_issued());
        assert!(cert
            .is_self_signed(&crate::crypto::OpenSslCrypto::new())
            .unwrap());
        assert_eq!(
            cert.key_thumbprint(),
            crate::key::key_thumbprint(cert.public_key_der()).unwrap()
        );

        let copy = cert.duplicate();
        assert_eq!(copy, cert);
        assert_eq!(copy.der(), der.as_slice());
    }

    #[test]
    fn test_missing_common_name_fallback() {
        let mut params = rcgen::CertificateParams::new(vec![]);
        params.distinguished_name = rcgen::DistinguishedName::new();
        params
            .distinguished_name
            .push(rcgen::DnType::OrganizationName, "Nameless");
        let der = rcgen::Certificate::from_params(params)
            .unwrap()
            .serialize_der()
            .unwrap();
        let cert = Certificate::from_der(der).unwrap();
        assert_eq!(cert.subject_friendly_name(), "No common name");
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            Certificate::from_der(vec![1, 2, 3]),
            Err(StoreError::Malformed(_))
        ));
    }
}
