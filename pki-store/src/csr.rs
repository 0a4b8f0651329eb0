//! Certificate signing requests
//!
//! Requests are generated and issued through OpenSSL; metadata is read with
//! x509-parser. Once signed a request is immutable.

use crate::certificate::Certificate;
use crate::codec::{self, label, DataFormat};
use crate::crypto::message_digest;
use crate::error::{Result, StoreError};
use crate::key::Key;
use crate::oid::DigestAlgorithm;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::nid::Nid;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Builder, X509NameBuilder, X509Req, X509ReqBuilder};
use pki_common::fingerprint::sha1_hex;
use std::path::Path;
use x509_parser::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Csr {
    der: Vec<u8>,
    subject: String,
    public_key: Vec<u8>,
    hash: String,
}

impl Csr {
    /// Build and sign a request for `subject` (`CN=..,O=..`) with `key`
    pub fn generate(subject: &str, key: &Key, digest: DigestAlgorithm) -> Result<Self> {
        let pkey = key.to_private_pkey()?;
        let name = build_name(subject)?;

        let mut builder = X509ReqBuilder::new()?;
        builder.set_version(0)?;
        builder.set_subject_name(&name)?;
        builder.set_pubkey(&pkey)?;
        builder.sign(&pkey, message_digest(digest))?;

        Self::from_der(builder.build().to_der()?)
    }

    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        let (_, parsed) = X509CertificationRequest::from_der(&der)
            .map_err(|e| StoreError::Malformed(format!("Failed to parse CSR: {e}")))?;
        let info = &parsed.certification_request_info;
        Ok(Self {
            subject: info.subject.to_string(),
            public_key: info.subject_pki.raw.to_vec(),
            hash: sha1_hex(&der),
            der,
        })
    }

    pub fn import(data: &[u8]) -> Result<Self> {
        Self::from_der(codec::decode_any(data, label::CSR)?)
    }

    pub fn export(&self, format: DataFormat) -> Vec<u8> {
        codec::encode(&self.der, format, label::CSR)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_der(codec::read_file(path, label::CSR)?)
    }

    pub fn save(&self, path: &Path, format: DataFormat) -> Result<()> {
        codec::write_file(path, &self.der, format, label::CSR)
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject_name(&self) -> &str {
        &self.subject
    }

    /// SubjectPublicKeyInfo DER of the requested key
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key
    }

    pub fn public_key(&self) -> Result<Key> {
        Key::from_public_der(&self.public_key)
    }

    /// SHA-1 of the DER body, lowercase hex
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Check the request's self signature
    pub fn verify(&self) -> Result<bool> {
        let req = X509Req::from_der(&self.der)?;
        let pkey = req.public_key()?;
        Ok(req.verify(&pkey).unwrap_or(false))
    }

    /// Issue a certificate for this request.
    ///
    /// With `issuer == None` the certificate is self-signed with `signing_key`
    /// and must be the request's own key.
    pub fn issue(
        &self,
        issuer: Option<&Certificate>,
        signing_key: &Key,
        validity_days: u32,
        ca: bool,
        digest: DigestAlgorithm,
    ) -> Result<Certificate> {
        if !self.verify()? {
            return Err(StoreError::SignatureInvalid(format!(
                "request for '{}' is not self-consistent",
                self.subject
            )));
        }
        let req = X509Req::from_der(&self.der)?;
        let signer = signing_key.to_private_pkey()?;

        let mut builder = X509Builder::new()?;
        builder.set_version(2)?;
        let requested_key = req.public_key()?;
        builder.set_pubkey(&requested_key)?;
        builder.set_subject_name(req.subject_name())?;
        match issuer {
            Some(issuer) => {
                let issuer_cert = openssl::x509::X509::from_der(issuer.der())?;
                builder.set_issuer_name(issuer_cert.subject_name())?;
            }
            None => builder.set_issuer_name(req.subject_name())?,
        }

        let not_before = Asn1Time::days_from_now(0)?;
        let not_after = Asn1Time::days_from_now(validity_days)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;

        let serial = {
            let mut bn = BigNum::new()?;
            bn.rand(64, MsbOption::MAYBE_ZERO, false)?;
            bn.to_asn1_integer()?
        };
        builder.set_serial_number(&serial)?;

        if ca {
            builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
            builder.append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .digital_signature()
                    .build()?,
            )?;
        } else {
            builder.append_extension(
                KeyUsage::new()
                    .digital_signature()
                    .key_encipherment()
                    .build()?,
            )?;
        }

        builder.sign(&signer, message_digest(digest))?;
        Certificate::from_der(builder.build().to_der()?)
    }
}

/// Parse `CN=Leaf,O=Acme` into an X.509 name
fn build_name(subject: &str) -> Result<openssl::x509::X509Name> {
    let mut name_builder = X509NameBuilder::new()?;
    let mut entries = 0;
    for component in subject.split(',') {
        let component = component.trim();
        if component.is_empty() {
            continue;
        }
        let (field, value) = component
            .split_once('=')
            .ok_or_else(|| StoreError::Malformed(format!("Invalid name component '{component}'")))?;
        name_builder
            .append_entry_by_text(field.trim(), value.trim())
            .map_err(|e| StoreError::Malformed(format!("Invalid name attribute '{field}': {e}")))?;
        entries += 1;
    }
    if entries == 0 {
        name_builder.append_entry_by_nid(Nid::COMMONNAME, "No common name")?;
    }
    Ok(name_builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_verify() {
        let key = Key::generate_ec().unwrap();
        let csr = Csr::generate("CN=Request, O=Acme", &key, DigestAlgorithm::Sha256).unwrap();
        assert!(csr.verify().unwrap());
        assert!(csr.subject_name().contains("CN=Request"));
        assert_eq!(csr.public_key().unwrap().thumbprint(), key.thumbprint());

        let restored = Csr::import(&csr.export(DataFormat::Pem)).unwrap();
        assert_eq!(restored.der(), csr.der());
        assert_eq!(restored.hash(), csr.hash());
    }

    #[test]
    fn test_issue_self_signed_ca() {
        let key = Key::generate_rsa(2048).unwrap();
        let csr = Csr::generate("CN=Issued Root", &key, DigestAlgorithm::Sha256).unwrap();
        let cert = csr
            .issue(None, &key, 30, true, DigestAlgorithm::Sha256)
            .unwrap();
        assert!(cert.is_ca());
        assert_eq!(cert.key_thumbprint(), key.thumbprint());
        assert!(cert
            .is_self_signed(&crate::crypto::OpenSslCrypto::new())
            .unwrap());
    }

    #[test]
    fn test_bad_subject_rejected() {
        let key = Key::generate_ec().unwrap();
        assert!(Csr::generate("no equals sign", &key, DigestAlgorithm::Sha256).is_err());
    }
}
