//! Cryptographic Message Syntax (RFC 5652)
//!
//! [`SignedData`] signs and verifies content with certificates and keys taken
//! from the store. [`EnvelopedData`] encrypts content for a set of recipient
//! certificates using RSA key transport and an AES-CBC content cipher.
//!
//! ASN.1 structures come from the `cms` and `x509-cert` crates; every
//! cryptographic operation goes through a [`CryptoProvider`](crate::crypto::CryptoProvider).

mod enveloped;
mod signed_data;

pub use enveloped::{EnvelopedData, RecipientInfo};
pub use signed_data::{Attribute, SignedData, Signer};

use crate::certificate::Certificate;
use crate::error::{Result, StoreError};
use crate::oid::Oid;
use ::cms::cert::IssuerAndSerialNumber;
use ::cms::content_info::ContentInfo;
use const_oid::ObjectIdentifier;
use der::{Any, Decode, Encode};
use pki_common::fingerprint::serial_hex;
use spki::AlgorithmIdentifierOwned;

pub(crate) const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
pub(crate) const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
pub(crate) const ID_ENVELOPED_DATA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.3");
pub(crate) const ID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
pub(crate) const ID_MESSAGE_DIGEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
pub(crate) const ID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
pub(crate) const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// Identifies the certificate behind a signer or recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerId {
    IssuerSerial {
        issuer: String,
        issuer_der: Vec<u8>,
        serial: String,
    },
    /// Subject key identifier, uppercase hex
    KeyId(String),
}

impl SignerId {
    pub(crate) fn from_issuer_serial(value: &IssuerAndSerialNumber) -> Result<Self> {
        Ok(SignerId::IssuerSerial {
            issuer: value.issuer.to_string(),
            issuer_der: value.issuer.to_der()?,
            serial: serial_hex(value.serial_number.as_bytes()),
        })
    }

    pub(crate) fn from_key_id(key_id: &[u8]) -> Self {
        SignerId::KeyId(hex::encode_upper(key_id))
    }

    /// Whether `cert` is the certificate this id points at. Key ids are
    /// compared with the SHA-1 key thumbprint.
    pub fn matches(&self, cert: &Certificate) -> bool {
        match self {
            SignerId::IssuerSerial {
                issuer_der, serial, ..
            } => cert.issuer_der() == issuer_der.as_slice() && cert.serial_number() == serial,
            SignerId::KeyId(key_id) => cert.key_thumbprint().eq_ignore_ascii_case(key_id),
        }
    }
}

pub(crate) fn issuer_and_serial(cert: &Certificate) -> Result<IssuerAndSerialNumber> {
    let parsed = x509_cert::Certificate::from_der(cert.der())?;
    Ok(IssuerAndSerialNumber {
        issuer: parsed.tbs_certificate.issuer,
        serial_number: parsed.tbs_certificate.serial_number,
    })
}

pub(crate) fn algorithm_identifier(oid: &Oid, parameters: Option<Any>) -> Result<AlgorithmIdentifierOwned> {
    Ok(AlgorithmIdentifierOwned {
        oid: oid.to_object_identifier()?,
        parameters,
    })
}

/// Wrap an encoded inner structure in a `ContentInfo`
pub(crate) fn wrap_content_info<T: Encode>(content_type: ObjectIdentifier, inner: &T) -> Result<Vec<u8>> {
    let info = ContentInfo {
        content_type,
        content: Any::from_der(&inner.to_der()?)?,
    };
    Ok(info.to_der()?)
}

/// DER of the inner structure, after checking the outer content type
pub(crate) fn unwrap_content_info(der: &[u8], expected: ObjectIdentifier) -> Result<Vec<u8>> {
    let info = ContentInfo::from_der(der)?;
    if info.content_type != expected {
        return Err(StoreError::Malformed(format!(
            "expected CMS content type {expected}, found {}",
            info.content_type
        )));
    }
    Ok(info.content.to_der()?)
}
