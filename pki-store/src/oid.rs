//! Object identifiers and algorithm identities.
//!
//! OIDs are values: two `Oid`s are equal when their dotted forms are equal,
//! whatever names were attached to them. Known identifiers are resolved
//! against a static registry for their long and short names.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of algorithm an OID names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OidClass {
    Digest,
    Signature,
    PublicKey,
    Cipher,
    Attribute,
    ContentType,
    Other,
}

struct OidEntry {
    value: &'static str,
    short_name: &'static str,
    long_name: &'static str,
    class: OidClass,
}

const REGISTRY: &[OidEntry] = &[
    // digests
    OidEntry { value: "1.3.14.3.2.26", short_name: "SHA1", long_name: "sha1", class: OidClass::Digest },
    OidEntry { value: "2.16.840.1.101.3.4.2.1", short_name: "SHA256", long_name: "sha256", class: OidClass::Digest },
    OidEntry { value: "2.16.840.1.101.3.4.2.2", short_name: "SHA384", long_name: "sha384", class: OidClass::Digest },
    OidEntry { value: "2.16.840.1.101.3.4.2.3", short_name: "SHA512", long_name: "sha512", class: OidClass::Digest },
    // signature schemes
    OidEntry { value: "1.2.840.113549.1.1.5", short_name: "RSA-SHA1", long_name: "sha1WithRSAEncryption", class: OidClass::Signature },
    OidEntry { value: "1.2.840.113549.1.1.11", short_name: "RSA-SHA256", long_name: "sha256WithRSAEncryption", class: OidClass::Signature },
    OidEntry { value: "1.2.840.113549.1.1.12", short_name: "RSA-SHA384", long_name: "sha384WithRSAEncryption", class: OidClass::Signature },
    OidEntry { value: "1.2.840.113549.1.1.13", short_name: "RSA-SHA512", long_name: "sha512WithRSAEncryption", class: OidClass::Signature },
    OidEntry { value: "1.2.840.10045.4.1", short_name: "ecdsa-with-SHA1", long_name: "ecdsa-with-SHA1", class: OidClass::Signature },
    OidEntry { value: "1.2.840.10045.4.3.2", short_name: "ecdsa-with-SHA256", long_name: "ecdsa-with-SHA256", class: OidClass::Signature },
    OidEntry { value: "1.2.840.10045.4.3.3", short_name: "ecdsa-with-SHA384", long_name: "ecdsa-with-SHA384", class: OidClass::Signature },
    OidEntry { value: "1.2.840.10045.4.3.4", short_name: "ecdsa-with-SHA512", long_name: "ecdsa-with-SHA512", class: OidClass::Signature },
    // public key algorithms
    OidEntry { value: "1.2.840.113549.1.1.1", short_name: "rsaEncryption", long_name: "rsaEncryption", class: OidClass::PublicKey },
    OidEntry { value: "1.2.840.10045.2.1", short_name: "id-ecPublicKey", long_name: "id-ecPublicKey", class: OidClass::PublicKey },
    OidEntry { value: "1.3.101.112", short_name: "ED25519", long_name: "ED25519", class: OidClass::PublicKey },
    // content ciphers
    OidEntry { value: "2.16.840.1.101.3.4.1.2", short_name: "AES-128-CBC", long_name: "aes-128-cbc", class: OidClass::Cipher },
    OidEntry { value: "2.16.840.1.101.3.4.1.22", short_name: "AES-192-CBC", long_name: "aes-192-cbc", class: OidClass::Cipher },
    OidEntry { value: "2.16.840.1.101.3.4.1.42", short_name: "AES-256-CBC", long_name: "aes-256-cbc", class: OidClass::Cipher },
    OidEntry { value: "1.2.840.113549.3.7", short_name: "DES-EDE3-CBC", long_name: "des-ede3-cbc", class: OidClass::Cipher },
    // CMS attributes and content types
    OidEntry { value: "1.2.840.113549.1.9.3", short_name: "contentType", long_name: "contentType", class: OidClass::Attribute },
    OidEntry { value: "1.2.840.113549.1.9.4", short_name: "messageDigest", long_name: "messageDigest", class: OidClass::Attribute },
    OidEntry { value: "1.2.840.113549.1.9.5", short_name: "signingTime", long_name: "signingTime", class: OidClass::Attribute },
    OidEntry { value: "1.2.840.113549.1.7.1", short_name: "pkcs7-data", long_name: "pkcs7-data", class: OidClass::ContentType },
    OidEntry { value: "1.2.840.113549.1.7.2", short_name: "pkcs7-signedData", long_name: "pkcs7-signedData", class: OidClass::ContentType },
    OidEntry { value: "1.2.840.113549.1.7.3", short_name: "pkcs7-envelopedData", long_name: "pkcs7-envelopedData", class: OidClass::ContentType },
    // distinguished name attributes
    OidEntry { value: "2.5.4.3", short_name: "CN", long_name: "commonName", class: OidClass::Attribute },
    OidEntry { value: "2.5.4.10", short_name: "O", long_name: "organizationName", class: OidClass::Attribute },
];

/// An object identifier together with its registered names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Oid {
    value: String,
    short_name: String,
    long_name: String,
}

impl Oid {
    /// Build an OID from its dotted form or from a registered name
    /// (short or long, case-insensitive).
    pub fn new(text: &str) -> Result<Self> {
        let text = text.trim();
        if let Some(entry) = lookup_value(text).or_else(|| lookup_name(text)) {
            return Ok(Self::from_entry(entry));
        }
        const_oid::ObjectIdentifier::new(text)
            .map_err(|e| StoreError::Malformed(format!("Invalid OID '{text}': {e}")))?;
        Ok(Self {
            value: text.to_string(),
            short_name: text.to_string(),
            long_name: text.to_string(),
        })
    }

    fn from_entry(entry: &OidEntry) -> Self {
        Self {
            value: entry.value.to_string(),
            short_name: entry.short_name.to_string(),
            long_name: entry.long_name.to_string(),
        }
    }

    /// Dotted decimal form
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn long_name(&self) -> &str {
        &self.long_name
    }

    pub fn class(&self) -> OidClass {
        lookup_value(&self.value)
            .map(|entry| entry.class)
            .unwrap_or(OidClass::Other)
    }

    pub(crate) fn to_object_identifier(&self) -> Result<const_oid::ObjectIdentifier> {
        const_oid::ObjectIdentifier::new(&self.value)
            .map_err(|e| StoreError::Malformed(format!("Invalid OID '{}': {e}", self.value)))
    }
}

impl PartialEq for Oid {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Oid {}

impl std::hash::Hash for Oid {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.long_name)
    }
}

fn lookup_value(value: &str) -> Option<&'static OidEntry> {
    REGISTRY.iter().find(|entry| entry.value == value)
}

fn lookup_name(name: &str) -> Option<&'static OidEntry> {
    REGISTRY.iter().find(|entry| {
        entry.short_name.eq_ignore_ascii_case(name) || entry.long_name.eq_ignore_ascii_case(name)
    })
}

/// Digest algorithms usable for thumbprints, signatures and CMS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DigestAlgorithm {
    Sha1,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn oid(&self) -> Oid {
        let value = match self {
            DigestAlgorithm::Sha1 => "1.3.14.3.2.26",
            DigestAlgorithm::Sha256 => "2.16.840.1.101.3.4.2.1",
            DigestAlgorithm::Sha384 => "2.16.840.1.101.3.4.2.2",
            DigestAlgorithm::Sha512 => "2.16.840.1.101.3.4.2.3",
        };
        lookup_value(value)
            .map(Oid::from_entry)
            .unwrap_or_else(|| Oid {
                value: value.to_string(),
                short_name: value.to_string(),
                long_name: value.to_string(),
            })
    }

    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    /// Resolve a digest by name (`sha256`, `SHA-256`) or dotted OID.
    pub fn from_name(name: &str) -> Result<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "");
        match normalized.as_str() {
            "sha1" | "1.3.14.3.2.26" => Ok(DigestAlgorithm::Sha1),
            "sha256" | "2.16.840.1.101.3.4.2.1" => Ok(DigestAlgorithm::Sha256),
            "sha384" | "2.16.840.1.101.3.4.2.2" => Ok(DigestAlgorithm::Sha384),
            "sha512" | "2.16.840.1.101.3.4.2.3" => Ok(DigestAlgorithm::Sha512),
            _ => Err(StoreError::Unsupported(format!("digest algorithm '{name}'"))),
        }
    }

    /// Digest embedded in a signature algorithm OID
    pub fn from_signature_oid(value: &str) -> Option<Self> {
        match value {
            "1.2.840.113549.1.1.5" | "1.2.840.10045.4.1" => Some(DigestAlgorithm::Sha1),
            "1.2.840.113549.1.1.11" | "1.2.840.10045.4.3.2" => Some(DigestAlgorithm::Sha256),
            "1.2.840.113549.1.1.12" | "1.2.840.10045.4.3.3" => Some(DigestAlgorithm::Sha384),
            "1.2.840.113549.1.1.13" | "1.2.840.10045.4.3.4" => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Signature algorithm OID combining this digest with a key algorithm
    pub fn signature_oid(&self, key: KeyAlgorithm) -> Result<Oid> {
        let value = match (key, self) {
            (KeyAlgorithm::Rsa, DigestAlgorithm::Sha1) => "1.2.840.113549.1.1.5",
            (KeyAlgorithm::Rsa, DigestAlgorithm::Sha256) => "1.2.840.113549.1.1.11",
            (KeyAlgorithm::Rsa, DigestAlgorithm::Sha384) => "1.2.840.113549.1.1.12",
            (KeyAlgorithm::Rsa, DigestAlgorithm::Sha512) => "1.2.840.113549.1.1.13",
            (KeyAlgorithm::Ec, DigestAlgorithm::Sha1) => "1.2.840.10045.4.1",
            (KeyAlgorithm::Ec, DigestAlgorithm::Sha256) => "1.2.840.10045.4.3.2",
            (KeyAlgorithm::Ec, DigestAlgorithm::Sha384) => "1.2.840.10045.4.3.3",
            (KeyAlgorithm::Ec, DigestAlgorithm::Sha512) => "1.2.840.10045.4.3.4",
            (KeyAlgorithm::Other, _) => {
                return Err(StoreError::Unsupported(
                    "signature with unknown key algorithm".to_string(),
                ))
            }
        };
        Oid::new(value)
    }
}

/// Public key families the engine signs and verifies with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
    Other,
}

impl KeyAlgorithm {
    pub fn from_oid(value: &str) -> Self {
        match value {
            "1.2.840.113549.1.1.1" => KeyAlgorithm::Rsa,
            "1.2.840.10045.2.1" => KeyAlgorithm::Ec,
            _ => KeyAlgorithm::Other,
        }
    }
}

/// Symmetric content-encryption ciphers for enveloped data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CipherAlgorithm {
    Aes128Cbc,
    Aes192Cbc,
    #[default]
    Aes256Cbc,
    DesEde3Cbc,
}

impl CipherAlgorithm {
    pub fn oid(&self) -> Oid {
        let value = match self {
            CipherAlgorithm::Aes128Cbc => "2.16.840.1.101.3.4.1.2",
            CipherAlgorithm::Aes192Cbc => "2.16.840.1.101.3.4.1.22",
            CipherAlgorithm::Aes256Cbc => "2.16.840.1.101.3.4.1.42",
            CipherAlgorithm::DesEde3Cbc => "1.2.840.113549.3.7",
        };
        lookup_value(value)
            .map(Oid::from_entry)
            .unwrap_or_else(|| Oid {
                value: value.to_string(),
                short_name: value.to_string(),
                long_name: value.to_string(),
            })
    }

    pub fn from_oid(value: &str) -> Result<Self> {
        match value {
            "2.16.840.1.101.3.4.1.2" => Ok(CipherAlgorithm::Aes128Cbc),
            "2.16.840.1.101.3.4.1.22" => Ok(CipherAlgorithm::Aes192Cbc),
            "2.16.840.1.101.3.4.1.42" => Ok(CipherAlgorithm::Aes256Cbc),
            "1.2.840.113549.3.7" => Ok(CipherAlgorithm::DesEde3Cbc),
            other => Err(StoreError::Unsupported(format!("content cipher {other}"))),
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            CipherAlgorithm::Aes128Cbc => 16,
            CipherAlgorithm::Aes192Cbc | CipherAlgorithm::DesEde3Cbc => 24,
            CipherAlgorithm::Aes256Cbc => 32,
        }
    }

    pub fn iv_len(&self) -> usize {
        match self {
            CipherAlgorithm::DesEde3Cbc => 8,
            _ => 16,
        }
    }
}

/// A named algorithm identity (digest, signature scheme, cipher)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Algorithm {
    type_id: Oid,
}

impl Algorithm {
    /// Resolve an algorithm by registered name or dotted OID
    pub fn new(name: &str) -> Result<Self> {
        Ok(Self {
            type_id: Oid::new(name)?,
        })
    }

    pub fn from_oid(type_id: Oid) -> Self {
        Self { type_id }
    }

    pub fn type_id(&self) -> &Oid {
        &self.type_id
    }

    pub fn name(&self) -> &str {
        self.type_id.long_name()
    }

    pub fn is_digest(&self) -> bool {
        self.type_id.class() == OidClass::Digest
    }

    pub fn duplicate(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_interned_by_value() {
        let by_name = Oid::new("sha256").unwrap();
        let by_value = Oid::new("2.16.840.1.101.3.4.2.1").unwrap();
        assert_eq!(by_name, by_value);
        assert_eq!(by_value.short_name(), "SHA256");
        assert_eq!(by_value.class(), OidClass::Digest);
    }

    #[test]
    fn test_unknown_dotted_oid_is_accepted() {
        let oid = Oid::new("1.2.3.4.5").unwrap();
        assert_eq!(oid.value(), "1.2.3.4.5");
        assert_eq!(oid.class(), OidClass::Other);
        assert!(Oid::new("not an oid").is_err());
    }

    #[test]
    fn test_algorithm_is_digest() {
        assert!(Algorithm::new("sha1").unwrap().is_digest());
        assert!(!Algorithm::new("ecdsa-with-SHA256").unwrap().is_digest());
    }

    #[test]
    fn test_signature_digest_mapping() {
        assert_eq!(
            DigestAlgorithm::from_signature_oid("1.2.840.10045.4.3.2"),
            Some(DigestAlgorithm::Sha256)
        );
        let oid = DigestAlgorithm::Sha256
            .signature_oid(KeyAlgorithm::Rsa)
            .unwrap();
        assert_eq!(oid.long_name(), "sha256WithRSAEncryption");
        assert_eq!(DigestAlgorithm::from_name("SHA-384").unwrap(), DigestAlgorithm::Sha384);
    }
}
