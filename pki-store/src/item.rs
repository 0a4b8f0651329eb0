//! Catalogue records
//!
//! A [`PkiItem`] is the flattened metadata projection of one identity
//! primitive as seen through one provider. Absent fields mean "not applicable
//! to this item's type".

use crate::certificate::Certificate;
use crate::codec::DataFormat;
use crate::crl::Crl;
use crate::csr::Csr;
use crate::key::Key;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemType {
    Crl,
    Certificate,
    Key,
    Request,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Crl => "CRL",
            ItemType::Certificate => "CERTIFICATE",
            ItemType::Key => "KEY",
            ItemType::Request => "REQUEST",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trust role of an item within its store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    /// Personal certificates, usually with a paired private key
    My,
    Others,
    Trust,
    Crl,
}

impl Category {
    pub const ALL: [Category; 4] = [Category::My, Category::Others, Category::Trust, Category::Crl];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::My => "MY",
            Category::Others => "OTHERS",
            Category::Trust => "TRUST",
            Category::Crl => "CRL",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(text))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PkiItem {
    pub format: DataFormat,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub uri: String,
    pub provider: String,
    pub category: Category,
    pub hash: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_update: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    /// Thumbprint of the paired key, for certificates and requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_encrypted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_algorithm: Option<String>,
}

impl PkiItem {
    fn bare(item_type: ItemType, provider: &str, category: Category, hash: &str, uri: String) -> Self {
        Self {
            format: DataFormat::Der,
            item_type,
            uri,
            provider: provider.to_string(),
            category,
            hash: hash.to_string(),
            subject_name: None,
            subject_friendly_name: None,
            issuer_name: None,
            issuer_friendly_name: None,
            not_before: None,
            not_after: None,
            last_update: None,
            next_update: None,
            serial: None,
            key: None,
            key_encrypted: None,
            organization_name: None,
            signature_algorithm: None,
        }
    }

    pub fn from_certificate(cert: &Certificate, provider: &str, category: Category, uri: String) -> Self {
        let mut item = Self::bare(ItemType::Certificate, provider, category, cert.thumbprint(), uri);
        item.subject_name = Some(cert.subject_name().to_string());
        item.subject_friendly_name = Some(cert.subject_friendly_name().to_string());
        item.issuer_name = Some(cert.issuer_name().to_string());
        item.issuer_friendly_name = Some(cert.issuer_friendly_name().to_string());
        item.not_before = Some(cert.not_before());
        item.not_after = Some(cert.not_after());
        item.serial = Some(cert.serial_number().to_string());
        item.key = Some(cert.key_thumbprint().to_string());
        item.organization_name = cert.organization_name().map(str::to_string);
        item.signature_algorithm = Some(cert.signature_algorithm().long_name().to_string());
        item
    }

    pub fn from_crl(crl: &Crl, provider: &str, uri: String) -> Self {
        let mut item = Self::bare(ItemType::Crl, provider, Category::Crl, crl.thumbprint(), uri);
        item.issuer_name = Some(crl.issuer_name().to_string());
        item.issuer_friendly_name = Some(crl.issuer_friendly_name().to_string());
        item.last_update = Some(crl.this_update());
        item.next_update = crl.next_update();
        item.signature_algorithm = Some(crl.signature_algorithm().long_name().to_string());
        item
    }

    pub fn from_key(key: &Key, provider: &str, category: Category, uri: String) -> Self {
        let mut item = Self::bare(ItemType::Key, provider, category, key.thumbprint(), uri);
        item.key_encrypted = Some(key.is_encrypted());
        item
    }

    /// Record for a password-protected key that has not been unlocked yet;
    /// its hash is whatever identifier the provider stores it under.
    pub fn encrypted_key(hash: &str, provider: &str, category: Category, uri: String) -> Self {
        let mut item = Self::bare(ItemType::Key, provider, category, hash, uri);
        item.key_encrypted = Some(true);
        item
    }

    pub fn from_csr(csr: &Csr, provider: &str, category: Category, uri: String) -> Self {
        let mut item = Self::bare(ItemType::Request, provider, category, csr.hash(), uri);
        item.subject_name = Some(csr.subject_name().to_string());
        item.key = csr.public_key().ok().map(|key| key.thumbprint().to_string());
        item
    }

    pub fn with_format(mut self, format: DataFormat) -> Self {
        self.format = format;
        self
    }

    /// Scope of uniqueness within the catalogue
    pub fn cache_key(&self) -> ItemKey {
        ItemKey {
            provider: self.provider.clone(),
            item_type: self.item_type,
            category: self.category,
            hash: self.hash.clone(),
        }
    }

    /// Current time falls within [notBefore, notAfter]; items without a
    /// validity window always qualify.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        match (self.not_before, self.not_after) {
            (Some(not_before), Some(not_after)) => not_before <= at && at <= not_after,
            (Some(not_before), None) => not_before <= at,
            (None, Some(not_after)) => at <= not_after,
            (None, None) => true,
        }
    }
}

/// `(provider, type, category, hash)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub provider: String,
    pub item_type: ItemType,
    pub category: Category,
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        let item = PkiItem::encrypted_key("abc", "SYSTEM", Category::My, "KEYS/abc.key".into());
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "KEY");
        assert_eq!(json["category"], "MY");
        assert_eq!(json["format"], "DER");
        assert_eq!(json["keyEncrypted"], true);
        assert!(json.get("subjectName").is_none());
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(Category::parse("trust"), Some(Category::Trust));
        assert_eq!(Category::parse("ROOT"), None);
    }
}
