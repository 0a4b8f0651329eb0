//! Declarative catalogue queries
//!
//! Fields are ANDed. Set fields match when empty or when the item's value is a
//! member; string fields are exact matches and fail on items that lack the
//! field; `isValid` only constrains items that carry a validity window.
//! Unknown JSON fields are ignored.

use crate::item::{Category, ItemType, PkiItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filter {
    #[serde(rename = "type", skip_serializing_if = "Vec::is_empty")]
    pub item_type: Vec<ItemType>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub provider: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_friendly_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_friendly_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_valid: Option<bool>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item_type(mut self, item_type: ItemType) -> Self {
        self.item_type.push(item_type);
        self
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider.push(provider.into());
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category.push(category);
        self
    }

    pub fn hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn subject_name(mut self, name: impl Into<String>) -> Self {
        self.subject_name = Some(name.into());
        self
    }

    pub fn subject_friendly_name(mut self, name: impl Into<String>) -> Self {
        self.subject_friendly_name = Some(name.into());
        self
    }

    pub fn issuer_name(mut self, name: impl Into<String>) -> Self {
        self.issuer_name = Some(name.into());
        self
    }

    pub fn issuer_friendly_name(mut self, name: impl Into<String>) -> Self {
        self.issuer_friendly_name = Some(name.into());
        self
    }

    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn is_valid(mut self, valid: bool) -> Self {
        self.is_valid = Some(valid);
        self
    }

    /// Parse the external JSON filter shape
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn matches(&self, item: &PkiItem) -> bool {
        self.matches_at(item, Utc::now())
    }

    pub fn matches_at(&self, item: &PkiItem, now: DateTime<Utc>) -> bool {
        member(&self.item_type, &item.item_type)
            && member(&self.provider, &item.provider)
            && member(&self.category, &item.category)
            && exact(&self.hash, Some(&item.hash))
            && exact(&self.subject_name, item.subject_name.as_ref())
            && exact(&self.subject_friendly_name, item.subject_friendly_name.as_ref())
            && exact(&self.issuer_name, item.issuer_name.as_ref())
            && exact(&self.issuer_friendly_name, item.issuer_friendly_name.as_ref())
            && self.serial_matches(item)
            && self.validity_matches(item, now)
    }

    fn serial_matches(&self, item: &PkiItem) -> bool {
        match (&self.serial, &item.serial) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(wanted), Some(serial)) => {
                pki_common::fingerprint::normalize_serial(wanted) == *serial
            }
        }
    }

    fn validity_matches(&self, item: &PkiItem, now: DateTime<Utc>) -> bool {
        match self.is_valid {
            None => true,
            Some(_) if item.not_before.is_none() && item.not_after.is_none() => true,
            Some(wanted) => item.is_valid_at(now) == wanted,
        }
    }
}

fn member<T: PartialEq>(set: &[T], value: &T) -> bool {
    set.is_empty() || set.contains(value)
}

fn exact(wanted: &Option<String>, value: Option<&String>) -> bool {
    match wanted {
        None => true,
        Some(wanted) => value == Some(wanted),
    }
}

/// Evaluate `filter` over `items`, keeping their order
pub fn evaluate<'a, I>(filter: &Filter, items: I) -> Vec<PkiItem>
where
    I: IntoIterator<Item = &'a PkiItem>,
{
    let now = Utc::now();
    items
        .into_iter()
        .filter(|item| filter.matches_at(item, now))
        .cloned()
        .collect()
}
