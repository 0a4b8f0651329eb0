//! Providers: sources of certificates, keys, CRLs and requests.
//!
//! Every source implements [`Provider`]. Variants differ in where they
//! enumerate from and whether they can locate private keys:
//! - [`system::SystemProvider`]: a folder tree, writable
//! - [`native::NativeProvider`]: Microsoft CSP, CryptoPro CSP and PKCS#11 stores
//!   behind a [`native::NativeKeyStore`]
//! - [`tsl::TslProvider`]: a remote trust-service list, read-only

use crate::certificate::Certificate;
use crate::crl::Crl;
use crate::csr::Csr;
use crate::error::{Result, StoreError};
use crate::item::{Category, ItemType, PkiItem};
use crate::key::Key;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod native;
pub mod system;
pub mod tsl;

pub use native::{MemoryKeyStore, NativeKeyStore, NativeProvider};
pub use system::SystemProvider;
pub use tsl::TslProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderKind {
    System,
    Microsoft,
    CryptoPro,
    Tsl,
    Pkcs11,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::System => "SYSTEM",
            ProviderKind::Microsoft => "MICROSOFT",
            ProviderKind::CryptoPro => "CRYPTOPRO",
            ProviderKind::Tsl => "TSL",
            ProviderKind::Pkcs11 => "PKCS11",
        }
    }

    /// Variants whose native stores pair certificates with private keys
    pub fn resolves_keys(&self) -> bool {
        matches!(self, ProviderKind::Microsoft | ProviderKind::CryptoPro)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCaps {
    /// Accepts `store` and `remove`
    pub writable: bool,
    /// `get_key` can locate a private key paired with a certificate
    pub resolves_keys: bool,
}

/// A materialized identity primitive
#[derive(Debug, Clone, PartialEq)]
pub enum PkiObject {
    Certificate(Certificate),
    Key(Key),
    Crl(Crl),
    Csr(Csr),
}

impl PkiObject {
    pub fn item_type(&self) -> ItemType {
        match self {
            PkiObject::Certificate(_) => ItemType::Certificate,
            PkiObject::Key(_) => ItemType::Key,
            PkiObject::Crl(_) => ItemType::Crl,
            PkiObject::Csr(_) => ItemType::Request,
        }
    }

    /// Catalogue hash of the object
    pub fn hash(&self) -> &str {
        match self {
            PkiObject::Certificate(cert) => cert.thumbprint(),
            PkiObject::Key(key) => key.thumbprint(),
            PkiObject::Crl(crl) => crl.thumbprint(),
            PkiObject::Csr(csr) => csr.hash(),
        }
    }

    pub fn into_certificate(self) -> Result<Certificate> {
        match self {
            PkiObject::Certificate(cert) => Ok(cert),
            other => Err(unexpected(ItemType::Certificate, other.item_type())),
        }
    }

    pub fn into_key(self) -> Result<Key> {
        match self {
            PkiObject::Key(key) => Ok(key),
            other => Err(unexpected(ItemType::Key, other.item_type())),
        }
    }

    pub fn into_crl(self) -> Result<Crl> {
        match self {
            PkiObject::Crl(crl) => Ok(crl),
            other => Err(unexpected(ItemType::Crl, other.item_type())),
        }
    }

    pub fn into_csr(self) -> Result<Csr> {
        match self {
            PkiObject::Csr(csr) => Ok(csr),
            other => Err(unexpected(ItemType::Request, other.item_type())),
        }
    }
}

fn unexpected(wanted: ItemType, found: ItemType) -> StoreError {
    StoreError::Malformed(format!("expected {wanted}, found {found}"))
}

/// A source of identity primitives.
///
/// `enumerate` never mutates the external system it reads from. Calls are
/// made under the store's locks and must not call back into the store.
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Id recorded as `PkiItem::provider`; unique within a store
    fn id(&self) -> String {
        self.kind().to_string()
    }

    fn capabilities(&self) -> ProviderCaps {
        ProviderCaps::default()
    }

    /// Everything the provider currently exposes
    fn enumerate(&self) -> Result<Vec<PkiItem>>;

    /// Resolve a record back to its cryptographic object; `NotFound` when it
    /// vanished since enumeration
    fn materialize(&self, item: &PkiItem) -> Result<PkiObject>;

    /// Private key paired with `cert`
    fn get_key(&self, cert: &Certificate) -> Result<Key> {
        Err(StoreError::KeyNotAvailable(format!(
            "{} provider cannot resolve keys for '{}'",
            self.kind(),
            cert.subject_name()
        )))
    }

    /// Decrypt a password-protected key record
    fn unlock_key(&self, item: &PkiItem, _password: &str) -> Result<Key> {
        Err(StoreError::Unsupported(format!(
            "{} provider has no protected key '{}'",
            self.kind(),
            item.hash
        )))
    }

    /// Persist `object` under `category` and describe what was written
    fn store(&self, _category: Category, object: &PkiObject, _password: Option<&str>) -> Result<PkiItem> {
        Err(StoreError::Unsupported(format!(
            "{} provider is read-only, cannot add {}",
            self.kind(),
            object.item_type()
        )))
    }

    fn remove(&self, item: &PkiItem) -> Result<()> {
        Err(StoreError::Unsupported(format!(
            "{} provider is read-only, cannot remove '{}'",
            self.kind(),
            item.hash
        )))
    }
}
