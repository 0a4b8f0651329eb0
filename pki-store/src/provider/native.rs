//! Providers over OS / token key stores
//!
//! Microsoft CSP, CryptoPro CSP and PKCS#11 stores are reached through a
//! [`NativeKeyStore`]. Native stores are organised by store name; names are
//! mapped onto catalogue categories:
//!
//! | store name               | category |
//! |--------------------------|----------|
//! | `MY`                     | MY       |
//! | `AddressBook`, `OTHERS`  | OTHERS   |
//! | `ROOT`, `TRUST`, `CA`    | TRUST    |
//!
//! CRLs found in any store are reported under the CRL category.

use super::{PkiObject, Provider, ProviderCaps, ProviderKind};
use crate::certificate::Certificate;
use crate::crl::Crl;
use crate::error::{Result, StoreError};
use crate::item::{Category, ItemType, PkiItem};
use crate::key::Key;
use crate::{log_debug, log_info, log_warn};
use pki_common::fingerprint::sha1_hex;
use pki_common::{Component, Logger};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Access to an OS or hardware resident certificate and key store
pub trait NativeKeyStore: Send + Sync {
    /// Names of the stores this backend exposes
    fn store_names(&self) -> Result<Vec<String>>;

    /// DER certificates held in `store`
    fn certificates(&self, store: &str) -> Result<Vec<Vec<u8>>>;

    /// DER CRLs held in `store`
    fn crls(&self, store: &str) -> Result<Vec<Vec<u8>>>;

    fn has_private_key(&self, key_thumbprint: &str) -> bool;

    /// Private key whose public half has `key_thumbprint`
    fn private_key(&self, key_thumbprint: &str) -> Result<Key>;

    fn add_certificate(&self, store: &str, der: &[u8]) -> Result<()>;

    fn add_crl(&self, store: &str, der: &[u8]) -> Result<()>;

    fn add_key(&self, key: &Key) -> Result<()>;

    /// Remove the object with SHA-1 `hash` from `store`
    fn remove(&self, store: &str, hash: &str) -> Result<()>;
}

/// Category for a native store name
pub fn category_for_store(name: &str) -> Option<Category> {
    match name.to_ascii_uppercase().as_str() {
        "MY" => Some(Category::My),
        "ADDRESSBOOK" | "OTHERS" => Some(Category::Others),
        "ROOT" | "TRUST" | "CA" => Some(Category::Trust),
        _ => None,
    }
}

/// Store name written to for a category
pub fn store_for_category(category: Category) -> &'static str {
    match category {
        Category::My => "MY",
        Category::Others => "AddressBook",
        Category::Trust => "ROOT",
        Category::Crl => "CA",
    }
}

pub struct NativeProvider {
    kind: ProviderKind,
    id: String,
    backend: Arc<dyn NativeKeyStore>,
    logger: Logger,
}

impl NativeProvider {
    pub fn new(kind: ProviderKind, backend: Arc<dyn NativeKeyStore>, logger: &Logger) -> Result<Self> {
        if !matches!(
            kind,
            ProviderKind::Microsoft | ProviderKind::CryptoPro | ProviderKind::Pkcs11
        ) {
            return Err(StoreError::Unsupported(format!(
                "{kind} is not a native provider kind"
            )));
        }
        Ok(Self {
            kind,
            id: kind.to_string(),
            backend,
            logger: logger.with_component(Component::Provider),
        })
    }

    /// Override the provider id, e.g. to register two tokens side by side
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    fn split_uri<'a>(&self, item: &'a PkiItem) -> Result<&'a str> {
        item.uri
            .split_once('/')
            .map(|(store, _)| store)
            .ok_or_else(|| StoreError::NotFound(item.uri.clone()))
    }
}

impl Provider for NativeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn capabilities(&self) -> ProviderCaps {
        ProviderCaps {
            writable: true,
            resolves_keys: self.kind.resolves_keys(),
        }
    }

    fn enumerate(&self) -> Result<Vec<PkiItem>> {
        let mut items = Vec::new();
        for store in self.backend.store_names()? {
            let category = category_for_store(&store);
            if let Some(category) = category {
                for der in self.backend.certificates(&store)? {
                    let cert = match Certificate::from_der(der) {
                        Ok(cert) => cert,
                        Err(e) => {
                            log_warn!(self.logger, "Skipping certificate in {}: {}", store, e);
                            continue;
                        }
                    };
                    let uri = format!("{}/{}", store, cert.thumbprint());
                    if self.kind.resolves_keys() && self.backend.has_private_key(cert.key_thumbprint()) {
                        let key_uri = format!("{}/{}", store, cert.key_thumbprint());
                        items.push(PkiItem::encrypted_key(
                            cert.key_thumbprint(),
                            &self.id,
                            Category::My,
                            key_uri,
                        ));
                    }
                    items.push(PkiItem::from_certificate(&cert, &self.id, category, uri));
                }
            }
            for der in self.backend.crls(&store)? {
                match Crl::from_der(der) {
                    Ok(crl) => {
                        let uri = format!("{}/{}", store, crl.thumbprint());
                        items.push(PkiItem::from_crl(&crl, &self.id, uri));
                    }
                    Err(e) => log_warn!(self.logger, "Skipping CRL in {}: {}", store, e),
                }
            }
        }
        log_debug!(self.logger, "{} enumerated {} items", self.id, items.len());
        Ok(items)
    }

    fn materialize(&self, item: &PkiItem) -> Result<PkiObject> {
        let store = self.split_uri(item)?;
        match item.item_type {
            ItemType::Certificate => self
                .backend
                .certificates(store)?
                .into_iter()
                .find(|der| sha1_hex(der) == item.hash)
                .map(|der| Certificate::from_der(der).map(PkiObject::Certificate))
                .unwrap_or_else(|| Err(StoreError::NotFound(item.uri.clone()))),
            ItemType::Crl => self
                .backend
                .crls(store)?
                .into_iter()
                .find(|der| sha1_hex(der) == item.hash)
                .map(|der| Crl::from_der(der).map(PkiObject::Crl))
                .unwrap_or_else(|| Err(StoreError::NotFound(item.uri.clone()))),
            ItemType::Key => {
                if !self.kind.resolves_keys() {
                    return Err(StoreError::KeyNotAvailable(item.hash.clone()));
                }
                self.backend.private_key(&item.hash).map(PkiObject::Key)
            }
            ItemType::Request => Err(StoreError::Unsupported(format!(
                "{} stores do not hold requests",
                self.kind
            ))),
        }
    }

    fn get_key(&self, cert: &Certificate) -> Result<Key> {
        if !self.kind.resolves_keys() {
            return Err(StoreError::KeyNotAvailable(format!(
                "{} provider cannot resolve keys",
                self.kind
            )));
        }
        if !self.backend.has_private_key(cert.key_thumbprint()) {
            return Err(StoreError::KeyNotAvailable(format!(
                "no key paired with '{}'",
                cert.subject_name()
            )));
        }
        self.backend.private_key(cert.key_thumbprint())
    }

    fn store(&self, category: Category, object: &PkiObject, _password: Option<&str>) -> Result<PkiItem> {
        let item = match object {
            PkiObject::Certificate(cert) => {
                if category == Category::Crl {
                    return Err(StoreError::Unsupported(
                        "certificates cannot be stored in the CRL category".to_string(),
                    ));
                }
                let store = store_for_category(category);
                self.backend.add_certificate(store, cert.der())?;
                let uri = format!("{}/{}", store, cert.thumbprint());
                PkiItem::from_certificate(cert, &self.id, category, uri)
            }
            PkiObject::Crl(crl) => {
                let store = store_for_category(Category::Crl);
                self.backend.add_crl(store, crl.der())?;
                PkiItem::from_crl(crl, &self.id, format!("{}/{}", store, crl.thumbprint()))
            }
            PkiObject::Key(key) => {
                if !self.kind.resolves_keys() || !key.is_private() {
                    return Err(StoreError::Unsupported(format!(
                        "{} provider does not accept this key",
                        self.kind
                    )));
                }
                self.backend.add_key(key)?;
                let uri = format!("{}/{}", store_for_category(Category::My), key.thumbprint());
                PkiItem::encrypted_key(key.thumbprint(), &self.id, Category::My, uri)
            }
            PkiObject::Csr(_) => {
                return Err(StoreError::Unsupported(format!(
                    "{} stores do not hold requests",
                    self.kind
                )))
            }
        };
        log_info!(self.logger, "{} stored {} {}", self.id, item.item_type, item.hash);
        Ok(item)
    }

    fn remove(&self, item: &PkiItem) -> Result<()> {
        let store = self.split_uri(item)?;
        self.backend.remove(store, &item.hash)?;
        log_info!(self.logger, "{} removed {} {}", self.id, item.item_type, item.uri);
        Ok(())
    }
}

/* ---- in-memory backend ---- */

#[derive(Default)]
struct MemoryStores {
    certificates: BTreeMap<String, Vec<Vec<u8>>>,
    crls: BTreeMap<String, Vec<Vec<u8>>>,
    keys: BTreeMap<String, Key>,
}

/// Portable [`NativeKeyStore`] holding everything in memory
#[derive(Default)]
pub struct MemoryKeyStore {
    inner: RwLock<MemoryStores>,
}

impl MemoryKeyStore {
    /// Backend with the usual CSP store names already present
    pub fn new() -> Self {
        let store = Self::default();
        if let Ok(mut inner) = store.inner.write() {
            for name in ["MY", "AddressBook", "ROOT", "CA"] {
                inner.certificates.insert(name.to_string(), Vec::new());
            }
        }
        store
    }
}

impl NativeKeyStore for MemoryKeyStore {
    fn store_names(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut names: Vec<String> = inner
            .certificates
            .keys()
            .chain(inner.crls.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn certificates(&self, store: &str) -> Result<Vec<Vec<u8>>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.certificates.get(store).cloned().unwrap_or_default())
    }

    fn crls(&self, store: &str) -> Result<Vec<Vec<u8>>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.crls.get(store).cloned().unwrap_or_default())
    }

    fn has_private_key(&self, key_thumbprint: &str) -> bool {
        self.inner
            .read()
            .map(|inner| inner.keys.contains_key(key_thumbprint))
            .unwrap_or(false)
    }

    fn private_key(&self, key_thumbprint: &str) -> Result<Key> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        inner
            .keys
            .get(key_thumbprint)
            .map(Key::duplicate)
            .ok_or_else(|| StoreError::KeyNotAvailable(key_thumbprint.to_string()))
    }

    fn add_certificate(&self, store: &str, der: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let entries = inner.certificates.entry(store.to_string()).or_default();
        if !entries.iter().any(|existing| existing == der) {
            entries.push(der.to_vec());
        }
        Ok(())
    }

    fn add_crl(&self, store: &str, der: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let entries = inner.crls.entry(store.to_string()).or_default();
        if !entries.iter().any(|existing| existing == der) {
            entries.push(der.to_vec());
        }
        Ok(())
    }

    fn add_key(&self, key: &Key) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        inner.keys.insert(key.thumbprint().to_string(), key.duplicate());
        Ok(())
    }

    fn remove(&self, store: &str, hash: &str) -> Result<()> {
        let mut guard = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let inner = &mut *guard;
        let mut removed = inner.keys.remove(hash).is_some();
        for map in [&mut inner.certificates, &mut inner.crls] {
            if let Some(entries) = map.get_mut(store) {
                let before = entries.len();
                entries.retain(|der| sha1_hex(der) != hash);
                removed |= entries.len() != before;
            }
        }
        if removed {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("{store}/{hash}")))
        }
    }
}
