//! The PKI store: providers, catalogue cache and queries behind one API.
//!
//! `find` reads the cache only. Mutations (`add_provider`, `add_*`, `remove`,
//! `rescan`, cache load/save) are serialized by a write gate; readers never
//! wait on a provider scan, only on the short cache update that follows it.

use crate::cache::CatalogueCache;
use crate::certificate::Certificate;
use crate::config::StoreConfig;
use crate::crl::Crl;
use crate::crypto::{OpenSslCrypto, SharedCrypto};
use crate::csr::Csr;
use crate::error::{Result, StoreError};
use crate::filter::{evaluate, Filter};
use crate::item::{Category, ItemType, PkiItem};
use crate::key::Key;
use crate::fetch::HttpFetcher;
use crate::provider::{PkiObject, Provider, SystemProvider, TslProvider};
use crate::{log_debug, log_info, log_warn};
use pki_common::{Component, Logger};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Outcome of enumerating one provider
#[derive(Debug)]
pub struct ScanReport {
    pub provider: String,
    /// Records merged into the cache
    pub items: usize,
    /// Set when enumeration failed; the provider then contributed nothing
    pub error: Option<StoreError>,
}

impl ScanReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct PkiStore {
    providers: RwLock<BTreeMap<String, Arc<dyn Provider>>>,
    cache: RwLock<CatalogueCache>,
    write_gate: Mutex<()>,
    crypto: SharedCrypto,
    cache_path: Option<PathBuf>,
    logger: Logger,
}

impl PkiStore {
    pub fn new(logger: &Logger) -> Self {
        Self {
            providers: RwLock::new(BTreeMap::new()),
            cache: RwLock::new(CatalogueCache::new()),
            write_gate: Mutex::new(()),
            crypto: OpenSslCrypto::shared(),
            cache_path: None,
            logger: logger.with_component(Component::Store),
        }
    }

    pub fn with_crypto(mut self, crypto: SharedCrypto) -> Self {
        self.crypto = crypto;
        self
    }

    /// Build a store from configuration: load the cache file when present
    /// and register the system provider when a folder is configured.
    pub fn open(config: &StoreConfig, logger: &Logger) -> Result<Self> {
        let mut store = Self::new(logger);
        store.cache_path = config.cache_path.clone();

        if let Some(path) = &config.cache_path {
            let loaded = store.load_cache(path)?;
            log_info!(store.logger, "Loaded {} cached items from {}", loaded, path.display());
        }

        if let Some(dir) = &config.system_store_dir {
            let system = SystemProvider::new(dir, logger)?.with_format(config.default_format);
            let report = store.add_provider(Arc::new(system))?;
            if let Some(e) = &report.error {
                log_warn!(store.logger, "System store scan failed: {}", e);
            }
        }
        Ok(store)
    }

    /// [`open`](Self::open) with the global logger and the root logger both
    /// taken from `config`
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let logger = config.init_logging();
        Self::open(config, &logger)
    }

    pub fn crypto(&self) -> &SharedCrypto {
        &self.crypto
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /* ---- locking ---- */

    fn gate(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_gate.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn read_cache(&self) -> Result<RwLockReadGuard<'_, CatalogueCache>> {
        self.cache.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write_cache(&self) -> Result<RwLockWriteGuard<'_, CatalogueCache>> {
        self.cache.write().map_err(|_| StoreError::LockPoisoned)
    }

    /* ---- providers ---- */

    /// Register `provider` and merge its enumeration into the cache.
    ///
    /// A provider that fails to enumerate stays registered, contributes no
    /// records, and the failure is carried in the report.
    pub fn add_provider(&self, provider: Arc<dyn Provider>) -> Result<ScanReport> {
        let _gate = self.gate()?;
        let id = provider.id();
        {
            let mut providers = self.providers.write().map_err(|_| StoreError::LockPoisoned)?;
            if providers.insert(id.clone(), provider.clone()).is_some() {
                log_info!(self.logger, "Replacing provider {}", id);
            }
        }
        self.scan_locked(&id, provider.as_ref())
    }

    /// Register several providers; one failing does not stop the others
    pub fn add_providers(&self, providers: Vec<Arc<dyn Provider>>) -> Result<Vec<ScanReport>> {
        providers
            .into_iter()
            .map(|provider| self.add_provider(provider))
            .collect()
    }

    /// Fetch each trust list in `urls` and register it as provider
    /// `TSL:<url>`. A list that cannot be fetched or parsed is reported, not
    /// fatal.
    pub async fn load_trust_lists(&self, urls: &[String], fetcher: &dyn HttpFetcher) -> Vec<ScanReport> {
        let mut reports = Vec::with_capacity(urls.len());
        for url in urls {
            let added = match TslProvider::load(url, fetcher, &self.logger).await {
                Ok(provider) => self.add_provider(Arc::new(provider.with_id(format!("TSL:{url}")))),
                Err(e) => Err(e),
            };
            reports.push(added.unwrap_or_else(|e| {
                log_warn!(self.logger, "Trust list {} not loaded: {}", url, e);
                ScanReport {
                    provider: url.clone(),
                    items: 0,
                    error: Some(e),
                }
            }));
        }
        reports
    }

    /// Re-enumerate a provider, replacing all of its cached records
    pub fn rescan(&self, provider_id: &str) -> Result<ScanReport> {
        let _gate = self.gate()?;
        let provider = self.provider(provider_id)?;
        self.scan_locked(provider_id, provider.as_ref())
    }

    fn scan_locked(&self, id: &str, provider: &dyn Provider) -> Result<ScanReport> {
        let logger = self.logger.with_operation("scan");
        match provider.enumerate() {
            Ok(items) => {
                let mut cache = self.write_cache()?;
                cache.remove_provider(id);
                let count = cache.import(items);
                log_info!(logger, "Provider {} contributed {} items", id, count);
                Ok(ScanReport {
                    provider: id.to_string(),
                    items: count,
                    error: None,
                })
            }
            Err(e) => {
                log_warn!(logger, "Provider {} failed to enumerate: {}", id, e);
                self.write_cache()?.remove_provider(id);
                Ok(ScanReport {
                    provider: id.to_string(),
                    items: 0,
                    error: Some(e),
                })
            }
        }
    }

    /// Ids of registered providers
    pub fn providers(&self) -> Result<Vec<String>> {
        let providers = self.providers.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(providers.keys().cloned().collect())
    }

    pub fn provider(&self, id: &str) -> Result<Arc<dyn Provider>> {
        let providers = self.providers.read().map_err(|_| StoreError::LockPoisoned)?;
        providers
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ProviderNotRegistered(id.to_string()))
    }

    /* ---- queries ---- */

    /// Cached records matching `filter`; every record when `None`
    pub fn find(&self, filter: Option<&Filter>) -> Result<Vec<PkiItem>> {
        let cache = self.read_cache()?;
        Ok(match filter {
            Some(filter) => evaluate(filter, cache.iter()),
            None => cache.export(),
        })
    }

    /// Key record linked to the certificate or request described by `filter`
    pub fn find_key(&self, filter: &Filter) -> Result<PkiItem> {
        let cache = self.read_cache()?;
        let owners: Vec<PkiItem> = evaluate(filter, cache.iter())
            .into_iter()
            .filter(|item| matches!(item.item_type, ItemType::Certificate | ItemType::Request))
            .collect();
        if owners.is_empty() {
            return Err(StoreError::NotFound(
                "no certificate or request matches the filter".to_string(),
            ));
        }

        for owner in &owners {
            let Some(thumbprint) = owner.key.as_deref() else { continue };
            // Prefer a key held by the same provider as the certificate
            let mut keys: Vec<&PkiItem> = cache
                .iter()
                .filter(|item| item.item_type == ItemType::Key && item.hash == thumbprint)
                .collect();
            keys.sort_by_key(|item| item.provider != owner.provider);
            if let Some(key) = keys.first() {
                return Ok((*key).clone());
            }
        }
        Err(StoreError::KeyNotLinked(owners[0].hash.clone()))
    }

    /// Materialize a record through the provider that reported it
    pub fn get_item(&self, item: &PkiItem) -> Result<PkiObject> {
        self.provider(&item.provider)?.materialize(item)
    }

    /// Certificates matching `filter` (type is forced to CERTIFICATE).
    /// Records that no longer resolve are skipped.
    pub fn get_certs(&self, filter: Option<&Filter>) -> Result<Vec<Certificate>> {
        let mut filter = filter.cloned().unwrap_or_default();
        filter.item_type = vec![ItemType::Certificate];
        self.materialize_all(&self.find(Some(&filter))?, PkiObject::into_certificate)
    }

    /// CRLs matching `filter` (type is forced to CRL).
    /// Records that no longer resolve are skipped.
    pub fn get_crls(&self, filter: Option<&Filter>) -> Result<Vec<Crl>> {
        let mut filter = filter.cloned().unwrap_or_default();
        filter.item_type = vec![ItemType::Crl];
        self.materialize_all(&self.find(Some(&filter))?, PkiObject::into_crl)
    }

    fn materialize_all<T>(&self, items: &[PkiItem], convert: fn(PkiObject) -> Result<T>) -> Result<Vec<T>> {
        let mut objects = Vec::with_capacity(items.len());
        for item in items {
            match self.get_item(item).and_then(convert) {
                Ok(object) => objects.push(object),
                Err(e) if is_stale(&e) => {
                    log_warn!(self.logger, "Skipping stale record {}/{}: {}", item.provider, item.uri, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(objects)
    }

    /// Private key paired with `cert`: linked KEY records first, then
    /// providers that resolve keys natively.
    pub fn get_key(&self, cert: &Certificate) -> Result<Key> {
        let linked = self.find(Some(&Filter::new().item_type(ItemType::Key).hash(cert.key_thumbprint())))?;
        let mut last_error = None;
        for item in &linked {
            match self.get_item(item).and_then(PkiObject::into_key) {
                Ok(key) if key.is_private() => return Ok(key),
                Ok(_) => {}
                Err(e) => {
                    log_debug!(self.logger, "Linked key {} unavailable: {}", item.uri, e);
                    last_error = Some(e);
                }
            }
        }

        let providers: Vec<Arc<dyn Provider>> = {
            let providers = self.providers.read().map_err(|_| StoreError::LockPoisoned)?;
            providers.values().cloned().collect()
        };
        for provider in providers.iter().filter(|p| p.capabilities().resolves_keys) {
            match provider.get_key(cert) {
                Ok(key) => return Ok(key),
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(StoreError::KeyNotAvailable(msg)) => StoreError::KeyNotAvailable(msg),
            Some(e) => StoreError::KeyNotAvailable(format!("'{}': {}", cert.subject_name(), e)),
            None => StoreError::KeyNotAvailable(format!("no key paired with '{}'", cert.subject_name())),
        })
    }

    /// Decrypt a password-protected key record
    pub fn unlock_key(&self, item: &PkiItem, password: &str) -> Result<Key> {
        self.provider(&item.provider)?.unlock_key(item, password)
    }

    /* ---- mutations ---- */

    fn add_object(
        &self,
        provider_id: &str,
        category: Category,
        object: PkiObject,
        password: Option<&str>,
    ) -> Result<String> {
        let _gate = self.gate()?;
        let provider = self.provider(provider_id)?;
        let item = provider.store(category, &object, password)?;
        let hash = item.hash.clone();
        log_info!(
            self.logger,
            "Added {} {} to {}/{}",
            item.item_type,
            hash,
            provider_id,
            item.category
        );
        self.write_cache()?.insert(item);
        Ok(hash)
    }

    pub fn add_cert(&self, provider_id: &str, category: Category, cert: &Certificate) -> Result<String> {
        self.add_object(provider_id, category, PkiObject::Certificate(cert.duplicate()), None)
    }

    pub fn add_crl(&self, provider_id: &str, crl: &Crl) -> Result<String> {
        self.add_object(provider_id, Category::Crl, PkiObject::Crl(crl.duplicate()), None)
    }

    /// Store a private key, encrypted with `password` when given
    pub fn add_key(&self, provider_id: &str, key: &Key, password: Option<&str>) -> Result<String> {
        self.add_object(provider_id, Category::My, PkiObject::Key(key.duplicate()), password)
    }

    pub fn add_csr(&self, provider_id: &str, category: Category, csr: &Csr) -> Result<String> {
        self.add_object(provider_id, category, PkiObject::Csr(csr.clone()), None)
    }

    /// Delete the object behind `item` from its provider and the cache
    pub fn remove(&self, item: &PkiItem) -> Result<()> {
        let _gate = self.gate()?;
        self.provider(&item.provider)?.remove(item)?;
        self.write_cache()?.remove(&item.cache_key());
        log_info!(self.logger, "Removed {} {} from {}", item.item_type, item.hash, item.provider);
        Ok(())
    }

    /* ---- persistence ---- */

    pub fn save_cache(&self, path: &Path) -> Result<()> {
        let _gate = self.gate()?;
        self.read_cache()?.save(path)?;
        log_debug!(self.logger, "Saved cache to {}", path.display());
        Ok(())
    }

    /// Merge a saved cache; returns the number of records loaded
    pub fn load_cache(&self, path: &Path) -> Result<usize> {
        let _gate = self.gate()?;
        match CatalogueCache::load(path)? {
            Some(loaded) => Ok(self.write_cache()?.import(loaded.export())),
            None => Ok(0),
        }
    }

    /// Save to the configured cache path, if any
    pub fn flush(&self) -> Result<()> {
        match &self.cache_path {
            Some(path) => self.save_cache(path),
            None => Ok(()),
        }
    }
}

/// Errors meaning a cached record no longer matches live provider state
fn is_stale(error: &StoreError) -> bool {
    match error {
        StoreError::NotFound(_) | StoreError::ProviderNotRegistered(_) | StoreError::Malformed(_) => true,
        StoreError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
        _ => false,
    }
}
