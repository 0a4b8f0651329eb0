//! Catalogue cache
//!
//! A pure index of [`PkiItem`] records keyed by `(provider, type, category,
//! hash)`. It never validates cryptographic material.

use crate::error::{Result, StoreError};
use crate::item::{ItemKey, PkiItem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

const CACHE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct CacheDocument {
    version: u32,
    items: Vec<PkiItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogueCache {
    items: BTreeMap<ItemKey, PkiItem>,
}

impl CatalogueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `items`; a record whose key already exists replaces it.
    pub fn import<I>(&mut self, items: I) -> usize
    where
        I: IntoIterator<Item = PkiItem>,
    {
        let mut count = 0;
        for item in items {
            self.insert(item);
            count += 1;
        }
        count
    }

    /// All records, ordered by key
    pub fn export(&self) -> Vec<PkiItem> {
        self.items.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PkiItem> {
        self.items.values()
    }

    pub fn insert(&mut self, item: PkiItem) -> Option<PkiItem> {
        self.items.insert(item.cache_key(), item)
    }

    pub fn get(&self, key: &ItemKey) -> Option<&PkiItem> {
        self.items.get(key)
    }

    pub fn remove(&mut self, key: &ItemKey) -> Option<PkiItem> {
        self.items.remove(key)
    }

    /// Drop every record contributed by `provider`
    pub fn remove_provider(&mut self, provider: &str) -> usize {
        let before = self.items.len();
        self.items.retain(|key, _| key.provider != provider);
        before - self.items.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        let document = CacheDocument {
            version: CACHE_VERSION,
            items: self.export(),
        };
        Ok(serde_json::to_vec_pretty(&document)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let document: CacheDocument = serde_json::from_slice(data)?;
        if document.version > CACHE_VERSION {
            return Err(StoreError::Unsupported(format!(
                "cache format version {}",
                document.version
            )));
        }
        let mut cache = Self::new();
        cache.import(document.items);
        Ok(cache)
    }

    /// Persist to `path` through a temporary file and rename
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = self.to_json()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(&data)?;
            f.flush()?;
            f.sync_all()?;
        }
        fs::rename(tmp_path, path)?;
        Ok(())
    }

    /// Load from `path`; `None` when no cache has been saved there yet
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        Ok(Some(Self::from_json(&data)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Category, ItemType};

    fn sample(provider: &str, hash: &str, subject: &str) -> PkiItem {
        let mut item = PkiItem::encrypted_key(hash, provider, Category::My, format!("KEYS/{hash}"));
        item.item_type = ItemType::Certificate;
        item.key_encrypted = None;
        item.subject_name = Some(subject.to_string());
        item
    }

    #[test]
    fn test_import_is_idempotent() {
        let items = vec![sample("SYSTEM", "aa", "CN=A"), sample("SYSTEM", "bb", "CN=B")];

        let mut once = CatalogueCache::new();
        once.import(items.clone());
        let mut twice = CatalogueCache::new();
        twice.import(items.clone());
        twice.import(items);

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 2);
    }

    #[test]
    fn test_last_import_wins() {
        let mut cache = CatalogueCache::new();
        cache.import(vec![sample("SYSTEM", "aa", "CN=Old")]);
        cache.import(vec![sample("SYSTEM", "aa", "CN=New")]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.export()[0].subject_name.as_deref(), Some("CN=New"));
    }

    #[test]
    fn test_same_hash_under_two_providers_is_kept_twice() {
        let mut cache = CatalogueCache::new();
        cache.import(vec![sample("SYSTEM", "aa", "CN=A"), sample("CRYPTOPRO", "aa", "CN=A")]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.remove_provider("SYSTEM"), 1);
        assert_eq!(cache.export()[0].provider, "CRYPTOPRO");
    }

    #[test]
    fn test_save_load_preserves_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut item = sample("SYSTEM", "aa", "CN=A");
        item.serial = Some("01A2".into());
        item.not_before = Some(chrono::Utc::now());
        item.organization_name = Some("Acme".into());
        let mut cache = CatalogueCache::new();
        cache.import(vec![item]);
        cache.save(&path).unwrap();

        let loaded = CatalogueCache::load(&path).unwrap().unwrap();
        assert_eq!(loaded, cache);
        assert!(CatalogueCache::load(&dir.path().join("missing.json"))
            .unwrap()
            .is_none());
    }
}
