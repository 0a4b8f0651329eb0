//! Folder-backed provider
//!
//! Layout under the root folder:
//!
//! ```text
//! MY/      personal certificates and requests
//! OTHERS/  other parties' certificates
//! TRUST/   trusted roots
//! CRL/     revocation lists
//! KEYS/    private keys, named by key thumbprint
//! ```
//!
//! Files are named `<hash>.<ext>` where the extension gives the item type
//! (`crt`, `crl`, `csr`, `key`). Either DER or PEM is accepted on read.

use super::{PkiObject, Provider, ProviderCaps, ProviderKind};
use crate::certificate::Certificate;
use crate::codec::{self, label, DataFormat};
use crate::crl::Crl;
use crate::csr::Csr;
use crate::error::{Result, StoreError};
use crate::item::{Category, ItemType, PkiItem};
use crate::key::Key;
use crate::{log_debug, log_info, log_warn};
use pki_common::{Component, Logger};
use std::fs;
use std::path::{Path, PathBuf};

const KEYS_DIR: &str = "KEYS";

pub struct SystemProvider {
    root: PathBuf,
    format: DataFormat,
    logger: Logger,
}

impl SystemProvider {
    /// Open (and create if needed) a store folder
    pub fn new(root: impl Into<PathBuf>, logger: &Logger) -> Result<Self> {
        let root = root.into();
        for category in Category::ALL {
            fs::create_dir_all(root.join(category.as_str()))?;
        }
        fs::create_dir_all(root.join(KEYS_DIR))?;
        Ok(Self {
            root,
            format: DataFormat::Der,
            logger: logger.with_component(Component::Provider),
        })
    }

    /// Encoding used for files this provider writes
    pub fn with_format(mut self, format: DataFormat) -> Self {
        self.format = format;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scan_dir(&self, dir: &str, items: &mut Vec<PkiItem>) -> Result<()> {
        let path = self.root.join(dir);
        if !path.is_dir() {
            return Ok(());
        }
        let mut entries: Vec<PathBuf> = fs::read_dir(&path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        entries.sort();

        for file in entries {
            let uri = format!(
                "{}/{}",
                dir,
                file.file_name().and_then(|n| n.to_str()).unwrap_or_default()
            );
            match self.describe(&file, dir, uri.clone()) {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(e) => log_warn!(self.logger, "Skipping unreadable file {}: {}", uri, e),
            }
        }
        Ok(())
    }

    fn describe(&self, file: &Path, dir: &str, uri: String) -> Result<Option<PkiItem>> {
        let ext = file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let data = fs::read(file)?;
        let format = DataFormat::detect(&data);
        let provider = self.id();

        if dir == KEYS_DIR {
            if ext != "key" {
                return Ok(None);
            }
            return match Key::import(&data, None) {
                Ok(key) => Ok(Some(
                    PkiItem::from_key(&key, &provider, Category::My, uri).with_format(format),
                )),
                Err(StoreError::KeyNotAvailable(_)) => {
                    // Protected keys are identified by their file name
                    let stem = file
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or_default()
                        .to_string();
                    Ok(Some(
                        PkiItem::encrypted_key(&stem, &provider, Category::My, uri).with_format(format),
                    ))
                }
                Err(e) => Err(e),
            };
        }

        let category = Category::parse(dir)
            .ok_or_else(|| StoreError::Malformed(format!("unknown store folder {dir}")))?;
        let item = match ext.as_str() {
            "crt" | "cer" | "pem" | "der" => {
                let cert = Certificate::from_der(codec::decode(&data, format, label::CERTIFICATE)?)?;
                PkiItem::from_certificate(&cert, &provider, category, uri)
            }
            "crl" => {
                let crl = Crl::from_der(codec::decode(&data, format, label::CRL)?)?;
                PkiItem::from_crl(&crl, &provider, uri)
            }
            "csr" | "req" => {
                let csr = Csr::from_der(codec::decode(&data, format, label::CSR)?)?;
                PkiItem::from_csr(&csr, &provider, category, uri)
            }
            _ => return Ok(None),
        };
        Ok(Some(item.with_format(format)))
    }

    fn path_of(&self, item: &PkiItem) -> Result<PathBuf> {
        // uri is always `<DIR>/<file>` as produced by this provider
        let (dir, file) = item
            .uri
            .split_once('/')
            .ok_or_else(|| StoreError::NotFound(item.uri.clone()))?;
        let known_dir = dir == KEYS_DIR || Category::ALL.iter().any(|category| category.as_str() == dir);
        if !known_dir || file.contains(['/', '\\']) || file.contains("..") {
            return Err(StoreError::NotFound(item.uri.clone()));
        }
        let path = self.root.join(dir).join(file);
        if !path.is_file() {
            return Err(StoreError::NotFound(format!("{} ({})", item.hash, item.uri)));
        }
        Ok(path)
    }
}

fn extension_for(item_type: ItemType) -> &'static str {
    match item_type {
        ItemType::Certificate => "crt",
        ItemType::Crl => "crl",
        ItemType::Request => "csr",
        ItemType::Key => "key",
    }
}

impl Provider for SystemProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::System
    }

    fn capabilities(&self) -> ProviderCaps {
        ProviderCaps {
            writable: true,
            resolves_keys: false,
        }
    }

    fn enumerate(&self) -> Result<Vec<PkiItem>> {
        let mut items = Vec::new();
        for category in Category::ALL {
            self.scan_dir(category.as_str(), &mut items)?;
        }
        self.scan_dir(KEYS_DIR, &mut items)?;
        log_debug!(self.logger, "Enumerated {} items under {}", items.len(), self.root.display());
        Ok(items)
    }

    fn materialize(&self, item: &PkiItem) -> Result<PkiObject> {
        let path = self.path_of(item)?;
        let data = fs::read(&path)?;
        Ok(match item.item_type {
            ItemType::Certificate => PkiObject::Certificate(Certificate::import(&data)?),
            ItemType::Crl => PkiObject::Crl(Crl::import(&data)?),
            ItemType::Request => PkiObject::Csr(Csr::import(&data)?),
            ItemType::Key => PkiObject::Key(Key::import(&data, None)?),
        })
    }

    fn unlock_key(&self, item: &PkiItem, password: &str) -> Result<Key> {
        if item.item_type != ItemType::Key {
            return Err(StoreError::Unsupported(format!("{} is not a key", item.hash)));
        }
        let data = fs::read(self.path_of(item)?)?;
        Key::import(&data, Some(password))
    }

    fn store(&self, category: Category, object: &PkiObject, password: Option<&str>) -> Result<PkiItem> {
        let provider = self.id();
        let file_name = format!("{}.{}", object.hash(), extension_for(object.item_type()));

        let (dir, item) = match object {
            PkiObject::Certificate(cert) => {
                if category == Category::Crl {
                    return Err(StoreError::Unsupported(
                        "certificates cannot be stored in the CRL category".to_string(),
                    ));
                }
                let uri = format!("{}/{}", category.as_str(), file_name);
                cert.save(&self.root.join(&uri), self.format)?;
                (category.as_str(), PkiItem::from_certificate(cert, &provider, category, uri))
            }
            PkiObject::Crl(crl) => {
                let uri = format!("{}/{}", Category::Crl.as_str(), file_name);
                crl.save(&self.root.join(&uri), self.format)?;
                (Category::Crl.as_str(), PkiItem::from_crl(crl, &provider, uri))
            }
            PkiObject::Csr(csr) => {
                if category == Category::Crl {
                    return Err(StoreError::Unsupported(
                        "requests cannot be stored in the CRL category".to_string(),
                    ));
                }
                let uri = format!("{}/{}", category.as_str(), file_name);
                csr.save(&self.root.join(&uri), self.format)?;
                (category.as_str(), PkiItem::from_csr(csr, &provider, category, uri))
            }
            PkiObject::Key(key) => {
                if !key.is_private() {
                    return Err(StoreError::Unsupported(
                        "only private keys are stored".to_string(),
                    ));
                }
                let uri = format!("{}/{}", KEYS_DIR, file_name);
                key.save(&self.root.join(&uri), self.format, password)?;
                let mut item = PkiItem::from_key(key, &provider, Category::My, uri);
                item.key_encrypted = Some(password.is_some());
                (KEYS_DIR, item)
            }
        };

        log_info!(self.logger, "Stored {} {} in {}", item.item_type, item.hash, dir);
        Ok(item.with_format(self.format))
    }

    fn remove(&self, item: &PkiItem) -> Result<()> {
        let path = self.path_of(item)?;
        fs::remove_file(&path)?;
        log_info!(self.logger, "Removed {} {}", item.item_type, item.uri);
        Ok(())
    }
}
