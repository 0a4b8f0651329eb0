//! Store configuration
//!
//! Persisted as `config.json` inside a configuration directory.

use crate::codec::DataFormat;
use crate::error::{Result, StoreError};
use crate::fetch::{ReqwestFetcher, DEFAULT_MAX_SIZE, DEFAULT_TIMEOUT_SECS};
use pki_common::{Component, Logger, LoggingConfig};
use serde::{Deserialize, Serialize};
use serde_json::{from_str, to_string_pretty};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Identifier used in log prefixes
    pub store_id: String,

    /// Catalogue cache file; no persistence when unset
    pub cache_path: Option<PathBuf>,

    /// Folder for the system provider; not registered when unset
    pub system_store_dir: Option<PathBuf>,

    /// Where downloaded CRLs are written
    pub crl_dir: Option<PathBuf>,

    /// Per-request HTTP timeout in seconds
    pub fetch_timeout_secs: u64,

    /// Largest CRL or trust list accepted, in bytes
    pub max_crl_size: usize,

    /// Encoding for files the system provider writes
    pub default_format: DataFormat,

    /// Trust lists registered by `PkiStore::load_trust_lists`
    pub tsl_urls: Vec<String>,

    pub logging: LoggingConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_id: "pki".to_string(),
            cache_path: None,
            system_store_dir: None,
            crl_dir: None,
            fetch_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_crl_size: DEFAULT_MAX_SIZE,
            default_format: DataFormat::Der,
            tsl_urls: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Configuration rooted at `base_dir`: cache, system store and CRL
    /// folders all live underneath it
    pub fn in_dir(base_dir: &Path) -> Self {
        Self {
            cache_path: Some(base_dir.join("cache.json")),
            system_store_dir: Some(base_dir.join("store")),
            crl_dir: Some(base_dir.join("crl")),
            ..Self::default()
        }
    }

    /// Root logger carrying `store_id`
    pub fn logger(&self) -> Logger {
        Logger::new_root(Component::Store, &self.store_id)
    }

    /// Install the global logger described by `logging` and return the root
    /// logger. A logger installed earlier is left in place.
    pub fn init_logging(&self) -> Logger {
        if !self.logging.init() {
            log::debug!("Global logger already installed");
        }
        self.logger()
    }

    /// HTTP fetcher honouring the timeout and size limits
    pub fn fetcher(&self) -> Result<ReqwestFetcher> {
        ReqwestFetcher::with_max_size(self.fetch_timeout_secs, self.max_crl_size)
    }

    /// Load configuration from file
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config_file = config_dir.join(CONFIG_FILE);

        if !config_file.exists() {
            return Err(StoreError::NotFound(format!(
                "Configuration file not found: {config_file:?}"
            )));
        }

        let config_content = std::fs::read_to_string(&config_file)?;
        let config: StoreConfig = from_str(&config_content).map_err(|e| {
            StoreError::Serialization(format!("Failed to parse config file {config_file:?}: {e}"))
        })?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(config_dir)?;
        let config_file = config_dir.join(CONFIG_FILE);
        let config_content = to_string_pretty(self)?;
        std::fs::write(&config_file, config_content)?;
        Ok(())
    }

    /// Check if configuration exists
    pub fn exists(config_dir: &Path) -> bool {
        config_dir.join(CONFIG_FILE).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!StoreConfig::exists(dir.path()));

        let mut config = StoreConfig::in_dir(dir.path());
        config.tsl_urls.push("https://example.org/tsl.xml".to_string());
        config.default_format = DataFormat::Pem;
        config.save(dir.path()).unwrap();

        let loaded = StoreConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.cache_path, config.cache_path);
        assert_eq!(loaded.tsl_urls, config.tsl_urls);
        assert_eq!(loaded.default_format, DataFormat::Pem);
    }

    #[test]
    fn test_logger_and_fetcher_follow_config() {
        let mut config = StoreConfig::default();
        config.store_id = "branch-7".to_string();
        config.fetch_timeout_secs = 3;
        config.max_crl_size = 4096;

        let logger = config.logger();
        assert_eq!(logger.store_id(), "branch-7");
        assert_eq!(logger.component(), Component::Store);

        let fetcher = config.fetcher().unwrap();
        assert_eq!(fetcher.timeout_secs(), 3);
        assert_eq!(fetcher.max_size(), 4096);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"store_id":"edge"}"#).unwrap();
        assert_eq!(config.store_id, "edge");
        assert_eq!(config.fetch_timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(config.system_store_dir.is_none());
    }
}
