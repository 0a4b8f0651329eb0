//! HTTP retrieval of CRLs and trust lists
//!
//! The resolver only sees [`HttpFetcher`]; [`ReqwestFetcher`] is the default
//! transport with a per-request timeout and a response size cap.

use crate::error::{Result, StoreError};
use async_trait::async_trait;
use std::time::Duration;

/// Default maximum response size (10 MB)
pub const DEFAULT_MAX_SIZE: usize = 10 * 1024 * 1024;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// GET `uri` and return the body; fails with `Unreachable` or `Timeout`
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>>;
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
    max_size: usize,
}

impl ReqwestFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        Self::with_max_size(timeout_secs, DEFAULT_MAX_SIZE)
    }

    pub fn with_max_size(timeout_secs: u64, max_size: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StoreError::Unreachable(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout_secs,
            max_size,
        })
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        if !(uri.starts_with("http://") || uri.starts_with("https://")) {
            return Err(StoreError::Unreachable(format!(
                "unsupported scheme in '{uri}' (must be http or https)"
            )));
        }

        let response = self.client.get(uri).send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout(format!("GET {uri} after {}s", self.timeout_secs))
            } else {
                StoreError::Unreachable(format!("GET {uri} failed: {e}"))
            }
        })?;

        if !response.status().is_success() {
            return Err(StoreError::Unreachable(format!(
                "HTTP {} from {uri}",
                response.status()
            )));
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.max_size {
                return Err(StoreError::Unreachable(format!(
                    "{uri} response of {length} bytes exceeds limit of {}",
                    self.max_size
                )));
            }
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout(format!("reading {uri}"))
            } else {
                StoreError::Unreachable(format!("Failed to read response from {uri}: {e}"))
            }
        })?;
        if bytes.len() > self.max_size {
            return Err(StoreError::Unreachable(format!(
                "{uri} response of {} bytes exceeds limit of {}",
                bytes.len(),
                self.max_size
            )));
        }
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let fetcher = ReqwestFetcher::new(1).unwrap();
        let err = fetcher.fetch("ldap://example.org/crl").await.unwrap_err();
        assert!(matches!(err, StoreError::Unreachable(_)));
    }
}
