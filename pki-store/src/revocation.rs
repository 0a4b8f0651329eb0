//! Revocation data: distribution points, CRL freshness, local lookup and
//! download.
//!
//! Typical flow: [`get_crl_dist_points`] → [`get_crl_local`] (falling back to
//! [`RevocationResolver::download_crl`]) → feed the CRLs to
//! [`ChainVerifier`](crate::chain::ChainVerifier).

use crate::certificate::Certificate;
use crate::config::StoreConfig;
use crate::crl::Crl;
use crate::error::{Result, StoreError};
use crate::fetch::HttpFetcher;
use crate::store::PkiStore;
use crate::{log_debug, log_info, log_warn};
use chrono::{DateTime, Utc};
use pki_common::fingerprint::sha1_hex;
use pki_common::{Component, Logger};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// CRL distribution point URIs of `cert`; empty when the extension is absent
pub fn get_crl_dist_points(cert: &Certificate) -> Vec<String> {
    cert.crl_dist_points().to_vec()
}

/// `thisUpdate <= now <= nextUpdate`
pub fn check_crl_time(crl: &Crl) -> bool {
    check_crl_time_at(crl, Utc::now())
}

pub fn check_crl_time_at(crl: &Crl, at: DateTime<Utc>) -> bool {
    crl.is_current_at(at)
}

/// Best CRL for `cert` already known to `store`: a current one if any,
/// otherwise the most recently issued.
pub fn get_crl_local(cert: &Certificate, store: &PkiStore) -> Result<Option<Crl>> {
    let now = Utc::now();
    let mut crls: Vec<Crl> = store
        .get_crls(None)?
        .into_iter()
        .filter(|crl| crl.covers(cert))
        .collect();
    crls.sort_by(|a, b| {
        b.is_current_at(now)
            .cmp(&a.is_current_at(now))
            .then_with(|| b.this_update().cmp(&a.this_update()))
    });
    Ok(crls.into_iter().next())
}

pub struct RevocationResolver {
    fetcher: Arc<dyn HttpFetcher>,
    crl_dir: Option<PathBuf>,
    logger: Logger,
}

impl RevocationResolver {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, logger: &Logger) -> Self {
        Self {
            fetcher,
            crl_dir: None,
            logger: logger.with_component(Component::Revocation),
        }
    }

    /// HTTP fetcher and download folder taken from `config`
    pub fn from_config(config: &StoreConfig, logger: &Logger) -> Result<Self> {
        let fetcher = Arc::new(config.fetcher()?);
        let mut resolver = Self::new(fetcher, logger);
        resolver.crl_dir = config.crl_dir.clone();
        Ok(resolver)
    }

    pub fn with_crl_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.crl_dir = Some(dir.into());
        self
    }

    pub fn crl_dir(&self) -> Option<&Path> {
        self.crl_dir.as_deref()
    }

    /// Try each distribution point in order and write the first response
    /// that parses as a CRL to `destination` (DER).
    ///
    /// Individual failures move on to the next point; only exhaustion is
    /// reported, as `AllDistPointsUnreachable`.
    pub async fn download_crl(&self, dist_points: &[String], destination: &Path) -> Result<Crl> {
        self.download_crl_accepting(dist_points, destination, |_| Ok(())).await
    }

    /// [`download_crl`](Self::download_crl) where a parsed CRL must also pass
    /// `accept`; a rejection counts as a failed distribution point.
    pub async fn download_crl_accepting<A>(
        &self,
        dist_points: &[String],
        destination: &Path,
        accept: A,
    ) -> Result<Crl>
    where
        A: Fn(&Crl) -> Result<()> + Send + Sync,
    {
        let mut failures = Vec::with_capacity(dist_points.len());
        for uri in dist_points {
            log_debug!(self.logger, "Fetching CRL from {}", uri);
            let attempt = match self.fetcher.fetch(uri).await {
                Ok(bytes) => Crl::import(&bytes).and_then(|crl| accept(&crl).map(|()| crl)),
                Err(e) => Err(e),
            };
            match attempt {
                Ok(crl) => {
                    crl.save(destination, crate::codec::DataFormat::Der)?;
                    log_info!(
                        self.logger,
                        "Downloaded CRL {} from {} to {}",
                        crl.thumbprint(),
                        uri,
                        destination.display()
                    );
                    return Ok(crl);
                }
                Err(e) => {
                    log_warn!(self.logger, "Distribution point {} failed: {}", uri, e);
                    failures.push(format!("{uri}: {e}"));
                }
            }
        }
        Err(StoreError::AllDistPointsUnreachable(failures))
    }

    /// [`download_crl`](Self::download_crl) under an optional deadline,
    /// reporting through `completion` exactly once. Outstanding fetches are
    /// dropped when the deadline passes and `completion` receives `Timeout`.
    pub async fn download_crl_with<F>(
        &self,
        dist_points: &[String],
        destination: &Path,
        deadline: Option<Duration>,
        completion: F,
    ) where
        F: FnOnce(Result<Crl>) + Send,
    {
        let outcome = match deadline {
            Some(limit) => {
                match tokio::time::timeout(limit, self.download_crl(dist_points, destination)).await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Timeout(format!(
                        "CRL download exceeded {}ms",
                        limit.as_millis()
                    ))),
                }
            }
            None => self.download_crl(dist_points, destination).await,
        };
        completion(outcome);
    }

    /// Current CRL for `cert`: the store's copy when fresh, otherwise a
    /// download into `dir` that is then added to `provider_id`.
    pub async fn refresh_crl(
        &self,
        cert: &Certificate,
        store: &PkiStore,
        provider_id: &str,
        dir: &Path,
    ) -> Result<Crl> {
        if let Some(local) = get_crl_local(cert, store)? {
            if check_crl_time(&local) {
                log_debug!(self.logger, "Using cached CRL {} for {}", local.thumbprint(), cert.subject_name());
                return Ok(local);
            }
        }

        let points = get_crl_dist_points(cert);
        if points.is_empty() {
            return Err(StoreError::NotFound(format!(
                "'{}' has no CRL distribution points",
                cert.subject_name()
            )));
        }

        let destination = crl_path(dir, cert);
        let crl = self
            .download_crl_accepting(&points, &destination, |crl| {
                if crl.covers(cert) {
                    Ok(())
                } else {
                    Err(StoreError::Malformed(format!(
                        "CRL issued by {}, expected {}",
                        crl.issuer_name(),
                        cert.issuer_name()
                    )))
                }
            })
            .await?;
        store.add_crl(provider_id, &crl)?;
        Ok(crl)
    }

    /// [`refresh_crl`](Self::refresh_crl) into the configured download folder
    pub async fn refresh(&self, cert: &Certificate, store: &PkiStore, provider_id: &str) -> Result<Crl> {
        let dir = self
            .crl_dir
            .as_deref()
            .ok_or_else(|| StoreError::NotFound("no CRL download folder configured".to_string()))?;
        std::fs::create_dir_all(dir)?;
        self.refresh_crl(cert, store, provider_id, dir).await
    }
}

/// Download target for the CRL covering `cert`, named after its issuer
pub fn crl_path(dir: &Path, cert: &Certificate) -> PathBuf {
    dir.join(format!("{}.crl", sha1_hex(cert.issuer_name().as_bytes())))
}
