//! Chain construction and verification
//!
//! [`build_chain`] orders a leaf and its issuers from a candidate set.
//! [`ChainVerifier`] checks signatures, validity windows and revocation over a
//! built chain. Both are pure: no I/O, no shared mutable state.
//!
//! Issuer selection when several candidates carry the issuer's name: prefer
//! one whose validity window contains the verification time, then the latest
//! `notBefore`, then the lowest thumbprint so the result never depends on
//! candidate order.

use crate::certificate::Certificate;
use crate::crl::Crl;
use crate::crypto::{OpenSslCrypto, SharedCrypto};
use crate::error::{Result, StoreError};
use crate::{log_debug, log_warn};
use chrono::{DateTime, Utc};
use pki_common::{Component, Logger};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Build `[leaf, ..., root]` from `candidates` at the current time
pub fn build_chain(leaf: &Certificate, candidates: &[Certificate]) -> Result<Vec<Certificate>> {
    build_chain_at(leaf, candidates, Utc::now())
}

pub fn build_chain_at(
    leaf: &Certificate,
    candidates: &[Certificate],
    now: DateTime<Utc>,
) -> Result<Vec<Certificate>> {
    let mut seen = HashSet::new();
    let pool: Vec<&Certificate> = candidates
        .iter()
        .filter(|cert| seen.insert(cert.thumbprint().to_string()))
        .collect();

    let mut chain = vec![leaf.duplicate()];
    let mut placed: HashSet<String> = HashSet::from([leaf.thumbprint().to_string()]);

    loop {
        let tail = chain.last().ok_or_else(|| StoreError::ChainIncomplete("empty chain".to_string()))?;
        if tail.is_self_issued() {
            return Ok(chain);
        }

        let issuers: Vec<&Certificate> = pool.iter().copied().filter(|c| tail.issued_by(c)).collect();
        if issuers.is_empty() {
            return Err(StoreError::ChainIncomplete(tail.issuer_name().to_string()));
        }

        let next = issuers
            .into_iter()
            .filter(|c| !placed.contains(c.thumbprint()))
            .min_by(|a, b| issuer_preference(a, b, now))
            .ok_or_else(|| StoreError::ChainCycle(tail.subject_name().to_string()))?;

        placed.insert(next.thumbprint().to_string());
        chain.push(next.duplicate());
    }
}

/// `Less` means `a` is preferred
fn issuer_preference(a: &Certificate, b: &Certificate, now: DateTime<Utc>) -> Ordering {
    b.is_valid_at(now)
        .cmp(&a.is_valid_at(now))
        .then_with(|| b.not_before().cmp(&a.not_before()))
        .then_with(|| a.thumbprint().cmp(b.thumbprint()))
}

/// Why a chain is not trusted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustFailure {
    Revoked { serial: String, subject: String },
    Expired { subject: String },
    NotYetValid { subject: String },
    SignatureInvalid { subject: String },
    /// The chain does not end in a self-issued certificate
    Incomplete { subject: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    Trusted,
    Untrusted(TrustFailure),
}

impl ChainStatus {
    pub fn is_trusted(&self) -> bool {
        matches!(self, ChainStatus::Trusted)
    }

    pub fn failure(&self) -> Option<&TrustFailure> {
        match self {
            ChainStatus::Trusted => None,
            ChainStatus::Untrusted(failure) => Some(failure),
        }
    }

    /// Turn an untrusted status into the matching error
    pub fn into_result(self) -> Result<()> {
        match self {
            ChainStatus::Trusted => Ok(()),
            ChainStatus::Untrusted(failure) => Err(match failure {
                TrustFailure::Revoked { serial, subject } => StoreError::Revoked { serial, subject },
                TrustFailure::Expired { subject } => StoreError::Expired(subject),
                TrustFailure::NotYetValid { subject } => {
                    StoreError::Expired(format!("{subject} (not yet valid)"))
                }
                TrustFailure::SignatureInvalid { subject } => StoreError::SignatureInvalid(subject),
                TrustFailure::Incomplete { subject } => StoreError::ChainIncomplete(subject),
            }),
        }
    }
}

#[derive(Clone)]
pub struct ChainVerifier {
    crypto: SharedCrypto,
    logger: Logger,
}

impl ChainVerifier {
    pub fn new(crypto: SharedCrypto, logger: &Logger) -> Self {
        Self {
            crypto,
            logger: logger.with_component(Component::Chain),
        }
    }

    /// Verifier over the default OpenSSL crypto provider
    pub fn with_defaults(logger: &Logger) -> Self {
        Self::new(OpenSslCrypto::shared(), logger)
    }

    pub fn verify_chain(&self, chain: &[Certificate], crls: &[Crl]) -> Result<ChainStatus> {
        self.verify_chain_at(chain, crls, Utc::now())
    }

    /// Check every link of `[leaf, ..., root]` at `at`.
    ///
    /// Trust failures come back as `Untrusted`; only structural problems
    /// (empty chain, unparseable material) are errors.
    pub fn verify_chain_at(
        &self,
        chain: &[Certificate],
        crls: &[Crl],
        at: DateTime<Utc>,
    ) -> Result<ChainStatus> {
        let root = chain
            .last()
            .ok_or_else(|| StoreError::ChainIncomplete("empty chain".to_string()))?;
        if !root.is_self_issued() {
            return Ok(ChainStatus::Untrusted(TrustFailure::Incomplete {
                subject: root.subject_name().to_string(),
            }));
        }

        for (index, cert) in chain.iter().enumerate() {
            let issuer = chain.get(index + 1).unwrap_or(cert);

            if let Some(serial) = self.revoked_serial(cert, issuer, crls)? {
                log_debug!(self.logger, "{} revoked (serial {})", cert.subject_name(), serial);
                return Ok(ChainStatus::Untrusted(TrustFailure::Revoked {
                    serial,
                    subject: cert.subject_name().to_string(),
                }));
            }

            if !cert.issued_by(issuer) || !cert.verify_signed_by(issuer, self.crypto.as_ref())? {
                return Ok(ChainStatus::Untrusted(TrustFailure::SignatureInvalid {
                    subject: cert.subject_name().to_string(),
                }));
            }

            if at < cert.not_before() {
                return Ok(ChainStatus::Untrusted(TrustFailure::NotYetValid {
                    subject: cert.subject_name().to_string(),
                }));
            }
            if at > cert.not_after() {
                return Ok(ChainStatus::Untrusted(TrustFailure::Expired {
                    subject: cert.subject_name().to_string(),
                }));
            }
        }

        log_debug!(self.logger, "Chain for {} verified ({} certificates)", chain[0].subject_name(), chain.len());
        Ok(ChainStatus::Trusted)
    }

    /// Serial of `cert` if any CRL from its issuer lists it. CRLs whose
    /// signature does not verify against `issuer` are ignored.
    fn revoked_serial(&self, cert: &Certificate, issuer: &Certificate, crls: &[Crl]) -> Result<Option<String>> {
        for crl in crls.iter().filter(|crl| crl.covers(cert)) {
            let Some(entry) = crl.get_revoked_for(cert) else { continue };
            if crl.issued_by(issuer) && !crl.verify_signature(issuer, self.crypto.as_ref())? {
                log_warn!(
                    self.logger,
                    "Ignoring CRL {} from {}: signature does not verify",
                    crl.thumbprint(),
                    crl.issuer_name()
                );
                continue;
            }
            return Ok(Some(entry.serial.clone()));
        }
        Ok(None)
    }

    /// Build a chain for `cert` from `candidates` and verify it
    pub fn verify_certificate(
        &self,
        cert: &Certificate,
        candidates: &[Certificate],
        crls: &[Crl],
    ) -> Result<ChainStatus> {
        let now = Utc::now();
        let chain = build_chain_at(cert, candidates, now)?;
        self.verify_chain_at(&chain, crls, now)
    }
}
