//! PKI Store – unified trust store facade
//!
//! Aggregates certificates, keys, CRLs and requests from several providers
//! into one queryable catalogue, and builds the trust operations on top of
//! it: chain construction and verification, CRL discovery and refresh, and
//! CMS signing, verification and enveloping.

#[macro_use]
mod macros;

pub mod cache;
pub mod certificate;
pub mod chain;
pub mod cipher;
pub mod cms;
pub mod codec;
pub mod config;
pub mod crl;
pub mod crypto;
pub mod csr;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod item;
pub mod key;
pub mod oid;
pub mod pkcs12;
pub mod provider;
pub mod revocation;
pub mod store;

pub use error::{Result, StoreError};

pub use certificate::{normalize_dn, Certificate};
pub use crl::{Crl, RevokedCertificate};
pub use csr::Csr;
pub use key::{Key, KeyKind};
pub use oid::{Algorithm, CipherAlgorithm, DigestAlgorithm, KeyAlgorithm, Oid, OidClass};
pub use pkcs12::{Pkcs12, Pkcs12Contents};

pub use codec::DataFormat;
pub use crypto::{CryptoProvider, OpenSslCrypto, SharedCrypto};

pub use cache::CatalogueCache;
pub use filter::Filter;
pub use item::{Category, ItemKey, ItemType, PkiItem};

pub use provider::{
    MemoryKeyStore, NativeKeyStore, NativeProvider, PkiObject, Provider, ProviderCaps, ProviderKind,
    SystemProvider, TslProvider,
};

pub use config::StoreConfig;
pub use store::{PkiStore, ScanReport};

pub use chain::{build_chain, ChainStatus, ChainVerifier, TrustFailure};
pub use fetch::{HttpFetcher, ReqwestFetcher};
pub use revocation::{check_crl_time, get_crl_dist_points, get_crl_local, RevocationResolver};

pub use self::cms::{EnvelopedData, RecipientInfo, SignedData, Signer, SignerId};
pub use cipher::{Cipher, CryptoMethod};
