use thiserror::Error;

/// Error types for the pki-store crate
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Provider not registered: {0}")]
    ProviderNotRegistered(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Key not available: {0}")]
    KeyNotAvailable(String),

    #[error("No key linked to item: {0}")]
    KeyNotLinked(String),

    #[error("Chain incomplete: no issuer found for '{0}'")]
    ChainIncomplete(String),

    #[error("Chain cycle detected at '{0}'")]
    ChainCycle(String),

    #[error("Certificate revoked: serial {serial} ({subject})")]
    Revoked { serial: String, subject: String },

    #[error("Certificate outside its validity window: {0}")]
    Expired(String),

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Unreachable: {0}")]
    Unreachable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("All distribution points unreachable: {}", .0.join(", "))]
    AllDistPointsUnreachable(Vec<String>),

    #[error("Malformed data: {0}")]
    Malformed(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl From<openssl::error::ErrorStack> for StoreError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        StoreError::Crypto(err.to_string())
    }
}

impl From<der::Error> for StoreError {
    fn from(err: der::Error) -> Self {
        StoreError::Malformed(format!("DER error: {err}"))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<pem::PemError> for StoreError {
    fn from(err: pem::PemError) -> Self {
        StoreError::Malformed(format!("PEM error: {err}"))
    }
}

/// Result type for pki-store operations
pub type Result<T> = std::result::Result<T, StoreError>;
