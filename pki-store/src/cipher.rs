//! Password and recipient based encryption of byte buffers and files.
//!
//! Symmetric mode derives the content key and IV with PBKDF2 from a password
//! and writes the `Salted__` framing used by `openssl enc -pbkdf2`, so output
//! can be read back with `openssl enc -d -pbkdf2 -md <digest> -iter <n>`.
//! An explicit key and IV bypass derivation and produce bare ciphertext.
//!
//! Asymmetric mode wraps the content in CMS EnvelopedData for a set of
//! recipient certificates.

use crate::certificate::Certificate;
use crate::cms::{EnvelopedData, RecipientInfo};
use crate::codec::DataFormat;
use crate::crypto::{OpenSslCrypto, SharedCrypto};
use crate::error::{Result, StoreError};
use crate::key::Key;
use crate::log_debug;
use crate::oid::{CipherAlgorithm, DigestAlgorithm};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pki_common::{Component, Logger};
use std::path::Path;

const SALT_MAGIC: &[u8] = b"Salted__";
const SALT_LEN: usize = 8;
const BASE64_LINE: usize = 64;
pub const DEFAULT_ITERATIONS: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CryptoMethod {
    #[default]
    Symmetric,
    Asymmetric,
}

pub struct Cipher {
    crypto: SharedCrypto,
    logger: Logger,
    method: CryptoMethod,
    algorithm: CipherAlgorithm,
    digest: DigestAlgorithm,
    iterations: u32,
    password: Option<String>,
    salt: Option<Vec<u8>>,
    key: Option<Vec<u8>>,
    iv: Option<Vec<u8>>,
    recipients: Vec<Certificate>,
    private_key: Option<Key>,
    recipient_cert: Option<Certificate>,
    last: Option<Derived>,
}

/// Material of the last password operation
struct Derived {
    salt: Vec<u8>,
    key: Vec<u8>,
    iv: Vec<u8>,
}

impl Cipher {
    pub fn new(crypto: SharedCrypto, logger: &Logger) -> Self {
        Self {
            crypto,
            logger: logger.with_component(Component::Cms),
            method: CryptoMethod::default(),
            algorithm: CipherAlgorithm::Aes256Cbc,
            digest: DigestAlgorithm::Sha256,
            iterations: DEFAULT_ITERATIONS,
            password: None,
            salt: None,
            key: None,
            iv: None,
            recipients: Vec::new(),
            private_key: None,
            recipient_cert: None,
            last: None,
        }
    }

    pub fn with_defaults(logger: &Logger) -> Self {
        Self::new(OpenSslCrypto::shared(), logger)
    }

    /* ---- settings ---- */

    pub fn set_crypto_method(&mut self, method: CryptoMethod) {
        self.method = method;
    }

    pub fn set_algorithm(&mut self, algorithm: CipherAlgorithm) {
        self.algorithm = algorithm;
    }

    pub fn set_pass(&mut self, password: &str) {
        self.password = Some(password.to_string());
    }

    /// Digest used by the key derivation
    pub fn set_digest(&mut self, digest: DigestAlgorithm) {
        self.digest = digest;
    }

    pub fn set_iterations(&mut self, iterations: u32) {
        self.iterations = iterations;
    }

    /// Salt for the next encryption; a random one is drawn otherwise
    pub fn set_salt(&mut self, salt: &[u8]) {
        self.salt = Some(salt.to_vec());
    }

    /// Explicit content key; takes precedence over a password
    pub fn set_key(&mut self, key: &[u8]) {
        self.key = Some(key.to_vec());
    }

    pub fn set_iv(&mut self, iv: &[u8]) {
        self.iv = Some(iv.to_vec());
    }

    pub fn add_recipients_certs(&mut self, certs: &[Certificate]) {
        self.recipients.extend(certs.iter().map(Certificate::duplicate));
    }

    pub fn set_priv_key(&mut self, key: Key) {
        self.private_key = Some(key);
    }

    pub fn set_recipient_cert(&mut self, cert: Certificate) {
        self.recipient_cert = Some(cert);
    }

    /* ---- accessors ---- */

    /// Salt of the last password operation, else the configured one
    pub fn salt(&self) -> Option<&[u8]> {
        self.last.as_ref().map(|d| d.salt.as_slice()).or(self.salt.as_deref())
    }

    /// Explicit key, else the key derived by the last password operation
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref().or(self.last.as_ref().map(|d| d.key.as_slice()))
    }

    pub fn iv(&self) -> Option<&[u8]> {
        self.iv.as_deref().or(self.last.as_ref().map(|d| d.iv.as_slice()))
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    /// Block mode of every supported cipher
    pub fn mode(&self) -> &'static str {
        "CBC"
    }

    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest
    }

    /* ---- buffers ---- */

    pub fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        match self.method {
            CryptoMethod::Symmetric => self.encrypt_symmetric(data),
            CryptoMethod::Asymmetric => {
                let enveloped = EnvelopedData::encrypt(data, &self.recipients, self.algorithm, self.crypto.as_ref())?;
                log_debug!(self.logger, "Enveloped {} bytes for {} recipients", data.len(), self.recipients.len());
                Ok(enveloped.der().to_vec())
            }
        }
    }

    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        match self.method {
            CryptoMethod::Symmetric => self.decrypt_symmetric(data),
            CryptoMethod::Asymmetric => self.open_envelope(&EnvelopedData::import(data)?),
        }
    }

    fn encrypt_symmetric(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if self.key.is_some() {
            let (key, iv) = self.explicit_key()?;
            return self.crypto.encrypt(self.algorithm, &key, &iv, data);
        }

        let salt = match &self.salt {
            Some(salt) => salt.clone(),
            None => self.crypto.random(SALT_LEN)?,
        };
        let (key, iv) = self.derive(&salt)?;
        let ciphertext = self.crypto.encrypt(self.algorithm, &key, &iv, data)?;
        log_debug!(self.logger, "Encrypted {} bytes with a password ({:?})", data.len(), self.algorithm);

        let mut out = Vec::with_capacity(SALT_MAGIC.len() + salt.len() + ciphertext.len());
        out.extend_from_slice(SALT_MAGIC);
        out.extend_from_slice(&salt);
        out.extend_from_slice(&ciphertext);
        self.remember(salt, key, iv);
        Ok(out)
    }

    fn decrypt_symmetric(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if self.key.is_some() {
            let (key, iv) = self.explicit_key()?;
            return self.crypto.decrypt(self.algorithm, &key, &iv, data);
        }

        let body = data
            .strip_prefix(SALT_MAGIC)
            .filter(|rest| rest.len() >= SALT_LEN)
            .ok_or_else(|| StoreError::Malformed("missing salt header".to_string()))?;
        let (salt, ciphertext) = body.split_at(SALT_LEN);
        let (key, iv) = self.derive(salt)?;
        let plain = self.crypto.decrypt(self.algorithm, &key, &iv, ciphertext)?;
        self.remember(salt.to_vec(), key, iv);
        Ok(plain)
    }

    fn explicit_key(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let key = self
            .key
            .clone()
            .ok_or_else(|| StoreError::Crypto("no content key set".to_string()))?;
        let iv = self
            .iv
            .clone()
            .ok_or_else(|| StoreError::Crypto("an explicit key needs an IV".to_string()))?;
        Ok((key, iv))
    }

    /// Key then IV, cut from one PBKDF2 output
    fn derive(&self, salt: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let password = self
            .password
            .as_deref()
            .ok_or_else(|| StoreError::Crypto("no password or key set".to_string()))?;
        let key_len = self.algorithm.key_len();
        let mut material = self.crypto.derive_key(
            self.digest,
            password.as_bytes(),
            salt,
            self.iterations,
            key_len + self.algorithm.iv_len(),
        )?;
        let iv = material.split_off(key_len);
        Ok((material, iv))
    }

    fn remember(&mut self, salt: Vec<u8>, key: Vec<u8>, iv: Vec<u8>) {
        self.last = Some(Derived { salt, key, iv });
    }

    fn open_envelope(&self, enveloped: &EnvelopedData) -> Result<Vec<u8>> {
        let key = self
            .private_key
            .as_ref()
            .ok_or_else(|| StoreError::NotFound("no private key set".to_string()))?;
        let cert = self
            .recipient_cert
            .as_ref()
            .ok_or_else(|| StoreError::NotFound("no recipient certificate set".to_string()))?;
        enveloped.decrypt(key, cert, self.crypto.as_ref())
    }

    /* ---- files ---- */

    /// Encrypt `source` into `destination`. PEM output is base64 text,
    /// enveloped output is PEM-armoured CMS.
    pub fn encrypt_file(&mut self, source: &Path, destination: &Path, format: DataFormat) -> Result<()> {
        let data = std::fs::read(source)?;
        match self.method {
            CryptoMethod::Symmetric => {
                let encrypted = self.encrypt_symmetric(&data)?;
                std::fs::write(destination, armour(&encrypted, format))?;
            }
            CryptoMethod::Asymmetric => {
                EnvelopedData::encrypt(&data, &self.recipients, self.algorithm, self.crypto.as_ref())?
                    .save(destination, format)?;
            }
        }
        log_debug!(self.logger, "Encrypted {} to {}", source.display(), destination.display());
        Ok(())
    }

    pub fn decrypt_file(&mut self, source: &Path, destination: &Path, format: DataFormat) -> Result<()> {
        let plain = match self.method {
            CryptoMethod::Symmetric => {
                let data = dearmour(&std::fs::read(source)?, format)?;
                self.decrypt_symmetric(&data)?
            }
            CryptoMethod::Asymmetric => self.open_envelope(&EnvelopedData::load(source)?)?,
        };
        std::fs::write(destination, plain)?;
        log_debug!(self.logger, "Decrypted {} to {}", source.display(), destination.display());
        Ok(())
    }
}

/// Recipient entries of an enveloped file, readable without a private key
pub fn recipient_infos(path: &Path) -> Result<Vec<RecipientInfo>> {
    Ok(EnvelopedData::load(path)?.recipient_infos().to_vec())
}

fn armour(data: &[u8], format: DataFormat) -> Vec<u8> {
    match format {
        DataFormat::Der => data.to_vec(),
        DataFormat::Pem => {
            let encoded = STANDARD.encode(data);
            let mut out = Vec::with_capacity(encoded.len() + encoded.len() / BASE64_LINE + 1);
            for line in encoded.as_bytes().chunks(BASE64_LINE) {
                out.extend_from_slice(line);
                out.push(b'\n');
            }
            out
        }
    }
}

fn dearmour(data: &[u8], format: DataFormat) -> Result<Vec<u8>> {
    match format {
        DataFormat::Der => Ok(data.to_vec()),
        DataFormat::Pem => {
            let compact: Vec<u8> = data.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
            STANDARD
                .decode(compact)
                .map_err(|e| StoreError::Malformed(format!("bad base64: {e}")))
        }
    }
}
