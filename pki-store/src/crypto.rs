//! Cryptographic primitives behind a trait seam.
//!
//! The engine never computes digests, signatures or ciphers itself; it asks a
//! [`CryptoProvider`]. [`OpenSslCrypto`] is the default implementation.

use crate::error::{Result, StoreError};
use crate::key::Key;
use crate::oid::{CipherAlgorithm, DigestAlgorithm};
use openssl::encrypt::{Decrypter, Encrypter};
use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKey};
use openssl::rsa::Padding;
use openssl::sign::{Signer, Verifier};
use openssl::symm::{self, Cipher};
use std::sync::Arc;

/// Digest, signature and cipher operations used by chain verification, CRL
/// checks and CMS.
pub trait CryptoProvider: Send + Sync {
    /// Hash `data` with `algorithm`.
    fn digest(&self, algorithm: DigestAlgorithm, data: &[u8]) -> Result<Vec<u8>>;

    /// Sign `data` with a private key, hashing with `algorithm` first.
    fn sign(&self, algorithm: DigestAlgorithm, data: &[u8], key: &Key) -> Result<Vec<u8>>;

    /// Check `signature` over `data` against a DER SubjectPublicKeyInfo.
    /// A signature that does not verify is `Ok(false)`; an unusable public
    /// key is an error.
    fn verify(
        &self,
        algorithm: DigestAlgorithm,
        data: &[u8],
        signature: &[u8],
        public_key: &[u8],
    ) -> Result<bool>;

    fn encrypt(&self, cipher: CipherAlgorithm, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&self, cipher: CipherAlgorithm, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>>;

    /// Encrypt a content-encryption key for the holder of `public_key` (SPKI DER).
    fn wrap_key(&self, public_key: &[u8], content_key: &[u8]) -> Result<Vec<u8>>;

    /// Recover a content-encryption key with the recipient's private key.
    fn unwrap_key(&self, key: &Key, wrapped: &[u8]) -> Result<Vec<u8>>;

    /// Fill a buffer with random bytes.
    fn random(&self, len: usize) -> Result<Vec<u8>>;

    /// PBKDF2-HMAC over `password`, producing `len` bytes.
    fn derive_key(
        &self,
        digest: DigestAlgorithm,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        len: usize,
    ) -> Result<Vec<u8>>;
}

/// Shared handle to a crypto provider
pub type SharedCrypto = Arc<dyn CryptoProvider>;

/// Default provider backed by OpenSSL
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenSslCrypto;

impl OpenSslCrypto {
    pub fn new() -> Self {
        Self
    }

    pub fn shared() -> SharedCrypto {
        Arc::new(Self)
    }
}

pub(crate) fn message_digest(algorithm: DigestAlgorithm) -> MessageDigest {
    match algorithm {
        DigestAlgorithm::Sha1 => MessageDigest::sha1(),
        DigestAlgorithm::Sha256 => MessageDigest::sha256(),
        DigestAlgorithm::Sha384 => MessageDigest::sha384(),
        DigestAlgorithm::Sha512 => MessageDigest::sha512(),
    }
}

fn cipher(algorithm: CipherAlgorithm) -> Cipher {
    match algorithm {
        CipherAlgorithm::Aes128Cbc => Cipher::aes_128_cbc(),
        CipherAlgorithm::Aes192Cbc => Cipher::aes_192_cbc(),
        CipherAlgorithm::Aes256Cbc => Cipher::aes_256_cbc(),
        CipherAlgorithm::DesEde3Cbc => Cipher::des_ede3_cbc(),
    }
}

impl CryptoProvider for OpenSslCrypto {
    fn digest(&self, algorithm: DigestAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
        let digest = openssl::hash::hash(message_digest(algorithm), data)?;
        Ok(digest.to_vec())
    }

    fn sign(&self, algorithm: DigestAlgorithm, data: &[u8], key: &Key) -> Result<Vec<u8>> {
        let pkey = key.to_private_pkey()?;
        if pkey.id() == Id::ED25519 {
            let mut signer = Signer::new_without_digest(&pkey)?;
            return Ok(signer.sign_oneshot_to_vec(data)?);
        }
        let mut signer = Signer::new(message_digest(algorithm), &pkey)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }

    fn verify(
        &self,
        algorithm: DigestAlgorithm,
        data: &[u8],
        signature: &[u8],
        public_key: &[u8],
    ) -> Result<bool> {
        let pkey = PKey::public_key_from_der(public_key)
            .map_err(|e| StoreError::Malformed(format!("Invalid public key: {e}")))?;
        if pkey.id() == Id::ED25519 {
            let mut verifier = Verifier::new_without_digest(&pkey)?;
            return Ok(verifier.verify_oneshot(signature, data).unwrap_or(false));
        }
        let mut verifier = Verifier::new(message_digest(algorithm), &pkey)?;
        verifier.update(data)?;
        // A garbled signature encoding is a mismatch, not a structural failure
        Ok(verifier.verify(signature).unwrap_or(false))
    }

    fn encrypt(&self, algorithm: CipherAlgorithm, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        check_lengths(algorithm, key, iv)?;
        Ok(symm::encrypt(cipher(algorithm), key, Some(iv), data)?)
    }

    fn decrypt(&self, algorithm: CipherAlgorithm, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        check_lengths(algorithm, key, iv)?;
        symm::decrypt(cipher(algorithm), key, Some(iv), data)
            .map_err(|e| StoreError::Crypto(format!("Content decryption failed: {e}")))
    }

    fn wrap_key(&self, public_key: &[u8], content_key: &[u8]) -> Result<Vec<u8>> {
        let pkey = PKey::public_key_from_der(public_key)
            .map_err(|e| StoreError::Malformed(format!("Invalid public key: {e}")))?;
        if pkey.id() != Id::RSA {
            return Err(StoreError::Unsupported(
                "key transport requires an RSA recipient".to_string(),
            ));
        }
        let mut encrypter = Encrypter::new(&pkey)?;
        encrypter.set_rsa_padding(Padding::PKCS1)?;
        let mut out = vec![0u8; encrypter.encrypt_len(content_key)?];
        let len = encrypter.encrypt(content_key, &mut out)?;
        out.truncate(len);
        Ok(out)
    }

    fn unwrap_key(&self, key: &Key, wrapped: &[u8]) -> Result<Vec<u8>> {
        let pkey = key.to_private_pkey()?;
        let mut decrypter = Decrypter::new(&pkey)?;
        decrypter.set_rsa_padding(Padding::PKCS1)?;
        let mut out = vec![0u8; decrypter.decrypt_len(wrapped)?];
        let len = decrypter
            .decrypt(wrapped, &mut out)
            .map_err(|e| StoreError::Crypto(format!("Key unwrap failed: {e}")))?;
        out.truncate(len);
        Ok(out)
    }

    fn random(&self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        openssl::rand::rand_bytes(&mut buf)?;
        Ok(buf)
    }

    fn derive_key(
        &self,
        digest: DigestAlgorithm,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        len: usize,
    ) -> Result<Vec<u8>> {
        if iterations == 0 {
            return Err(StoreError::Crypto("PBKDF2 needs at least one iteration".to_string()));
        }
        let mut buf = vec![0u8; len];
        openssl::pkcs5::pbkdf2_hmac(password, salt, iterations as usize, message_digest(digest), &mut buf)?;
        Ok(buf)
    }
}

fn check_lengths(algorithm: CipherAlgorithm, key: &[u8], iv: &[u8]) -> Result<()> {
    if key.len() != algorithm.key_len() {
        return Err(StoreError::Crypto(format!(
            "{:?} needs a {}-byte key, got {}",
            algorithm,
            algorithm.key_len(),
            key.len()
        )));
    }
    if iv.len() != algorithm.iv_len() {
        return Err(StoreError::Crypto(format!(
            "{:?} needs a {}-byte IV, got {}",
            algorithm,
            algorithm.iv_len(),
            iv.len()
        )));
    }
    Ok(())
}
