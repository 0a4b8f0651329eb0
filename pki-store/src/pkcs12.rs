//! PKCS#12 bundles of a certificate, its private key and CA certificates

use crate::certificate::Certificate;
use crate::error::{Result, StoreError};
use crate::key::Key;
use openssl::pkcs12::Pkcs12 as OpenSslPkcs12;
use openssl::stack::Stack;
use openssl::x509::X509;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Pkcs12 {
    der: Vec<u8>,
}

impl Pkcs12 {
    /// Bundle `cert` and `key` with an optional CA list under `password`
    pub fn create(
        cert: &Certificate,
        key: &Key,
        ca: &[Certificate],
        password: &str,
        friendly_name: &str,
    ) -> Result<Self> {
        if cert.key_thumbprint() != key.thumbprint() {
            return Err(StoreError::KeyNotLinked(format!(
                "key does not belong to '{}'",
                cert.subject_name()
            )));
        }
        let pkey = key.to_private_pkey()?;
        let x509 = X509::from_der(cert.der())?;

        let mut builder = OpenSslPkcs12::builder();
        builder.name(friendly_name).pkey(&pkey).cert(&x509);
        if !ca.is_empty() {
            let mut stack = Stack::new()?;
            for ca_cert in ca {
                stack.push(X509::from_der(ca_cert.der())?)?;
            }
            builder.ca(stack);
        }
        let bundle = builder.build2(password)?;
        Ok(Self {
            der: bundle.to_der()?,
        })
    }

    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        OpenSslPkcs12::from_der(&der)
            .map_err(|e| StoreError::Malformed(format!("Failed to parse PKCS#12: {e}")))?;
        Ok(Self { der })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_der(std::fs::read(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.der)?;
        Ok(())
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Decrypt the bundle into its certificate, key and CA certificates
    pub fn open(&self, password: &str) -> Result<Pkcs12Contents> {
        let bundle = OpenSslPkcs12::from_der(&self.der)?;
        let parsed = bundle
            .parse2(password)
            .map_err(|e| StoreError::KeyNotAvailable(format!("Cannot open PKCS#12: {e}")))?;

        let certificate = match parsed.cert {
            Some(cert) => Some(Certificate::from_der(cert.to_der()?)?),
            None => None,
        };
        let key = match parsed.pkey {
            Some(pkey) => Some(Key::from_private_der(&pkey.private_key_to_pkcs8()?)?),
            None => None,
        };
        let mut ca = Vec::new();
        if let Some(stack) = parsed.ca {
            for cert in stack.iter() {
                ca.push(Certificate::from_der(cert.to_der()?)?);
            }
        }
        Ok(Pkcs12Contents {
            certificate,
            key,
            ca,
        })
    }
}

/// Decrypted contents of a bundle
#[derive(Debug, Clone)]
pub struct Pkcs12Contents {
    pub certificate: Option<Certificate>,
    pub key: Option<Key>,
    pub ca: Vec<Certificate>,
}
