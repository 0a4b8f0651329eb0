//! DER / PEM framing for every identity primitive.
//!
//! DER is raw binary. PEM is base64 with `-----BEGIN <label>-----` headers;
//! decoding accepts any line wrapping and always yields the same DER.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// On-disk encoding of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum DataFormat {
    #[default]
    #[serde(rename = "DER")]
    Der,
    #[serde(rename = "PEM")]
    Pem,
}

impl DataFormat {
    /// Sniff the encoding of `data`
    pub fn detect(data: &[u8]) -> Self {
        let start = data
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(data.len());
        if data[start..].starts_with(b"-----BEGIN") {
            DataFormat::Pem
        } else {
            DataFormat::Der
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DataFormat::Der => "der",
            DataFormat::Pem => "pem",
        }
    }
}

/// PEM labels used by the store
pub mod label {
    pub const CERTIFICATE: &str = "CERTIFICATE";
    pub const CRL: &str = "X509 CRL";
    pub const CSR: &str = "CERTIFICATE REQUEST";
    pub const PRIVATE_KEY: &str = "PRIVATE KEY";
    pub const ENCRYPTED_PRIVATE_KEY: &str = "ENCRYPTED PRIVATE KEY";
    pub const PUBLIC_KEY: &str = "PUBLIC KEY";
    pub const CMS: &str = "CMS";
}

/// Accepted alternative labels per primary label
fn label_aliases(expected: &str) -> &'static [&'static str] {
    match expected {
        label::CERTIFICATE => &["CERTIFICATE", "X509 CERTIFICATE", "TRUSTED CERTIFICATE"],
        label::CRL => &["X509 CRL"],
        label::CSR => &["CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST"],
        label::PRIVATE_KEY => &["PRIVATE KEY", "RSA PRIVATE KEY", "EC PRIVATE KEY"],
        label::ENCRYPTED_PRIVATE_KEY => &["ENCRYPTED PRIVATE KEY"],
        label::PUBLIC_KEY => &["PUBLIC KEY"],
        label::CMS => &["CMS", "PKCS7"],
        _ => &[],
    }
}

/// Wrap DER bytes in PEM framing
pub fn der_to_pem(der: &[u8], tag: &str) -> Vec<u8> {
    let block = pem::Pem::new(tag, der.to_vec());
    pem::encode_config(&block, pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF))
        .into_bytes()
}

/// Unwrap the first PEM block, checking its label
pub fn pem_to_der(data: &[u8], expected: &str) -> Result<Vec<u8>> {
    let block = pem::parse(data)?;
    let aliases = label_aliases(expected);
    if !aliases.is_empty() && !aliases.contains(&block.tag()) {
        return Err(StoreError::Malformed(format!(
            "expected PEM '{}', found '{}'",
            expected,
            block.tag()
        )));
    }
    Ok(block.into_contents())
}

/// Label of the first PEM block in `data`
pub fn pem_label(data: &[u8]) -> Result<String> {
    Ok(pem::parse(data)?.tag().to_string())
}

/// Decode bytes of either format to DER
pub fn decode(data: &[u8], format: DataFormat, expected: &str) -> Result<Vec<u8>> {
    match format {
        DataFormat::Der => {
            if data.is_empty() {
                return Err(StoreError::Malformed("empty DER input".to_string()));
            }
            Ok(data.to_vec())
        }
        DataFormat::Pem => pem_to_der(data, expected),
    }
}

/// Decode bytes with the format sniffed from the data
pub fn decode_any(data: &[u8], expected: &str) -> Result<Vec<u8>> {
    decode(data, DataFormat::detect(data), expected)
}

/// Encode DER to the requested format
pub fn encode(der: &[u8], format: DataFormat, tag: &str) -> Vec<u8> {
    match format {
        DataFormat::Der => der.to_vec(),
        DataFormat::Pem => der_to_pem(der, tag),
    }
}

/// Read a file and decode it, sniffing the format
pub fn read_file(path: &Path, expected: &str) -> Result<Vec<u8>> {
    let data = std::fs::read(path)?;
    decode_any(&data, expected)
}

/// Write DER to a file in the given format, via a temporary file and rename
pub fn write_file(path: &Path, der: &[u8], format: DataFormat, tag: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, encode(der, format, tag))?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(DataFormat::detect(b"\n-----BEGIN CERTIFICATE-----"), DataFormat::Pem);
        assert_eq!(DataFormat::detect(&[0x30, 0x82, 0x01]), DataFormat::Der);
    }

    #[test]
    fn test_pem_decodes_to_same_der() {
        let der = vec![0x30, 0x03, 0x02, 0x01, 0x05];
        let pem = der_to_pem(&der, label::CERTIFICATE);
        assert!(pem.starts_with(b"-----BEGIN CERTIFICATE-----"));
        assert_eq!(decode_any(&pem, label::CERTIFICATE).unwrap(), der);

        // Re-wrapped with CRLF line endings still decodes identically
        let crlf = String::from_utf8(pem).unwrap().replace('\n', "\r\n");
        assert_eq!(decode_any(crlf.as_bytes(), label::CERTIFICATE).unwrap(), der);
    }

    #[test]
    fn test_pem_label_mismatch_is_malformed() {
        let pem = der_to_pem(&[0x30, 0x00], label::CRL);
        let err = pem_to_der(&pem, label::CERTIFICATE).unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn test_write_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("item.pem");
        let der = vec![0x30, 0x01, 0x00];
        write_file(&path, &der, DataFormat::Pem, label::CSR).unwrap();
        assert_eq!(read_file(&path, label::CSR).unwrap(), der);
    }
}
