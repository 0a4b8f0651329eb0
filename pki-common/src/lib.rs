//! PKI Common
//!
//! Shared plumbing for the PKI trust store workspace.
//!
//! This crate provides:
//! - Component-based structured logging with store id context
//! - Content fingerprint helpers used as catalogue identities

pub mod logging;

pub use logging::{Component, LogLevel, Logger, LoggingConfig};

/// Content fingerprints used as thumbprints and catalogue hashes
pub mod fingerprint {
    use sha1::Sha1;
    use sha2::{Digest, Sha256};

    /// SHA-1 digest of `data`, lowercase hex.
    pub fn sha1_hex(data: &[u8]) -> String {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// SHA-256 digest of `data`, lowercase hex.
    pub fn sha256_hex(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Canonical serial number text: big-endian integer bytes without
    /// leading zero octets, uppercase hex.
    pub fn serial_hex(raw: &[u8]) -> String {
        let first = raw.iter().position(|b| *b != 0).unwrap_or(raw.len());
        let trimmed = &raw[first..];
        if trimmed.is_empty() {
            return "00".to_string();
        }
        hex::encode_upper(trimmed)
    }

    /// Normalise a user supplied serial (`01:A2`, `0x1a2`, `1A2`) to the
    /// form produced by [`serial_hex`].
    pub fn normalize_serial(text: &str) -> String {
        let cleaned: String = text
            .trim()
            .trim_start_matches("0x")
            .trim_start_matches("0X")
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .collect::<String>()
            .to_uppercase();
        let trimmed = cleaned.trim_start_matches('0');
        if trimmed.is_empty() {
            return "00".to_string();
        }
        if trimmed.len() % 2 == 1 {
            format!("0{trimmed}")
        } else {
            trimmed.to_string()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_serial_forms_agree() {
            assert_eq!(serial_hex(&[0x00, 0x01, 0xa2]), "01A2");
            assert_eq!(normalize_serial("01:a2"), "01A2");
            assert_eq!(normalize_serial("0x1A2"), "01A2");
            assert_eq!(serial_hex(&[0, 0]), "00");
        }

        #[test]
        fn test_sha1_hex_length() {
            assert_eq!(sha1_hex(b"hello").len(), 40);
            assert_eq!(sha256_hex(b"hello").len(), 64);
        }
    }
}
