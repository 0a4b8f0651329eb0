//! Trust-service list provider
//!
//! Reads an ETSI TS 119 612 style XML trust list and exposes every embedded
//! `X509Certificate` as a TRUST certificate. The list is fetched once at
//! construction; enumeration never touches the network. Read-only.

use super::{PkiObject, Provider, ProviderCaps, ProviderKind};
use crate::certificate::Certificate;
use crate::error::{Result, StoreError};
use crate::fetch::HttpFetcher;
use crate::item::{Category, ItemType, PkiItem};
use crate::{log_debug, log_info, log_warn};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pki_common::{Component, Logger};
use quick_xml::events::Event;
use quick_xml::Reader;

const CERT_ELEMENT: &str = "X509Certificate";

pub struct TslProvider {
    id: String,
    source: String,
    certificates: Vec<Certificate>,
}

impl TslProvider {
    /// Fetch and parse the list at `url`
    pub async fn load(url: &str, fetcher: &dyn HttpFetcher, logger: &Logger) -> Result<Self> {
        let logger = logger.with_component(Component::Provider);
        log_info!(logger, "Fetching trust list {}", url);
        let data = fetcher.fetch(url).await?;
        Self::from_bytes(url, &data, &logger)
    }

    /// Parse a list already in memory; `source` becomes the uri prefix
    pub fn from_bytes(source: &str, data: &[u8], logger: &Logger) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|e| StoreError::Malformed(format!("trust list is not UTF-8: {e}")))?;

        let mut certificates: Vec<Certificate> = Vec::new();
        for encoded in element_texts(text, CERT_ELEMENT)? {
            let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
            let parsed = STANDARD
                .decode(compact.as_bytes())
                .map_err(|e| StoreError::Malformed(format!("bad base64: {e}")))
                .and_then(Certificate::from_der);
            match parsed {
                Ok(cert) => {
                    if !certificates.iter().any(|c| c.thumbprint() == cert.thumbprint()) {
                        certificates.push(cert);
                    }
                }
                Err(e) => log_warn!(logger, "Skipping trust list entry: {}", e),
            }
        }
        log_debug!(logger, "Trust list {} holds {} certificates", source, certificates.len());
        Ok(Self {
            id: ProviderKind::Tsl.to_string(),
            source: source.to_string(),
            certificates,
        })
    }

    /// Register under `id` instead of `TSL`, so several lists can coexist
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Text content of every element whose local name is `local`, in document
/// order. CDATA sections count as text; comments are skipped.
fn element_texts(xml: &str, local: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut out = Vec::new();
    let mut current: Option<String> = None;
    loop {
        let event = reader
            .read_event()
            .map_err(|e| StoreError::Malformed(format!("trust list XML at {}: {e}", reader.buffer_position())))?;
        match event {
            Event::Start(start) if start.local_name().as_ref() == local.as_bytes() => {
                current = Some(String::new());
            }
            Event::Text(text) => {
                if let Some(buffer) = current.as_mut() {
                    let text = text
                        .unescape()
                        .map_err(|e| StoreError::Malformed(format!("trust list text: {e}")))?;
                    buffer.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(buffer) = current.as_mut() {
                    buffer.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::End(end) if end.local_name().as_ref() == local.as_bytes() => {
                if let Some(text) = current.take() {
                    out.push(text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

impl Provider for TslProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Tsl
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn capabilities(&self) -> ProviderCaps {
        ProviderCaps {
            writable: false,
            resolves_keys: false,
        }
    }

    fn enumerate(&self) -> Result<Vec<PkiItem>> {
        let provider = self.id();
        Ok(self
            .certificates
            .iter()
            .map(|cert| {
                let uri = format!("{}#{}", self.source, cert.thumbprint());
                PkiItem::from_certificate(cert, &provider, Category::Trust, uri)
            })
            .collect())
    }

    fn materialize(&self, item: &PkiItem) -> Result<PkiObject> {
        if item.item_type != ItemType::Certificate {
            return Err(StoreError::NotFound(item.uri.clone()));
        }
        self.certificates
            .iter()
            .find(|cert| cert.thumbprint() == item.hash)
            .map(|cert| PkiObject::Certificate(cert.duplicate()))
            .ok_or_else(|| StoreError::NotFound(item.uri.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_texts_handles_prefixes() {
        let xml = r#"<?xml version="1.0"?>
            <tsl:TrustServiceStatusList xmlns:tsl="urn:tsl" xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
              <ds:X509Certificate>QUJD</ds:X509Certificate>
              <X509Certificate attr="x">REVG
              </X509Certificate>
              <ds:X509CertificateRef>skip</ds:X509CertificateRef>
              <ds:X509Certificate/>
            </tsl:TrustServiceStatusList>"#;
        let found = element_texts(xml, CERT_ELEMENT).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], "QUJD");
        assert_eq!(found[1].trim(), "REVG");
    }

    #[test]
    fn test_element_texts_tolerates_markup_noise() {
        let xml = r#"<List note="a > b">
              <!-- <X509Certificate>ignored</X509Certificate> -->
              <X509Certificate><![CDATA[R0hJ]]></X509Certificate>
              <X509Certificate>SktM&#x3D;</X509Certificate>
            </List>"#;
        let found = element_texts(xml, CERT_ELEMENT).unwrap();
        assert_eq!(found, vec!["R0hJ".to_string(), "SktM=".to_string()]);
    }

    #[test]
    fn test_unbalanced_xml_is_malformed() {
        let result = element_texts("<List><X509Certificate>QUJD</List>", CERT_ELEMENT);
        assert!(matches!(result, Err(StoreError::Malformed(_))));
    }
}
