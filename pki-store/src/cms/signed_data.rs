use super::{
    algorithm_identifier, issuer_and_serial, unwrap_content_info, wrap_content_info, SignerId, ID_CONTENT_TYPE,
    ID_DATA, ID_MESSAGE_DIGEST, ID_SIGNED_DATA, ID_SIGNING_TIME,
};
use crate::certificate::{to_utc, Certificate};
use crate::chain::{build_chain_at, ChainVerifier};
use crate::codec::{self, label, DataFormat};
use crate::crl::Crl;
use crate::crypto::{CryptoProvider, OpenSslCrypto, SharedCrypto};
use crate::error::{Result, StoreError};
use crate::key::Key;
use crate::oid::{DigestAlgorithm, KeyAlgorithm, Oid};
use crate::{log_debug, log_info, log_warn};
use chrono::{DateTime, Utc};
use ::cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use ::cms::content_info::CmsVersion;
use ::cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData as CmsSignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use der::asn1::{OctetString, SetOfVec, UtcTime};
use der::{Any, Decode, Encode};
use pki_common::{Component, Logger};
use std::path::Path;
use x509_cert::attr::Attribute as CmsAttribute;
use x509_cert::time::Time;

/// One signed or unsigned attribute; values are kept as DER
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub oid: Oid,
    pub values: Vec<Vec<u8>>,
}

/// A signing identity inside a [`SignedData`]
///
/// Signers created with [`SignedData::create_signer`] hold a private key until
/// [`SignedData::sign`] runs; signers read from an encoded message only carry
/// what the message does.
#[derive(Debug, Clone)]
pub struct Signer {
    certificate: Option<Certificate>,
    key: Option<Key>,
    info: Option<SignerInfo>,
}

impl Signer {
    pub fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    pub fn is_signed(&self) -> bool {
        self.info.is_some()
    }

    fn info(&self) -> Result<&SignerInfo> {
        self.info
            .as_ref()
            .ok_or_else(|| StoreError::NotFound("signer has not signed yet".to_string()))
    }

    pub fn signer_id(&self) -> Result<SignerId> {
        match &self.info()?.sid {
            SignerIdentifier::IssuerAndSerialNumber(ias) => SignerId::from_issuer_serial(ias),
            SignerIdentifier::SubjectKeyIdentifier(ski) => Ok(SignerId::from_key_id(ski.0.as_bytes())),
        }
    }

    pub fn signature(&self) -> Result<&[u8]> {
        Ok(self.info()?.signature.as_bytes())
    }

    pub fn digest_algorithm(&self) -> Result<DigestAlgorithm> {
        DigestAlgorithm::from_name(&self.info()?.digest_alg.oid.to_string())
    }

    pub fn signature_algorithm(&self) -> Result<Oid> {
        Oid::new(&self.info()?.signature_algorithm.oid.to_string())
    }

    pub fn signed_attributes(&self) -> Result<Vec<Attribute>> {
        convert_attributes(self.info()?.signed_attrs.as_ref())
    }

    pub fn unsigned_attributes(&self) -> Result<Vec<Attribute>> {
        convert_attributes(self.info()?.unsigned_attrs.as_ref())
    }

    /// The `signingTime` attribute, when present
    pub fn signing_time(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(value) = signed_attribute(self.info()?, ID_SIGNING_TIME) else {
            return Ok(None);
        };
        let time = Time::from_der(&value.to_der()?)?;
        let secs = i64::try_from(time.to_unix_duration().as_secs())
            .map_err(|_| StoreError::Malformed("signing time out of range".to_string()))?;
        Ok(Some(to_utc(secs)?))
    }

    /// Check this signer's signature over `content` with its own certificate
    pub fn verify_content(&self, content: &[u8], crypto: &dyn CryptoProvider) -> Result<bool> {
        let cert = self
            .certificate
            .as_ref()
            .ok_or_else(|| StoreError::NotFound("signer certificate".to_string()))?;
        check_signer(self.info()?, content, cert, crypto)
    }
}

fn convert_attributes(attrs: Option<&SetOfVec<CmsAttribute>>) -> Result<Vec<Attribute>> {
    let Some(attrs) = attrs else { return Ok(Vec::new()) };
    attrs
        .iter()
        .map(|attr| {
            Ok(Attribute {
                oid: Oid::new(&attr.oid.to_string())?,
                values: attr
                    .values
                    .iter()
                    .map(|value| value.to_der().map_err(StoreError::from))
                    .collect::<Result<_>>()?,
            })
        })
        .collect()
}

fn signed_attribute(info: &SignerInfo, oid: const_oid::ObjectIdentifier) -> Option<&Any> {
    info.signed_attrs
        .as_ref()?
        .iter()
        .find(|attr| attr.oid == oid)
        .and_then(|attr| attr.values.iter().next())
}

/// messageDigest must match `content`, then the signature must verify over the
/// DER SET OF signed attributes (or over the content when there are none)
fn check_signer(info: &SignerInfo, content: &[u8], cert: &Certificate, crypto: &dyn CryptoProvider) -> Result<bool> {
    let digest = DigestAlgorithm::from_name(&info.digest_alg.oid.to_string())?;
    let signature = info.signature.as_bytes();

    match &info.signed_attrs {
        Some(attrs) => {
            let Some(expected) = signed_attribute(info, ID_MESSAGE_DIGEST) else {
                return Ok(false);
            };
            let expected = OctetString::from_der(&expected.to_der()?)?;
            if expected.as_bytes() != crypto.digest(digest, content)?.as_slice() {
                return Ok(false);
            }
            crypto.verify(digest, &attrs.to_der()?, signature, cert.public_key_der())
        }
        None => crypto.verify(digest, content, signature, cert.public_key_der()),
    }
}

fn single_value_attribute<T: Encode>(oid: const_oid::ObjectIdentifier, value: &T) -> Result<CmsAttribute> {
    Ok(CmsAttribute {
        oid,
        values: SetOfVec::try_from(vec![Any::from_der(&value.to_der()?)?])?,
    })
}

/// CMS SignedData
pub struct SignedData {
    content: Option<Vec<u8>>,
    detached: bool,
    exclude_signer_certificate: bool,
    digest: DigestAlgorithm,
    certificates: Vec<Certificate>,
    signers: Vec<Signer>,
    crypto: SharedCrypto,
    logger: Logger,
}

impl SignedData {
    pub fn new(logger: &Logger) -> Self {
        Self {
            content: None,
            detached: false,
            exclude_signer_certificate: false,
            digest: DigestAlgorithm::default(),
            certificates: Vec::new(),
            signers: Vec::new(),
            crypto: OpenSslCrypto::shared(),
            logger: logger.with_component(Component::Cms),
        }
    }

    pub fn with_crypto(mut self, crypto: SharedCrypto) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    pub fn set_content(&mut self, content: impl Into<Vec<u8>>) {
        self.content = Some(content.into());
    }

    /// Embedded content; `None` for a detached message
    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    pub fn set_detached(&mut self, detached: bool) {
        self.detached = detached;
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn set_exclude_signer_certificate(&mut self, exclude: bool) {
        self.exclude_signer_certificate = exclude;
    }

    /// Bind `cert` and its private `key` as a new signer
    pub fn create_signer(&mut self, cert: &Certificate, key: &Key) -> Result<&Signer> {
        if !key.is_private() {
            return Err(StoreError::KeyNotAvailable(format!(
                "private key for '{}'",
                cert.subject_name()
            )));
        }
        if key.thumbprint() != cert.key_thumbprint() {
            return Err(StoreError::KeyNotLinked(cert.subject_name().to_string()));
        }
        self.signers.push(Signer {
            certificate: Some(cert.duplicate()),
            key: Some(key.duplicate()),
            info: None,
        });
        let index = self.signers.len() - 1;
        Ok(&self.signers[index])
    }

    /// Embed an extra certificate (an intermediate, say) in the message
    pub fn add_certificate(&mut self, cert: &Certificate) {
        if !self.certificates.iter().any(|c| c.thumbprint() == cert.thumbprint()) {
            self.certificates.push(cert.duplicate());
        }
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    pub fn signers(&self) -> &[Signer] {
        &self.signers
    }

    /// Sign the content with every pending signer and return the DER
    /// `ContentInfo`. Signing keys are dropped once used.
    pub fn sign(&mut self) -> Result<Vec<u8>> {
        let content = self
            .content
            .clone()
            .ok_or_else(|| StoreError::NotFound("no content to sign".to_string()))?;
        if self.signers.is_empty() {
            return Err(StoreError::NotFound("no signers".to_string()));
        }

        let message_digest = self.crypto.digest(self.digest, &content)?;
        for signer in self.signers.iter_mut() {
            let Some(key) = signer.key.take() else { continue };
            let cert = signer
                .certificate
                .as_ref()
                .ok_or_else(|| StoreError::NotFound("signer certificate".to_string()))?;
            signer.info = Some(build_signer_info(
                self.crypto.as_ref(),
                self.digest,
                cert,
                &key,
                &message_digest,
            )?);
            log_debug!(self.logger, "Signed as {}", cert.subject_name());
        }

        let der = self.encode(&content)?;
        log_info!(
            self.logger,
            "Created SignedData with {} signer(s), detached={}",
            self.signers.len(),
            self.detached
        );
        Ok(der)
    }

    fn encode(&self, content: &[u8]) -> Result<Vec<u8>> {
        let mut infos = Vec::with_capacity(self.signers.len());
        let mut digest_algorithms = Vec::new();
        let mut certs: Vec<&Certificate> = Vec::new();
        for signer in &self.signers {
            let info = signer.info()?;
            if !digest_algorithms.contains(&info.digest_alg) {
                digest_algorithms.push(info.digest_alg.clone());
            }
            infos.push(info.clone());
            if !self.exclude_signer_certificate {
                if let Some(cert) = &signer.certificate {
                    certs.push(cert);
                }
            }
        }
        certs.extend(self.certificates.iter());

        let mut choices = Vec::new();
        let mut seen = Vec::new();
        for cert in certs {
            if seen.contains(&cert.thumbprint()) {
                continue;
            }
            seen.push(cert.thumbprint());
            choices.push(CertificateChoices::Certificate(x509_cert::Certificate::from_der(
                cert.der(),
            )?));
        }

        let econtent = if self.detached {
            None
        } else {
            Some(Any::encode_from(&OctetString::new(content.to_vec())?)?)
        };

        let signed = CmsSignedData {
            version: CmsVersion::V1,
            digest_algorithms: SetOfVec::try_from(digest_algorithms)?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: ID_DATA,
                econtent,
            },
            certificates: if choices.is_empty() {
                None
            } else {
                Some(CertificateSet(SetOfVec::try_from(choices)?))
            },
            crls: None,
            signer_infos: SignerInfos(SetOfVec::try_from(infos)?),
        };
        wrap_content_info(ID_SIGNED_DATA, &signed)
    }

    /// Verify every signer over the embedded content or `content` when the
    /// message is detached. With `certs`, each signer certificate must also
    /// chain, possibly through embedded intermediates, to a root in `certs`.
    ///
    /// `Ok(false)` for any mismatch; errors only for structural problems.
    pub fn verify(&self, content: Option<&[u8]>, certs: Option<&[Certificate]>) -> Result<bool> {
        self.verify_with_crls(content, certs, &[])
    }

    pub fn verify_with_crls(
        &self,
        content: Option<&[u8]>,
        certs: Option<&[Certificate]>,
        crls: &[Crl],
    ) -> Result<bool> {
        let content = content
            .or(self.content.as_deref())
            .ok_or_else(|| StoreError::NotFound("no content to verify against".to_string()))?;
        if self.signers.is_empty() {
            log_warn!(self.logger, "SignedData carries no signers");
            return Ok(false);
        }

        let mut candidates: Vec<Certificate> = self.certificates.iter().map(Certificate::duplicate).collect();
        if let Some(extra) = certs {
            candidates.extend(extra.iter().map(Certificate::duplicate));
        }

        for signer in &self.signers {
            let info = signer.info()?;
            let id = signer.signer_id()?;
            let cert = match signer
                .certificate
                .as_ref()
                .or_else(|| candidates.iter().find(|c| id.matches(c)))
            {
                Some(cert) => cert,
                None => {
                    log_warn!(self.logger, "No certificate for signer {:?}", id);
                    return Ok(false);
                }
            };

            if !check_signer(info, content, cert, self.crypto.as_ref())? {
                log_info!(self.logger, "Signature of {} does not verify", cert.subject_name());
                return Ok(false);
            }

            if let Some(anchors) = certs {
                if !self.chain_trusted(cert, &candidates, anchors, crls)? {
                    return Ok(false);
                }
            }
        }

        log_debug!(self.logger, "All {} signer(s) verified", self.signers.len());
        Ok(true)
    }

    /// Chain `cert` through `candidates`; the root must be one of `anchors`.
    /// Embedded certificates only ever serve as intermediates.
    fn chain_trusted(
        &self,
        cert: &Certificate,
        candidates: &[Certificate],
        anchors: &[Certificate],
        crls: &[Crl],
    ) -> Result<bool> {
        let now = Utc::now();
        let chain = match build_chain_at(cert, candidates, now) {
            Ok(chain) => chain,
            Err(StoreError::ChainIncomplete(name)) | Err(StoreError::ChainCycle(name)) => {
                log_info!(self.logger, "Signer {} has no chain at {}", cert.subject_name(), name);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let anchored = chain
            .last()
            .is_some_and(|root| anchors.iter().any(|anchor| anchor.equals(root)));
        if !anchored {
            log_info!(self.logger, "Signer {} does not chain to a supplied root", cert.subject_name());
            return Ok(false);
        }

        let verifier = ChainVerifier::new(self.crypto.clone(), &self.logger);
        let status = verifier.verify_chain_at(&chain, crls, now)?;
        if !status.is_trusted() {
            log_info!(self.logger, "Signer {} untrusted: {:?}", cert.subject_name(), status);
        }
        Ok(status.is_trusted())
    }

    /// Parse a DER `ContentInfo` holding SignedData
    pub fn from_der(der: &[u8], logger: &Logger) -> Result<Self> {
        let inner = unwrap_content_info(der, ID_SIGNED_DATA)?;
        let parsed = CmsSignedData::from_der(&inner)?;

        let mut certificates = Vec::new();
        if let Some(set) = &parsed.certificates {
            for choice in set.0.iter() {
                if let CertificateChoices::Certificate(cert) = choice {
                    certificates.push(Certificate::from_der(cert.to_der()?)?);
                }
            }
        }

        let content = match &parsed.encap_content_info.econtent {
            Some(any) => Some(OctetString::from_der(&any.to_der()?)?.into_bytes()),
            None => None,
        };

        let mut signers = Vec::new();
        for info in parsed.signer_infos.0.iter() {
            let mut signer = Signer {
                certificate: None,
                key: None,
                info: Some(info.clone()),
            };
            let id = signer.signer_id()?;
            signer.certificate = certificates.iter().find(|c| id.matches(c)).map(Certificate::duplicate);
            signers.push(signer);
        }

        let digest = signers
            .first()
            .map(Signer::digest_algorithm)
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            detached: content.is_none(),
            content,
            exclude_signer_certificate: false,
            digest,
            certificates,
            signers,
            crypto: OpenSslCrypto::shared(),
            logger: logger.with_component(Component::Cms),
        })
    }

    pub fn import(data: &[u8], logger: &Logger) -> Result<Self> {
        Self::from_der(&codec::decode_any(data, label::CMS)?, logger)
    }

    /// Re-encode a message whose signers have all signed
    pub fn export(&self, format: DataFormat) -> Result<Vec<u8>> {
        let content = self.content.as_deref().unwrap_or_default();
        let der = self.encode(content)?;
        Ok(codec::encode(&der, format, label::CMS))
    }

    pub fn load(path: &Path, logger: &Logger) -> Result<Self> {
        Self::from_der(&codec::read_file(path, label::CMS)?, logger)
    }

    pub fn save(&self, path: &Path, format: DataFormat) -> Result<()> {
        let content = self.content.as_deref().unwrap_or_default();
        codec::write_file(path, &self.encode(content)?, format, label::CMS)
    }
}

fn build_signer_info(
    crypto: &dyn CryptoProvider,
    digest: DigestAlgorithm,
    cert: &Certificate,
    key: &Key,
    message_digest: &[u8],
) -> Result<SignerInfo> {
    let signing_time = UtcTime::from_unix_duration(std::time::Duration::from_secs(
        u64::try_from(Utc::now().timestamp()).unwrap_or_default(),
    ))?;
    let attrs = SetOfVec::try_from(vec![
        single_value_attribute(ID_CONTENT_TYPE, &ID_DATA)?,
        single_value_attribute(ID_MESSAGE_DIGEST, &OctetString::new(message_digest.to_vec())?)?,
        single_value_attribute(ID_SIGNING_TIME, &Time::UtcTime(signing_time))?,
    ])?;
    let signature = crypto.sign(digest, &attrs.to_der()?, key)?;

    let key_algorithm = key.algorithm();
    // RSA signature identifiers carry explicit NULL parameters; ECDSA ones omit them
    let parameters = match key_algorithm {
        KeyAlgorithm::Rsa => Some(Any::null()),
        _ => None,
    };
    let sid: IssuerAndSerialNumber = issuer_and_serial(cert)?;

    Ok(SignerInfo {
        version: CmsVersion::V1,
        sid: SignerIdentifier::IssuerAndSerialNumber(sid),
        digest_alg: algorithm_identifier(&digest.oid(), None)?,
        signed_attrs: Some(attrs),
        signature_algorithm: algorithm_identifier(&digest.signature_oid(key_algorithm)?, parameters)?,
        signature: OctetString::new(signature)?,
        unsigned_attrs: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr::Csr;

    fn self_signed() -> (Certificate, Key) {
        let key = Key::generate_ec().unwrap();
        let csr = Csr::generate("CN=Signer,O=Test", &key, DigestAlgorithm::Sha256).unwrap();
        let cert = csr.issue(None, &key, 30, false, DigestAlgorithm::Sha256).unwrap();
        (cert, key)
    }

    #[test]
    fn test_create_signer_rejects_foreign_key() {
        let (cert, _) = self_signed();
        let other = Key::generate_ec().unwrap();
        let mut sd = SignedData::new(&Logger::new_root(Component::Cms, "test"));
        assert!(matches!(
            sd.create_signer(&cert, &other),
            Err(StoreError::KeyNotLinked(_))
        ));
    }

    #[test]
    fn test_signed_attributes_present() {
        let (cert, key) = self_signed();
        let logger = Logger::new_root(Component::Cms, "test");
        let mut sd = SignedData::new(&logger);
        sd.set_content(b"payload".to_vec());
        sd.create_signer(&cert, &key).unwrap();
        let der = sd.sign().unwrap();

        let parsed = SignedData::from_der(&der, &logger).unwrap();
        let signer = &parsed.signers()[0];
        let oids: Vec<String> = signer
            .signed_attributes()
            .unwrap()
            .iter()
            .map(|a| a.oid.value().to_string())
            .collect();
        assert!(oids.contains(&ID_MESSAGE_DIGEST.to_string()));
        assert!(oids.contains(&ID_CONTENT_TYPE.to_string()));
        assert!(signer.signing_time().unwrap().is_some());
        assert!(signer.signer_id().unwrap().matches(&cert));
        assert_eq!(parsed.content(), Some(&b"payload"[..]));
    }
}
