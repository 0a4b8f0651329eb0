use super::{
    algorithm_identifier, issuer_and_serial, unwrap_content_info, wrap_content_info, SignerId, ID_DATA,
    ID_ENVELOPED_DATA, RSA_ENCRYPTION,
};
use crate::certificate::Certificate;
use crate::codec::{self, label, DataFormat};
use crate::crypto::CryptoProvider;
use crate::error::{Result, StoreError};
use crate::key::Key;
use crate::oid::{CipherAlgorithm, Oid};
use ::cms::content_info::CmsVersion;
use ::cms::enveloped_data::{
    EncryptedContentInfo, EnvelopedData as CmsEnvelopedData, KeyTransRecipientInfo, RecipientIdentifier,
    RecipientInfo as CmsRecipientInfo, RecipientInfos,
};
use der::asn1::{OctetString, SetOfVec};
use der::{Any, Decode, Encode};
use std::path::Path;

/// Key-transport metadata for one recipient, readable without decrypting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientInfo {
    id: SignerId,
    key_encryption_algorithm: Oid,
    encrypted_key: Vec<u8>,
}

impl RecipientInfo {
    pub fn id(&self) -> &SignerId {
        &self.id
    }

    pub fn key_encryption_algorithm(&self) -> &Oid {
        &self.key_encryption_algorithm
    }

    pub fn encrypted_key(&self) -> &[u8] {
        &self.encrypted_key
    }

    /// Whether this entry was produced for `cert`
    pub fn matches(&self, cert: &Certificate) -> bool {
        self.id.matches(cert)
    }
}

/// CMS EnvelopedData with RSA key transport
#[derive(Debug, Clone)]
pub struct EnvelopedData {
    der: Vec<u8>,
    recipients: Vec<RecipientInfo>,
    cipher: CipherAlgorithm,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl EnvelopedData {
    /// Encrypt `content` under a fresh content key wrapped for each recipient
    pub fn encrypt(
        content: &[u8],
        recipients: &[Certificate],
        cipher: CipherAlgorithm,
        crypto: &dyn CryptoProvider,
    ) -> Result<Self> {
        if recipients.is_empty() {
            return Err(StoreError::NotFound("no recipients".to_string()));
        }
        let content_key = crypto.random(cipher.key_len())?;
        let iv = crypto.random(cipher.iv_len())?;
        let ciphertext = crypto.encrypt(cipher, &content_key, &iv, content)?;

        let mut infos = Vec::with_capacity(recipients.len());
        for cert in recipients {
            let wrapped = crypto.wrap_key(cert.public_key_der(), &content_key)?;
            infos.push(CmsRecipientInfo::Ktri(KeyTransRecipientInfo {
                version: CmsVersion::V0,
                rid: RecipientIdentifier::IssuerAndSerialNumber(issuer_and_serial(cert)?),
                key_enc_alg: spki::AlgorithmIdentifierOwned {
                    oid: RSA_ENCRYPTION,
                    parameters: Some(Any::null()),
                },
                enc_key: OctetString::new(wrapped)?,
            }));
        }

        let enveloped = CmsEnvelopedData {
            version: CmsVersion::V0,
            originator_info: None,
            recip_infos: RecipientInfos(SetOfVec::try_from(infos)?),
            encrypted_content: EncryptedContentInfo {
                content_type: ID_DATA,
                content_enc_alg: algorithm_identifier(
                    &cipher.oid(),
                    Some(Any::encode_from(&OctetString::new(iv)?)?),
                )?,
                encrypted_content: Some(OctetString::new(ciphertext)?),
            },
            unprotected_attrs: None,
        };
        Self::from_der(wrap_content_info(ID_ENVELOPED_DATA, &enveloped)?)
    }

    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        let inner = unwrap_content_info(&der, ID_ENVELOPED_DATA)?;
        let parsed = CmsEnvelopedData::from_der(&inner)?;

        let mut recipients = Vec::new();
        for info in parsed.recip_infos.0.iter() {
            // Only key transport entries are surfaced
            let CmsRecipientInfo::Ktri(ktri) = info else { continue };
            let id = match &ktri.rid {
                RecipientIdentifier::IssuerAndSerialNumber(ias) => SignerId::from_issuer_serial(ias)?,
                RecipientIdentifier::SubjectKeyIdentifier(ski) => SignerId::from_key_id(ski.0.as_bytes()),
            };
            recipients.push(RecipientInfo {
                id,
                key_encryption_algorithm: Oid::new(&ktri.key_enc_alg.oid.to_string())?,
                encrypted_key: ktri.enc_key.as_bytes().to_vec(),
            });
        }

        let eci = &parsed.encrypted_content;
        let cipher = CipherAlgorithm::from_oid(&eci.content_enc_alg.oid.to_string())?;
        let iv = match &eci.content_enc_alg.parameters {
            Some(params) => OctetString::from_der(&params.to_der()?)?.into_bytes(),
            None => return Err(StoreError::Malformed("content cipher without IV".to_string())),
        };
        let ciphertext = eci
            .encrypted_content
            .as_ref()
            .map(|c| c.as_bytes().to_vec())
            .ok_or_else(|| StoreError::Malformed("enveloped data without content".to_string()))?;

        Ok(Self {
            der,
            recipients,
            cipher,
            iv,
            ciphertext,
        })
    }

    pub fn import(data: &[u8]) -> Result<Self> {
        Self::from_der(codec::decode_any(data, label::CMS)?)
    }

    pub fn export(&self, format: DataFormat) -> Vec<u8> {
        codec::encode(&self.der, format, label::CMS)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_der(codec::read_file(path, label::CMS)?)
    }

    pub fn save(&self, path: &Path, format: DataFormat) -> Result<()> {
        codec::write_file(path, &self.der, format, label::CMS)
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn recipient_infos(&self) -> &[RecipientInfo] {
        &self.recipients
    }

    pub fn content_encryption_algorithm(&self) -> CipherAlgorithm {
        self.cipher
    }

    /// Recover the content with `key`, the private half of recipient `cert`
    pub fn decrypt(&self, key: &Key, cert: &Certificate, crypto: &dyn CryptoProvider) -> Result<Vec<u8>> {
        let recipient = self
            .recipients
            .iter()
            .find(|r| r.matches(cert))
            .ok_or_else(|| StoreError::NotFound(format!("no recipient entry for '{}'", cert.subject_name())))?;
        if key.thumbprint() != cert.key_thumbprint() {
            return Err(StoreError::KeyNotLinked(cert.subject_name().to_string()));
        }
        if recipient.key_encryption_algorithm.value() != RSA_ENCRYPTION.to_string() {
            return Err(StoreError::Unsupported(format!(
                "key encryption {}",
                recipient.key_encryption_algorithm
            )));
        }

        let content_key = crypto.unwrap_key(key, &recipient.encrypted_key)?;
        crypto.decrypt(self.cipher, &content_key, &self.iv, &self.ciphertext)
    }
}
