// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Secret configurations and the generators producing their data.

use crate::error::{GardenerError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::RsaPrivateKey;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use x509_parser::pem::parse_x509_pem;

pub const DATA_KEY_CA_CERT: &str = "ca.crt";
pub const DATA_KEY_CA_KEY: &str = "ca.key";
pub const DATA_KEY_CERT: &str = "tls.crt";
pub const DATA_KEY_KEY: &str = "tls.key";
pub const DATA_KEY_RSA_PRIVATE: &str = "id_rsa";
pub const DATA_KEY_SSH_AUTHORIZED_KEYS: &str = "id_rsa.pub";
pub const DATA_KEY_RSA_PUBLIC: &str = "id_rsa.pem";
pub const DATA_KEY_USERNAME: &str = "username";
pub const DATA_KEY_PASSWORD: &str = "password";
pub const DATA_KEY_AUTH: &str = "auth";
pub const DATA_KEY_STATIC_TOKENS: &str = "static_tokens.csv";
pub const DATA_KEY_ENCRYPTION_KEY_NAME: &str = "key";
pub const DATA_KEY_ENCRYPTION_SECRET: &str = "secret";
pub const DATA_KEY_BYTES: &str = "bytes";
pub const DATA_KEY_CERT_BUNDLE: &str = "bundle.crt";
pub const DATA_KEY_KEY_BUNDLE: &str = "bundle.key";

const DEFAULT_CA_VALIDITY: Duration = Duration::from_secs(10 * 365 * 24 * 3600);
const DEFAULT_CERT_VALIDITY: Duration = Duration::from_secs(365 * 24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CertType {
    Ca,
    Server,
    Client,
    ServerClient,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateConfig {
    pub name: String,
    pub common_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub organization: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,
    pub cert_type: CertType,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub validity: Option<Duration>,
    /// Leave `ca.crt` out of signed certificates
    pub skip_publishing_ca_cert: bool,
}

impl CertificateConfig {
    pub fn ca(name: &str, common_name: &str) -> Self {
        Self {
            name: name.to_string(),
            common_name: common_name.to_string(),
            organization: Vec::new(),
            dns_names: Vec::new(),
            ip_addresses: Vec::new(),
            cert_type: CertType::Ca,
            validity: None,
            skip_publishing_ca_cert: false,
        }
    }

    pub fn leaf(name: &str, common_name: &str, cert_type: CertType) -> Self {
        Self {
            cert_type,
            ..Self::ca(name, common_name)
        }
    }

    pub fn with_dns_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dns_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = Some(validity);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RsaKeyConfig {
    pub name: String,
    pub bits: usize,
    /// Adds an `authorized_keys` formatted public key and disables bundling
    pub used_for_ssh: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuthConfig {
    pub name: String,
    pub username: String,
    pub password_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticTokenEntry {
    pub username: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticTokenConfig {
    pub name: String,
    pub tokens: Vec<StaticTokenEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EtcdEncryptionKeyConfig {
    pub name: String,
    pub secret_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BytesConfig {
    pub name: String,
    pub length: usize,
}

/// Description of one logical secret.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SecretConfig {
    Certificate(CertificateConfig),
    RsaKeys(RsaKeyConfig),
    BasicAuth(BasicAuthConfig),
    StaticToken(StaticTokenConfig),
    EtcdEncryptionKey(EtcdEncryptionKeyConfig),
    Bytes(BytesConfig),
}

/// Material to sign a certificate with.
#[derive(Debug, Clone)]
pub struct SigningCa {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Generated secret data plus certificate validity, if any.
#[derive(Debug, Clone, Default)]
pub struct GeneratedData {
    pub data: BTreeMap<String, Vec<u8>>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

impl SecretConfig {
    /// The logical name of the secret
    pub fn name(&self) -> &str {
        match self {
            SecretConfig::Certificate(c) => &c.name,
            SecretConfig::RsaKeys(c) => &c.name,
            SecretConfig::BasicAuth(c) => &c.name,
            SecretConfig::StaticToken(c) => &c.name,
            SecretConfig::EtcdEncryptionKey(c) => &c.name,
            SecretConfig::Bytes(c) => &c.name,
        }
    }

    pub fn is_ca(&self) -> bool {
        matches!(self, SecretConfig::Certificate(c) if c.cert_type == CertType::Ca)
    }

    pub fn is_certificate(&self) -> bool {
        matches!(self, SecretConfig::Certificate(_))
    }

    /// CAs and non-SSH RSA keys are published through a bundle secret.
    pub fn bundles(&self) -> bool {
        match self {
            SecretConfig::Certificate(c) => c.cert_type == CertType::Ca,
            SecretConfig::RsaKeys(c) => !c.used_for_ssh,
            _ => false,
        }
    }

    /// Data key whose value is collected into the bundle.
    pub fn bundle_source_key(&self) -> Option<(&'static str, &'static str)> {
        match self {
            SecretConfig::Certificate(c) if c.cert_type == CertType::Ca => {
                Some((DATA_KEY_CA_CERT, DATA_KEY_CERT_BUNDLE))
            }
            SecretConfig::RsaKeys(c) if !c.used_for_ssh => {
                Some((DATA_KEY_RSA_PRIVATE, DATA_KEY_KEY_BUNDLE))
            }
            _ => None,
        }
    }

    /// 8 hex digit checksum over the configuration and the signing CA name.
    pub fn checksum(&self, signing_ca: Option<&str>) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(self)?);
        if let Some(ca) = signing_ca {
            hasher.update(b"|signed-by=");
            hasher.update(ca.as_bytes());
        }
        Ok(hex::encode(hasher.finalize())[..8].to_string())
    }

    /// Generate the secret data as of `now`, which starts certificate validity.
    pub fn generate(&self, signing_ca: Option<&SigningCa>, now: DateTime<Utc>) -> Result<GeneratedData> {
        match self {
            SecretConfig::Certificate(c) => generate_certificate(c, signing_ca, now),
            SecretConfig::RsaKeys(c) => generate_rsa_keys(c),
            SecretConfig::BasicAuth(c) => Ok(generate_basic_auth(c)),
            SecretConfig::StaticToken(c) => Ok(generate_static_tokens(c)),
            SecretConfig::EtcdEncryptionKey(c) => Ok(generate_encryption_key(c, now)),
            SecretConfig::Bytes(c) => Ok(GeneratedData {
                data: BTreeMap::from([(DATA_KEY_BYTES.to_string(), random_bytes(c.length))]),
                ..Default::default()
            }),
        }
    }
}

fn gen_err(what: &str, e: impl std::fmt::Display) -> GardenerError {
    GardenerError::SecretGenerationError(format!("{}: {}", what, e))
}

pub fn random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

fn random_bytes(length: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

fn to_offset(time: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(time.timestamp()).map_err(|e| gen_err("invalid timestamp", e))
}

fn generate_certificate(
    config: &CertificateConfig,
    signing_ca: Option<&SigningCa>,
    now: DateTime<Utc>,
) -> Result<GeneratedData> {
    let is_ca = config.cert_type == CertType::Ca;
    let sans: Vec<String> = config
        .dns_names
        .iter()
        .chain(config.ip_addresses.iter())
        .cloned()
        .collect();
    let mut params = CertificateParams::new(sans).map_err(|e| gen_err("invalid subject alternative names", e))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(config.common_name.clone()));
    for org in &config.organization {
        dn.push(DnType::OrganizationName, DnValue::Utf8String(org.clone()));
    }
    params.distinguished_name = dn;

    let validity = config
        .validity
        .unwrap_or(if is_ca { DEFAULT_CA_VALIDITY } else { DEFAULT_CERT_VALIDITY });
    let not_after = now
        + chrono::Duration::from_std(validity).map_err(|e| gen_err("invalid validity", e))?;
    params.not_before = to_offset(now)?;
    params.not_after = to_offset(not_after)?;

    if is_ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
    } else {
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = match config.cert_type {
            CertType::Server => vec![ExtendedKeyUsagePurpose::ServerAuth],
            CertType::Client => vec![ExtendedKeyUsagePurpose::ClientAuth],
            _ => vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ],
        };
    }

    let key_pair = KeyPair::generate().map_err(|e| gen_err("failed to generate key", e))?;
    let key_pem = key_pair.serialize_pem();

    let mut data = BTreeMap::new();
    let cert_pem = match signing_ca {
        Some(ca) if !is_ca => {
            let ca_key = KeyPair::from_pem(&ca.key_pem).map_err(|e| gen_err("failed to load CA key", e))?;
            let issuer = Issuer::from_ca_cert_pem(&ca.cert_pem, &ca_key)
                .map_err(|e| gen_err("failed to create issuer", e))?;
            let cert = params
                .signed_by(&key_pair, &issuer)
                .map_err(|e| gen_err("failed to sign certificate", e))?;
            if !config.skip_publishing_ca_cert {
                data.insert(DATA_KEY_CA_CERT.to_string(), ca.cert_pem.clone().into_bytes());
            }
            cert.pem()
        }
        None if !is_ca => {
            return Err(gen_err(
                &format!("certificate {}", config.name),
                "a signing CA is required",
            ))
        }
        _ => params
            .self_signed(&key_pair)
            .map_err(|e| gen_err("failed to create CA certificate", e))?
            .pem(),
    };

    let (not_before, not_after) = certificate_validity(cert_pem.as_bytes())?;
    if is_ca {
        data.insert(DATA_KEY_CA_CERT.to_string(), cert_pem.into_bytes());
        data.insert(DATA_KEY_CA_KEY.to_string(), key_pem.into_bytes());
    } else {
        data.insert(DATA_KEY_CERT.to_string(), cert_pem.into_bytes());
        data.insert(DATA_KEY_KEY.to_string(), key_pem.into_bytes());
    }

    Ok(GeneratedData {
        data,
        not_before: Some(not_before),
        not_after: Some(not_after),
    })
}

/// NotBefore and NotAfter of a PEM encoded certificate.
pub fn certificate_validity(pem: &[u8]) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let (_, pem) = parse_x509_pem(pem).map_err(|e| gen_err("failed to parse PEM", e))?;
    let cert = pem.parse_x509().map_err(|e| gen_err("failed to parse certificate", e))?;
    let validity = cert.validity();
    let to_utc = |ts: i64| {
        DateTime::from_timestamp(ts, 0).ok_or_else(|| gen_err("invalid certificate time", ts))
    };
    Ok((
        to_utc(validity.not_before.timestamp())?,
        to_utc(validity.not_after.timestamp())?,
    ))
}

fn generate_rsa_keys(config: &RsaKeyConfig) -> Result<GeneratedData> {
    let mut rng = rand::thread_rng();
    let key = RsaPrivateKey::new(&mut rng, config.bits).map_err(|e| gen_err("failed to generate RSA key", e))?;
    let private_pem = key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| gen_err("failed to encode RSA key", e))?;
    let public = key.to_public_key();
    let public_pem = public
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| gen_err("failed to encode RSA public key", e))?;

    let mut data = BTreeMap::from([
        (DATA_KEY_RSA_PRIVATE.to_string(), private_pem.as_bytes().to_vec()),
        (DATA_KEY_RSA_PUBLIC.to_string(), public_pem.into_bytes()),
    ]);
    if config.used_for_ssh {
        data.insert(
            DATA_KEY_SSH_AUTHORIZED_KEYS.to_string(),
            ssh_authorized_key(&public)?.into_bytes(),
        );
    }
    Ok(GeneratedData {
        data,
        ..Default::default()
    })
}

/// `ssh-rsa <base64>` line of an RSA public key.
fn ssh_authorized_key(key: &rsa::RsaPublicKey) -> Result<String> {
    let key = ssh_key::public::RsaPublicKey::try_from(key).map_err(|e| gen_err("invalid RSA public key", e))?;
    let line = ssh_key::PublicKey::new(ssh_key::public::KeyData::Rsa(key), "")
        .to_openssh()
        .map_err(|e| gen_err("failed to encode SSH public key", e))?;
    Ok(format!("{}\n", line))
}

fn generate_basic_auth(config: &BasicAuthConfig) -> GeneratedData {
    let password = random_string(config.password_length);
    let auth = format!("{},{},{}\n", password, config.username, config.username);
    GeneratedData {
        data: BTreeMap::from([
            (DATA_KEY_USERNAME.to_string(), config.username.clone().into_bytes()),
            (DATA_KEY_PASSWORD.to_string(), password.into_bytes()),
            (DATA_KEY_AUTH.to_string(), auth.into_bytes()),
        ]),
        ..Default::default()
    }
}

fn generate_static_tokens(config: &StaticTokenConfig) -> GeneratedData {
    let mut csv = String::new();
    for entry in &config.tokens {
        let token = random_string(128);
        csv.push_str(&format!("{},{},{}", token, entry.username, entry.user_id));
        if !entry.groups.is_empty() {
            csv.push_str(&format!(",\"{}\"", entry.groups.join(",")));
        }
        csv.push('\n');
    }
    GeneratedData {
        data: BTreeMap::from([(DATA_KEY_STATIC_TOKENS.to_string(), csv.into_bytes())]),
        ..Default::default()
    }
}

fn generate_encryption_key(config: &EtcdEncryptionKeyConfig, now: DateTime<Utc>) -> GeneratedData {
    let key_name = format!("key{}", now.timestamp());
    let secret = STANDARD.encode(random_string(config.secret_length));
    GeneratedData {
        data: BTreeMap::from([
            (DATA_KEY_ENCRYPTION_KEY_NAME.to_string(), key_name.into_bytes()),
            (DATA_KEY_ENCRYPTION_SECRET.to_string(), secret.into_bytes()),
        ]),
        ..Default::default()
    }
}

/// SHA-256 over the sorted keys and values of secret data.
pub fn data_checksum(data: &BTreeMap<String, Vec<u8>>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in data {
        hasher.update(key.as_bytes());
        hasher.update([0]);
        hasher.update(value);
        hasher.update([0]);
    }
    hex::encode(hasher.finalize())
}
