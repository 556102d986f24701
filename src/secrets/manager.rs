// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle management of generated secrets in one namespace.

use super::config::{data_checksum, SecretConfig, SigningCa, DATA_KEY_CA_CERT, DATA_KEY_CA_KEY};
use crate::constants::secret_labels as labels;
use crate::error::{GardenerError, Result};
use crate::kubernetes::cluster::ClusterClient;
use crate::kubernetes::typed::{create, delete, get, list, patch};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info, instrument};

/// Secrets are renewed once this share of their validity has passed.
const RENEW_AFTER_VALIDITY_FRACTION: f64 = 0.8;
/// Secrets living longer than this are renewed when less than this is left of their validity.
const RENEW_BEFORE_EXPIRY_SECS: i64 = 10 * 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// Replace the secret; the previous one is no longer served
    #[default]
    InPlace,
    /// Keep serving the previous secret next to the new one
    KeepOld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigningMode {
    /// Sign with the current CA once, and never re-sign because the CA rotated
    #[default]
    Default,
    /// Re-sign whenever the current CA changes
    UseCurrentCa,
    /// Sign with the old CA while a rotation is in progress
    UseOldCa,
}

/// Options of a [`SecretsManager::generate`] call.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    rotation: RotationStrategy,
    ignore_old_secrets: bool,
    ignore_old_secrets_after: Option<Duration>,
    signed_by: Option<(String, SigningMode)>,
    persist: bool,
    validity: Option<Duration>,
}

impl GenerateOptions {
    pub fn rotate(mut self, strategy: RotationStrategy) -> Self {
        self.rotation = strategy;
        self
    }

    pub fn ignore_old_secrets(mut self) -> Self {
        self.ignore_old_secrets = true;
        self
    }

    /// Stop serving the old secret once the current one is older than `after`.
    pub fn ignore_old_secrets_after(mut self, after: Duration) -> Self {
        self.ignore_old_secrets_after = Some(after);
        self
    }

    pub fn signed_by_ca(mut self, ca_name: &str, mode: SigningMode) -> Self {
        self.signed_by = Some((ca_name.to_string(), mode));
        self
    }

    pub fn persist(mut self) -> Self {
        self.persist = true;
        self
    }

    /// Validity of non-certificate secrets, exposed as `valid-until-time`.
    pub fn validity(mut self, validity: Duration) -> Self {
        self.validity = Some(validity);
        self
    }
}

/// Which face of a logical secret [`SecretsManager::get`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecretClass {
    /// The bundle secret, or the current secret for configs without a bundle
    #[default]
    Bundle,
    Current,
    Old,
}

#[derive(Debug, Clone, Default)]
struct Entry {
    config: Option<SecretConfig>,
    current: Option<Secret>,
    old: Option<Secret>,
    bundle: Option<Secret>,
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Manages the secrets of one `(namespace, identity)` pair.
pub struct SecretsManager {
    client: Arc<dyn ClusterClient>,
    namespace: String,
    identity: String,
    clock: Clock,
    requested_rotations: BTreeMap<String, DateTime<Utc>>,
    rotation_times: parking_lot::Mutex<BTreeMap<String, String>>,
    initialized: OnceCell<()>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    store: RwLock<HashMap<String, Entry>>,
}

fn meta_name(secret: &Secret) -> &str {
    secret.metadata.name.as_deref().unwrap_or_default()
}

fn label<'a>(secret: &'a Secret, key: &str) -> &'a str {
    secret
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(key))
        .map(String::as_str)
        .unwrap_or_default()
}

fn unix_label(secret: &Secret, key: &str) -> Option<i64> {
    label(secret, key).parse().ok()
}

fn short_hash(input: &str, len: usize) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))[..len].to_string()
}

fn secret_data(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|b| b.0.clone())
}

/// Physical name for the labels of a secret:
/// `<logical>-<config checksum>[-<rotation checksum>]`.
pub fn secret_name(logical: &str, secret_labels: &BTreeMap<String, String>) -> String {
    let config = secret_labels
        .get(labels::CHECKSUM_OF_CONFIG)
        .map(String::as_str)
        .unwrap_or_default();
    let mut name = logical.to_string();
    match secret_labels.get(labels::CHECKSUM_OF_SIGNING_CA) {
        Some(ca) if !ca.is_empty() => {
            name.push('-');
            name.push_str(&short_hash(&format!("{}{}", config, ca), 8));
        }
        _ if !config.is_empty() => {
            name.push('-');
            name.push_str(config);
        }
        _ => {}
    }
    if let Some(rotation) = secret_labels
        .get(labels::LAST_ROTATION_INITIATION_TIME)
        .filter(|t| !t.is_empty())
    {
        name.push('-');
        name.push_str(&short_hash(rotation, 5));
    }
    name
}

impl SecretsManager {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        namespace: &str,
        identity: &str,
        requested_rotations: BTreeMap<String, DateTime<Utc>>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            clock: Arc::new(Utc::now),
            requested_rotations,
            rotation_times: parking_lot::Mutex::new(BTreeMap::new()),
            initialized: OnceCell::new(),
            locks: DashMap::new(),
            store: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn selector(&self) -> String {
        format!(
            "{}={},{}={}",
            labels::MANAGED_BY,
            labels::MANAGED_BY_VALUE,
            labels::MANAGER_IDENTITY,
            self.identity
        )
    }

    async fn managed_secrets(&self) -> Result<Vec<Secret>> {
        list::<Secret>(self.client.as_ref(), Some(&self.namespace), Some(&self.selector())).await
    }

    async fn initialize(&self) -> Result<()> {
        self.initialized
            .get_or_try_init(|| async {
                let secrets = self.managed_secrets().await?;
                let mut newest: BTreeMap<String, &Secret> = BTreeMap::new();
                for secret in secrets.iter().filter(|s| label(s, labels::BUNDLE_FOR).is_empty()) {
                    let logical = label(secret, labels::NAME).to_string();
                    let replace = newest.get(&logical).is_none_or(|existing| {
                        (unix_label(secret, labels::LAST_ROTATION_INITIATION_TIME), unix_label(secret, labels::ISSUED_AT_TIME))
                            > (unix_label(existing, labels::LAST_ROTATION_INITIATION_TIME), unix_label(existing, labels::ISSUED_AT_TIME))
                    });
                    if replace {
                        newest.insert(logical, secret);
                    }
                }

                let mut times: BTreeMap<String, String> = newest
                    .into_iter()
                    .map(|(logical, secret)| (logical, label(secret, labels::LAST_ROTATION_INITIATION_TIME).to_string()))
                    .collect();
                for (logical, requested) in &self.requested_rotations {
                    let current = times.get(logical).and_then(|t| t.parse::<i64>().ok());
                    if current.is_none_or(|t| requested.timestamp() > t) {
                        times.insert(logical.clone(), requested.timestamp().to_string());
                    }
                }
                *self.rotation_times.lock() = times;
                debug!(namespace = %self.namespace, identity = %self.identity, "Secrets manager initialized");
                Ok::<(), GardenerError>(())
            })
            .await
            .map(|_| ())
    }

    /// Request a rotation of `logical`, effective on its next generation.
    pub async fn start_rotation(&self, logical: &str, time: DateTime<Utc>) -> Result<()> {
        self.initialize().await?;
        self.rotation_times
            .lock()
            .insert(logical.to_string(), time.timestamp().to_string());
        Ok(())
    }

    fn lock_for(&self, logical: &str) -> Arc<Mutex<()>> {
        self.locks.entry(logical.to_string()).or_default().clone()
    }

    async fn signing_ca(&self, ca_name: &str, mode: SigningMode) -> Result<(Secret, SigningCa)> {
        let store = self.store.read().await;
        let entry = store.get(ca_name).ok_or_else(|| {
            GardenerError::SecretGenerationError(format!(
                "secrets manager: CA {} has not been generated yet",
                ca_name
            ))
        })?;
        let secret = match mode {
            SigningMode::UseOldCa => entry.old.as_ref().or(entry.current.as_ref()),
            _ => entry.current.as_ref(),
        }
        .ok_or_else(|| {
            GardenerError::SecretGenerationError(format!("secrets manager: CA {} has no current secret", ca_name))
        })?;

        let read = |key: &str| {
            secret_data(secret, key)
                .and_then(|b| String::from_utf8(b).ok())
                .ok_or_else(|| {
                    GardenerError::SecretGenerationError(format!(
                        "secret {} is missing {}",
                        meta_name(secret),
                        key
                    ))
                })
        };
        let signing = SigningCa {
            cert_pem: read(DATA_KEY_CA_CERT)?,
            key_pem: read(DATA_KEY_CA_KEY)?,
        };
        Ok((secret.clone(), signing))
    }

    /// Ensure an up-to-date secret for `config` exists and return it.
    #[instrument(skip(self, config, options), fields(namespace = %self.namespace, secret = %config.name()))]
    pub async fn generate(&self, config: &SecretConfig, options: GenerateOptions) -> Result<Secret> {
        self.initialize().await?;
        let logical = config.name().to_string();
        let lock = self.lock_for(&logical);
        let _guard = lock.lock().await;

        let signing = match (&options.signed_by, config.is_certificate() && !config.is_ca()) {
            (Some((ca_name, mode)), true) => Some((ca_name.clone(), *mode, self.signing_ca(ca_name, *mode).await?)),
            _ => None,
        };

        let mut secret_labels = BTreeMap::from([
            (labels::MANAGED_BY.to_string(), labels::MANAGED_BY_VALUE.to_string()),
            (labels::MANAGER_IDENTITY.to_string(), self.identity.clone()),
            (labels::NAME.to_string(), logical.clone()),
            (
                labels::CHECKSUM_OF_CONFIG.to_string(),
                config.checksum(signing.as_ref().map(|(ca, _, _)| ca.as_str()))?,
            ),
            (
                labels::LAST_ROTATION_INITIATION_TIME.to_string(),
                self.rotation_times.lock().get(&logical).cloned().unwrap_or_default(),
            ),
        ]);
        if let Some((_, mode, (ca_secret, _))) = &signing {
            if *mode != SigningMode::Default {
                let ca_data = secret_data(ca_secret, DATA_KEY_CA_CERT).unwrap_or_default();
                secret_labels.insert(
                    labels::CHECKSUM_OF_SIGNING_CA.to_string(),
                    hex::encode(Sha256::digest(&ca_data))[..8].to_string(),
                );
            }
        }
        if options.persist {
            secret_labels.insert(labels::PERSIST.to_string(), "true".to_string());
        }

        let mut name = secret_name(&logical, &secret_labels);
        let mut existing = get::<Secret>(self.client.as_ref(), Some(&self.namespace), &name).await?;
        let now = self.now();
        if existing.as_ref().is_some_and(|s| needs_renewal(s, now)) {
            info!(secret = %name, "Renewing secret close to expiry");
            let time = now.timestamp().to_string();
            self.rotation_times.lock().insert(logical.clone(), time.clone());
            secret_labels.insert(labels::LAST_ROTATION_INITIATION_TIME.to_string(), time);
            name = secret_name(&logical, &secret_labels);
            existing = get::<Secret>(self.client.as_ref(), Some(&self.namespace), &name).await?;
        }
        let secret = match existing {
            Some(existing) => self.maintain_labels(existing, config, &options).await?,
            None => {
                let signing_ca = signing.as_ref().map(|(_, _, (_, ca))| ca);
                self.create_secret(&name, config, secret_labels, signing_ca, &options).await?
            }
        };

        let olds = match options.rotation {
            RotationStrategy::KeepOld if !options.ignore_old_secrets => {
                self.find_old(&logical, &secret, options.ignore_old_secrets_after).await?
            }
            _ => Vec::new(),
        };
        let bundle = if config.bundles() {
            Some(self.ensure_bundle(config, &secret, &olds).await?)
        } else {
            None
        };
        let old = olds.into_iter().next();

        self.store.write().await.insert(
            logical,
            Entry {
                config: Some(config.clone()),
                current: Some(secret.clone()),
                old,
                bundle,
            },
        );
        Ok(secret)
    }

    async fn create_secret(
        &self,
        name: &str,
        config: &SecretConfig,
        mut secret_labels: BTreeMap<String, String>,
        signing_ca: Option<&SigningCa>,
        options: &GenerateOptions,
    ) -> Result<Secret> {
        let now = self.now();
        let generated = config.generate(signing_ca, now)?;
        let issued_at = generated.not_before.unwrap_or(now);
        secret_labels.insert(labels::ISSUED_AT_TIME.to_string(), issued_at.timestamp().to_string());
        let valid_until = match (generated.not_after, options.validity) {
            (Some(not_after), _) => Some(not_after),
            (None, Some(validity)) => chrono::Duration::from_std(validity).ok().map(|v| issued_at + v),
            (None, None) => None,
        };
        if let Some(valid_until) = valid_until {
            secret_labels.insert(labels::VALID_UNTIL_TIME.to_string(), valid_until.timestamp().to_string());
        }

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(secret_labels),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            immutable: Some(true),
            data: Some(
                generated
                    .data
                    .into_iter()
                    .map(|(k, v)| (k, ByteString(v)))
                    .collect(),
            ),
            ..Default::default()
        };
        info!(secret = %name, "Creating managed secret");
        create(self.client.as_ref(), &secret).await
    }

    /// Bring the mutable labels of an existing secret in line with the options.
    async fn maintain_labels(&self, existing: Secret, config: &SecretConfig, options: &GenerateOptions) -> Result<Secret> {
        let mut desired: BTreeMap<String, Option<String>> = BTreeMap::new();
        if options.persist && label(&existing, labels::PERSIST) != "true" {
            desired.insert(labels::PERSIST.to_string(), Some("true".to_string()));
        }
        if !config.is_certificate() {
            let valid_until = match (options.validity, unix_label(&existing, labels::ISSUED_AT_TIME)) {
                (Some(validity), Some(issued)) => Some((issued + validity.as_secs() as i64).to_string()),
                _ => None,
            };
            let current = label(&existing, labels::VALID_UNTIL_TIME);
            match valid_until {
                Some(v) if v != current => {
                    desired.insert(labels::VALID_UNTIL_TIME.to_string(), Some(v));
                }
                None if !current.is_empty() => {
                    desired.insert(labels::VALID_UNTIL_TIME.to_string(), None);
                }
                _ => {}
            }
        }
        if desired.is_empty() {
            return Ok(existing);
        }

        debug!(secret = %meta_name(&existing), "Updating labels of managed secret");
        patch::<Secret>(
            self.client.as_ref(),
            Some(&self.namespace),
            meta_name(&existing),
            &serde_json::json!({ "metadata": { "labels": desired } }),
        )
        .await
    }

    /// The other secrets of `logical`, newest first, unless old secrets are to be ignored by now.
    async fn find_old(&self, logical: &str, current: &Secret, ignore_after: Option<Duration>) -> Result<Vec<Secret>> {
        if let (Some(after), Some(issued)) = (ignore_after, unix_label(current, labels::ISSUED_AT_TIME)) {
            if self.now().timestamp() >= issued + after.as_secs() as i64 {
                return Ok(Vec::new());
            }
        }

        let selector = format!("{},{}={}", self.selector(), labels::NAME, logical);
        let mut olds: Vec<Secret> = list::<Secret>(self.client.as_ref(), Some(&self.namespace), Some(&selector))
            .await?
            .into_iter()
            .filter(|s| meta_name(s) != meta_name(current))
            .filter(|s| label(s, labels::BUNDLE_FOR).is_empty())
            .collect();
        olds.sort_by_cached_key(|s| {
            std::cmp::Reverse((
                unix_label(s, labels::LAST_ROTATION_INITIATION_TIME),
                unix_label(s, labels::ISSUED_AT_TIME),
                meta_name(s).to_string(),
            ))
        });
        Ok(olds)
    }

    /// Bundle of the current secret and every old one that has not expired yet.
    async fn ensure_bundle(&self, config: &SecretConfig, current: &Secret, olds: &[Secret]) -> Result<Secret> {
        let Some((source_key, bundle_key)) = config.bundle_source_key() else {
            return Err(GardenerError::SecretGenerationError(format!(
                "secret {} cannot be bundled",
                config.name()
            )));
        };
        let now = self.now().timestamp();
        let mut members: Vec<Vec<u8>> = std::iter::once(current)
            .chain(olds)
            .filter(|s| unix_label(s, labels::VALID_UNTIL_TIME).is_none_or(|until| until > now))
            .filter_map(|s| secret_data(s, source_key))
            .collect();
        members.sort();
        members.dedup();
        let bundle: Vec<u8> = members.concat();

        let logical = config.name();
        let name = format!(
            "{}-bundle-{}",
            logical,
            &data_checksum(&BTreeMap::from([(bundle_key.to_string(), bundle.clone())]))[..8]
        );
        if let Some(existing) = get::<Secret>(self.client.as_ref(), Some(&self.namespace), &name).await? {
            return Ok(existing);
        }

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([
                    (labels::MANAGED_BY.to_string(), labels::MANAGED_BY_VALUE.to_string()),
                    (labels::MANAGER_IDENTITY.to_string(), self.identity.clone()),
                    (labels::NAME.to_string(), format!("{}-bundle", logical)),
                    (labels::BUNDLE_FOR.to_string(), logical.to_string()),
                    (labels::ISSUED_AT_TIME.to_string(), now.to_string()),
                ])),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            immutable: Some(true),
            data: Some(BTreeMap::from([(bundle_key.to_string(), ByteString(bundle))])),
            ..Default::default()
        };
        info!(secret = %name, "Creating bundle secret");
        create(self.client.as_ref(), &secret).await
    }

    /// A face of a logical secret generated by this manager.
    pub async fn get(&self, logical: &str, class: SecretClass) -> Option<Secret> {
        let store = self.store.read().await;
        let entry = store.get(logical)?;
        match class {
            SecretClass::Bundle => entry.bundle.clone().or_else(|| entry.current.clone()),
            SecretClass::Current => entry.current.clone(),
            SecretClass::Old => entry.old.clone(),
        }
    }

    /// Logical names generated so far, with their configuration.
    pub async fn generated(&self) -> Vec<(String, Option<SecretConfig>)> {
        let store = self.store.read().await;
        let mut names: Vec<_> = store.iter().map(|(k, v)| (k.clone(), v.config.clone())).collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        names
    }

    /// Delete managed secrets that are neither served by the store nor still valid.
    ///
    /// A persisted secret survives as long as it is the newest one of its logical name.
    #[instrument(skip(self), fields(namespace = %self.namespace, identity = %self.identity))]
    pub async fn cleanup(&self) -> Result<usize> {
        let in_use: HashSet<String> = {
            let store = self.store.read().await;
            store
                .values()
                .flat_map(|e| [&e.current, &e.old, &e.bundle])
                .flatten()
                .map(|s| meta_name(s).to_string())
                .collect()
        };

        let secrets = self.managed_secrets().await?;
        let mut newest: HashMap<&str, &Secret> = HashMap::new();
        for secret in &secrets {
            let logical = label(secret, labels::NAME);
            let key = |s: &Secret| (unix_label(s, labels::LAST_ROTATION_INITIATION_TIME), unix_label(s, labels::ISSUED_AT_TIME));
            if newest.get(logical).is_none_or(|n| key(secret) > key(n)) {
                newest.insert(logical, secret);
            }
        }

        let now = self.now().timestamp();
        let mut deleted = 0;
        for secret in &secrets {
            let name = meta_name(secret);
            if in_use.contains(name) {
                continue;
            }
            if unix_label(secret, labels::VALID_UNTIL_TIME).is_some_and(|until| until > now) {
                continue;
            }
            let is_newest = newest
                .get(label(secret, labels::NAME))
                .is_some_and(|n| meta_name(n) == name);
            if label(secret, labels::PERSIST) == "true" && is_newest {
                continue;
            }
            info!(secret = %name, "Deleting unused managed secret");
            if delete::<Secret>(self.client.as_ref(), Some(&self.namespace), name).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

fn needs_renewal(secret: &Secret, now: DateTime<Utc>) -> bool {
    let (Some(issued), Some(until)) = (
        unix_label(secret, labels::ISSUED_AT_TIME),
        unix_label(secret, labels::VALID_UNTIL_TIME),
    ) else {
        return false;
    };
    let now = now.timestamp();
    let lifetime = until - issued;
    if lifetime <= 0 {
        return false;
    }
    (now - issued) as f64 / lifetime as f64 >= RENEW_AFTER_VALIDITY_FRACTION
        || (lifetime > RENEW_BEFORE_EXPIRY_SECS && until - now < RENEW_BEFORE_EXPIRY_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::config::{
        BasicAuthConfig, CertType, CertificateConfig, DATA_KEY_CERT_BUNDLE,
    };
    use crate::test_utils::FakeCluster;
    use std::sync::atomic::{AtomicI64, Ordering};

    const NAMESPACE: &str = "shoot--dev--web";

    fn ca_config() -> SecretConfig {
        SecretConfig::Certificate(CertificateConfig::ca("ca", "kubernetes"))
    }

    fn leaf_config() -> SecretConfig {
        SecretConfig::Certificate(
            CertificateConfig::leaf("kube-apiserver", "kube-apiserver", CertType::Server)
                .with_dns_names(["kube-apiserver"]),
        )
    }

    fn manager(fake: &Arc<FakeCluster>) -> SecretsManager {
        SecretsManager::new(fake.clone(), NAMESPACE, "test", BTreeMap::new())
    }

    /// A clock running `offset` seconds ahead of the wall clock.
    fn shifted_clock() -> (Clock, Arc<AtomicI64>) {
        let offset = Arc::new(AtomicI64::new(0));
        let shift = offset.clone();
        let clock: Clock = Arc::new(move || Utc::now() + chrono::Duration::seconds(shift.load(Ordering::SeqCst)));
        (clock, offset)
    }

    fn bundle_of(secret: &Secret) -> Vec<u8> {
        secret_data(secret, DATA_KEY_CERT_BUNDLE).unwrap()
    }

    #[test]
    fn test_secret_name() {
        let mut l = BTreeMap::from([(labels::CHECKSUM_OF_CONFIG.to_string(), "abcd1234".to_string())]);
        assert_eq!(secret_name("ca", &l), "ca-abcd1234");
        l.insert(labels::LAST_ROTATION_INITIATION_TIME.to_string(), "1700000000".to_string());
        let rotated = secret_name("ca", &l);
        assert!(rotated.starts_with("ca-abcd1234-"));
        assert_eq!(rotated.len(), "ca-abcd1234-".len() + 5);
    }

    #[test]
    fn test_needs_renewal() {
        let now = Utc::now();
        let secret = |issued: i64, until: i64| Secret {
            metadata: ObjectMeta {
                labels: Some(BTreeMap::from([
                    (labels::ISSUED_AT_TIME.to_string(), issued.to_string()),
                    (labels::VALID_UNTIL_TIME.to_string(), until.to_string()),
                ])),
                ..Default::default()
            },
            ..Default::default()
        };
        let t = now.timestamp();
        let day = 24 * 3600;

        // fresh short-lived secret
        assert!(!needs_renewal(&secret(t, t + 3600), now));
        // 80% of an hour has passed
        assert!(needs_renewal(&secret(t - 2900, t + 700), now));
        // 70% of a month has passed, nine days left
        assert!(needs_renewal(&secret(t - 21 * day, t + 9 * day), now));
        assert!(!needs_renewal(&secret(t - 100 * day, t + 265 * day), now));
        assert!(!needs_renewal(&Secret::default(), now));
    }

    #[tokio::test]
    async fn test_generate_is_idempotent() {
        let fake = Arc::new(FakeCluster::new());
        let sm = manager(&fake);

        let first = sm.generate(&ca_config(), GenerateOptions::default()).await.unwrap();
        let second = sm.generate(&ca_config(), GenerateOptions::default()).await.unwrap();
        assert_eq!(first.metadata.name, second.metadata.name);
        assert_eq!(first.metadata.resource_version, second.metadata.resource_version);
        assert_eq!(first.immutable, Some(true));
        assert_eq!(label(&first, labels::NAME), "ca");
        assert!(!label(&first, labels::VALID_UNTIL_TIME).is_empty());
    }

    #[tokio::test]
    async fn test_bundle_contains_current_ca() {
        let fake = Arc::new(FakeCluster::new());
        let sm = manager(&fake);
        let ca = sm.generate(&ca_config(), GenerateOptions::default()).await.unwrap();

        let bundle = sm.get("ca", SecretClass::Bundle).await.unwrap();
        assert_eq!(label(&bundle, labels::BUNDLE_FOR), "ca");
        assert_eq!(bundle_of(&bundle), secret_data(&ca, DATA_KEY_CA_CERT).unwrap());
    }

    #[tokio::test]
    async fn test_keep_old_rotation() {
        let fake = Arc::new(FakeCluster::new());
        let t0 = Utc::now() - chrono::Duration::hours(1);
        let sm = SecretsManager::new(fake.clone(), NAMESPACE, "test", BTreeMap::from([("ca".to_string(), t0)]));
        let options = || GenerateOptions::default().rotate(RotationStrategy::KeepOld);
        let before = sm.generate(&ca_config(), options()).await.unwrap();

        sm.start_rotation("ca", Utc::now()).await.unwrap();
        let after = sm.generate(&ca_config(), options()).await.unwrap();
        assert_ne!(before.metadata.name, after.metadata.name);

        let old = sm.get("ca", SecretClass::Old).await.unwrap();
        assert_eq!(old.metadata.name, before.metadata.name);
        let current = sm.get("ca", SecretClass::Current).await.unwrap();
        assert_eq!(current.metadata.name, after.metadata.name);

        let bundle = bundle_of(&sm.get("ca", SecretClass::Bundle).await.unwrap());
        let contains = |s: &Secret| {
            let cert = secret_data(s, DATA_KEY_CA_CERT).unwrap();
            bundle.windows(cert.len()).any(|w| w == cert.as_slice())
        };
        assert!(contains(&before));
        assert!(contains(&after));
    }

    #[tokio::test]
    async fn test_bundle_keeps_every_unexpired_ca_across_rotations() {
        let fake = Arc::new(FakeCluster::new());
        let sm = manager(&fake);
        let options = || GenerateOptions::default().rotate(RotationStrategy::KeepOld);
        let first = sm.generate(&ca_config(), options()).await.unwrap();
        sm.start_rotation("ca", Utc::now() + chrono::Duration::seconds(1)).await.unwrap();
        let second = sm.generate(&ca_config(), options()).await.unwrap();
        sm.start_rotation("ca", Utc::now() + chrono::Duration::seconds(2)).await.unwrap();
        let third = sm.generate(&ca_config(), options()).await.unwrap();
        assert_ne!(second.metadata.name, third.metadata.name);

        let old = sm.get("ca", SecretClass::Old).await.unwrap();
        assert_eq!(old.metadata.name, second.metadata.name);
        let bundle = bundle_of(&sm.get("ca", SecretClass::Bundle).await.unwrap());
        for ca in [&first, &second, &third] {
            let cert = secret_data(ca, DATA_KEY_CA_CERT).unwrap();
            assert!(bundle.windows(cert.len()).any(|w| w == cert.as_slice()));
        }
    }

    #[tokio::test]
    async fn test_bundle_drops_expired_ca() {
        let fake = Arc::new(FakeCluster::new());
        let (clock, offset) = shifted_clock();
        let sm = manager(&fake).with_clock(clock);
        let short_lived = SecretConfig::Certificate(
            CertificateConfig::ca("ca", "kubernetes").with_validity(Duration::from_secs(3600)),
        );
        let options = || GenerateOptions::default().rotate(RotationStrategy::KeepOld);
        let expired = sm.generate(&short_lived, options()).await.unwrap();

        offset.store(2 * 3600, Ordering::SeqCst);
        let renewed = sm.generate(&short_lived, options()).await.unwrap();
        assert_ne!(expired.metadata.name, renewed.metadata.name);

        let bundle = bundle_of(&sm.get("ca", SecretClass::Bundle).await.unwrap());
        assert_eq!(bundle, secret_data(&renewed, DATA_KEY_CA_CERT).unwrap());
    }

    #[tokio::test]
    async fn test_in_place_rotation_drops_old() {
        let fake = Arc::new(FakeCluster::new());
        let sm = manager(&fake);
        sm.generate(&ca_config(), GenerateOptions::default()).await.unwrap();
        sm.start_rotation("ca", Utc::now()).await.unwrap();
        sm.generate(&ca_config(), GenerateOptions::default()).await.unwrap();
        assert!(sm.get("ca", SecretClass::Old).await.is_none());
    }

    #[tokio::test]
    async fn test_ignore_old_secrets_after() {
        let fake = Arc::new(FakeCluster::new());
        let (clock, offset) = shifted_clock();
        let sm = manager(&fake).with_clock(clock);
        let options = || {
            GenerateOptions::default()
                .rotate(RotationStrategy::KeepOld)
                .ignore_old_secrets_after(Duration::from_secs(3600))
        };
        sm.generate(&ca_config(), options()).await.unwrap();
        sm.start_rotation("ca", Utc::now()).await.unwrap();
        sm.generate(&ca_config(), options()).await.unwrap();
        assert!(sm.get("ca", SecretClass::Old).await.is_some());

        offset.store(2 * 3600, Ordering::SeqCst);
        sm.generate(&ca_config(), options()).await.unwrap();
        assert!(sm.get("ca", SecretClass::Old).await.is_none());
    }

    #[tokio::test]
    async fn test_signed_leaf_default_mode_survives_ca_rotation() {
        let fake = Arc::new(FakeCluster::new());
        let sm = manager(&fake);
        sm.generate(&ca_config(), GenerateOptions::default()).await.unwrap();
        let options = || GenerateOptions::default().signed_by_ca("ca", SigningMode::Default);
        let leaf = sm.generate(&leaf_config(), options()).await.unwrap();

        sm.start_rotation("ca", Utc::now()).await.unwrap();
        sm.generate(&ca_config(), GenerateOptions::default()).await.unwrap();
        let again = sm.generate(&leaf_config(), options()).await.unwrap();
        assert_eq!(leaf.metadata.name, again.metadata.name);
    }

    #[tokio::test]
    async fn test_signed_leaf_use_current_ca_is_resigned() {
        let fake = Arc::new(FakeCluster::new());
        let sm = manager(&fake);
        sm.generate(&ca_config(), GenerateOptions::default()).await.unwrap();
        let options = || GenerateOptions::default().signed_by_ca("ca", SigningMode::UseCurrentCa);
        let leaf = sm.generate(&leaf_config(), options()).await.unwrap();

        sm.start_rotation("ca", Utc::now()).await.unwrap();
        let new_ca = sm.generate(&ca_config(), GenerateOptions::default()).await.unwrap();
        let again = sm.generate(&leaf_config(), options()).await.unwrap();
        assert_ne!(leaf.metadata.name, again.metadata.name);
        assert_eq!(
            secret_data(&again, DATA_KEY_CA_CERT),
            secret_data(&new_ca, DATA_KEY_CA_CERT)
        );
    }

    #[tokio::test]
    async fn test_leaf_requires_generated_ca() {
        let fake = Arc::new(FakeCluster::new());
        let sm = manager(&fake);
        let err = sm
            .generate(&leaf_config(), GenerateOptions::default().signed_by_ca("ca", SigningMode::Default))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("has not been generated"));
    }

    #[tokio::test]
    async fn test_cleanup_removes_unrequested_secrets() {
        let fake = Arc::new(FakeCluster::new());
        let basic_auth = SecretConfig::BasicAuth(BasicAuthConfig {
            name: "observability".to_string(),
            username: "admin".to_string(),
            password_length: 16,
        });
        let stale = {
            let sm = manager(&fake);
            sm.generate(&basic_auth, GenerateOptions::default()).await.unwrap()
        };

        let sm = manager(&fake);
        sm.generate(&ca_config(), GenerateOptions::default()).await.unwrap();
        assert_eq!(sm.cleanup().await.unwrap(), 1);
        assert!(!fake.exists("v1", "Secret", NAMESPACE, meta_name(&stale)));
        assert!(sm.get("ca", SecretClass::Current).await.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_persisted_and_valid_secrets() {
        let fake = Arc::new(FakeCluster::new());
        let basic_auth = SecretConfig::BasicAuth(BasicAuthConfig {
            name: "observability".to_string(),
            username: "admin".to_string(),
            password_length: 16,
        });
        {
            let sm = manager(&fake);
            sm.generate(&basic_auth, GenerateOptions::default().persist()).await.unwrap();
            sm.generate(&ca_config(), GenerateOptions::default()).await.unwrap();
        }

        let sm = manager(&fake);
        assert_eq!(sm.cleanup().await.unwrap(), 1);
        let remaining: Vec<String> = fake
            .objects_of("", "Secret")
            .iter()
            .map(|s| s["metadata"]["labels"]["name"].as_str().unwrap_or_default().to_string())
            .collect();
        assert!(remaining.contains(&"observability".to_string()));
        assert!(remaining.contains(&"ca".to_string()));
        assert!(!remaining.contains(&"ca-bundle".to_string()));
    }

    #[tokio::test]
    async fn test_validity_label_follows_option() {
        let fake = Arc::new(FakeCluster::new());
        let sm = manager(&fake);
        let config = SecretConfig::BasicAuth(BasicAuthConfig {
            name: "observability".to_string(),
            username: "admin".to_string(),
            password_length: 16,
        });
        let first = sm
            .generate(&config, GenerateOptions::default().validity(Duration::from_secs(3600)))
            .await
            .unwrap();
        let issued = unix_label(&first, labels::ISSUED_AT_TIME).unwrap();
        assert_eq!(unix_label(&first, labels::VALID_UNTIL_TIME), Some(issued + 3600));

        let second = sm
            .generate(&config, GenerateOptions::default().validity(Duration::from_secs(7200)))
            .await
            .unwrap();
        assert_eq!(first.metadata.name, second.metadata.name);
        assert_eq!(unix_label(&second, labels::VALID_UNTIL_TIME), Some(issued + 7200));
    }

    #[tokio::test]
    async fn test_expiring_certificate_is_renewed_on_start() {
        let fake = Arc::new(FakeCluster::new());
        let ca = {
            let sm = manager(&fake);
            sm.generate(&ca_config(), GenerateOptions::default()).await.unwrap()
        };

        let later = Utc::now() + chrono::Duration::days(9 * 365);
        let sm = manager(&fake).with_clock(Arc::new(move || later));
        let renewed = sm.generate(&ca_config(), GenerateOptions::default()).await.unwrap();
        assert_ne!(ca.metadata.name, renewed.metadata.name);
    }

    #[tokio::test]
    async fn test_long_lived_manager_renews_expiring_certificate() {
        let fake = Arc::new(FakeCluster::new());
        let (clock, offset) = shifted_clock();
        let sm = manager(&fake).with_clock(clock);
        let ca = sm.generate(&ca_config(), GenerateOptions::default()).await.unwrap();

        offset.store(9 * 365 * 24 * 3600, Ordering::SeqCst);
        let renewed = sm.generate(&ca_config(), GenerateOptions::default()).await.unwrap();
        assert_ne!(ca.metadata.name, renewed.metadata.name);
        assert!(!label(&renewed, labels::LAST_ROTATION_INITIATION_TIME).is_empty());

        let again = sm.generate(&ca_config(), GenerateOptions::default()).await.unwrap();
        assert_eq!(renewed.metadata.name, again.metadata.name);
        let current = sm.get("ca", SecretClass::Current).await.unwrap();
        assert_eq!(current.metadata.name, renewed.metadata.name);
    }

    #[tokio::test]
    async fn test_concurrent_generate_creates_one_secret() {
        let fake = Arc::new(FakeCluster::new());
        let sm = Arc::new(manager(&fake));
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let sm = sm.clone();
                tokio::spawn(async move { sm.generate(&ca_config(), GenerateOptions::default()).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(fake.calls_of("create", "Secret").len(), 2);
    }
}
