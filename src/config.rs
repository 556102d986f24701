// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Process configuration loaded from a single YAML document.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at the configuration document
pub const CONFIG_PATH_ENV: &str = "GARDENER_CONFIG";

/// Feature gates understood by the lifecycle flows
pub const KNOWN_FEATURE_GATES: &[&str] = &[
    "HVPA",
    "ManagedIstio",
    "HAControlPlanes",
    "APIServerSNI",
    "ReversedVPN",
];

/// Operator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Cluster holding the declarative inventory (garden) or ManagedResources
    pub source_client_connection: ClientConnection,
    /// Cluster the managed objects are applied to; defaults to the source cluster
    pub target_client_connection: Option<ClientConnection>,
    pub controllers: ControllersConfig,
    pub server: ServerConfig,
    pub leader_election: LeaderElectionConfig,
    pub log_level: String,
    pub log_format: LogFormat,
    pub feature_gates: BTreeMap<String, bool>,
    /// The seed this process is responsible for
    pub seed: Option<SeedConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_client_connection: ClientConnection::default(),
            target_client_connection: None,
            controllers: ControllersConfig::default(),
            server: ServerConfig::default(),
            leader_election: LeaderElectionConfig::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            feature_gates: BTreeMap::new(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConnection {
    /// Path to a kubeconfig; in-cluster configuration is used when unset
    pub kubeconfig: Option<PathBuf>,
    /// Restrict watches to this namespace
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    pub enabled: bool,
    pub concurrent_syncs: u16,
    #[serde(with = "humantime_serde")]
    pub sync_period: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrent_syncs: 5,
            sync_period: Duration::from_secs(60),
        }
    }
}

impl ControllerConfig {
    fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagedResourceControllerConfig {
    #[serde(flatten)]
    pub common: ControllerConfig,
    /// Only ManagedResources with this class are handled ("" handles unclassified ones)
    pub class: String,
    /// Value of the managed-by label injected into every applied object
    pub managed_by_label_value: String,
    /// Identity of the source cluster, prefixed to the origin annotation
    pub cluster_id: String,
    /// Requeue interval while deletions are pending
    #[serde(with = "humantime_serde")]
    pub deletion_pending_interval: Duration,
}

impl Default for ManagedResourceControllerConfig {
    fn default() -> Self {
        Self {
            common: ControllerConfig::default(),
            class: String::new(),
            managed_by_label_value: "gardener".to_string(),
            cluster_id: String::new(),
            deletion_pending_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllersConfig {
    #[serde(rename = "kubeletCSRApprover")]
    pub kubelet_csr_approver: ControllerConfig,
    pub garbage_collector: ControllerConfig,
    pub health: ControllerConfig,
    pub managed_resource: ManagedResourceControllerConfig,
    #[serde(rename = "rootCAPublisher")]
    pub root_ca_publisher: ControllerConfig,
    pub secret: ControllerConfig,
    pub token_invalidator: ControllerConfig,
    pub token_requestor: ControllerConfig,
    pub seed: ControllerConfig,
    pub seed_care: ControllerConfig,
    pub shoot: ControllerConfig,
    pub backup_bucket: ControllerConfig,
    pub controller_installation_care: ControllerConfig,
}

impl Default for ControllersConfig {
    fn default() -> Self {
        Self {
            kubelet_csr_approver: ControllerConfig::disabled(),
            garbage_collector: ControllerConfig::disabled(),
            health: ControllerConfig::default(),
            managed_resource: ManagedResourceControllerConfig::default(),
            root_ca_publisher: ControllerConfig::disabled(),
            secret: ControllerConfig::disabled(),
            token_invalidator: ControllerConfig::disabled(),
            token_requestor: ControllerConfig::disabled(),
            seed: ControllerConfig::default(),
            seed_care: ControllerConfig::default(),
            shoot: ControllerConfig::default(),
            backup_bucket: ControllerConfig::default(),
            controller_installation_care: ControllerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub health_probes_port: u16,
    pub metrics_port: u16,
    pub webhook_port: u16,
    /// Directory containing tls.crt and tls.key for the webhook server
    pub webhook_tls_cert_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            health_probes_port: 8081,
            metrics_port: 8080,
            webhook_port: 9443,
            webhook_tls_cert_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LeaderElectionConfig {
    pub leader_elect: bool,
    #[serde(with = "humantime_serde")]
    pub lease_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub renew_deadline: Duration,
    #[serde(with = "humantime_serde")]
    pub retry_period: Duration,
    pub resource_name: String,
    pub resource_namespace: String,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            leader_elect: true,
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
            resource_name: "gardener-core-leader-election".to_string(),
            resource_namespace: "garden".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeedConfig {
    pub name: String,
}

/// Resolved view on the configured feature gates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureGates {
    pub hvpa: bool,
    pub managed_istio: bool,
    pub ha_control_planes: bool,
}

impl Config {
    /// Load configuration from the file named by `GARDENER_CONFIG`, or defaults if unset
    pub fn from_env() -> Result<Self> {
        match env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load(Path::new(&path)),
            Err(_) => {
                let config = Config::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load and validate the configuration document at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {}", path.display()))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(raw).context("parsing configuration document")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, controller) in self.controllers.enabled_controllers() {
            if controller.concurrent_syncs == 0 {
                bail!("controller {} is enabled but concurrentSyncs is 0", name);
            }
        }

        for gate in self.feature_gates.keys() {
            if !KNOWN_FEATURE_GATES.contains(&gate.as_str()) {
                bail!("unknown feature gate {}", gate);
            }
        }

        Ok(())
    }

    pub fn feature_gates(&self) -> FeatureGates {
        let get = |name: &str| self.feature_gates.get(name).copied().unwrap_or(false);
        FeatureGates {
            hvpa: get("HVPA"),
            managed_istio: get("ManagedIstio"),
            ha_control_planes: get("HAControlPlanes"),
        }
    }
}

impl ControllersConfig {
    /// All enabled controllers with their configuration keys
    pub fn enabled_controllers(&self) -> Vec<(&'static str, &ControllerConfig)> {
        let all: [(&'static str, &ControllerConfig); 13] = [
            ("kubeletCSRApprover", &self.kubelet_csr_approver),
            ("garbageCollector", &self.garbage_collector),
            ("health", &self.health),
            ("managedResource", &self.managed_resource.common),
            ("rootCAPublisher", &self.root_ca_publisher),
            ("secret", &self.secret),
            ("tokenInvalidator", &self.token_invalidator),
            ("tokenRequestor", &self.token_requestor),
            ("seed", &self.seed),
            ("seedCare", &self.seed_care),
            ("shoot", &self.shoot),
            ("backupBucket", &self.backup_bucket),
            ("controllerInstallationCare", &self.controller_installation_care),
        ];
        all.into_iter().filter(|(_, c)| c.enabled).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.controllers.managed_resource.common.concurrent_syncs, 5);
        assert!(!config.controllers.garbage_collector.enabled);
    }

    #[test]
    fn test_from_yaml_with_durations() {
        let raw = r#"
logLevel: debug
logFormat: json
controllers:
  managedResource:
    enabled: true
    concurrentSyncs: 10
    syncPeriod: 2m
    class: seed
    deletionPendingInterval: 10s
  health:
    syncPeriod: 30s
featureGates:
  HVPA: true
seed:
  name: seed-a
"#;
        let config = Config::from_yaml(raw).unwrap();

        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_level, "debug");
        let mr = &config.controllers.managed_resource;
        assert_eq!(mr.common.concurrent_syncs, 10);
        assert_eq!(mr.common.sync_period, Duration::from_secs(120));
        assert_eq!(mr.class, "seed");
        assert_eq!(mr.deletion_pending_interval, Duration::from_secs(10));
        assert_eq!(config.controllers.health.sync_period, Duration::from_secs(30));
        assert!(config.feature_gates().hvpa);
        assert!(!config.feature_gates().managed_istio);
        assert_eq!(config.seed.unwrap().name, "seed-a");
    }

    #[test]
    fn test_unknown_feature_gate_is_rejected() {
        let err = Config::from_yaml("featureGates:\n  Teleport: true\n").unwrap_err();
        assert!(err.to_string().contains("Teleport"));
    }

    #[test]
    fn test_zero_concurrent_syncs_is_rejected() {
        let raw = "controllers:\n  shoot:\n    enabled: true\n    concurrentSyncs: 0\n";
        assert!(Config::from_yaml(raw).is_err());
    }

    #[test]
    fn test_zero_concurrent_syncs_on_disabled_controller_is_fine() {
        let raw = "controllers:\n  secret:\n    enabled: false\n    concurrentSyncs: 0\n";
        assert!(Config::from_yaml(raw).is_ok());
    }
}
