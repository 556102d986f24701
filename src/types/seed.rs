// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use super::common::{get_condition, Condition, Provider, SecretReference};
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(group = "core.gardener.cloud", version = "v1beta1", kind = "Seed")]
#[kube(status = "SeedStatus")]
#[serde(rename_all = "camelCase")]
pub struct SeedSpec {
    pub provider: Provider,
    #[serde(default)]
    pub networks: SeedNetworks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<SeedIngress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<SeedDns>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<SeedBackup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SeedSettings>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedNetworks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<String>,
    #[serde(default)]
    pub pods: String,
    #[serde(default)]
    pub services: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedIngress {
    pub domain: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedDns {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<SeedDnsProvider>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedDnsProvider {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub secret_ref: SecretReference,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedBackup {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<serde_json::Value>,
    pub secret_ref: SecretReference,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excess_capacity_reservation: Option<Toggle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<SchedulingSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoot_dns: Option<Toggle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical_pod_autoscaler: Option<Toggle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_checks: Option<Toggle>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Toggle {
    pub enabled: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingSettings {
    pub visible: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Seed {
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        get_condition(self.conditions(), condition_type)
    }

    pub fn backup_enabled(&self) -> bool {
        self.spec.backup.is_some()
    }

    /// Whether the VPA should be deployed into the seed (enabled unless switched off).
    pub fn vpa_enabled(&self) -> bool {
        self.spec
            .settings
            .as_ref()
            .and_then(|s| s.vertical_pod_autoscaler.as_ref())
            .is_none_or(|t| t.enabled)
    }

    /// Name of the BackupBucket created for this seed.
    pub fn backup_bucket_name(&self) -> String {
        self.metadata.uid.clone().unwrap_or_else(|| self.name_any())
    }

    /// Name of the copy of the global monitoring secret in the seed.
    pub fn monitoring_secret_name(&self) -> String {
        format!("seed-{}-monitoring", self.name_any())
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
