// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use super::common::{LastError, LastOperation, Provider, SecretReference};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(group = "core.gardener.cloud", version = "v1beta1", kind = "BackupBucket")]
#[kube(status = "BackupBucketStatus")]
#[serde(rename_all = "camelCase")]
pub struct BackupBucketSpec {
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<serde_json::Value>,
    pub secret_ref: SecretReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupBucketStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Credentials generated by the provider for accessing the bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_secret_ref: Option<SecretReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<serde_json::Value>,
}

impl BackupBucket {
    pub fn seed_name(&self) -> Option<&str> {
        self.spec.seed_name.as_deref().filter(|s| !s.is_empty())
    }
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(group = "core.gardener.cloud", version = "v1beta1", kind = "BackupEntry")]
#[kube(namespaced)]
#[kube(status = "BackupEntryStatus")]
#[serde(rename_all = "camelCase")]
pub struct BackupEntrySpec {
    pub bucket_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntryStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_bucket_wire_format() {
        let json = serde_json::json!({
            "apiVersion": "core.gardener.cloud/v1beta1",
            "kind": "BackupBucket",
            "metadata": {"name": "bucket-1"},
            "spec": {
                "provider": {"type": "aws", "region": "eu-west-1"},
                "secretRef": {"name": "backup-secret", "namespace": "garden"},
                "seedName": "seed-a"
            }
        });
        let bucket: BackupBucket = serde_json::from_value(json).unwrap();
        assert_eq!(bucket.seed_name(), Some("seed-a"));
        assert_eq!(bucket.spec.secret_ref.namespace, "garden");
    }

    #[test]
    fn test_backup_entry_references_bucket() {
        let json = serde_json::json!({
            "apiVersion": "core.gardener.cloud/v1beta1",
            "kind": "BackupEntry",
            "metadata": {"name": "shoot--dev--web", "namespace": "garden-dev"},
            "spec": {"bucketName": "bucket-1"}
        });
        let entry: BackupEntry = serde_json::from_value(json).unwrap();
        assert_eq!(entry.spec.bucket_name, "bucket-1");
        assert!(entry.spec.seed_name.is_none());
    }
}
