// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use super::common::{get_condition, Condition, LocalObjectReference};
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(group = "resources.gardener.cloud", version = "v1alpha1", kind = "ManagedResource")]
#[kube(namespaced)]
#[kube(status = "ManagedResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceSpec {
    /// Routes the resource to the reconciler instance with the same class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default)]
    pub secret_refs: Vec<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inject_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_overwrite_labels: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_overwrite_annotations: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_objects: Option<bool>,
    /// Sets of group/kind pairs that are treated as the same resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub equivalences: Vec<Vec<GroupKind>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_persistent_volume_claims: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupKind {
    #[serde(default)]
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            kind: kind.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets_data_checksum: Option<String>,
}

/// An object applied by a ManagedResource, together with the labels and
/// annotations it was last applied with.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectReference {
    /// API group, empty for the core group.
    pub fn group(&self) -> &str {
        match self.api_version.rsplit_once('/') {
            Some((group, _)) => group,
            None => "",
        }
    }

    pub fn version(&self) -> &str {
        match self.api_version.rsplit_once('/') {
            Some((_, version)) => version,
            None => &self.api_version,
        }
    }

    /// `<group>/<kind>/<namespace>/<name>`, the identity used for diffs.
    pub fn key(&self) -> String {
        format!("{}/{}/{}/{}", self.group(), self.kind, self.namespace, self.name)
    }
}

impl PartialOrd for ObjectReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectReference {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.api_version, &self.kind, &self.namespace, &self.name).cmp(&(
            &other.api_version,
            &other.kind,
            &other.namespace,
            &other.name,
        ))
    }
}

impl ManagedResource {
    pub fn class(&self) -> &str {
        self.spec.class.as_deref().unwrap_or_default()
    }

    pub fn keep_objects(&self) -> bool {
        self.spec.keep_objects.unwrap_or(false)
    }

    pub fn resources(&self) -> &[ObjectReference] {
        self.status
            .as_ref()
            .map(|s| s.resources.as_slice())
            .unwrap_or_default()
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        get_condition(self.conditions(), condition_type)
    }

    pub fn secrets_data_checksum(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.secrets_data_checksum.as_deref())
    }
}
