// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Decoding of ManagedResource payload secrets.

use k8s_openapi::api::core::v1::Secret;
use kube::api::GroupVersionKind;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::warn;

/// One decoded object of the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredObject {
    pub gvk: GroupVersionKind,
    pub object: Value,
}

impl DesiredObject {
    pub fn from_value(object: Value) -> Result<Self, String> {
        let api_version = object
            .get("apiVersion")
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .ok_or("Object 'apiVersion' is missing")?;
        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
            .ok_or("Object 'Kind' is missing")?;
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        let gvk = GroupVersionKind::gvk(group, version, kind);
        if object["metadata"]["name"].as_str().is_none_or(str::is_empty) {
            return Err(format!("{} without a name", kind));
        }
        Ok(Self { gvk, object })
    }

    pub fn api_version(&self) -> String {
        if self.gvk.group.is_empty() {
            self.gvk.version.clone()
        } else {
            format!("{}/{}", self.gvk.group, self.gvk.version)
        }
    }

    pub fn name(&self) -> &str {
        self.object["metadata"]["name"].as_str().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.object["metadata"]["namespace"].as_str().unwrap_or_default()
    }

    pub fn set_namespace(&mut self, namespace: Option<&str>) {
        match namespace {
            Some(ns) => self.object["metadata"]["namespace"] = Value::String(ns.to_string()),
            None => {
                if let Some(meta) = self.object.get_mut("metadata").and_then(Value::as_object_mut) {
                    meta.remove("namespace");
                }
            }
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.object["metadata"]["annotations"][key].as_str()
    }

    /// `<group>/<kind>/<namespace>/<name>`
    pub fn key(&self) -> String {
        format!("{}/{}/{}/{}", self.gvk.group, self.gvk.kind, self.namespace(), self.name())
    }
}

/// The decoded payload of all referenced secrets.
#[derive(Debug, Default)]
pub struct DecodedPayload {
    pub objects: Vec<DesiredObject>,
    pub errors: Vec<String>,
    /// SHA-256 over the raw data of all secrets in reference order
    pub checksum: String,
}

/// Decode the secrets in the order they are referenced.
///
/// Keys of a secret are processed in lexicographic order, each value is a
/// multi-document YAML stream. Empty documents are skipped; broken ones are
/// reported in `errors` without aborting. Duplicate objects keep their first
/// position.
pub fn decode_secrets(secrets: &[Secret]) -> DecodedPayload {
    let mut hasher = Sha256::new();
    let mut payload = DecodedPayload::default();
    let mut seen = HashSet::new();

    for secret in secrets {
        let secret_name = secret.metadata.name.as_deref().unwrap_or_default();
        // BTreeMap iteration is sorted by key
        for (key, value) in secret.data.iter().flatten() {
            hasher.update(&value.0);
            for (index, document) in serde_yaml::Deserializer::from_slice(&value.0).enumerate() {
                let parsed = match Value::deserialize(document) {
                    Ok(Value::Null) => continue,
                    Ok(parsed) => parsed,
                    Err(e) => {
                        payload.errors.push(format!(
                            "Could not decode resource at index {} in '{}' in secret '{}': {}",
                            index, key, secret_name, e
                        ));
                        continue;
                    }
                };
                match DesiredObject::from_value(parsed) {
                    Ok(object) => {
                        if seen.insert(object.key()) {
                            payload.objects.push(object);
                        } else {
                            warn!(object = %object.key(), secret = %secret_name, "Skipping duplicate object in payload");
                        }
                    }
                    Err(e) => payload.errors.push(format!(
                        "Invalid resource at index {} in '{}' in secret '{}': {}",
                        index, key, secret_name, e
                    )),
                }
            }
        }
    }

    payload.checksum = hex::encode(hasher.finalize());
    payload
}
