// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Namespace management utilities

use super::cluster::ClusterClient;
use super::typed::{api_resource, create, delete, get};
use crate::error::{GardenerError, Result};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Ensure a namespace exists and carries `labels`; create it if it doesn't.
#[instrument(skip(client, labels))]
pub async fn ensure_namespace(
    client: &dyn ClusterClient,
    namespace: &str,
    labels: BTreeMap<String, String>,
) -> Result<Namespace> {
    match get::<Namespace>(client, None, namespace).await? {
        Some(existing) => {
            let current = existing.metadata.labels.clone().unwrap_or_default();
            if labels.iter().all(|(k, v)| current.get(k) == Some(v)) {
                debug!("Namespace {} already exists", namespace);
                return Ok(existing);
            }
            info!("Labeling namespace {}", namespace);
            let patch = serde_json::json!({ "metadata": { "labels": labels } });
            let patched = client
                .patch(&api_resource::<Namespace>(), None, namespace, &patch)
                .await
                .map_err(|e| {
                    GardenerError::NamespaceError(format!("Failed to label namespace {}: {}", namespace, e))
                })?;
            crate::kubernetes::typed::from_dynamic(patched)
        }
        None => {
            info!("Creating namespace {}", namespace);
            let ns = Namespace {
                metadata: ObjectMeta {
                    name: Some(namespace.to_string()),
                    labels: (!labels.is_empty()).then_some(labels),
                    ..Default::default()
                },
                ..Default::default()
            };
            let created = create(client, &ns).await.map_err(|e| {
                GardenerError::NamespaceError(format!("Failed to create namespace {}: {}", namespace, e))
            })?;
            info!("Namespace {} created successfully", namespace);
            Ok(created)
        }
    }
}

/// Request deletion of a namespace. Returns true once it is gone.
pub async fn delete_namespace(client: &dyn ClusterClient, namespace: &str) -> Result<bool> {
    delete::<Namespace>(client, None, namespace).await?;
    Ok(get::<Namespace>(client, None, namespace).await?.is_none())
}
