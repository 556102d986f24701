// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Idempotent finalizer handling.
//!
//! Finalizer lists are written with a merge patch carrying the observed
//! `resourceVersion`, so concurrent writers surface as conflicts instead of
//! silently dropping each other's finalizers.

use super::cluster::ClusterClient;
use super::typed::api_resource;
use crate::error::{is_not_found, Result};
use kube::api::{ApiResource, ObjectMeta};
use kube::Resource;
use serde_json::json;
use tracing::debug;

pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

async fn write_finalizers(
    client: &dyn ClusterClient,
    resource: &ApiResource,
    meta: &ObjectMeta,
    finalizers: Vec<String>,
) -> Result<bool> {
    let name = meta.name.clone().unwrap_or_default();
    let patch = json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": meta.resource_version,
        }
    });
    match client
        .patch(resource, meta.namespace.as_deref(), &name, &patch)
        .await
    {
        Ok(_) => Ok(true),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Add `finalizer` unless present. Returns true if the object was patched.
pub async fn add_finalizer_dynamic(
    client: &dyn ClusterClient,
    resource: &ApiResource,
    meta: &ObjectMeta,
    finalizer: &str,
) -> Result<bool> {
    if has_finalizer(meta, finalizer) {
        return Ok(false);
    }
    debug!(kind = %resource.kind, name = ?meta.name, %finalizer, "Adding finalizer");
    let mut finalizers = meta.finalizers.clone().unwrap_or_default();
    finalizers.push(finalizer.to_string());
    write_finalizers(client, resource, meta, finalizers).await
}

/// Remove `finalizer` if present. A vanished object counts as done.
pub async fn remove_finalizer_dynamic(
    client: &dyn ClusterClient,
    resource: &ApiResource,
    meta: &ObjectMeta,
    finalizer: &str,
) -> Result<bool> {
    if !has_finalizer(meta, finalizer) {
        return Ok(false);
    }
    debug!(kind = %resource.kind, name = ?meta.name, %finalizer, "Removing finalizer");
    let finalizers = meta
        .finalizers
        .iter()
        .flatten()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect();
    write_finalizers(client, resource, meta, finalizers).await
}

pub async fn add_finalizer<K>(client: &dyn ClusterClient, obj: &K, finalizer: &str) -> Result<bool>
where
    K: Resource<DynamicType = ()>,
{
    add_finalizer_dynamic(client, &api_resource::<K>(), obj.meta(), finalizer).await
}

pub async fn remove_finalizer<K>(client: &dyn ClusterClient, obj: &K, finalizer: &str) -> Result<bool>
where
    K: Resource<DynamicType = ()>,
{
    remove_finalizer_dynamic(client, &api_resource::<K>(), obj.meta(), finalizer).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::typed::{create, get_required};
    use crate::test_utils::FakeCluster;
    use k8s_openapi::api::core::v1::Secret;

    fn make_secret(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("garden".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let fake = FakeCluster::new();
        let secret = create(&fake, &make_secret("creds")).await.unwrap();

        assert!(add_finalizer(&fake, &secret, "gardener").await.unwrap());
        let secret: Secret = get_required(&fake, Some("garden"), "creds").await.unwrap();
        assert!(has_finalizer(&secret.metadata, "gardener"));

        assert!(!add_finalizer(&fake, &secret, "gardener").await.unwrap());
        let secret: Secret = get_required(&fake, Some("garden"), "creds").await.unwrap();
        assert_eq!(secret.metadata.finalizers.unwrap(), vec!["gardener".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_keeps_other_finalizers() {
        let fake = FakeCluster::new();
        let mut secret = make_secret("creds");
        secret.metadata.finalizers = Some(vec!["a".to_string(), "gardener".to_string()]);
        let secret = create(&fake, &secret).await.unwrap();

        assert!(remove_finalizer(&fake, &secret, "gardener").await.unwrap());
        let secret: Secret = get_required(&fake, Some("garden"), "creds").await.unwrap();
        assert_eq!(secret.metadata.finalizers.clone().unwrap(), vec!["a".to_string()]);
        assert!(!remove_finalizer(&fake, &secret, "gardener").await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let fake = FakeCluster::new();
        let stale = create(&fake, &make_secret("creds")).await.unwrap();
        add_finalizer(&fake, &stale, "first").await.unwrap();

        let err = add_finalizer(&fake, &stale, "second").await.unwrap_err();
        assert!(err.is_conflict());
    }
}
