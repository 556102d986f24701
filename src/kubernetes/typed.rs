// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Typed access on top of [`ClusterClient`].
//!
//! Objects are converted to and from [`DynamicObject`] through their JSON
//! representation, so any serde-capable resource works.

use super::cluster::ClusterClient;
use crate::error::{is_not_found, GardenerError, Result};
use kube::api::{ApiResource, DynamicObject, PropagationPolicy, TypeMeta};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub fn api_resource<K>() -> ApiResource
where
    K: Resource<DynamicType = ()>,
{
    ApiResource::erase::<K>(&())
}

pub fn to_dynamic<K>(obj: &K) -> Result<DynamicObject>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let mut dynamic: DynamicObject = serde_json::from_value(serde_json::to_value(obj)?)?;
    dynamic.types = Some(TypeMeta {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
    });
    Ok(dynamic)
}

pub fn from_dynamic<K>(obj: DynamicObject) -> Result<K>
where
    K: DeserializeOwned,
{
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

pub async fn get<K>(client: &dyn ClusterClient, namespace: Option<&str>, name: &str) -> Result<Option<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    client
        .get(&api_resource::<K>(), namespace, name)
        .await?
        .map(from_dynamic)
        .transpose()
}

/// Like [`get`], but a missing object is an error.
pub async fn get_required<K>(client: &dyn ClusterClient, namespace: Option<&str>, name: &str) -> Result<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    get(client, namespace, name).await?.ok_or_else(|| {
        GardenerError::Other(anyhow::anyhow!(
            "{} {}{} not found",
            K::kind(&()),
            namespace.map(|ns| format!("{}/", ns)).unwrap_or_default(),
            name
        ))
    })
}

pub async fn list<K>(
    client: &dyn ClusterClient,
    namespace: Option<&str>,
    label_selector: Option<&str>,
) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    client
        .list(&api_resource::<K>(), namespace, label_selector)
        .await?
        .into_iter()
        .map(from_dynamic)
        .collect()
}

pub async fn create<K>(client: &dyn ClusterClient, obj: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let created = client.create(&api_resource::<K>(), &to_dynamic(obj)?).await?;
    from_dynamic(created)
}

pub async fn update<K>(client: &dyn ClusterClient, obj: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let updated = client.update(&api_resource::<K>(), &to_dynamic(obj)?).await?;
    from_dynamic(updated)
}

pub async fn patch<K>(client: &dyn ClusterClient, namespace: Option<&str>, name: &str, patch: &Value) -> Result<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let patched = client
        .patch(&api_resource::<K>(), namespace, name, patch)
        .await?;
    from_dynamic(patched)
}

/// Merge-patch the `status` of an object with the serialized `status`.
pub async fn patch_status<K, S>(client: &dyn ClusterClient, namespace: Option<&str>, name: &str, status: &S) -> Result<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
    S: Serialize,
{
    let patch = serde_json::json!({ "status": status });
    let patched = client
        .patch_status(&api_resource::<K>(), namespace, name, &patch)
        .await?;
    from_dynamic(patched)
}

/// Delete an object. Returns false if it did not exist.
pub async fn delete<K>(client: &dyn ClusterClient, namespace: Option<&str>, name: &str) -> Result<bool>
where
    K: Resource<DynamicType = ()>,
{
    delete_with_propagation::<K>(client, namespace, name, None).await
}

pub async fn delete_with_propagation<K>(
    client: &dyn ClusterClient,
    namespace: Option<&str>,
    name: &str,
    propagation: Option<PropagationPolicy>,
) -> Result<bool>
where
    K: Resource<DynamicType = ()>,
{
    match client
        .delete(&api_resource::<K>(), namespace, name, propagation)
        .await
    {
        Ok(()) => Ok(true),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Create the object, or update it with `mutate` applied to the live version.
///
/// `mutate` receives the live object and must return the desired one; nothing is
/// written if the result equals the live object.
pub async fn create_or_update<K, F>(client: &dyn ClusterClient, desired: &K, mutate: F) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone,
    F: FnOnce(&K) -> K,
{
    let meta = desired.meta();
    let name = meta.name.clone().unwrap_or_default();
    let namespace = meta.namespace.clone();

    match get::<K>(client, namespace.as_deref(), &name).await? {
        None => create(client, desired).await,
        Some(live) => {
            let mut merged = mutate(&live);
            merged.meta_mut().resource_version = live.meta().resource_version.clone();
            if serde_json::to_value(&merged)? == serde_json::to_value(&live)? {
                return Ok(live);
            }
            update(client, &merged).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeCluster;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn make_config_map(name: &str, value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("garden".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("key".to_string(), value.to_string())])),
            ..Default::default()
        }
    }

    #[test]
    fn test_to_dynamic_sets_type_meta() {
        let dynamic = to_dynamic(&make_config_map("a", "b")).unwrap();
        let types = dynamic.types.unwrap();
        assert_eq!(types.api_version, "v1");
        assert_eq!(types.kind, "ConfigMap");
        assert_eq!(dynamic.data["data"]["key"], "b");
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let fake = FakeCluster::new();
        create(&fake, &make_config_map("a", "1")).await.unwrap();

        let cm: ConfigMap = get_required(&fake, Some("garden"), "a").await.unwrap();
        assert_eq!(cm.data.unwrap()["key"], "1");

        assert!(delete::<ConfigMap>(&fake, Some("garden"), "a").await.unwrap());
        assert!(!delete::<ConfigMap>(&fake, Some("garden"), "a").await.unwrap());
        assert!(get::<ConfigMap>(&fake, Some("garden"), "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_or_update_skips_unchanged() {
        let fake = FakeCluster::new();
        let desired = make_config_map("a", "1");
        let created = create_or_update(&fake, &desired, |_| desired.clone()).await.unwrap();
        let rv = created.metadata.resource_version.clone();

        let same = create_or_update(&fake, &desired, |live| {
            let mut obj = live.clone();
            obj.data = desired.data.clone();
            obj
        })
        .await
        .unwrap();
        assert_eq!(same.metadata.resource_version, rv);

        let changed = make_config_map("a", "2");
        let updated = create_or_update(&fake, &changed, |live| {
            let mut obj = live.clone();
            obj.data = changed.data.clone();
            obj
        })
        .await
        .unwrap();
        assert_ne!(updated.metadata.resource_version, rv);
    }
}
