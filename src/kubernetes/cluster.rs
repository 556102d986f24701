// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster access through dynamic objects.
//!
//! Every reconciler talks to its clusters through [`ClusterClient`], so the same
//! logic runs against a real API server or the in-memory fake used in tests.

use crate::constants::OPERATOR_NAME;
use async_trait::async_trait;
use dashmap::DashMap;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch,
    PatchParams, PostParams, PropagationPolicy,
};
use kube::discovery::{self, Scope};
use kube::Client;
use serde_json::Value;
use tracing::{debug, instrument};

/// REST mapping of a kind.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub resource: ApiResource,
    pub namespaced: bool,
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Resolve a group/version/kind against discovery; `None` if the cluster does not serve it.
    async fn resolve(&self, gvk: &GroupVersionKind) -> kube::Result<Option<Mapping>>;

    /// Forget cached discovery information, e.g. after CRDs were installed.
    fn refresh_discovery(&self);

    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> kube::Result<Option<DynamicObject>>;

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> kube::Result<Vec<DynamicObject>>;

    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> kube::Result<DynamicObject>;

    /// Replace an object; a set `resourceVersion` makes this an optimistic update.
    async fn update(&self, resource: &ApiResource, obj: &DynamicObject) -> kube::Result<DynamicObject>;

    /// Apply a JSON merge patch.
    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> kube::Result<DynamicObject>;

    /// Apply a JSON merge patch to the status subresource.
    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> kube::Result<DynamicObject>;

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        propagation: Option<PropagationPolicy>,
    ) -> kube::Result<()>;
}

fn gvk_key(gvk: &GroupVersionKind) -> String {
    format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
}

/// [`ClusterClient`] backed by a kube [`Client`].
pub struct KubeClusterClient {
    client: Client,
    mappings: DashMap<String, Mapping>,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            mappings: DashMap::new(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if !ns.is_empty() => Api::namespaced_with(self.client.clone(), ns, resource),
            _ => Api::all_with(self.client.clone(), resource),
        }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(OPERATOR_NAME.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    #[instrument(skip(self), fields(gvk = %gvk_key(gvk)))]
    async fn resolve(&self, gvk: &GroupVersionKind) -> kube::Result<Option<Mapping>> {
        let key = gvk_key(gvk);
        if let Some(mapping) = self.mappings.get(&key) {
            return Ok(Some(mapping.clone()));
        }

        match discovery::pinned_kind(&self.client, gvk).await {
            Ok((resource, capabilities)) => {
                let mapping = Mapping {
                    resource,
                    namespaced: capabilities.scope == Scope::Namespaced,
                };
                self.mappings.insert(key, mapping.clone());
                Ok(Some(mapping))
            }
            Err(kube::Error::Discovery(e)) => {
                debug!(error = %e, "Kind is not served");
                Ok(None)
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn refresh_discovery(&self) {
        self.mappings.clear();
    }

    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> kube::Result<Option<DynamicObject>> {
        self.api(resource, namespace).get_opt(name).await
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> kube::Result<Vec<DynamicObject>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        Ok(self.api(resource, namespace).list(&params).await?.items)
    }

    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> kube::Result<DynamicObject> {
        self.api(resource, obj.metadata.namespace.as_deref())
            .create(&Self::post_params(), obj)
            .await
    }

    async fn update(&self, resource: &ApiResource, obj: &DynamicObject) -> kube::Result<DynamicObject> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.api(resource, obj.metadata.namespace.as_deref())
            .replace(&name, &Self::post_params(), obj)
            .await
    }

    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> kube::Result<DynamicObject> {
        let params = PatchParams {
            field_manager: Some(OPERATOR_NAME.to_string()),
            ..Default::default()
        };
        self.api(resource, namespace)
            .patch(name, &params, &Patch::Merge(patch))
            .await
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> kube::Result<DynamicObject> {
        let params = PatchParams {
            field_manager: Some(OPERATOR_NAME.to_string()),
            ..Default::default()
        };
        self.api(resource, namespace)
            .patch_status(name, &params, &Patch::Merge(patch))
            .await
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        propagation: Option<PropagationPolicy>,
    ) -> kube::Result<()> {
        let params = DeleteParams {
            propagation_policy: propagation,
            ..Default::default()
        };
        self.api(resource, namespace).delete(name, &params).await?;
        Ok(())
    }
}
