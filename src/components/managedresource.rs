// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! A set of objects shipped to a cluster through a ManagedResource.

use super::{poll, Deployer, Destroyer, Health, Monitor, WaitTimeouts, Waiter};
use crate::error::Result;
use crate::kubernetes::{typed, ClusterClient};
use crate::retry::PollResult;
use crate::types::{
    condition_types, ConditionStatus, LocalObjectReference, ManagedResource, ManagedResourceSpec,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::Resource;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const PAYLOAD_KEY: &str = "objects.yaml";

pub struct ManagedResourceComponent {
    client: Arc<dyn ClusterClient>,
    namespace: String,
    name: String,
    class: Option<String>,
    objects: Vec<Value>,
    keep_objects: bool,
    timeouts: WaitTimeouts,
}

impl ManagedResourceComponent {
    pub fn new(client: Arc<dyn ClusterClient>, namespace: &str, name: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            name: name.to_string(),
            class: None,
            objects: Vec::new(),
            keep_objects: false,
            timeouts: WaitTimeouts::default(),
        }
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.class = Some(class.to_string());
        self
    }

    pub fn with_objects(mut self, objects: Vec<Value>) -> Self {
        self.objects = objects;
        self
    }

    pub fn keep_objects(mut self, keep: bool) -> Self {
        self.keep_objects = keep;
        self
    }

    pub fn with_timeouts(mut self, timeouts: WaitTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn secret_name(&self) -> String {
        format!("managedresource-{}", self.name)
    }

    fn payload(&self) -> Result<String> {
        let docs = self
            .objects
            .iter()
            .map(serde_yaml::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(docs.join("---\n"))
    }

    fn secret(&self) -> Result<Secret> {
        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(self.secret_name()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                PAYLOAD_KEY.to_string(),
                ByteString(self.payload()?.into_bytes()),
            )])),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        })
    }

    fn managed_resource(&self) -> ManagedResource {
        let mut mr = ManagedResource::new(
            &self.name,
            ManagedResourceSpec {
                class: self.class.clone(),
                secret_refs: vec![LocalObjectReference {
                    name: self.secret_name(),
                }],
                keep_objects: self.keep_objects.then_some(true),
                ..Default::default()
            },
        );
        mr.meta_mut().namespace = Some(self.namespace.clone());
        mr
    }

    async fn current(&self) -> Result<Option<ManagedResource>> {
        typed::get::<ManagedResource>(self.client.as_ref(), Some(&self.namespace), &self.name).await
    }
}

/// Readiness of a ManagedResource as seen through its conditions.
fn evaluate(mr: &ManagedResource) -> Health {
    let observed = mr.status.as_ref().and_then(|s| s.observed_generation);
    if observed != mr.meta().generation {
        return Health::Progressing("observed generation outdated".to_string());
    }
    match mr.condition(condition_types::RESOURCES_APPLIED) {
        None => return Health::Progressing("resources are not applied yet".to_string()),
        Some(c) if c.status == ConditionStatus::False => {
            return Health::Unhealthy(format!("resources could not be applied: {}", c.message))
        }
        Some(c) if c.status != ConditionStatus::True => return Health::Progressing(c.message.clone()),
        Some(_) => {}
    }
    match mr.condition(condition_types::RESOURCES_HEALTHY) {
        None => return Health::Progressing("health of resources was not checked yet".to_string()),
        Some(c) if c.status != ConditionStatus::True => return Health::Unhealthy(c.message.clone()),
        Some(_) => {}
    }
    match mr.condition(condition_types::RESOURCES_PROGRESSING) {
        Some(c) if c.is_true() => Health::Progressing(c.message.clone()),
        _ => Health::Healthy,
    }
}

#[async_trait]
impl Deployer for ManagedResourceComponent {
    #[instrument(skip(self), fields(managedresource = %self.name, namespace = %self.namespace))]
    async fn deploy(&self) -> Result<()> {
        let secret = self.secret()?;
        typed::create_or_update(self.client.as_ref(), &secret, |live| {
            let mut merged = live.clone();
            merged.data = secret.data.clone();
            merged.type_ = secret.type_.clone();
            merged
        })
        .await?;

        let desired = self.managed_resource();
        typed::create_or_update(self.client.as_ref(), &desired, |live| {
            let mut merged = live.clone();
            merged.spec = desired.spec.clone();
            merged
        })
        .await?;
        debug!(objects = self.objects.len(), "ManagedResource deployed");
        Ok(())
    }
}

#[async_trait]
impl Destroyer for ManagedResourceComponent {
    async fn destroy(&self) -> Result<()> {
        info!(managedresource = %self.name, namespace = %self.namespace, "Deleting ManagedResource");
        typed::delete::<ManagedResource>(self.client.as_ref(), Some(&self.namespace), &self.name).await?;
        typed::delete::<Secret>(self.client.as_ref(), Some(&self.namespace), &self.secret_name()).await?;
        Ok(())
    }
}

#[async_trait]
impl Waiter for ManagedResourceComponent {
    async fn wait(&self) -> Result<()> {
        let operation = format!("waiting for ManagedResource {}/{}", self.namespace, self.name);
        poll(&operation, self.timeouts, || async {
            match self.current().await {
                Err(e) => PollResult::Failed(e),
                Ok(None) => PollResult::NotReady("ManagedResource does not exist".to_string()),
                Ok(Some(mr)) => match evaluate(&mr) {
                    Health::Healthy => PollResult::Ready,
                    Health::Progressing(message) | Health::Unhealthy(message) => PollResult::NotReady(message),
                },
            }
        })
        .await
    }

    async fn wait_cleanup(&self) -> Result<()> {
        let operation = format!("waiting for deletion of ManagedResource {}/{}", self.namespace, self.name);
        poll(&operation, self.timeouts, || async {
            match self.current().await {
                Err(e) => PollResult::Failed(e),
                Ok(None) => PollResult::Ready,
                Ok(Some(mr)) => {
                    let message = mr
                        .condition(condition_types::RESOURCES_APPLIED)
                        .map(|c| c.message.clone())
                        .unwrap_or_else(|| "ManagedResource still exists".to_string());
                    PollResult::NotReady(message)
                }
            }
        })
        .await
    }
}

#[async_trait]
impl Monitor for ManagedResourceComponent {
    async fn health(&self) -> Result<Health> {
        Ok(match self.current().await? {
            None => Health::Unhealthy(format!("ManagedResource {} is missing", self.name)),
            Some(mr) => evaluate(&mr),
        })
    }
}
