// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Extension resources handed over to provider extensions.
//!
//! The core only writes the desired state and watches `status.lastOperation`;
//! the actual work happens in the extension controller of the resource's type.

use super::{poll, Deployer, Destroyer, Health, Monitor, WaitTimeouts, Waiter};
use crate::constants::annotations;
use crate::error::{has_non_retryable_code, is_not_found, GardenerError, Result};
use crate::kubernetes::ClusterClient;
use crate::retry::PollResult;
use crate::types::{ExtensionKind, ExtensionStatus, LastOperationState};
use async_trait::async_trait;
use chrono::Utc;
use kube::api::DynamicObject;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const CONFIRM_DELETION: &str = "confirmation.gardener.cloud/deletion";
pub const TIMESTAMP: &str = "gardener.cloud/timestamp";

pub struct ExtensionComponent {
    client: Arc<dyn ClusterClient>,
    kind: ExtensionKind,
    namespace: Option<String>,
    name: String,
    extension_type: String,
    spec: Map<String, Value>,
    timeouts: WaitTimeouts,
}

impl ExtensionComponent {
    pub fn new(client: Arc<dyn ClusterClient>, kind: ExtensionKind, namespace: Option<&str>, name: &str, extension_type: &str) -> Self {
        Self {
            client,
            kind,
            namespace: namespace.filter(|_| kind.namespaced()).map(str::to_string),
            name: name.to_string(),
            extension_type: extension_type.to_string(),
            spec: Map::new(),
            timeouts: WaitTimeouts::default(),
        }
    }

    /// Set an additional spec field next to `type`.
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        if !value.is_null() {
            self.spec.insert(key.to_string(), value);
        }
        self
    }

    pub fn with_timeouts(mut self, timeouts: WaitTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn kind(&self) -> ExtensionKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn desired_spec(&self) -> Value {
        let mut spec = self.spec.clone();
        spec.insert("type".to_string(), json!(self.extension_type));
        Value::Object(spec)
    }

    /// The live extension object, if any.
    pub async fn get(&self) -> Result<Option<DynamicObject>> {
        Ok(self
            .client
            .get(&self.kind.api_resource(), self.namespace.as_deref(), &self.name)
            .await?)
    }

    fn describe(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{} {}/{}", self.kind, ns, self.name),
            None => format!("{} {}", self.kind, self.name),
        }
    }
}

/// Turn a reported error into a hard failure if retrying cannot help.
fn reported_failure(status: &ExtensionStatus) -> Option<GardenerError> {
    let last_error = status.last_error.as_ref()?;
    let failed = status
        .last_operation
        .as_ref()
        .is_some_and(|op| op.state == LastOperationState::Error);
    (failed && has_non_retryable_code(&last_error.codes))
        .then(|| GardenerError::coded(last_error.codes.clone(), last_error.description.clone()))
}

fn pending_message(status: &ExtensionStatus) -> String {
    if let Some(last_error) = &status.last_error {
        return format!("error during reconciliation: {}", last_error.description);
    }
    match &status.last_operation {
        Some(op) => format!("last operation {:?} is {:?}", op.operation_type, op.state),
        None => "extension did not record a last operation yet".to_string(),
    }
}

#[async_trait]
impl Deployer for ExtensionComponent {
    #[instrument(skip(self), fields(extension = %self.describe()))]
    async fn deploy(&self) -> Result<()> {
        let resource = self.kind.api_resource();
        let now = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        match self.get().await? {
            None => {
                let mut obj = DynamicObject::new(&self.name, &resource);
                obj.metadata.namespace = self.namespace.clone();
                obj.metadata.annotations = Some(
                    [
                        (annotations::OPERATION.to_string(), "reconcile".to_string()),
                        (TIMESTAMP.to_string(), now),
                    ]
                    .into(),
                );
                obj.data = json!({ "spec": self.desired_spec() });
                self.client.create(&resource, &obj).await?;
                debug!("Created extension resource");
            }
            Some(mut live) => {
                let current = live.metadata.annotations.get_or_insert_with(Default::default);
                current.insert(annotations::OPERATION.to_string(), "reconcile".to_string());
                current.insert(TIMESTAMP.to_string(), now);
                live.data["spec"] = self.desired_spec();
                self.client.update(&resource, &live).await?;
                debug!("Updated extension resource");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Destroyer for ExtensionComponent {
    async fn destroy(&self) -> Result<()> {
        let resource = self.kind.api_resource();
        let confirm = json!({ "metadata": { "annotations": { CONFIRM_DELETION: "true" } } });
        match self
            .client
            .patch(&resource, self.namespace.as_deref(), &self.name, &confirm)
            .await
        {
            Ok(_) => {}
            Err(e) if is_not_found(&e) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        info!(extension = %self.describe(), "Deleting extension resource");
        match self
            .client
            .delete(&resource, self.namespace.as_deref(), &self.name, None)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Waiter for ExtensionComponent {
    async fn wait(&self) -> Result<()> {
        let operation = format!("waiting for {} to become ready", self.describe());
        poll(&operation, self.timeouts, || async {
            let obj = match self.get().await {
                Err(e) => return PollResult::Failed(e),
                Ok(None) => return PollResult::NotReady("extension resource does not exist".to_string()),
                Ok(Some(obj)) => obj,
            };
            let status = ExtensionStatus::from_object(&obj);
            if let Some(e) = reported_failure(&status) {
                return PollResult::Failed(e);
            }
            if status.is_ready(obj.metadata.generation) {
                PollResult::Ready
            } else {
                PollResult::NotReady(pending_message(&status))
            }
        })
        .await
    }

    async fn wait_cleanup(&self) -> Result<()> {
        let operation = format!("waiting for deletion of {}", self.describe());
        poll(&operation, self.timeouts, || async {
            match self.get().await {
                Err(e) => PollResult::Failed(e),
                Ok(None) => PollResult::Ready,
                Ok(Some(obj)) => {
                    let status = ExtensionStatus::from_object(&obj);
                    match reported_failure(&status) {
                        Some(e) => PollResult::Failed(e),
                        None => PollResult::NotReady(pending_message(&status)),
                    }
                }
            }
        })
        .await
    }
}

#[async_trait]
impl Monitor for ExtensionComponent {
    async fn health(&self) -> Result<Health> {
        let Some(obj) = self.get().await? else {
            return Ok(Health::Unhealthy(format!("{} is missing", self.describe())));
        };
        let status = ExtensionStatus::from_object(&obj);
        Ok(if status.is_ready(obj.metadata.generation) {
            Health::Healthy
        } else if status.last_error.is_some() {
            Health::Unhealthy(pending_message(&status))
        } else {
            Health::Progressing(pending_message(&status))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::test_utils::FakeCluster;
    use std::time::Duration;

    const NS: &str = "shoot--foo--bar";

    fn component(fake: &Arc<FakeCluster>) -> ExtensionComponent {
        ExtensionComponent::new(fake.clone(), ExtensionKind::Infrastructure, Some(NS), "bar", "aws")
            .with_field("region", json!("eu-west-1"))
            .with_field("providerConfig", Value::Null)
            .with_timeouts(WaitTimeouts::new(Duration::from_millis(10), Duration::from_millis(50)))
    }

    fn set_status(fake: &FakeCluster, status: Value) {
        let mut obj = fake
            .object("extensions.gardener.cloud/v1alpha1", "Infrastructure", NS, "bar")
            .unwrap();
        obj["status"] = status;
        fake.insert(obj);
    }

    #[tokio::test]
    async fn test_deploy_sets_type_and_operation() {
        let fake = Arc::new(FakeCluster::new());
        component(&fake).deploy().await.unwrap();

        let obj = fake
            .object("extensions.gardener.cloud/v1alpha1", "Infrastructure", NS, "bar")
            .unwrap();
        assert_eq!(obj["spec"], json!({"type": "aws", "region": "eu-west-1"}));
        assert_eq!(obj["metadata"]["annotations"][annotations::OPERATION], "reconcile");
    }

    #[tokio::test]
    async fn test_wait_succeeds_once_extension_reports_success() {
        let fake = Arc::new(FakeCluster::new());
        let component = component(&fake);
        component.deploy().await.unwrap();
        assert!(matches!(component.wait().await, Err(GardenerError::Timeout(_))));

        set_status(
            &fake,
            json!({
                "observedGeneration": 1,
                "lastOperation": {"type": "Create", "state": "Succeeded", "progress": 100, "lastUpdateTime": "2026-01-01T00:00:00Z"}
            }),
        );
        component.wait().await.unwrap();
        assert_eq!(component.health().await.unwrap(), Health::Healthy);
    }

    #[tokio::test]
    async fn test_wait_fails_fast_on_non_retryable_error() {
        let fake = Arc::new(FakeCluster::new());
        let component = component(&fake);
        component.deploy().await.unwrap();
        set_status(
            &fake,
            json!({
                "lastOperation": {"type": "Create", "state": "Error", "progress": 50, "lastUpdateTime": "2026-01-01T00:00:00Z"},
                "lastError": {"description": "UnauthorizedOperation", "codes": ["INFRA_INSUFFICIENT_PRIVILEGES"]}
            }),
        );

        match component.wait().await {
            Err(GardenerError::Coded { codes, message }) => {
                assert_eq!(codes, vec![ErrorCode::InfraInsufficientPrivileges]);
                assert_eq!(message, "UnauthorizedOperation");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_destroy_confirms_deletion() {
        let fake = Arc::new(FakeCluster::new());
        let component = component(&fake);
        component.destroy().await.unwrap();
        assert!(fake.calls_of("delete", "Infrastructure").is_empty());

        component.deploy().await.unwrap();
        component.destroy().await.unwrap();
        component.wait_cleanup().await.unwrap();
        assert_eq!(fake.calls_of("delete", "Infrastructure").len(), 1);
        assert!(!fake.exists("extensions.gardener.cloud/v1alpha1", "Infrastructure", NS, "bar"));
    }
}
