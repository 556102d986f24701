// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! A single Deployment applied directly, for workloads that have to run before
//! any ManagedResource can be reconciled.

use super::{poll, Deployer, Destroyer, Health, Monitor, WaitTimeouts, Waiter};
use crate::error::Result;
use crate::kubernetes::{typed, ClusterClient};
use crate::managedresource::health::check_health;
use crate::retry::PollResult;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::info;

pub struct DeploymentComponent {
    client: Arc<dyn ClusterClient>,
    deployment: Deployment,
    timeouts: WaitTimeouts,
}

impl DeploymentComponent {
    pub fn new(client: Arc<dyn ClusterClient>, deployment: Deployment) -> Self {
        Self {
            client,
            deployment,
            timeouts: WaitTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: WaitTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    fn namespace(&self) -> String {
        self.deployment.namespace().unwrap_or_default()
    }

    async fn current(&self) -> Result<Option<Deployment>> {
        typed::get::<Deployment>(
            self.client.as_ref(),
            Some(&self.namespace()),
            &self.deployment.name_any(),
        )
        .await
    }
}

fn evaluate(deployment: &Deployment) -> Result<Health> {
    let value = serde_json::to_value(deployment)?;
    Ok(match check_health("apps", "Deployment", &value) {
        Ok(()) => Health::Healthy,
        Err(message) => Health::Unhealthy(message),
    })
}

#[async_trait]
impl Deployer for DeploymentComponent {
    async fn deploy(&self) -> Result<()> {
        let desired = &self.deployment;
        typed::create_or_update(self.client.as_ref(), desired, |live| {
            let mut merged = live.clone();
            merged.metadata.labels = desired.metadata.labels.clone();
            merged.metadata.annotations = desired.metadata.annotations.clone();
            merged.spec = desired.spec.clone();
            merged
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Destroyer for DeploymentComponent {
    async fn destroy(&self) -> Result<()> {
        info!(deployment = %self.deployment.name_any(), "Deleting deployment");
        typed::delete::<Deployment>(self.client.as_ref(), Some(&self.namespace()), &self.deployment.name_any())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Waiter for DeploymentComponent {
    async fn wait(&self) -> Result<()> {
        let operation = format!("waiting for deployment {}", self.deployment.name_any());
        poll(&operation, self.timeouts, || async {
            match self.current().await {
                Err(e) => PollResult::Failed(e),
                Ok(None) => PollResult::NotReady("deployment does not exist".to_string()),
                Ok(Some(deployment)) => match evaluate(&deployment) {
                    Err(e) => PollResult::Failed(e),
                    Ok(Health::Healthy) => PollResult::Ready,
                    Ok(Health::Progressing(message) | Health::Unhealthy(message)) => PollResult::NotReady(message),
                },
            }
        })
        .await
    }

    async fn wait_cleanup(&self) -> Result<()> {
        let operation = format!("waiting for deletion of deployment {}", self.deployment.name_any());
        poll(&operation, self.timeouts, || async {
            match self.current().await {
                Err(e) => PollResult::Failed(e),
                Ok(None) => PollResult::Ready,
                Ok(Some(_)) => PollResult::NotReady("deployment still exists".to_string()),
            }
        })
        .await
    }
}

#[async_trait]
impl Monitor for DeploymentComponent {
    async fn health(&self) -> Result<Health> {
        match self.current().await? {
            None => Ok(Health::Unhealthy(format!(
                "deployment {} is missing",
                self.deployment.name_any()
            ))),
            Some(deployment) => evaluate(&deployment),
        }
    }
}
