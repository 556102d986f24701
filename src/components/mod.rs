// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Deployable building blocks of seeds and shoots.
//!
//! Every component deploys something into a cluster and knows how to wait for
//! it, how to remove it again and how to wait until it is gone. Lifecycle flows
//! compose components by name through [`Components`].

pub mod deployment;
pub mod extension;
pub mod managedresource;

pub use deployment::DeploymentComponent;
pub use extension::ExtensionComponent;
pub use managedresource::ManagedResourceComponent;

use crate::error::{GardenerError, Result};
use crate::retry::{poll_until, PollError, PollResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self) -> Result<()>;
}

#[async_trait]
pub trait Destroyer: Send + Sync {
    async fn destroy(&self) -> Result<()>;
}

#[async_trait]
pub trait Waiter: Send + Sync {
    /// Wait until the deployed state is ready, bounded by the component's own timeout.
    async fn wait(&self) -> Result<()>;

    /// Wait until everything the component deployed is gone.
    async fn wait_cleanup(&self) -> Result<()>;
}

/// Health of a deployed component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Progressing(String),
    Unhealthy(String),
}

#[async_trait]
pub trait Monitor: Send + Sync {
    async fn health(&self) -> Result<Health>;
}

/// A component that can be fully deployed and destroyed.
pub trait DeployWaiter: Deployer + Destroyer + Waiter {}

impl<T: Deployer + Destroyer + Waiter> DeployWaiter for T {}

pub async fn deploy_and_wait(component: &dyn DeployWaiter) -> Result<()> {
    component.deploy().await?;
    component.wait().await
}

pub async fn destroy_and_wait(component: &dyn DeployWaiter) -> Result<()> {
    component.destroy().await?;
    component.wait_cleanup().await
}

/// Polling interval and deadline of a component's waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimeouts {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitTimeouts {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(120),
        }
    }
}

impl WaitTimeouts {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Poll `check` within `timeouts`, flattening the poll error into the crate error.
pub(crate) async fn poll<F, Fut>(operation: &str, timeouts: WaitTimeouts, check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollResult<GardenerError>>,
{
    poll_until(operation, timeouts.interval, timeouts.timeout, check)
        .await
        .map_err(|e| match e {
            timeout @ PollError::Timeout { .. } => GardenerError::Timeout(timeout.to_string()),
            PollError::Failed(e) => e,
        })
}

/// The components of one reconciliation, addressed by name.
#[derive(Default, Clone)]
pub struct Components {
    entries: BTreeMap<String, Arc<dyn DeployWaiter>>,
}

impl Components {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, component: Arc<dyn DeployWaiter>) {
        self.entries.insert(name.into(), component);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DeployWaiter>> {
        self.entries.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
