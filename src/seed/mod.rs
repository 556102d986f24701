// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Seed lifecycle: bootstrapping the system components into a seed cluster and
//! tearing them down again once nothing references the seed anymore.

mod bootstrap;
pub mod care;
pub mod components;
mod delete;

pub use care::SeedCareReconciler;

use crate::components::WaitTimeouts;
use crate::config::FeatureGates;
use crate::constants::{finalizers, names};
use crate::error::{is_not_found, Result};
use crate::events::EventPublisher;
use crate::kubernetes::{typed, ClusterClient};
use crate::secrets::SecretsManager;
use crate::types::{Condition, Seed};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

pub mod condition_reasons {
    pub const GARDEN_SECRETS_ERROR: &str = "GardenSecretsError";
    pub const BOOTSTRAP_PROGRESSING: &str = "BootstrapProgressing";
    pub const BOOTSTRAPPING_SUCCEEDED: &str = "BootstrappingSucceeded";
    pub const BOOTSTRAPPING_FAILED: &str = "BootstrappingFailed";
    pub const SYSTEM_COMPONENTS_RUNNING: &str = "SystemComponentsRunning";
    pub const SYSTEM_COMPONENTS_UNHEALTHY: &str = "SystemComponentsUnhealthy";
    pub const SYSTEM_COMPONENTS_PROGRESSING: &str = "SystemComponentsProgressing";
}

/// Returned while Shoots or BackupBuckets still reference a seed marked for deletion.
pub const STILL_REFERENCED: &str = "seed still has references";

/// Reconciles one seed cluster on behalf of the garden.
pub struct SeedReconciler {
    garden: Arc<dyn ClusterClient>,
    seed: Arc<dyn ClusterClient>,
    events: Arc<dyn EventPublisher>,
    feature_gates: FeatureGates,
    timeouts: WaitTimeouts,
    sync_period: Duration,
}

impl SeedReconciler {
    pub fn new(
        garden: Arc<dyn ClusterClient>,
        seed: Arc<dyn ClusterClient>,
        events: Arc<dyn EventPublisher>,
        feature_gates: FeatureGates,
        sync_period: Duration,
    ) -> Self {
        Self {
            garden,
            seed,
            events,
            feature_gates,
            timeouts: WaitTimeouts::default(),
            sync_period,
        }
    }

    pub fn with_timeouts(mut self, timeouts: WaitTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[instrument(skip(self, seed), fields(seed = %seed.name_any()))]
    pub async fn reconcile(&self, seed: &Seed) -> Result<Action> {
        if seed.is_being_deleted() {
            return self.delete(seed).await;
        }
        if crate::kubernetes::add_finalizer(self.garden.as_ref(), seed, finalizers::GARDENER).await? {
            info!("Added finalizer to seed");
        }
        self.bootstrap(seed).await
    }

    /// A secrets manager for one reconciliation, so that every run re-reads
    /// the secrets in the seed and renews those close to expiry.
    fn secrets_manager(&self) -> Arc<SecretsManager> {
        Arc::new(SecretsManager::new(
            self.seed.clone(),
            names::GARDEN_NAMESPACE,
            names::SECRETS_MANAGER_IDENTITY_SEED,
            BTreeMap::new(),
        ))
    }

    /// Identity of the seed cluster, stable once recorded in the status.
    async fn cluster_identity(&self, seed: &Seed) -> Result<String> {
        if let Some(identity) = seed.status.as_ref().and_then(|s| s.cluster_identity.clone()) {
            return Ok(identity);
        }
        let recorded = typed::get::<ConfigMap>(
            self.seed.as_ref(),
            Some(names::KUBE_SYSTEM_NAMESPACE),
            names::CLUSTER_IDENTITY,
        )
        .await?
        .and_then(|cm| cm.data)
        .and_then(|data| data.get(names::CLUSTER_IDENTITY).cloned());
        Ok(recorded.unwrap_or_else(|| seed.uid().unwrap_or_else(|| seed.name_any())))
    }

    async fn write_status(&self, seed: &Seed, conditions: &[Condition], extra: serde_json::Value) -> Result<()> {
        let mut status = json!({ "conditions": conditions });
        if let (Some(status), serde_json::Value::Object(extra)) = (status.as_object_mut(), extra) {
            status.extend(extra);
        }
        match self
            .garden
            .patch_status(
                &typed::api_resource::<Seed>(),
                None,
                &seed.name_any(),
                &json!({ "status": status }),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
