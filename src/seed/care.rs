// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Periodic health check of the seed system components.

use super::components::{managed_resource_names, SEED_CLASS};
use super::condition_reasons as reason;
use crate::components::{Health, ManagedResourceComponent, Monitor};
use crate::config::FeatureGates;
use crate::constants::names;
use crate::error::{is_not_found, Result};
use crate::kubernetes::{typed, ClusterClient};
use crate::types::{condition_types, set_condition, ConditionStatus, Seed};
use futures::future::try_join_all;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub struct SeedCareReconciler {
    garden: Arc<dyn ClusterClient>,
    seed: Arc<dyn ClusterClient>,
    feature_gates: FeatureGates,
    sync_period: Duration,
}

impl SeedCareReconciler {
    pub fn new(
        garden: Arc<dyn ClusterClient>,
        seed: Arc<dyn ClusterClient>,
        feature_gates: FeatureGates,
        sync_period: Duration,
    ) -> Self {
        Self {
            garden,
            seed,
            feature_gates,
            sync_period,
        }
    }

    /// Health of all system ManagedResources the seed is expected to carry,
    /// keyed by ManagedResource name.
    async fn check(&self, seed: &Seed) -> Result<Vec<(&'static str, Health)>> {
        let checks = managed_resource_names(seed, &self.feature_gates).into_iter().map(|name| async move {
            let component = ManagedResourceComponent::new(self.seed.clone(), names::GARDEN_NAMESPACE, name)
                .with_class(SEED_CLASS);
            Ok::<_, crate::error::GardenerError>((name, component.health().await?))
        });
        try_join_all(checks).await
    }

    #[instrument(skip(self, seed), fields(seed = %seed.name_any()))]
    pub async fn reconcile(&self, seed: &Seed) -> Result<Action> {
        if seed.is_being_deleted() {
            return Ok(Action::await_change());
        }
        if !seed
            .condition(condition_types::BOOTSTRAPPED)
            .is_some_and(|c| c.is_true())
        {
            debug!("Seed is not bootstrapped yet, skipping health check");
            return Ok(Action::requeue(self.sync_period));
        }

        let results = self.check(seed).await?;
        let unhealthy: Vec<String> = results
            .iter()
            .filter_map(|(name, health)| match health {
                Health::Unhealthy(message) => Some(format!("{}: {}", name, message)),
                _ => None,
            })
            .collect();
        let progressing: Vec<String> = results
            .iter()
            .filter_map(|(name, health)| match health {
                Health::Progressing(message) => Some(format!("{}: {}", name, message)),
                _ => None,
            })
            .collect();

        let (status, condition_reason, message) = if !unhealthy.is_empty() {
            (
                ConditionStatus::False,
                reason::SYSTEM_COMPONENTS_UNHEALTHY,
                format!("Some system components are unhealthy: {}", unhealthy.join("; ")),
            )
        } else if !progressing.is_empty() {
            (
                ConditionStatus::Progressing,
                reason::SYSTEM_COMPONENTS_PROGRESSING,
                format!("Some system components are progressing: {}", progressing.join("; ")),
            )
        } else {
            (
                ConditionStatus::True,
                reason::SYSTEM_COMPONENTS_RUNNING,
                "All system components are healthy.".to_string(),
            )
        };

        let mut conditions = seed.conditions().to_vec();
        if set_condition(
            &mut conditions,
            condition_types::SYSTEM_COMPONENTS_HEALTHY,
            status,
            condition_reason,
            &message,
            Vec::new(),
        ) {
            info!(status = %status, reason = condition_reason, "Updating system components health");
            match self
                .garden
                .patch_status(
                    &typed::api_resource::<Seed>(),
                    None,
                    &seed.name_any(),
                    &json!({"status": {"conditions": conditions}}),
                )
                .await
            {
                Ok(_) => {}
                Err(e) if is_not_found(&e) => return Ok(Action::await_change()),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Action::requeue(self.sync_period))
    }
}
