// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Care for ControllerInstallations of this seed.
//!
//! An installation is rolled out as the ManagedResource `garden/<installation>`
//! in the seed. Its `ResourcesApplied`, `ResourcesHealthy` and
//! `ResourcesProgressing` conditions are reflected as `Installed`, `Healthy`
//! and `Progressing` on the installation.

use crate::constants::names;
use crate::error::Result;
use crate::kubernetes::{typed, ClusterClient};
use crate::types::{
    condition_types, set_condition, Condition, ConditionStatus, ControllerInstallation, ManagedResource,
};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub mod condition_reasons {
    pub const MANAGED_RESOURCE_NOT_FOUND: &str = "ManagedResourceNotFound";
    pub const INSTALLATION_PENDING: &str = "InstallationPending";
    pub const INSTALLATION_FAILED: &str = "InstallationFailed";
    pub const INSTALLATION_SUCCESSFUL: &str = "InstallationSuccessful";
    pub const CONTROLLER_HEALTHY: &str = "ControllerHealthy";
    pub const CONTROLLER_NOT_HEALTHY: &str = "ControllerNotHealthy";
    pub const CONTROLLER_ROLLED_OUT: &str = "ControllerRolledOut";
    pub const CONTROLLER_NOT_ROLLED_OUT: &str = "ControllerNotRolledOut";
}

use condition_reasons as reason;

/// A condition value before it is merged into the status.
#[derive(Debug, Clone, PartialEq)]
struct Desired {
    status: ConditionStatus,
    reason: &'static str,
    message: String,
}

impl Desired {
    fn new(status: ConditionStatus, reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            reason,
            message: message.into(),
        }
    }
}

pub struct ControllerInstallationCareReconciler {
    garden: Arc<dyn ClusterClient>,
    seed: Arc<dyn ClusterClient>,
    seed_name: String,
    sync_period: Duration,
}

impl ControllerInstallationCareReconciler {
    pub fn new(
        garden: Arc<dyn ClusterClient>,
        seed: Arc<dyn ClusterClient>,
        seed_name: &str,
        sync_period: Duration,
    ) -> Self {
        Self {
            garden,
            seed,
            seed_name: seed_name.to_string(),
            sync_period,
        }
    }

    #[instrument(skip(self, installation), fields(installation = %installation.name_any()))]
    pub async fn reconcile(&self, installation: &ControllerInstallation) -> Result<Action> {
        if installation.meta().deletion_timestamp.is_some() {
            return Ok(Action::await_change());
        }
        if installation.spec.seed_ref.name != self.seed_name {
            debug!(seed = %installation.spec.seed_ref.name, "Installation belongs to another seed");
            return Ok(Action::await_change());
        }

        let name = installation.name_any();
        let mr = typed::get::<ManagedResource>(self.seed.as_ref(), Some(names::GARDEN_NAMESPACE), &name).await?;
        let [installed, healthy, progressing] = match mr {
            Some(mr) => evaluate(&mr),
            None => {
                let message = format!("ManagedResource {}/{} does not exist", names::GARDEN_NAMESPACE, name);
                [0, 1, 2].map(|_| Desired::new(ConditionStatus::Unknown, reason::MANAGED_RESOURCE_NOT_FOUND, message.clone()))
            }
        };

        let mut conditions: Vec<Condition> = installation.conditions().to_vec();
        let mut changed = false;
        for (condition_type, desired) in [
            (condition_types::INSTALLED, installed),
            (condition_types::HEALTHY, healthy),
            (condition_types::PROGRESSING, progressing),
        ] {
            changed |= set_condition(
                &mut conditions,
                condition_type,
                desired.status,
                desired.reason,
                &desired.message,
                Vec::new(),
            );
        }

        if changed {
            info!("Updating installation conditions");
            match typed::patch_status::<ControllerInstallation, _>(
                self.garden.as_ref(),
                None,
                &name,
                &json!({ "conditions": conditions }),
            )
            .await
            {
                Ok(_) => {}
                Err(e) if e.is_not_found() => return Ok(Action::await_change()),
                Err(e) => return Err(e),
            }
        }
        Ok(Action::requeue(self.sync_period))
    }
}

/// `Installed`, `Healthy` and `Progressing` derived from a ManagedResource.
fn evaluate(mr: &ManagedResource) -> [Desired; 3] {
    let observed = mr.status.as_ref().and_then(|s| s.observed_generation);
    if observed != mr.meta().generation {
        let message = "observed generation of the ManagedResource is outdated";
        return [
            Desired::new(ConditionStatus::False, reason::INSTALLATION_PENDING, message),
            Desired::new(ConditionStatus::False, reason::CONTROLLER_NOT_HEALTHY, message),
            Desired::new(ConditionStatus::True, reason::CONTROLLER_NOT_ROLLED_OUT, message),
        ];
    }

    let installed = match mr.condition(condition_types::RESOURCES_APPLIED) {
        Some(c) if c.is_true() => Desired::new(
            ConditionStatus::True,
            reason::INSTALLATION_SUCCESSFUL,
            "The controller was successfully installed in the seed cluster.",
        ),
        Some(c) if c.status == ConditionStatus::False => {
            Desired::new(ConditionStatus::False, reason::INSTALLATION_FAILED, c.message.clone())
        }
        Some(c) => Desired::new(ConditionStatus::False, reason::INSTALLATION_PENDING, c.message.clone()),
        None => Desired::new(
            ConditionStatus::False,
            reason::INSTALLATION_PENDING,
            "The ManagedResource has not been applied yet.",
        ),
    };

    let healthy = match mr.condition(condition_types::RESOURCES_HEALTHY) {
        Some(c) if c.is_true() => Desired::new(
            ConditionStatus::True,
            reason::CONTROLLER_HEALTHY,
            "The controller running in the seed cluster is healthy.",
        ),
        Some(c) => Desired::new(ConditionStatus::False, reason::CONTROLLER_NOT_HEALTHY, c.message.clone()),
        None => Desired::new(
            ConditionStatus::False,
            reason::CONTROLLER_NOT_HEALTHY,
            "The health of the controller has not been checked yet.",
        ),
    };

    let progressing = match mr.condition(condition_types::RESOURCES_PROGRESSING) {
        Some(c) if c.is_true() => {
            Desired::new(ConditionStatus::True, reason::CONTROLLER_NOT_ROLLED_OUT, c.message.clone())
        }
        _ => Desired::new(
            ConditionStatus::False,
            reason::CONTROLLER_ROLLED_OUT,
            "The controller has been rolled out successfully.",
        ),
    };

    [installed, healthy, progressing]
}
