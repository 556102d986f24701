// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Health reporting of the objects a ManagedResource applied.
//!
//! Runs independently of the applier and only writes `ResourcesHealthy` and
//! `ResourcesProgressing`.

use super::health::{check_health, check_progressing};
use crate::error::{is_not_found, Result};
use crate::kubernetes::{typed, ClusterClient};
use crate::types::{condition_types, set_condition, ConditionStatus, ManagedResource, ObjectReference};
use kube::api::GroupVersionKind;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

pub mod condition_reasons {
    pub const RESOURCES_HEALTHY: &str = "ResourcesHealthy";
    pub const RESOURCES_UNHEALTHY: &str = "ResourcesUnhealthy";
    pub const OBJECT_MISSING: &str = "ObjectMissing";
    pub const RESOURCES_ROLLED_OUT: &str = "ResourcesRolledOut";
    pub const RESOURCES_PROGRESSING: &str = "ResourcesProgressing";
}

use condition_reasons as reason;

pub struct HealthReconciler {
    source: Arc<dyn ClusterClient>,
    target: Arc<dyn ClusterClient>,
    class: String,
    sync_period: Duration,
}

enum Finding {
    Missing(String),
    Unhealthy(String),
}

impl HealthReconciler {
    pub fn new(source: Arc<dyn ClusterClient>, target: Arc<dyn ClusterClient>, class: String, sync_period: Duration) -> Self {
        Self {
            source,
            target,
            class,
            sync_period,
        }
    }

    #[instrument(skip(self, mr), fields(managedresource = %mr.name_any()))]
    pub async fn reconcile(&self, mr: &ManagedResource) -> Result<Action> {
        if mr.class() != self.class || mr.meta().deletion_timestamp.is_some() {
            return Ok(Action::await_change());
        }
        // wait for the applier to finish with the current generation
        let applied = mr
            .condition(condition_types::RESOURCES_APPLIED)
            .is_some_and(|c| c.is_true());
        let observed = mr.status.as_ref().and_then(|s| s.observed_generation);
        if !applied || observed != mr.meta().generation {
            debug!("Resources are not applied yet, skipping health check");
            return Ok(Action::requeue(self.sync_period));
        }

        let mut conditions = mr.conditions().to_vec();
        let mut changed = match self.first_unhealthy(mr.resources()).await? {
            None => set_condition(
                &mut conditions,
                condition_types::RESOURCES_HEALTHY,
                ConditionStatus::True,
                reason::RESOURCES_HEALTHY,
                "All resources are healthy.",
                Vec::new(),
            ),
            Some(Finding::Missing(message)) => set_condition(
                &mut conditions,
                condition_types::RESOURCES_HEALTHY,
                ConditionStatus::False,
                reason::OBJECT_MISSING,
                &message,
                Vec::new(),
            ),
            Some(Finding::Unhealthy(message)) => set_condition(
                &mut conditions,
                condition_types::RESOURCES_HEALTHY,
                ConditionStatus::False,
                reason::RESOURCES_UNHEALTHY,
                &message,
                Vec::new(),
            ),
        };

        changed |= match self.first_progressing(mr.resources()).await? {
            None => set_condition(
                &mut conditions,
                condition_types::RESOURCES_PROGRESSING,
                ConditionStatus::False,
                reason::RESOURCES_ROLLED_OUT,
                "All resources are fully rolled out.",
                Vec::new(),
            ),
            Some(message) => set_condition(
                &mut conditions,
                condition_types::RESOURCES_PROGRESSING,
                ConditionStatus::True,
                reason::RESOURCES_PROGRESSING,
                &message,
                Vec::new(),
            ),
        };

        if changed {
            let patch = json!({ "status": { "conditions": conditions } });
            match self
                .source
                .patch_status(
                    &typed::api_resource::<ManagedResource>(),
                    mr.namespace().as_deref(),
                    &mr.name_any(),
                    &patch,
                )
                .await
            {
                Ok(_) => {}
                Err(e) if is_not_found(&e) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Action::requeue(self.sync_period))
    }

    async fn live_object(&self, reference: &ObjectReference) -> Result<Option<serde_json::Value>> {
        let gvk = GroupVersionKind::gvk(reference.group(), reference.version(), &reference.kind);
        let Some(mapping) = self.target.resolve(&gvk).await? else {
            return Ok(None);
        };
        let namespace = mapping.namespaced.then_some(reference.namespace.as_str());
        match self.target.get(&mapping.resource, namespace, &reference.name).await {
            Ok(obj) => Ok(obj.map(serde_json::to_value).transpose()?),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn first_unhealthy(&self, references: &[ObjectReference]) -> Result<Option<Finding>> {
        for reference in references {
            let Some(obj) = self.live_object(reference).await? else {
                return Ok(Some(Finding::Missing(format!(
                    "Required {} {} is missing.",
                    reference.kind,
                    display_name(reference)
                ))));
            };
            if let Err(e) = check_health(reference.group(), &reference.kind, &obj) {
                return Ok(Some(Finding::Unhealthy(format!(
                    "{} {} is unhealthy: {}",
                    reference.kind,
                    display_name(reference),
                    e
                ))));
            }
        }
        Ok(None)
    }

    async fn first_progressing(&self, references: &[ObjectReference]) -> Result<Option<String>> {
        for reference in references {
            let Some(obj) = self.live_object(reference).await? else {
                continue;
            };
            if let Err(e) = check_progressing(reference.group(), &reference.kind, &obj) {
                return Ok(Some(format!(
                    "{} {} is progressing: {}",
                    reference.kind,
                    display_name(reference),
                    e
                )));
            }
        }
        Ok(None)
    }
}

fn display_name(reference: &ObjectReference) -> String {
    if reference.namespace.is_empty() {
        format!("\"{}\"", reference.name)
    } else {
        format!("\"{}/{}\"", reference.namespace, reference.name)
    }
}
