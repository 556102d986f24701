// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Shoot lifecycle on the seed a shoot is scheduled to.
//!
//! The reconciler creates the shoot's namespace in the seed and hands the
//! infrastructure, control plane, worker and extension resources to the
//! provider extensions. Progress of the flow is mirrored into
//! `status.lastOperation`; failures end up in `status.lastError`.

mod botanist;

use crate::components::WaitTimeouts;
use crate::constants::finalizers;
use crate::error::{has_non_retryable_code, ErrorCode, Result};
use crate::events::{actions, object_ref, reasons, EventPublisher};
use crate::flow::{FlowError, RunOptions};
use crate::kubernetes::{add_finalizer, has_finalizer, remove_finalizer, typed, ClusterClient};
use crate::types::{LastError, LastOperation, LastOperationState, LastOperationType, Seed, Shoot};
use botanist::Botanist;
use chrono::Utc;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

const RETRY_SUFFIX: &str = " Operation will be retried.";

/// Reconciles the shoots scheduled to one seed.
pub struct ShootReconciler {
    garden: Arc<dyn ClusterClient>,
    seed: Arc<dyn ClusterClient>,
    seed_name: String,
    events: Arc<dyn EventPublisher>,
    timeouts: WaitTimeouts,
    sync_period: Duration,
}

impl ShootReconciler {
    pub fn new(
        garden: Arc<dyn ClusterClient>,
        seed: Arc<dyn ClusterClient>,
        seed_name: &str,
        events: Arc<dyn EventPublisher>,
        sync_period: Duration,
    ) -> Self {
        Self {
            garden,
            seed,
            seed_name: seed_name.to_string(),
            events,
            timeouts: WaitTimeouts::default(),
            sync_period,
        }
    }

    pub fn with_timeouts(mut self, timeouts: WaitTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[instrument(skip(self, shoot), fields(shoot = %format!("{}/{}", shoot.namespace().unwrap_or_default(), shoot.name_any())))]
    pub async fn reconcile(&self, shoot: &Shoot) -> Result<Action> {
        let Some(seed_name) = shoot.seed_name() else {
            return self.pending(shoot).await;
        };
        if seed_name != self.seed_name {
            debug!(seed = seed_name, "Shoot is scheduled to another seed");
            return Ok(Action::await_change());
        }
        if shoot.meta().deletion_timestamp.is_some() {
            return self.delete(shoot).await;
        }
        if add_finalizer(self.garden.as_ref(), shoot, finalizers::GARDENER).await? {
            info!("Added finalizer to shoot");
        }

        let operation = operation_type(shoot);
        self.write_status(
            shoot,
            json!({"lastOperation": LastOperation::new(operation, LastOperationState::Processing, 0, "Reconciliation of Shoot cluster initialized.")}),
        )
        .await?;

        let botanist = self.botanist(shoot).await?;
        if let Err(e) = self.run(shoot, operation, botanist.reconcile_flow()?).await {
            return self.failed(shoot, operation, e).await;
        }

        self.write_status(
            shoot,
            json!({
                "lastOperation": LastOperation::new(operation, LastOperationState::Succeeded, 100, "Shoot cluster has been successfully reconciled."),
                "lastError": Value::Null,
                "seedName": seed_name,
                "technicalID": shoot.technical_id(),
                "hibernated": shoot.hibernation_enabled(),
                "observedGeneration": shoot.meta().generation,
            }),
        )
        .await?;
        self.events
            .publish(
                &object_ref(shoot),
                EventType::Normal,
                reasons::RECONCILED,
                actions::RECONCILE,
                Some("Reconciled Shoot cluster state".to_string()),
            )
            .await;
        info!("Shoot reconciled");
        Ok(Action::requeue(self.sync_period))
    }

    async fn delete(&self, shoot: &Shoot) -> Result<Action> {
        if !has_finalizer(shoot.meta(), finalizers::GARDENER) {
            return Ok(Action::await_change());
        }
        let operation = LastOperationType::Delete;
        self.write_status(
            shoot,
            json!({"lastOperation": LastOperation::new(operation, LastOperationState::Processing, 0, "Deletion of Shoot cluster in progress.")}),
        )
        .await?;

        let botanist = self.botanist(shoot).await?;
        if let Err(e) = self.run(shoot, operation, botanist.delete_flow()?).await {
            return self.failed(shoot, operation, e).await;
        }

        // status writes moved the resource version on
        if let Some(latest) = typed::get::<Shoot>(self.garden.as_ref(), shoot.namespace().as_deref(), &shoot.name_any()).await? {
            remove_finalizer(self.garden.as_ref(), &latest, finalizers::GARDENER).await?;
        }
        self.events
            .publish(
                &object_ref(shoot),
                EventType::Normal,
                reasons::DELETED,
                actions::DELETE,
                Some("Deleted Shoot cluster".to_string()),
            )
            .await;
        info!("Shoot deleted");
        Ok(Action::await_change())
    }

    /// A shoot without a seed only gets a pending status; nothing is deployed.
    async fn pending(&self, shoot: &Shoot) -> Result<Action> {
        if shoot.meta().deletion_timestamp.is_some() {
            remove_finalizer(self.garden.as_ref(), shoot, finalizers::GARDENER).await?;
            return Ok(Action::await_change());
        }
        if shoot.last_operation_state() != Some(LastOperationState::Pending) {
            info!("Shoot is not yet scheduled to a seed");
            self.write_status(
                shoot,
                json!({"lastOperation": LastOperation::new(
                    operation_type(shoot),
                    LastOperationState::Pending,
                    0,
                    "Shoot cluster is not yet scheduled to a seed.",
                )}),
            )
            .await?;
            self.events
                .publish(
                    &object_ref(shoot),
                    EventType::Normal,
                    reasons::SCHEDULING_PENDING,
                    actions::RECONCILE,
                    Some("Waiting for the shoot to be scheduled".to_string()),
                )
                .await;
        }
        Ok(Action::await_change())
    }

    async fn botanist(&self, shoot: &Shoot) -> Result<Arc<Botanist>> {
        let seed = typed::get_required::<Seed>(self.garden.as_ref(), None, &self.seed_name).await?;
        Ok(Arc::new(Botanist::new(
            self.garden.clone(),
            self.seed.clone(),
            shoot.clone(),
            seed.spec.ingress.map(|i| i.domain),
            self.timeouts,
        )))
    }

    /// Run `flow`, streaming its progress into `status.lastOperation`.
    async fn run(&self, shoot: &Shoot, operation: LastOperationType, flow: crate::flow::Flow) -> std::result::Result<(), FlowError> {
        let (tx, mut rx) = watch::channel(0u8);
        let garden = self.garden.clone();
        let namespace = shoot.namespace();
        let name = shoot.name_any();
        let writer = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let percent = *rx.borrow_and_update();
                let status = json!({"lastOperation": LastOperation::new(
                    operation,
                    LastOperationState::Processing,
                    i32::from(percent),
                    format!("{:?} of Shoot cluster in progress.", operation),
                )});
                if let Err(e) = typed::patch_status::<Shoot, _>(garden.as_ref(), namespace.as_deref(), &name, &status).await {
                    debug!(error = %e, "Failed to report shoot progress");
                }
            }
        });

        let result = flow
            .run(RunOptions::default().with_progress(move |p| {
                let _ = tx.send(p.percent());
            }))
            .await;
        if let Err(e) = writer.await {
            warn!(error = %e, "Progress writer ended abnormally");
        }
        result.map(|_| ())
    }

    async fn failed(&self, shoot: &Shoot, operation: LastOperationType, err: FlowError) -> Result<Action> {
        let codes = err.codes();
        let retryable = !has_non_retryable_code(&codes);
        let mut description = err.to_string();
        if retryable {
            description.push_str(RETRY_SUFFIX);
        }
        warn!(error = %err, ?codes, "Shoot operation failed");

        self.write_status(
            shoot,
            json!({
                "lastOperation": LastOperation::new(operation, LastOperationState::Error, progress(shoot), description.clone()),
                "lastError": last_error(&err, description.clone(), codes),
            }),
        )
        .await?;
        let reason = match operation {
            LastOperationType::Delete => reasons::DELETE_ERROR,
            _ => reasons::RECONCILE_ERROR,
        };
        let action = match operation {
            LastOperationType::Delete => actions::DELETE,
            _ => actions::RECONCILE,
        };
        self.events
            .publish(&object_ref(shoot), EventType::Warning, reason, action, Some(description))
            .await;

        if retryable {
            Err(err.into())
        } else {
            // someone has to fix the shoot or the infrastructure first
            Ok(Action::await_change())
        }
    }

    async fn write_status(&self, shoot: &Shoot, status: Value) -> Result<()> {
        match typed::patch_status::<Shoot, _>(self.garden.as_ref(), shoot.namespace().as_deref(), &shoot.name_any(), &status).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// `Create` until the shoot was reconciled successfully once.
fn operation_type(shoot: &Shoot) -> LastOperationType {
    match shoot.status.as_ref().and_then(|s| s.last_operation.as_ref()) {
        None => LastOperationType::Create,
        Some(op) if op.operation_type == LastOperationType::Create && op.state != LastOperationState::Succeeded => {
            LastOperationType::Create
        }
        Some(_) => LastOperationType::Reconcile,
    }
}

fn progress(shoot: &Shoot) -> i32 {
    shoot
        .status
        .as_ref()
        .and_then(|s| s.last_operation.as_ref())
        .map(|op| op.progress)
        .unwrap_or_default()
}

fn last_error(err: &FlowError, description: String, codes: Vec<ErrorCode>) -> LastError {
    let tasks: Vec<&str> = err.failed_tasks().collect();
    LastError {
        description,
        task_id: (!tasks.is_empty()).then(|| tasks.join(",")),
        codes,
        last_update_time: Some(Utc::now()),
    }
}
