// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! BackupBucket state machine.
//!
//! `Pending` until the bucket is scheduled to a seed, `Processing` while the
//! actuator works, then `Succeeded` or `Error`. A bucket is only deleted once no
//! BackupEntry points to it anymore.

pub mod actuator;

pub use actuator::{Actuator, BucketStatus, ExtensionActuator};

use crate::constants::finalizers;
use crate::error::{has_non_retryable_code, GardenerError, Result};
use crate::events::{actions, object_ref, reasons, EventPublisher};
use crate::kubernetes::{add_finalizer, has_finalizer, remove_finalizer, typed, ClusterClient};
use crate::types::{
    BackupBucket, BackupEntry, LastError, LastOperation, LastOperationState, LastOperationType,
};
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const STILL_REFERENCED: &str = "backup bucket still has references";
const RETRY_SUFFIX: &str = " Operation will be retried.";

pub struct BackupBucketReconciler {
    garden: Arc<dyn ClusterClient>,
    actuator: Arc<dyn Actuator>,
    events: Arc<dyn EventPublisher>,
    seed_name: String,
    sync_period: Duration,
}

impl BackupBucketReconciler {
    pub fn new(
        garden: Arc<dyn ClusterClient>,
        actuator: Arc<dyn Actuator>,
        events: Arc<dyn EventPublisher>,
        seed_name: &str,
        sync_period: Duration,
    ) -> Self {
        Self {
            garden,
            actuator,
            events,
            seed_name: seed_name.to_string(),
            sync_period,
        }
    }

    #[instrument(skip(self, bucket), fields(bucket = %bucket.name_any()))]
    pub async fn reconcile(&self, bucket: &BackupBucket) -> Result<Action> {
        let Some(seed_name) = bucket.seed_name() else {
            return self.pending(bucket).await;
        };
        if seed_name != self.seed_name {
            debug!(seed = seed_name, "Bucket belongs to another seed");
            return Ok(Action::await_change());
        }
        if bucket.meta().deletion_timestamp.is_some() {
            return self.delete(bucket).await;
        }

        if add_finalizer(self.garden.as_ref(), bucket, finalizers::GARDENER).await? {
            info!("Added finalizer to backup bucket");
        }
        let operation = operation_type(bucket);
        let credentials = self.credentials(bucket).await?;
        add_finalizer(self.garden.as_ref(), &credentials, finalizers::REFERENCE_PROTECTION).await?;

        self.write_status(
            bucket,
            json!({"lastOperation": LastOperation::new(operation, LastOperationState::Processing, 1, "Reconciliation of backup bucket in progress.")}),
        )
        .await?;

        match self.actuator.reconcile(bucket, &credentials).await {
            Ok(status) => {
                self.write_status(
                    bucket,
                    json!({
                        "lastOperation": LastOperation::new(operation, LastOperationState::Succeeded, 100, "Backup bucket has been successfully reconciled."),
                        "lastError": Value::Null,
                        "observedGeneration": bucket.meta().generation,
                        "providerStatus": status.provider_status,
                        "generatedSecretRef": status.generated_secret_ref,
                    }),
                )
                .await?;
                info!("Backup bucket reconciled");
                Ok(Action::requeue(self.sync_period))
            }
            Err(e) => self.failed(bucket, operation, e).await,
        }
    }

    async fn delete(&self, bucket: &BackupBucket) -> Result<Action> {
        if !has_finalizer(bucket.meta(), finalizers::GARDENER) {
            return Ok(Action::await_change());
        }
        let entries = self.referencing_entries(bucket).await?;
        if !entries.is_empty() {
            let message = format!(
                "Cannot delete BackupBucket, because the following BackupEntries are still referencing it: {}",
                entries.join(", ")
            );
            info!("{}", message);
            self.events
                .publish(
                    &object_ref(bucket),
                    EventType::Normal,
                    reasons::RESOURCE_REFERENCED,
                    actions::DELETE,
                    Some(message),
                )
                .await;
            return Err(GardenerError::StillReferenced(STILL_REFERENCED.to_string()));
        }

        let operation = LastOperationType::Delete;
        self.write_status(
            bucket,
            json!({"lastOperation": LastOperation::new(operation, LastOperationState::Processing, 1, "Deletion of backup bucket in progress.")}),
        )
        .await?;

        // the credentials may already be gone, the provider then works without them
        let reference = &bucket.spec.secret_ref;
        let credentials =
            typed::get::<Secret>(self.garden.as_ref(), Some(&reference.namespace), &reference.name).await?;
        if let Err(e) = self
            .actuator
            .delete(bucket, &credentials.clone().unwrap_or_default())
            .await
        {
            return self.failed(bucket, operation, e).await;
        }

        if let Some(credentials) = credentials {
            if !self.secret_still_used(bucket).await? {
                remove_finalizer(self.garden.as_ref(), &credentials, finalizers::REFERENCE_PROTECTION).await?;
            }
        }
        if let Some(latest) = typed::get::<BackupBucket>(self.garden.as_ref(), None, &bucket.name_any()).await? {
            remove_finalizer(self.garden.as_ref(), &latest, finalizers::GARDENER).await?;
        }
        self.events
            .publish(
                &object_ref(bucket),
                EventType::Normal,
                reasons::DELETED,
                actions::DELETE,
                Some("Backup bucket has been deleted".to_string()),
            )
            .await;
        info!("Backup bucket deleted");
        Ok(Action::await_change())
    }

    async fn pending(&self, bucket: &BackupBucket) -> Result<Action> {
        if bucket.meta().deletion_timestamp.is_some() {
            remove_finalizer(self.garden.as_ref(), bucket, finalizers::GARDENER).await?;
            return Ok(Action::await_change());
        }
        let state = bucket
            .status
            .as_ref()
            .and_then(|s| s.last_operation.as_ref())
            .map(|op| op.state);
        if state != Some(LastOperationState::Pending) {
            info!("Backup bucket is not yet scheduled");
            self.write_status(
                bucket,
                json!({"lastOperation": LastOperation::new(
                    operation_type(bucket),
                    LastOperationState::Pending,
                    0,
                    "Backup bucket is not yet scheduled to a seed.",
                )}),
            )
            .await?;
        }
        Ok(Action::await_change())
    }

    async fn credentials(&self, bucket: &BackupBucket) -> Result<Secret> {
        let reference = &bucket.spec.secret_ref;
        typed::get_required::<Secret>(self.garden.as_ref(), Some(&reference.namespace), &reference.name).await
    }

    async fn referencing_entries(&self, bucket: &BackupBucket) -> Result<Vec<String>> {
        let name = bucket.name_any();
        let mut entries: Vec<String> = typed::list::<BackupEntry>(self.garden.as_ref(), None, None)
            .await?
            .into_iter()
            .filter(|entry| entry.spec.bucket_name == name)
            .map(|entry| format!("{}/{}", entry.namespace().unwrap_or_default(), entry.name_any()))
            .collect();
        entries.sort();
        Ok(entries)
    }

    /// Whether another bucket still uses the same credentials.
    async fn secret_still_used(&self, bucket: &BackupBucket) -> Result<bool> {
        let name = bucket.name_any();
        Ok(typed::list::<BackupBucket>(self.garden.as_ref(), None, None)
            .await?
            .iter()
            .any(|other| other.name_any() != name && other.spec.secret_ref == bucket.spec.secret_ref))
    }

    async fn failed(&self, bucket: &BackupBucket, operation: LastOperationType, err: GardenerError) -> Result<Action> {
        let codes = err.codes();
        let retryable = !has_non_retryable_code(&codes);
        let description = if retryable {
            format!("{}{}", err, RETRY_SUFFIX)
        } else {
            err.to_string()
        };
        warn!(error = %err, ?codes, "Backup bucket operation failed");
        self.write_status(
            bucket,
            json!({
                "lastOperation": LastOperation::new(operation, LastOperationState::Error, 50, description.clone()),
                "lastError": LastError {
                    description: description.clone(),
                    task_id: None,
                    codes: codes.clone(),
                    last_update_time: Some(Utc::now()),
                },
            }),
        )
        .await?;
        let (reason, action) = match operation {
            LastOperationType::Delete => (reasons::DELETE_ERROR, actions::DELETE),
            _ => (reasons::RECONCILE_ERROR, actions::RECONCILE),
        };
        self.events
            .publish(&object_ref(bucket), EventType::Warning, reason, action, Some(description))
            .await;
        if retryable {
            return Err(err);
        }
        Ok(Action::requeue(self.sync_period))
    }

    async fn write_status(&self, bucket: &BackupBucket, status: Value) -> Result<()> {
        match typed::patch_status::<BackupBucket, _>(self.garden.as_ref(), None, &bucket.name_any(), &status).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn operation_type(bucket: &BackupBucket) -> LastOperationType {
    match bucket.status.as_ref().and_then(|s| s.last_operation.as_ref()) {
        None => LastOperationType::Create,
        Some(op) if op.operation_type == LastOperationType::Create && op.state != LastOperationState::Succeeded => {
            LastOperationType::Create
        }
        Some(_) => LastOperationType::Reconcile,
    }
}
