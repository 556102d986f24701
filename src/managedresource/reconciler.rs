// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Apply and prune of ManagedResources.

use super::decode::{decode_secrets, DesiredObject};
use super::index::{kind_priority, Equivalences, ObjectIndex};
use super::merge::{annotated, inject_labels, merge, stamp_origin, strip_nulls, MergeOptions, Shape};
use crate::config::ManagedResourceControllerConfig;
use crate::constants::{annotations, finalizers, labels};
use crate::error::{is_conflict, is_invalid, is_not_found, GardenerError, Result};
use crate::events::{actions, object_ref, reasons, EventPublisher};
use crate::kubernetes::{add_finalizer, has_finalizer, remove_finalizer, typed, ClusterClient};
use crate::types::{
    condition_types, set_condition, Condition, ConditionStatus, GroupKind, ManagedResource,
    ObjectReference,
};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret};
use kube::api::{DynamicObject, GroupVersionKind, PropagationPolicy};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Condition reasons of `ResourcesApplied`.
pub mod condition_reasons {
    pub const APPLY_SUCCEEDED: &str = "ApplySucceeded";
    pub const APPLY_FAILED: &str = "ApplyFailed";
    pub const DECODING_FAILED: &str = "DecodingFailed";
    pub const DELETION_PENDING: &str = "DeletionPending";
    pub const DELETION_FAILED: &str = "DeletionFailed";
    pub const IGNORED: &str = "Ignored";
    pub const CHECKSUM_CHANGED: &str = "ChecksumChanged";
}

use condition_reasons as reason;

/// API groups whose objects are deleted with foreground propagation.
const FOREGROUND_DELETION_GROUPS: &[&str] = &["apps", "extensions", "batch"];

/// Keys of objects whose replicas or container resources are managed by an autoscaler.
#[derive(Debug, Default)]
pub struct ScaledTargets {
    pub horizontal: HashSet<String>,
    pub vertical: HashSet<String>,
}

/// Outcome of pruning a set of references.
#[derive(Debug, Default)]
struct PruneResult {
    /// References whose deletion has not completed yet
    pending: Vec<ObjectReference>,
    errors: Vec<String>,
}

pub struct ManagedResourceReconciler {
    source: Arc<dyn ClusterClient>,
    target: Arc<dyn ClusterClient>,
    events: Arc<dyn EventPublisher>,
    config: ManagedResourceControllerConfig,
    garbage_collector_enabled: bool,
}

impl ManagedResourceReconciler {
    pub fn new(
        source: Arc<dyn ClusterClient>,
        target: Arc<dyn ClusterClient>,
        events: Arc<dyn EventPublisher>,
        config: ManagedResourceControllerConfig,
        garbage_collector_enabled: bool,
    ) -> Self {
        Self {
            source,
            target,
            events,
            config,
            garbage_collector_enabled,
        }
    }

    pub fn config(&self) -> &ManagedResourceControllerConfig {
        &self.config
    }

    /// Whether this instance handles the class of `mr`.
    pub fn responsible_for(&self, mr: &ManagedResource) -> bool {
        mr.class() == self.config.class
    }

    fn finalizer(&self) -> String {
        finalizers::managed_resource(&self.config.class)
    }

    /// Value of the origin annotation stamped onto every applied object.
    pub fn origin(&self, mr: &ManagedResource) -> String {
        let key = format!("{}/{}", mr.namespace().unwrap_or_default(), mr.name_any());
        if self.config.cluster_id.is_empty() {
            key
        } else {
            format!("{}:{}", self.config.cluster_id, key)
        }
    }

    #[instrument(skip(self, mr), fields(managedresource = %format!("{}/{}", mr.namespace().unwrap_or_default(), mr.name_any())))]
    pub async fn reconcile(&self, mr: &ManagedResource) -> Result<Action> {
        if !self.responsible_for(mr) {
            debug!(class = %mr.class(), "Skipping ManagedResource of another class");
            return Ok(Action::await_change());
        }
        if mr.meta().deletion_timestamp.is_some() {
            return self.delete(mr).await;
        }
        if mr.annotations().get(annotations::IGNORE).map(String::as_str) == Some("true") {
            info!("ManagedResource is ignored");
            self.write_ignored_conditions(mr).await?;
            return Ok(Action::await_change());
        }
        if add_finalizer(self.source.as_ref(), mr, &self.finalizer()).await? {
            return Ok(Action::requeue(Duration::ZERO));
        }

        match self.apply(mr).await {
            Ok(action) => Ok(action),
            Err(e) => {
                self.events
                    .publish(
                        &object_ref(mr),
                        EventType::Warning,
                        reasons::RECONCILE_ERROR,
                        actions::RECONCILE,
                        Some(e.to_string()),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn apply(&self, mr: &ManagedResource) -> Result<Action> {
        let namespace = mr.namespace().unwrap_or_default();
        let mut conditions = mr.conditions().to_vec();

        let mut secrets = Vec::with_capacity(mr.spec.secret_refs.len());
        for secret_ref in &mr.spec.secret_refs {
            match typed::get::<Secret>(self.source.as_ref(), Some(&namespace), &secret_ref.name).await {
                Ok(Some(secret)) => secrets.push(secret),
                Ok(None) => {
                    let message = format!("Could not read secret '{}': not found", secret_ref.name);
                    return self.fail_apply(mr, conditions, reason::APPLY_FAILED, message, None).await;
                }
                Err(e) => {
                    let message = format!("Could not read secret '{}': {}", secret_ref.name, e);
                    return self.fail_apply(mr, conditions, reason::APPLY_FAILED, message, None).await;
                }
            }
        }

        let payload = decode_secrets(&secrets);
        let equivalences = Equivalences::new(&mr.spec.equivalences);
        let mut index = ObjectIndex::new(mr.resources(), &equivalences);
        let origin = self.origin(mr);

        let mut inject = mr.spec.inject_labels.clone();
        inject.insert(labels::MANAGED_BY.to_string(), self.config.managed_by_label_value.clone());

        let mut desired = Vec::with_capacity(payload.objects.len());
        let mut new_refs = Vec::with_capacity(payload.objects.len());
        let mut orphans = Vec::new();
        for mut obj in payload.objects {
            self.default_namespace(&mut obj).await?;
            let gk = GroupKind::new(&obj.gvk.group, &obj.gvk.kind);

            if obj.annotation(annotations::MODE) == Some(annotations::MODE_IGNORE) {
                if let Some(old) = index.lookup(&gk, obj.namespace(), obj.name()) {
                    orphans.push(old.clone());
                }
                continue;
            }

            inject_labels(&mut obj.object, Shape::of(&obj.gvk), &inject);
            let old = index.lookup(&gk, obj.namespace(), obj.name()).cloned();
            new_refs.push(reference_of(&obj));
            desired.push((obj, old));
        }

        // stable: objects of one kind keep their payload order
        desired.sort_by_key(|(obj, _)| kind_priority(&obj.gvk.group, &obj.gvk.kind));

        let scaled = self.scaled_targets(&equivalences).await?;

        let mut apply_errors = Vec::new();
        for (obj, old) in &desired {
            if let Err(e) = self.apply_object(mr, obj, old.as_ref(), &origin, &scaled, &equivalences).await {
                if matches!(&e, GardenerError::KubeError(ke) if is_conflict(ke)) {
                    return Err(e);
                }
                apply_errors.push(format!("Error during apply of object {}: {}", describe(obj), e));
            }
        }

        // applied objects stay tracked so that a later run can prune them
        let tracked = tracked_resources(mr.resources(), &new_refs);
        if !payload.errors.is_empty() {
            let message = format!("Could not decode all new resources: {}", payload.errors.join(", "));
            return self.fail_apply(mr, conditions, reason::DECODING_FAILED, message, Some(&tracked)).await;
        }
        if !apply_errors.is_empty() {
            let message = format!("Could not apply all new resources: {}", apply_errors.join(", "));
            return self.fail_apply(mr, conditions, reason::APPLY_FAILED, message, Some(&tracked)).await;
        }

        for orphan in &orphans {
            if let Err(e) = self.release_orphan(orphan, &origin).await {
                let message = format!("Could not release orphaned object {}: {}", orphan.key(), e);
                return self.fail_apply(mr, conditions, reason::APPLY_FAILED, message, Some(&tracked)).await;
            }
        }

        let stale: Vec<ObjectReference> = index.unfound().into_iter().cloned().collect();
        let pruned = self.prune(mr, &stale).await;

        let mut resources = new_refs;
        resources.extend(pruned.pending.iter().cloned());
        resources.sort();
        resources.dedup_by(|a, b| a.key() == b.key());

        let checksum_changed = mr.secrets_data_checksum() != Some(payload.checksum.as_str());
        if checksum_changed {
            for condition_type in [condition_types::RESOURCES_HEALTHY, condition_types::RESOURCES_PROGRESSING] {
                set_condition(
                    &mut conditions,
                    condition_type,
                    ConditionStatus::Unknown,
                    reason::CHECKSUM_CHANGED,
                    "The resources changed and are checked again.",
                    Vec::new(),
                );
            }
        }

        let action = if !pruned.errors.is_empty() || !pruned.pending.is_empty() {
            let message = if pruned.errors.is_empty() {
                format!(
                    "Deletion of old resources is still pending: {}",
                    keys(&pruned.pending)
                )
            } else {
                format!("Deletion of old resources failed: {}", pruned.errors.join(", "))
            };
            set_condition(
                &mut conditions,
                condition_types::RESOURCES_APPLIED,
                ConditionStatus::Progressing,
                reason::DELETION_PENDING,
                &message,
                Vec::new(),
            );
            Action::requeue(self.config.deletion_pending_interval)
        } else {
            set_condition(
                &mut conditions,
                condition_types::RESOURCES_APPLIED,
                ConditionStatus::True,
                reason::APPLY_SUCCEEDED,
                "All resources are applied.",
                Vec::new(),
            );
            Action::requeue(self.config.common.sync_period)
        };

        self.write_status(mr, &conditions, Some(&resources), Some(&payload.checksum))
            .await?;
        Ok(action)
    }

    /// Default or clear the namespace of an object depending on the scope of its kind.
    async fn default_namespace(&self, obj: &mut DesiredObject) -> Result<()> {
        match self.target.resolve(&obj.gvk).await? {
            Some(mapping) if mapping.namespaced => {
                if obj.namespace().is_empty() {
                    obj.set_namespace(Some(crate::constants::names::DEFAULT_NAMESPACE));
                }
            }
            Some(_) => obj.set_namespace(None),
            None => {
                // the CRD may be part of this payload
                if obj.gvk.kind != "Namespace" && obj.namespace().is_empty() {
                    obj.set_namespace(Some(crate::constants::names::DEFAULT_NAMESPACE));
                }
            }
        }
        Ok(())
    }

    /// Collect the targets of HorizontalPodAutoscalers and HVPAs in the target cluster.
    async fn scaled_targets(&self, equivalences: &Equivalences) -> Result<ScaledTargets> {
        let mut scaled = ScaledTargets::default();

        let target_key = |namespace: &str, target: &Value| -> Option<String> {
            let api_version = target["apiVersion"].as_str().unwrap_or_default();
            let group = api_version.rsplit_once('/').map(|(g, _)| g).unwrap_or_default();
            let kind = target["kind"].as_str()?;
            let name = target["name"].as_str()?;
            Some(equivalences.canonical_key(&GroupKind::new(group, kind), namespace, name))
        };

        for hpa in self
            .list_if_served(GroupVersionKind::gvk("autoscaling", "v2", "HorizontalPodAutoscaler"))
            .await?
        {
            let namespace = hpa.metadata.namespace.clone().unwrap_or_default();
            if let Some(key) = target_key(&namespace, &hpa.data["spec"]["scaleTargetRef"]) {
                scaled.horizontal.insert(key);
            }
        }

        for hvpa in self
            .list_if_served(GroupVersionKind::gvk("autoscaling.k8s.io", "v1alpha1", "Hvpa"))
            .await?
        {
            let namespace = hvpa.metadata.namespace.clone().unwrap_or_default();
            let Some(key) = target_key(&namespace, &hvpa.data["spec"]["targetRef"]) else {
                continue;
            };
            if hvpa.data["spec"]["hpa"]["deploy"].as_bool() == Some(true) {
                scaled.horizontal.insert(key.clone());
            }
            if hvpa.data["spec"]["vpa"]["deploy"].as_bool() == Some(true) {
                scaled.vertical.insert(key);
            }
        }

        Ok(scaled)
    }

    async fn list_if_served(&self, gvk: GroupVersionKind) -> Result<Vec<DynamicObject>> {
        let Some(mapping) = self.target.resolve(&gvk).await? else {
            return Ok(Vec::new());
        };
        match self.target.list(&mapping.resource, None, None).await {
            Ok(items) => Ok(items),
            Err(e) if is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_object(
        &self,
        mr: &ManagedResource,
        obj: &DesiredObject,
        old: Option<&ObjectReference>,
        origin: &str,
        scaled: &ScaledTargets,
        equivalences: &Equivalences,
    ) -> Result<()> {
        let Some(mapping) = self.target.resolve(&obj.gvk).await? else {
            return Err(GardenerError::UnknownResource(format!(
                "no matching resource found for {}",
                obj.api_version() + "/" + &obj.gvk.kind
            )));
        };

        let mut desired = obj.object.clone();
        stamp_origin(&mut desired, origin);
        strip_nulls(&mut desired);
        let namespace = mapping.namespaced.then(|| obj.namespace().to_string());
        if namespace.is_none() {
            if let Some(meta) = desired.get_mut("metadata").and_then(Value::as_object_mut) {
                meta.remove("namespace");
            }
        }

        let live = self
            .target
            .get(&mapping.resource, namespace.as_deref(), obj.name())
            .await?;
        match live {
            None => {
                debug!(object = %describe(obj), "Creating object");
                let dynamic: DynamicObject = serde_json::from_value(desired)?;
                self.target.create(&mapping.resource, &dynamic).await?;
            }
            Some(live) => {
                let live = serde_json::to_value(&live)?;
                let gk = GroupKind::new(&obj.gvk.group, &obj.gvk.kind);
                let key = equivalences.canonical_key(&gk, obj.namespace(), obj.name());
                let opts = MergeOptions {
                    force_overwrite_labels: mr.spec.force_overwrite_labels.unwrap_or(false),
                    force_overwrite_annotations: mr.spec.force_overwrite_annotations.unwrap_or(false),
                    old_labels: old.map(|o| &o.labels),
                    old_annotations: old.map(|o| &o.annotations),
                    preserve_replicas: scaled.horizontal.contains(&key)
                        || annotated(&desired, annotations::PRESERVE_REPLICAS),
                    preserve_resources: scaled.vertical.contains(&key)
                        || annotated(&desired, annotations::PRESERVE_RESOURCES),
                };
                let merged = merge(&desired, &live, Shape::of(&obj.gvk), &opts);
                let mut current = live.clone();
                strip_nulls(&mut current);
                if merged == current {
                    debug!(object = %describe(obj), "Object is up to date");
                } else {
                    debug!(object = %describe(obj), "Updating object");
                    let dynamic: DynamicObject = serde_json::from_value(merged)?;
                    if let Err(e) = self.target.update(&mapping.resource, &dynamic).await {
                        let delete_on_invalid = live["metadata"]["annotations"]
                            [annotations::DELETE_ON_INVALID_UPDATE]
                            .as_str()
                            == Some("true");
                        if is_invalid(&e) && delete_on_invalid {
                            info!(object = %describe(obj), "Deleting object after invalid update, it is recreated on the next reconciliation");
                            match self
                                .target
                                .delete(&mapping.resource, namespace.as_deref(), obj.name(), None)
                                .await
                            {
                                Ok(()) => {}
                                Err(de) if is_not_found(&de) => {}
                                Err(de) => return Err(de.into()),
                            }
                        }
                        return Err(e.into());
                    }
                }
            }
        }

        if obj.gvk.group == "apiextensions.k8s.io" && obj.gvk.kind == "CustomResourceDefinition" {
            self.target.refresh_discovery();
        }
        Ok(())
    }

    /// Strip the origin of an object that is no longer managed, unless another
    /// ManagedResource took it over.
    async fn release_orphan(&self, reference: &ObjectReference, origin: &str) -> Result<()> {
        let gvk = GroupVersionKind::gvk(reference.group(), reference.version(), &reference.kind);
        let Some(mapping) = self.target.resolve(&gvk).await? else {
            return Ok(());
        };
        let namespace = mapping.namespaced.then_some(reference.namespace.as_str());
        let Some(live) = self.target.get(&mapping.resource, namespace, &reference.name).await? else {
            return Ok(());
        };
        let live_origin = live.annotations().get(annotations::ORIGIN);
        if live_origin.map(String::as_str) != Some(origin) {
            debug!(object = %reference.key(), "Orphan is managed by someone else, skipping");
            return Ok(());
        }

        info!(object = %reference.key(), "Releasing orphaned object");
        let patch = json!({
            "metadata": {
                "annotations": {
                    annotations::ORIGIN: null,
                    annotations::DESCRIPTION: null,
                }
            }
        });
        match self
            .target
            .patch(&mapping.resource, namespace, &reference.name, &patch)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the referenced objects from the target cluster.
    async fn prune(&self, mr: &ManagedResource, references: &[ObjectReference]) -> PruneResult {
        let mut result = PruneResult::default();
        for reference in references {
            match self.prune_object(mr, reference).await {
                Ok(true) => {}
                Ok(false) => result.pending.push(reference.clone()),
                Err(e) => {
                    warn!(object = %reference.key(), error = %e, "Deleting object failed");
                    result.errors.push(format!("Could not delete {}: {}", reference.key(), e));
                    result.pending.push(reference.clone());
                }
            }
        }
        result
    }

    /// Returns true once the object is gone or intentionally kept.
    async fn prune_object(&self, mr: &ManagedResource, reference: &ObjectReference) -> Result<bool> {
        let gvk = GroupVersionKind::gvk(reference.group(), reference.version(), &reference.kind);
        let Some(mapping) = self.target.resolve(&gvk).await? else {
            debug!(object = %reference.key(), "Kind is not served anymore, nothing to delete");
            return Ok(true);
        };
        let namespace = mapping.namespaced.then_some(reference.namespace.as_str());
        let Some(live) = self.target.get(&mapping.resource, namespace, &reference.name).await? else {
            return Ok(true);
        };

        let keep = live.annotations().get(annotations::KEEP_OBJECT).map(String::as_str) == Some("true")
            || reference.annotations.get(annotations::KEEP_OBJECT).map(String::as_str) == Some("true");
        if keep {
            debug!(object = %reference.key(), "Keeping object");
            return Ok(true);
        }
        let garbage_collectable = live.labels().get(labels::GARBAGE_COLLECTABLE).map(String::as_str) == Some("true");
        if garbage_collectable && self.garbage_collector_enabled {
            debug!(object = %reference.key(), "Leaving object to the garbage collector");
            return Ok(true);
        }

        if live.meta().deletion_timestamp.is_none() {
            self.before_delete(mr, reference, &live).await?;
            let propagation = FOREGROUND_DELETION_GROUPS
                .contains(&reference.group())
                .then_some(PropagationPolicy::Foreground);
            info!(object = %reference.key(), "Deleting object");
            match self
                .target
                .delete(&mapping.resource, namespace, &reference.name, propagation)
                .await
            {
                Ok(()) => {}
                Err(e) if is_not_found(&e) => return Ok(true),
                Err(e) => return Err(e.into()),
            }
        }

        Ok(self
            .target
            .get(&mapping.resource, namespace, &reference.name)
            .await?
            .is_none())
    }

    async fn before_delete(&self, mr: &ManagedResource, reference: &ObjectReference, live: &DynamicObject) -> Result<()> {
        match (reference.group(), reference.kind.as_str()) {
            ("", "Service") => {
                let ingress = &live.data["status"]["loadBalancer"]["ingress"];
                if ingress.as_array().is_some_and(|i| !i.is_empty()) {
                    info!(service = %reference.key(), load_balancer = %ingress, "Deleting service with load balancer");
                }
            }
            ("apps", "StatefulSet") if mr.spec.delete_persistent_volume_claims.unwrap_or(false) => {
                let selector = live.data["spec"]["selector"]["matchLabels"]
                    .as_object()
                    .map(|labels| {
                        labels
                            .iter()
                            .map(|(k, v)| format!("{}={}", k, v.as_str().unwrap_or_default()))
                            .collect::<Vec<_>>()
                            .join(",")
                    })
                    .unwrap_or_default();
                if selector.is_empty() {
                    return Ok(());
                }
                let claims = typed::list::<PersistentVolumeClaim>(
                    self.target.as_ref(),
                    Some(&reference.namespace),
                    Some(&selector),
                )
                .await?;
                for claim in claims {
                    info!(pvc = %claim.name_any(), statefulset = %reference.key(), "Deleting PersistentVolumeClaim of StatefulSet");
                    typed::delete::<PersistentVolumeClaim>(
                        self.target.as_ref(),
                        Some(&reference.namespace),
                        &claim.name_any(),
                    )
                    .await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    #[instrument(skip(self, mr), fields(managedresource = %mr.name_any()))]
    async fn delete(&self, mr: &ManagedResource) -> Result<Action> {
        let finalizer = self.finalizer();
        if !has_finalizer(mr.meta(), &finalizer) {
            return Ok(Action::await_change());
        }
        if mr.keep_objects() {
            info!("Keeping objects of deleted ManagedResource");
            remove_finalizer(self.source.as_ref(), mr, &finalizer).await?;
            return Ok(Action::await_change());
        }

        let mut conditions = mr.conditions().to_vec();
        set_condition(
            &mut conditions,
            condition_types::RESOURCES_APPLIED,
            ConditionStatus::Progressing,
            reason::DELETION_PENDING,
            "Deletion of all resources is pending.",
            Vec::new(),
        );
        let Some(latest) = self.write_status(mr, &conditions, None, None).await? else {
            return Ok(Action::await_change());
        };

        let pruned = self.prune(&latest, latest.resources()).await;
        if !pruned.pending.is_empty() {
            let message = if pruned.errors.is_empty() {
                format!("Deletion of resources is still pending: {}", keys(&pruned.pending))
            } else {
                format!("Deletion of resources failed: {}", pruned.errors.join(", "))
            };
            let condition_reason = if pruned.errors.is_empty() {
                reason::DELETION_PENDING
            } else {
                reason::DELETION_FAILED
            };
            set_condition(
                &mut conditions,
                condition_types::RESOURCES_APPLIED,
                ConditionStatus::Progressing,
                condition_reason,
                &message,
                Vec::new(),
            );
            let mut pending = pruned.pending.clone();
            pending.sort();
            self.write_status(mr, &conditions, Some(&pending), None).await?;
            if !pruned.errors.is_empty() {
                self.events
                    .publish(
                        &object_ref(mr),
                        EventType::Warning,
                        reasons::DELETE_ERROR,
                        actions::DELETE,
                        Some(message),
                    )
                    .await;
            }
            return Err(GardenerError::DeletionPending {
                count: pending.len(),
                requeue_after: self.config.deletion_pending_interval,
            });
        }

        info!("All resources deleted, removing finalizer");
        remove_finalizer(self.source.as_ref(), &latest, &finalizer).await?;
        Ok(Action::await_change())
    }

    async fn write_ignored_conditions(&self, mr: &ManagedResource) -> Result<()> {
        let mut conditions = mr.conditions().to_vec();
        let message = "ManagedResource is marked to be ignored.";
        let mut changed = set_condition(
            &mut conditions,
            condition_types::RESOURCES_APPLIED,
            ConditionStatus::True,
            reason::IGNORED,
            message,
            Vec::new(),
        );
        changed |= set_condition(
            &mut conditions,
            condition_types::RESOURCES_HEALTHY,
            ConditionStatus::True,
            reason::IGNORED,
            message,
            Vec::new(),
        );
        changed |= set_condition(
            &mut conditions,
            condition_types::RESOURCES_PROGRESSING,
            ConditionStatus::False,
            reason::IGNORED,
            message,
            Vec::new(),
        );
        if changed {
            self.write_status(mr, &conditions, None, None).await?;
        }
        Ok(())
    }

    async fn fail_apply(
        &self,
        mr: &ManagedResource,
        mut conditions: Vec<Condition>,
        condition_reason: &str,
        message: String,
        resources: Option<&[ObjectReference]>,
    ) -> Result<Action> {
        set_condition(
            &mut conditions,
            condition_types::RESOURCES_APPLIED,
            ConditionStatus::False,
            condition_reason,
            &message,
            Vec::new(),
        );
        self.write_status(mr, &conditions, resources, None).await?;
        Err(GardenerError::Other(anyhow::anyhow!(message)))
    }

    /// Write conditions, and optionally the resources and checksum, in one status patch.
    ///
    /// Returns the updated object, `None` if it is gone.
    async fn write_status(
        &self,
        mr: &ManagedResource,
        conditions: &[Condition],
        resources: Option<&[ObjectReference]>,
        checksum: Option<&str>,
    ) -> Result<Option<ManagedResource>> {
        let mut status = json!({
            "conditions": conditions,
            "observedGeneration": mr.meta().generation,
        });
        if let Some(resources) = resources {
            status["resources"] = json!(resources);
        }
        if let Some(checksum) = checksum {
            status["secretsDataChecksum"] = json!(checksum);
        }
        let namespace = mr.namespace();
        match self
            .source
            .patch_status(
                &typed::api_resource::<ManagedResource>(),
                namespace.as_deref(),
                &mr.name_any(),
                &json!({ "status": status }),
            )
            .await
        {
            Ok(updated) => Ok(Some(typed::from_dynamic(updated)?)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn reference_of(obj: &DesiredObject) -> ObjectReference {
    let string_map = |value: &Value| -> BTreeMap<String, String> {
        value
            .as_object()
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    };
    ObjectReference {
        api_version: obj.api_version(),
        kind: obj.gvk.kind.clone(),
        name: obj.name().to_string(),
        namespace: obj.namespace().to_string(),
        labels: string_map(&obj.object["metadata"]["labels"]),
        annotations: string_map(&obj.object["metadata"]["annotations"]),
    }
}

fn describe(obj: &DesiredObject) -> String {
    if obj.namespace().is_empty() {
        format!("{} {}", obj.gvk.kind, obj.name())
    } else {
        format!("{} {}/{}", obj.gvk.kind, obj.namespace(), obj.name())
    }
}

/// The objects of `new` plus those of `prior` that `new` does not mention, sorted.
fn tracked_resources(prior: &[ObjectReference], new: &[ObjectReference]) -> Vec<ObjectReference> {
    let known: HashSet<String> = new.iter().map(ObjectReference::key).collect();
    let mut tracked: Vec<ObjectReference> = new
        .iter()
        .chain(prior.iter().filter(|r| !known.contains(&r.key())))
        .cloned()
        .collect();
    tracked.sort();
    tracked
}

fn keys(references: &[ObjectReference]) -> String {
    references
        .iter()
        .map(ObjectReference::key)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeCluster, RecordingEventPublisher};
    use crate::types::get_condition;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;

    const NS: &str = "shoot--foo--bar";

    struct Fixture {
        source: Arc<FakeCluster>,
        target: Arc<FakeCluster>,
        events: Arc<RecordingEventPublisher>,
        reconciler: ManagedResourceReconciler,
    }

    fn fixture() -> Fixture {
        let source = Arc::new(FakeCluster::new());
        let target = Arc::new(FakeCluster::new());
        let events = Arc::new(RecordingEventPublisher::default());
        let config = ManagedResourceControllerConfig {
            cluster_id: "seed".to_string(),
            ..Default::default()
        };
        let reconciler = ManagedResourceReconciler::new(
            source.clone(),
            target.clone(),
            events.clone(),
            config,
            false,
        );
        Fixture {
            source,
            target,
            events,
            reconciler,
        }
    }

    const CONFIG_MAP_X: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: x\n  namespace: kube-system\ndata:\n  foo: bar\n";
    const DEPLOYMENT_Y: &str = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: y\n  namespace: kube-system\nspec:\n  replicas: 2\n  template:\n    metadata:\n      labels:\n        app: y\n    spec:\n      containers:\n      - name: y\n        image: y:1\n        resources:\n          requests:\n            cpu: 100m\n";
    const SERVICE_Z: &str = "apiVersion: v1\nkind: Service\nmetadata:\n  name: z\n  namespace: kube-system\nspec:\n  ports:\n  - port: 443\n";

    async fn put_payload(fx: &Fixture, data: &str) {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("managedresource-mr".to_string()),
                namespace: Some(NS.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "objects.yaml".to_string(),
                ByteString(data.as_bytes().to_vec()),
            )])),
            ..Default::default()
        };
        fx.source.remove("v1", "Secret", NS, "managedresource-mr");
        typed::create(fx.source.as_ref(), &secret).await.unwrap();
    }

    async fn create_mr(fx: &Fixture, spec: serde_json::Value) {
        let mut mr = json!({
            "apiVersion": "resources.gardener.cloud/v1alpha1",
            "kind": "ManagedResource",
            "metadata": {"name": "mr", "namespace": NS},
            "spec": {"secretRefs": [{"name": "managedresource-mr"}]}
        });
        if let Some(extra) = spec.as_object() {
            for (k, v) in extra {
                mr["spec"][k] = v.clone();
            }
        }
        let mr: ManagedResource = serde_json::from_value(mr).unwrap();
        typed::create(fx.source.as_ref(), &mr).await.unwrap();
    }

    async fn current(fx: &Fixture) -> ManagedResource {
        typed::get_required::<ManagedResource>(fx.source.as_ref(), Some(NS), "mr")
            .await
            .unwrap()
    }

    /// Reconcile with the latest state until the finalizer step is done.
    async fn reconcile(fx: &Fixture) -> Result<Action> {
        let mr = current(fx).await;
        let result = fx.reconciler.reconcile(&mr).await;
        if !has_finalizer(mr.meta(), &finalizers::managed_resource("")) && mr.meta().deletion_timestamp.is_none() {
            return fx.reconciler.reconcile(&current(fx).await).await;
        }
        result
    }

    fn status_keys(mr: &ManagedResource) -> Vec<String> {
        mr.resources().iter().map(ObjectReference::key).collect()
    }

    #[tokio::test]
    async fn test_apply_and_prune() {
        let fx = fixture();
        put_payload(&fx, &format!("{}---\n{}", CONFIG_MAP_X, DEPLOYMENT_Y)).await;
        create_mr(&fx, json!({})).await;

        reconcile(&fx).await.unwrap();
        let mr = current(&fx).await;
        assert_eq!(
            status_keys(&mr),
            vec!["apps/Deployment/kube-system/y", "/ConfigMap/kube-system/x"]
        );
        let cm = fx.target.object("v1", "ConfigMap", "kube-system", "x").unwrap();
        assert_eq!(cm["metadata"]["annotations"][annotations::ORIGIN], "seed:shoot--foo--bar/mr");
        assert_eq!(cm["metadata"]["labels"][labels::MANAGED_BY], "gardener");

        put_payload(&fx, &format!("{}---\n{}", DEPLOYMENT_Y, SERVICE_Z)).await;
        reconcile(&fx).await.unwrap();

        assert!(!fx.target.exists("v1", "ConfigMap", "kube-system", "x"));
        assert!(fx.target.exists("v1", "Service", "kube-system", "z"));
        let deletes = fx.target.calls_of("delete", "ConfigMap");
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].propagation, None);

        let mr = current(&fx).await;
        assert_eq!(
            status_keys(&mr),
            vec!["apps/Deployment/kube-system/y", "/Service/kube-system/z"]
        );
        let applied = mr.condition(condition_types::RESOURCES_APPLIED).unwrap();
        assert_eq!(applied.status, ConditionStatus::True);
        assert_eq!(applied.reason, reason::APPLY_SUCCEEDED);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let fx = fixture();
        put_payload(&fx, &format!("{}---\n{}---\n{}", CONFIG_MAP_X, DEPLOYMENT_Y, SERVICE_Z)).await;
        create_mr(&fx, json!({})).await;
        reconcile(&fx).await.unwrap();

        let first = current(&fx).await;
        let versions = |kind: &str, api_version: &str, name: &str| {
            fx.target.object(api_version, kind, "kube-system", name).unwrap()["metadata"]["resourceVersion"].clone()
        };
        let before = (
            versions("ConfigMap", "v1", "x"),
            versions("Deployment", "apps/v1", "y"),
            versions("Service", "v1", "z"),
        );

        fx.target.clear_calls();
        reconcile(&fx).await.unwrap();
        let second = current(&fx).await;

        assert_eq!(
            serde_json::to_string(&first.status).unwrap(),
            serde_json::to_string(&second.status).unwrap()
        );
        let after = (
            versions("ConfigMap", "v1", "x"),
            versions("Deployment", "apps/v1", "y"),
            versions("Service", "v1", "z"),
        );
        assert_eq!(before, after);
        assert!(fx.target.calls().iter().all(|c| c.verb != "update" && c.verb != "create"));
    }

    #[tokio::test]
    async fn test_foreground_deletion_for_workloads() {
        let fx = fixture();
        put_payload(&fx, DEPLOYMENT_Y).await;
        create_mr(&fx, json!({})).await;
        reconcile(&fx).await.unwrap();

        put_payload(&fx, CONFIG_MAP_X).await;
        reconcile(&fx).await.unwrap();

        let deletes = fx.target.calls_of("delete", "Deployment");
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].propagation.as_deref(), Some("Foreground"));
    }

    #[tokio::test]
    async fn test_checksum_change_resets_health_conditions() {
        let fx = fixture();
        put_payload(&fx, CONFIG_MAP_X).await;
        create_mr(&fx, json!({})).await;
        reconcile(&fx).await.unwrap();

        let mr = current(&fx).await;
        let healthy = mr.condition(condition_types::RESOURCES_HEALTHY).unwrap();
        assert_eq!(healthy.status, ConditionStatus::Unknown);

        // the health controller reports the objects healthy
        let mut conditions = mr.conditions().to_vec();
        set_condition(
            &mut conditions,
            condition_types::RESOURCES_HEALTHY,
            ConditionStatus::True,
            "ResourcesHealthy",
            "All resources are healthy.",
            Vec::new(),
        );
        fx.source
            .patch_status(
                &typed::api_resource::<ManagedResource>(),
                Some(NS),
                "mr",
                &json!({"status": {"conditions": conditions}}),
            )
            .await
            .unwrap();

        reconcile(&fx).await.unwrap();
        let mr = current(&fx).await;
        assert!(mr.condition(condition_types::RESOURCES_HEALTHY).unwrap().is_true());

        put_payload(&fx, SERVICE_Z).await;
        reconcile(&fx).await.unwrap();
        let mr = current(&fx).await;
        assert_eq!(
            mr.condition(condition_types::RESOURCES_HEALTHY).unwrap().status,
            ConditionStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_horizontally_scaled_replicas_are_preserved() {
        let fx = fixture();
        put_payload(&fx, DEPLOYMENT_Y).await;
        create_mr(&fx, json!({})).await;
        reconcile(&fx).await.unwrap();

        // an HPA targeting the extensions group still counts through equivalences
        fx.target.insert(json!({
            "apiVersion": "autoscaling/v2",
            "kind": "HorizontalPodAutoscaler",
            "metadata": {"name": "y", "namespace": "kube-system"},
            "spec": {"scaleTargetRef": {"apiVersion": "extensions/v1beta1", "kind": "Deployment", "name": "y"}}
        }));
        let mut live = fx.target.object("apps/v1", "Deployment", "kube-system", "y").unwrap();
        live["spec"]["replicas"] = json!(7);
        fx.target.insert(live);

        put_payload(&fx, &DEPLOYMENT_Y.replace("image: y:1", "image: y:2")).await;
        reconcile(&fx).await.unwrap();

        let deployment = fx.target.object("apps/v1", "Deployment", "kube-system", "y").unwrap();
        assert_eq!(deployment["spec"]["replicas"], 7);
        assert_eq!(
            deployment["spec"]["template"]["spec"]["containers"][0]["image"],
            "y:2"
        );
    }

    #[tokio::test]
    async fn test_hvpa_preserves_resources() {
        let fx = fixture();
        put_payload(&fx, DEPLOYMENT_Y).await;
        create_mr(&fx, json!({})).await;
        reconcile(&fx).await.unwrap();

        fx.target.insert(json!({
            "apiVersion": "autoscaling.k8s.io/v1alpha1",
            "kind": "Hvpa",
            "metadata": {"name": "y", "namespace": "kube-system"},
            "spec": {
                "targetRef": {"apiVersion": "apps/v1", "kind": "Deployment", "name": "y"},
                "hpa": {"deploy": false},
                "vpa": {"deploy": true}
            }
        }));
        let mut live = fx.target.object("apps/v1", "Deployment", "kube-system", "y").unwrap();
        live["spec"]["template"]["spec"]["containers"][0]["resources"] = json!({"requests": {"cpu": "1"}});
        fx.target.insert(live);

        put_payload(&fx, &DEPLOYMENT_Y.replace("replicas: 2", "replicas: 3")).await;
        reconcile(&fx).await.unwrap();

        let deployment = fx.target.object("apps/v1", "Deployment", "kube-system", "y").unwrap();
        assert_eq!(deployment["spec"]["replicas"], 3);
        assert_eq!(
            deployment["spec"]["template"]["spec"]["containers"][0]["resources"]["requests"]["cpu"],
            "1"
        );
    }

    #[tokio::test]
    async fn test_ignored_mode_releases_orphan() {
        let fx = fixture();
        put_payload(&fx, CONFIG_MAP_X).await;
        create_mr(&fx, json!({})).await;
        reconcile(&fx).await.unwrap();

        let ignored = CONFIG_MAP_X.replace(
            "  namespace: kube-system\n",
            "  namespace: kube-system\n  annotations:\n    resources.gardener.cloud/mode: ignore\n",
        );
        put_payload(&fx, &ignored).await;
        reconcile(&fx).await.unwrap();

        let cm = fx.target.object("v1", "ConfigMap", "kube-system", "x").unwrap();
        assert!(cm["metadata"]["annotations"].get(annotations::ORIGIN).is_none());
        assert!(fx.target.calls_of("delete", "ConfigMap").is_empty());
        assert!(current(&fx).await.resources().is_empty());
    }

    #[tokio::test]
    async fn test_orphan_of_other_owner_is_left_alone() {
        let fx = fixture();
        put_payload(&fx, CONFIG_MAP_X).await;
        create_mr(&fx, json!({})).await;
        reconcile(&fx).await.unwrap();

        let mut cm = fx.target.object("v1", "ConfigMap", "kube-system", "x").unwrap();
        cm["metadata"]["annotations"][annotations::ORIGIN] = json!("seed:other/mr");
        fx.target.insert(cm);

        let ignored = CONFIG_MAP_X.replace(
            "  namespace: kube-system\n",
            "  namespace: kube-system\n  annotations:\n    resources.gardener.cloud/mode: ignore\n",
        );
        put_payload(&fx, &ignored).await;
        reconcile(&fx).await.unwrap();

        let cm = fx.target.object("v1", "ConfigMap", "kube-system", "x").unwrap();
        assert_eq!(cm["metadata"]["annotations"][annotations::ORIGIN], "seed:other/mr");
    }

    #[tokio::test]
    async fn test_keep_object_and_garbage_collectable_are_not_deleted() {
        let fx = fixture();
        let keep = CONFIG_MAP_X.replace(
            "  namespace: kube-system\n",
            "  namespace: kube-system\n  annotations:\n    resources.gardener.cloud/keep-object: \"true\"\n",
        );
        put_payload(&fx, &keep).await;
        create_mr(&fx, json!({})).await;
        reconcile(&fx).await.unwrap();

        put_payload(&fx, SERVICE_Z).await;
        reconcile(&fx).await.unwrap();
        assert!(fx.target.exists("v1", "ConfigMap", "kube-system", "x"));
        assert_eq!(status_keys(&current(&fx).await), vec!["/Service/kube-system/z"]);
    }

    #[tokio::test]
    async fn test_namespace_defaulting() {
        let fx = fixture();
        put_payload(
            &fx,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: plain\n---\napiVersion: rbac.authorization.k8s.io/v1\nkind: ClusterRole\nmetadata:\n  name: reader\n  namespace: ignored\n",
        )
        .await;
        create_mr(&fx, json!({})).await;
        reconcile(&fx).await.unwrap();

        assert!(fx.target.exists("v1", "ConfigMap", "default", "plain"));
        assert!(fx.target.exists("rbac.authorization.k8s.io/v1", "ClusterRole", "", "reader"));
        let mr = current(&fx).await;
        assert!(status_keys(&mr).contains(&"rbac.authorization.k8s.io/ClusterRole//reader".to_string()));
    }

    #[tokio::test]
    async fn test_decoding_errors_surface_as_condition() {
        let fx = fixture();
        put_payload(&fx, &format!("{}---\nkind: ConfigMap\nmetadata:\n  name: broken\n", CONFIG_MAP_X)).await;
        create_mr(&fx, json!({})).await;

        assert!(reconcile(&fx).await.is_err());
        assert!(fx.target.exists("v1", "ConfigMap", "kube-system", "x"));
        let mr = current(&fx).await;
        let applied = mr.condition(condition_types::RESOURCES_APPLIED).unwrap();
        assert_eq!(applied.status, ConditionStatus::False);
        assert_eq!(applied.reason, reason::DECODING_FAILED);
        assert_eq!(fx.events.reasons(), vec![reasons::RECONCILE_ERROR]);
    }

    #[tokio::test]
    async fn test_objects_applied_by_failed_run_are_pruned_later() {
        let fx = fixture();
        put_payload(&fx, SERVICE_Z).await;
        create_mr(&fx, json!({})).await;
        reconcile(&fx).await.unwrap();

        put_payload(
            &fx,
            &format!("{}---\n{}---\nkind: ConfigMap\nmetadata:\n  name: broken\n", SERVICE_Z, CONFIG_MAP_X),
        )
        .await;
        assert!(reconcile(&fx).await.is_err());
        assert!(fx.target.exists("v1", "ConfigMap", "kube-system", "x"));
        let mr = current(&fx).await;
        assert_eq!(
            status_keys(&mr),
            vec!["/ConfigMap/kube-system/x", "/Service/kube-system/z"]
        );

        put_payload(&fx, SERVICE_Z).await;
        reconcile(&fx).await.unwrap();
        assert!(!fx.target.exists("v1", "ConfigMap", "kube-system", "x"));
        assert_eq!(status_keys(&current(&fx).await), vec!["/Service/kube-system/z"]);
    }

    #[tokio::test]
    async fn test_conflict_is_returned() {
        let fx = fixture();
        put_payload(&fx, CONFIG_MAP_X).await;
        create_mr(&fx, json!({})).await;
        fx.target.fail("create", "ConfigMap", Some("x"), 409, "Conflict");

        let err = reconcile(&fx).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_invalid_update_deletes_annotated_object() {
        let fx = fixture();
        put_payload(&fx, CONFIG_MAP_X).await;
        create_mr(&fx, json!({})).await;
        reconcile(&fx).await.unwrap();

        let mut cm = fx.target.object("v1", "ConfigMap", "kube-system", "x").unwrap();
        cm["metadata"]["annotations"][annotations::DELETE_ON_INVALID_UPDATE] = json!("true");
        fx.target.insert(cm);
        fx.target.fail("update", "ConfigMap", Some("x"), 422, "Invalid");

        put_payload(&fx, &CONFIG_MAP_X.replace("foo: bar", "foo: baz")).await;
        assert!(reconcile(&fx).await.is_err());
        assert!(!fx.target.exists("v1", "ConfigMap", "kube-system", "x"));
        let applied = current(&fx).await;
        let applied = get_condition(applied.conditions(), condition_types::RESOURCES_APPLIED).unwrap();
        assert_eq!(applied.reason, reason::APPLY_FAILED);

        fx.target.clear_failures();
        reconcile(&fx).await.unwrap();
        let cm = fx.target.object("v1", "ConfigMap", "kube-system", "x").unwrap();
        assert_eq!(cm["data"]["foo"], "baz");
    }

    #[tokio::test]
    async fn test_pending_deletion_requeues() {
        let fx = fixture();
        put_payload(&fx, CONFIG_MAP_X).await;
        create_mr(&fx, json!({})).await;
        reconcile(&fx).await.unwrap();

        let mut cm = fx.target.object("v1", "ConfigMap", "kube-system", "x").unwrap();
        cm["metadata"]["finalizers"] = json!(["example.com/protect"]);
        fx.target.insert(cm);

        put_payload(&fx, SERVICE_Z).await;
        let action = reconcile(&fx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));

        let mr = current(&fx).await;
        assert_eq!(
            status_keys(&mr),
            vec!["/ConfigMap/kube-system/x", "/Service/kube-system/z"]
        );
        let applied = mr.condition(condition_types::RESOURCES_APPLIED).unwrap();
        assert_eq!(applied.status, ConditionStatus::Progressing);
        assert_eq!(applied.reason, reason::DELETION_PENDING);
    }

    #[tokio::test]
    async fn test_delete_removes_objects_then_finalizer() {
        let fx = fixture();
        put_payload(&fx, &format!("{}---\n{}", CONFIG_MAP_X, DEPLOYMENT_Y)).await;
        create_mr(&fx, json!({})).await;
        reconcile(&fx).await.unwrap();

        typed::delete::<ManagedResource>(fx.source.as_ref(), Some(NS), "mr")
            .await
            .unwrap();
        let mr = current(&fx).await;
        fx.reconciler.reconcile(&mr).await.unwrap();

        assert!(!fx.target.exists("v1", "ConfigMap", "kube-system", "x"));
        assert!(!fx.target.exists("apps/v1", "Deployment", "kube-system", "y"));
        assert!(!fx.source.exists("resources.gardener.cloud/v1alpha1", "ManagedResource", NS, "mr"));
    }

    #[tokio::test]
    async fn test_delete_with_keep_objects() {
        let fx = fixture();
        put_payload(&fx, CONFIG_MAP_X).await;
        create_mr(&fx, json!({"keepObjects": true})).await;
        reconcile(&fx).await.unwrap();

        typed::delete::<ManagedResource>(fx.source.as_ref(), Some(NS), "mr")
            .await
            .unwrap();
        fx.reconciler.reconcile(&current(&fx).await).await.unwrap();

        assert!(fx.target.exists("v1", "ConfigMap", "kube-system", "x"));
        assert!(!fx.source.exists("resources.gardener.cloud/v1alpha1", "ManagedResource", NS, "mr"));
    }

    #[tokio::test]
    async fn test_delete_pending_keeps_finalizer() {
        let fx = fixture();
        put_payload(&fx, CONFIG_MAP_X).await;
        create_mr(&fx, json!({})).await;
        reconcile(&fx).await.unwrap();

        fx.target.fail("delete", "ConfigMap", None, 500, "InternalError");
        typed::delete::<ManagedResource>(fx.source.as_ref(), Some(NS), "mr")
            .await
            .unwrap();
        let err = fx.reconciler.reconcile(&current(&fx).await).await.unwrap_err();
        assert!(matches!(err, GardenerError::DeletionPending { count: 1, .. }));

        let mr = current(&fx).await;
        assert!(has_finalizer(mr.meta(), &finalizers::managed_resource("")));
        assert_eq!(fx.events.reasons(), vec![reasons::DELETE_ERROR]);
    }

    #[tokio::test]
    async fn test_statefulset_pvcs_deleted_on_request() {
        let fx = fixture();
        let sts = "apiVersion: apps/v1\nkind: StatefulSet\nmetadata:\n  name: db\n  namespace: kube-system\nspec:\n  selector:\n    matchLabels:\n      app: db\n  template:\n    metadata:\n      labels:\n        app: db\n";
        put_payload(&fx, sts).await;
        create_mr(&fx, json!({"deletePersistentVolumeClaims": true})).await;
        reconcile(&fx).await.unwrap();
        fx.target.insert(json!({
            "apiVersion": "v1", "kind": "PersistentVolumeClaim",
            "metadata": {"name": "data-db-0", "namespace": "kube-system", "labels": {"app": "db"}}
        }));

        put_payload(&fx, CONFIG_MAP_X).await;
        reconcile(&fx).await.unwrap();
        assert!(!fx.target.exists("v1", "PersistentVolumeClaim", "kube-system", "data-db-0"));
        assert!(!fx.target.exists("apps/v1", "StatefulSet", "kube-system", "db"));
    }

    #[tokio::test]
    async fn test_ignored_managed_resource() {
        let fx = fixture();
        put_payload(&fx, CONFIG_MAP_X).await;
        create_mr(&fx, json!({})).await;
        let mut mr = current(&fx).await;
        mr.annotations_mut()
            .insert(annotations::IGNORE.to_string(), "true".to_string());

        fx.reconciler.reconcile(&mr).await.unwrap();
        let mr = current(&fx).await;
        assert_eq!(
            mr.condition(condition_types::RESOURCES_APPLIED).unwrap().reason,
            reason::IGNORED
        );
        assert_eq!(
            mr.condition(condition_types::RESOURCES_PROGRESSING).unwrap().status,
            ConditionStatus::False
        );
        assert!(!fx.target.exists("v1", "ConfigMap", "kube-system", "x"));
    }

    #[tokio::test]
    async fn test_other_class_is_skipped() {
        let fx = fixture();
        put_payload(&fx, CONFIG_MAP_X).await;
        create_mr(&fx, json!({"class": "shoot"})).await;
        fx.reconciler.reconcile(&current(&fx).await).await.unwrap();
        assert!(fx.source.calls_of("patch", "ManagedResource").is_empty());
        assert!(!fx.target.exists("v1", "ConfigMap", "kube-system", "x"));
    }
}
