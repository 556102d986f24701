// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Merging desired objects onto their live counterparts.
//!
//! The desired object wins, except for metadata owned by the API server,
//! labels and annotations added by others, and fields other controllers are
//! known to manage (replicas under autoscaling, allocated cluster IPs and node
//! ports, token secrets, ...).

use crate::constants::annotations;
use kube::api::GroupVersionKind;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Kinds the merge logic looks into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Deployment,
    StatefulSet,
    DaemonSet,
    ReplicaSet,
    Job,
    CronJob,
    Service,
    ServiceAccount,
    Opaque,
}

impl Shape {
    pub fn of(gvk: &GroupVersionKind) -> Self {
        match (gvk.group.as_str(), gvk.kind.as_str()) {
            ("apps" | "extensions", "Deployment") => Shape::Deployment,
            ("apps", "StatefulSet") => Shape::StatefulSet,
            ("apps" | "extensions", "DaemonSet") => Shape::DaemonSet,
            ("apps" | "extensions", "ReplicaSet") => Shape::ReplicaSet,
            ("batch", "Job") => Shape::Job,
            ("batch", "CronJob") => Shape::CronJob,
            ("", "Service") => Shape::Service,
            ("", "ServiceAccount") => Shape::ServiceAccount,
            _ => Shape::Opaque,
        }
    }

    fn has_replicas(self) -> bool {
        matches!(self, Shape::Deployment | Shape::StatefulSet | Shape::ReplicaSet)
    }

    /// JSON pointer of the pod template, if the kind has one.
    fn pod_template(self) -> Option<&'static str> {
        match self {
            Shape::Deployment | Shape::StatefulSet | Shape::DaemonSet | Shape::ReplicaSet | Shape::Job => {
                Some("/spec/template")
            }
            Shape::CronJob => Some("/spec/jobTemplate/spec/template"),
            _ => None,
        }
    }
}

/// Inject labels into the object and, where present, its pod template and
/// volume claim templates.
pub fn inject_labels(object: &mut Value, shape: Shape, labels: &BTreeMap<String, String>) {
    if labels.is_empty() {
        return;
    }
    add_labels(&mut object["metadata"], labels);
    if let Some(pointer) = shape.pod_template() {
        if let Some(template) = object.pointer_mut(pointer) {
            add_labels(&mut template["metadata"], labels);
        }
    }
    if shape == Shape::StatefulSet {
        if let Some(templates) = object
            .pointer_mut("/spec/volumeClaimTemplates")
            .and_then(Value::as_array_mut)
        {
            for template in templates {
                add_labels(&mut template["metadata"], labels);
            }
        }
    }
}

fn add_labels(metadata: &mut Value, labels: &BTreeMap<String, String>) {
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    if !metadata["labels"].is_object() {
        metadata["labels"] = Value::Object(Map::new());
    }
    if let Some(map) = metadata["labels"].as_object_mut() {
        for (k, v) in labels {
            map.insert(k.clone(), Value::String(v.clone()));
        }
    }
}

/// Inputs of [`merge`] besides the two objects.
#[derive(Debug, Default)]
pub struct MergeOptions<'a> {
    pub force_overwrite_labels: bool,
    pub force_overwrite_annotations: bool,
    /// Labels the object was last applied with
    pub old_labels: Option<&'a BTreeMap<String, String>>,
    /// Annotations the object was last applied with
    pub old_annotations: Option<&'a BTreeMap<String, String>>,
    pub preserve_replicas: bool,
    pub preserve_resources: bool,
}

/// Compute the object to write given the desired and the live state.
pub fn merge(desired: &Value, live: &Value, shape: Shape, opts: &MergeOptions<'_>) -> Value {
    let mut merged = desired.clone();

    let mut metadata = live["metadata"].clone();
    metadata["labels"] = merge_maps(
        &desired["metadata"]["labels"],
        &live["metadata"]["labels"],
        opts.old_labels,
        opts.force_overwrite_labels,
    );
    metadata["annotations"] = merge_maps(
        &desired["metadata"]["annotations"],
        &live["metadata"]["annotations"],
        opts.old_annotations,
        opts.force_overwrite_annotations,
    );
    merged["metadata"] = metadata;

    if shape.has_replicas() {
        let desired_replicas = desired.pointer("/spec/replicas");
        if opts.preserve_replicas || desired_replicas.is_none() {
            copy_pointer(live, &mut merged, "/spec", "replicas");
        }
    }
    if opts.preserve_resources {
        if let Some(pointer) = shape.pod_template() {
            preserve_container_resources(live, &mut merged, pointer);
        }
    }

    match shape {
        Shape::StatefulSet => {
            // volumeClaimTemplates are immutable
            copy_pointer(live, &mut merged, "/spec", "volumeClaimTemplates");
        }
        Shape::Job => {
            copy_pointer(live, &mut merged, "/spec", "selector");
            if let Some(labels) = live.pointer("/spec/template/metadata/labels") {
                merged["spec"]["template"]["metadata"]["labels"] = labels.clone();
            }
        }
        Shape::Service => merge_service(live, &mut merged),
        Shape::ServiceAccount => {
            if desired.get("secrets").is_none() {
                if let Some(secrets) = live.get("secrets") {
                    merged["secrets"] = secrets.clone();
                }
            }
        }
        _ => {}
    }

    match live.get("status") {
        Some(status) => merged["status"] = status.clone(),
        None => {
            if let Some(map) = merged.as_object_mut() {
                map.remove("status");
            }
        }
    }

    strip_nulls(&mut merged);
    merged
}

/// Merge a desired map onto the current one.
///
/// With `force` the desired map replaces the current one. Otherwise keys of
/// the current map survive unless they were applied last time (listed in
/// `old`) and are no longer desired.
fn merge_maps(desired: &Value, current: &Value, old: Option<&BTreeMap<String, String>>, force: bool) -> Value {
    let desired = desired.as_object().cloned().unwrap_or_default();
    if force {
        return if desired.is_empty() { Value::Null } else { Value::Object(desired) };
    }

    let mut result = current.as_object().cloned().unwrap_or_default();
    if let Some(old) = old {
        for key in old.keys() {
            if !desired.contains_key(key) {
                result.remove(key);
            }
        }
    }
    for (k, v) in desired {
        result.insert(k, v);
    }
    if result.is_empty() {
        Value::Null
    } else {
        Value::Object(result)
    }
}

fn copy_pointer(from: &Value, to: &mut Value, parent: &str, field: &str) {
    let Some(value) = from.pointer(parent).and_then(|p| p.get(field)) else {
        return;
    };
    if let Some(target) = to.pointer_mut(parent).and_then(Value::as_object_mut) {
        target.insert(field.to_string(), value.clone());
    }
}

fn preserve_container_resources(live: &Value, merged: &mut Value, template: &str) {
    for list in ["containers", "initContainers"] {
        let pointer = format!("{}/spec/{}", template, list);
        let Some(live_containers) = live.pointer(&pointer).and_then(Value::as_array) else {
            continue;
        };
        let Some(containers) = merged.pointer_mut(&pointer).and_then(Value::as_array_mut) else {
            continue;
        };
        for container in containers.iter_mut() {
            let live_resources = live_containers
                .iter()
                .find(|c| c["name"] == container["name"])
                .and_then(|c| c.get("resources"));
            if let Some(resources) = live_resources {
                container["resources"] = resources.clone();
            }
        }
    }
}

fn merge_service(live: &Value, merged: &mut Value) {
    let service_type = merged
        .pointer("/spec/type")
        .and_then(Value::as_str)
        .unwrap_or("ClusterIP")
        .to_string();

    if service_type != "ExternalName" {
        for field in ["clusterIP", "clusterIPs"] {
            if merged.pointer(&format!("/spec/{}", field)).is_none() {
                copy_pointer(live, merged, "/spec", field);
            }
        }
    }

    if service_type == "NodePort" || service_type == "LoadBalancer" {
        let live_ports = live.pointer("/spec/ports").and_then(Value::as_array).cloned().unwrap_or_default();
        if let Some(ports) = merged.pointer_mut("/spec/ports").and_then(Value::as_array_mut) {
            for port in ports.iter_mut() {
                if port.get("nodePort").is_some_and(|p| p.as_i64().unwrap_or(0) != 0) {
                    continue;
                }
                let protocol = |p: &Value| p["protocol"].as_str().unwrap_or("TCP").to_string();
                let live_port = live_ports
                    .iter()
                    .find(|lp| lp["port"] == port["port"] && protocol(lp) == protocol(port));
                if let Some(node_port) = live_port.and_then(|lp| lp.get("nodePort")) {
                    port["nodePort"] = node_port.clone();
                }
            }
        }
    }

    if service_type == "LoadBalancer" && merged.pointer("/spec/healthCheckNodePort").is_none() {
        copy_pointer(live, merged, "/spec", "healthCheckNodePort");
    }
}

/// Remove null members, as the API server does on write.
pub fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

/// Whether the desired object asks for preservation of a field regardless of autoscalers.
pub fn annotated(desired: &Value, annotation: &str) -> bool {
    desired["metadata"]["annotations"][annotation].as_str() == Some("true")
}

/// Stamp the origin and description annotations onto a desired object.
pub fn stamp_origin(desired: &mut Value, origin: &str) {
    let metadata = &mut desired["metadata"];
    if !metadata["annotations"].is_object() {
        metadata["annotations"] = Value::Object(Map::new());
    }
    if let Some(map) = metadata["annotations"].as_object_mut() {
        map.insert(annotations::ORIGIN.to_string(), Value::String(origin.to_string()));
        map.insert(
            annotations::DESCRIPTION.to_string(),
            Value::String(annotations::DESCRIPTION_VALUE.to_string()),
        );
    }
}
