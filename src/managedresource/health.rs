// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Health and rollout checks of applied objects.

use serde_json::Value;

fn condition<'a>(obj: &'a Value, condition_type: &str) -> Option<&'a Value> {
    obj.pointer("/status/conditions")
        .and_then(Value::as_array)?
        .iter()
        .find(|c| c["type"] == condition_type)
}

fn condition_status<'a>(obj: &'a Value, condition_type: &str) -> Option<&'a str> {
    condition(obj, condition_type).and_then(|c| c["status"].as_str())
}

fn int(obj: &Value, pointer: &str) -> i64 {
    obj.pointer(pointer).and_then(Value::as_i64).unwrap_or(0)
}

fn check_observed_generation(obj: &Value) -> Result<(), String> {
    let generation = int(obj, "/metadata/generation");
    let observed = int(obj, "/status/observedGeneration");
    if observed < generation {
        return Err(format!(
            "observed generation outdated ({}/{})",
            observed, generation
        ));
    }
    Ok(())
}

/// Check whether an object is healthy. Kinds without a known check are healthy.
pub fn check_health(group: &str, kind: &str, obj: &Value) -> Result<(), String> {
    match (group, kind) {
        ("apps" | "extensions", "Deployment") => {
            check_observed_generation(obj)?;
            if condition_status(obj, "Available") != Some("True") {
                let message = condition(obj, "Available")
                    .and_then(|c| c["message"].as_str())
                    .unwrap_or("condition Available is missing");
                return Err(format!("deployment is not available: {}", message));
            }
            if condition(obj, "Progressing").is_some_and(|c| c["reason"] == "ProgressDeadlineExceeded") {
                return Err("deployment exceeded its progress deadline".to_string());
            }
            Ok(())
        }
        ("apps", "StatefulSet") => {
            check_observed_generation(obj)?;
            let replicas = obj.pointer("/spec/replicas").and_then(Value::as_i64).unwrap_or(1);
            let ready = int(obj, "/status/readyReplicas");
            if ready < replicas {
                return Err(format!("not enough ready replicas ({}/{})", ready, replicas));
            }
            Ok(())
        }
        ("apps" | "extensions", "DaemonSet") => {
            check_observed_generation(obj)?;
            let desired = int(obj, "/status/desiredNumberScheduled");
            let scheduled = int(obj, "/status/currentNumberScheduled");
            let misscheduled = int(obj, "/status/numberMisscheduled");
            let unavailable = int(obj, "/status/numberUnavailable");
            if scheduled < desired {
                return Err(format!("not enough scheduled pods ({}/{})", scheduled, desired));
            }
            if misscheduled > 0 {
                return Err(format!("{} misscheduled pod(s)", misscheduled));
            }
            if unavailable > 0 {
                return Err(format!("{} unavailable pod(s)", unavailable));
            }
            Ok(())
        }
        ("batch", "Job") => {
            if condition_status(obj, "Failed") == Some("True") {
                let message = condition(obj, "Failed")
                    .and_then(|c| c["message"].as_str())
                    .unwrap_or_default();
                return Err(format!("job failed: {}", message));
            }
            Ok(())
        }
        ("apiextensions.k8s.io", "CustomResourceDefinition") => {
            if condition_status(obj, "NamesAccepted") == Some("False") {
                return Err("names of the CRD are not accepted".to_string());
            }
            if condition_status(obj, "Established") != Some("True") {
                return Err("CRD is not established".to_string());
            }
            Ok(())
        }
        ("", "Pod") => match obj.pointer("/status/phase").and_then(Value::as_str) {
            Some("Running") | Some("Succeeded") => Ok(()),
            phase => Err(format!("pod is in phase {}", phase.unwrap_or("Unknown"))),
        },
        _ => Ok(()),
    }
}

/// Check whether a rollout of the object is still in progress.
pub fn check_progressing(group: &str, kind: &str, obj: &Value) -> Result<(), String> {
    match (group, kind) {
        ("apps" | "extensions", "Deployment") => {
            check_observed_generation(obj)?;
            let replicas = obj.pointer("/spec/replicas").and_then(Value::as_i64).unwrap_or(1);
            let updated = int(obj, "/status/updatedReplicas");
            let current = int(obj, "/status/replicas");
            let available = int(obj, "/status/availableReplicas");
            if updated < replicas {
                return Err(format!("{} of {} replica(s) have been updated", updated, replicas));
            }
            if current > updated {
                return Err(format!("{} old replica(s) are pending termination", current - updated));
            }
            if available < updated {
                return Err(format!("{} of {} updated replica(s) are available", available, updated));
            }
            Ok(())
        }
        ("apps", "StatefulSet") => {
            check_observed_generation(obj)?;
            let replicas = obj.pointer("/spec/replicas").and_then(Value::as_i64).unwrap_or(1);
            let updated = int(obj, "/status/updatedReplicas");
            if updated < replicas {
                return Err(format!("{} of {} replica(s) have been updated", updated, replicas));
            }
            let current = obj.pointer("/status/currentRevision");
            let update = obj.pointer("/status/updateRevision");
            if update.is_some() && current != update {
                return Err("update revision has not been rolled out yet".to_string());
            }
            Ok(())
        }
        ("apps" | "extensions", "DaemonSet") => {
            check_observed_generation(obj)?;
            let desired = int(obj, "/status/desiredNumberScheduled");
            let updated = int(obj, "/status/updatedNumberScheduled");
            if updated < desired {
                return Err(format!("{} of {} pod(s) have been updated", updated, desired));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
