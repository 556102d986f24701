// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes Event recording.
//!
//! Events are fire-and-forget: a failed publish is logged and never fails a
//! reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publishes through `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, regarding).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _regarding: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Reference to a typed object for use as the `regarding` of an event.
pub fn object_ref<K>(obj: &K) -> ObjectReference
where
    K: Resource<DynamicType = ()>,
{
    obj.object_ref(&())
}

/// Event reasons, shown in the REASON column of `kubectl get events`.
pub mod reasons {
    pub const RECONCILE_ERROR: &str = "ReconcileError";
    pub const DELETE_ERROR: &str = "DeleteError";
    pub const RESOURCE_REFERENCED: &str = "ResourceReferenced";
    pub const RECONCILED: &str = "Reconciled";
    pub const DELETED: &str = "Deleted";
    pub const SCHEDULING_PENDING: &str = "SchedulingPending";
}

pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const DELETE: &str = "Delete";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingEventPublisher;

    #[tokio::test]
    async fn test_noop_publisher_does_not_panic() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Normal,
                reasons::RECONCILED,
                actions::RECONCILE,
                None,
            )
            .await;
    }

    #[tokio::test]
    async fn test_recording_publisher() {
        let recorder = RecordingEventPublisher::default();
        let regarding = ObjectReference {
            kind: Some("Seed".to_string()),
            name: Some("seed-a".to_string()),
            ..Default::default()
        };
        recorder
            .publish(
                &regarding,
                EventType::Warning,
                reasons::RESOURCE_REFERENCED,
                actions::DELETE,
                Some("shoot dev/web".to_string()),
            )
            .await;

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "ResourceReferenced");
        assert_eq!(events[0].name, "seed-a");
        assert!(events[0].warning);
    }
}
