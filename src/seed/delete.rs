// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use super::components::{self as seed_components, *};
use super::{SeedReconciler, STILL_REFERENCED};
use crate::components::{destroy_and_wait, Components};
use crate::constants::{finalizers, names};
use crate::error::{GardenerError, Result};
use crate::events::{actions, object_ref, reasons};
use crate::flow::{Flow, Graph, RunOptions, Task, TaskFn, TaskId};
use crate::kubernetes::{has_finalizer, remove_finalizer, typed, ClusterClient};
use crate::types::{BackupBucket, ControllerInstallation, Seed, Shoot};
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

struct Teardown {
    garden: Arc<dyn ClusterClient>,
    client: Arc<dyn ClusterClient>,
    seed: Seed,
    components: Components,
}

impl Teardown {
    async fn destroy(&self, name: &str) -> Result<()> {
        let component = self
            .components
            .get(name)
            .ok_or_else(|| GardenerError::UnknownResource(format!("seed component {}", name)))?;
        destroy_and_wait(component.as_ref()).await
    }

    /// Extensions must be uninstalled by the ControllerInstallation controller
    /// before druid goes away, otherwise their etcds are orphaned.
    async fn ensure_no_controller_installations(&self) -> Result<()> {
        let seed_name = self.seed.name_any();
        let remaining: Vec<String> = typed::list::<ControllerInstallation>(self.garden.as_ref(), None, None)
            .await?
            .into_iter()
            .filter(|ci| ci.spec.seed_ref.name == seed_name)
            .map(|ci| ci.name_any())
            .collect();
        if remaining.is_empty() {
            return Ok(());
        }
        Err(GardenerError::StillReferenced(format!(
            "controller installations are still present on seed {}: {}",
            seed_name,
            remaining.join(", ")
        )))
    }

    async fn destroy_system_resources(&self) -> Result<()> {
        self.destroy(SYSTEM).await?;
        for name in [
            self.seed.monitoring_secret_name(),
            seed_components::dns_secret_name(&self.seed),
        ] {
            typed::delete::<Secret>(self.client.as_ref(), Some(names::GARDEN_NAMESPACE), &name).await?;
        }
        Ok(())
    }
}

fn flow(state: &Arc<Teardown>, managed_istio: bool, timeout: Duration) -> Result<Flow> {
    let destroy = |name: &'static str| {
        TaskFn::bound(state, move |s| async move { s.destroy(name).await }).timeout(timeout)
    };

    let mut graph = Graph::new("seed deletion");
    let dns_record = graph.add(Task::new("destroy-dns-record", destroy(DNS_RECORD)));
    let no_installations = graph.add(
        Task::new(
            "ensure-no-controller-installations",
            TaskFn::bound(state, |s| async move { s.ensure_no_controller_installations().await }).timeout(timeout),
        )
        .depends_on([dns_record]),
    );
    let etcd_druid = graph.add(Task::new("destroy-etcd-druid", destroy(ETCD_DRUID)).depends_on([no_installations]));

    let mut all: Vec<TaskId> = vec![dns_record, no_installations, etcd_druid];
    for name in [
        CLUSTER_IDENTITY,
        CLUSTER_AUTOSCALER,
        SEED_ADMISSION_CONTROLLER,
        NGINX_INGRESS,
        KUBE_SCHEDULER,
        NETWORK_POLICIES,
        DWD_ENDPOINT,
        DWD_PROBE,
        HVPA,
        VPA,
        KUBE_STATE_METRICS,
        VPN_AUTHZ_SERVER,
    ] {
        all.push(graph.add(Task::new(format!("destroy-{}", name), destroy(name))));
    }
    let istio = graph.add(Task::new("destroy-istio", destroy(ISTIO)).do_if(managed_istio));
    all.push(graph.add(
        Task::new("destroy-istio-crds", destroy(ISTIO_CRDS))
            .depends_on([istio])
            .do_if(managed_istio),
    ));

    let cleaned_up = graph.add(Task::sync_point("seed-cleaned-up").depends_on(all));
    let system_resources = graph.add(
        Task::new(
            "destroy-system-resources",
            TaskFn::bound(state, |s| async move { s.destroy_system_resources().await }).timeout(timeout),
        )
        .depends_on([cleaned_up]),
    );
    graph.add(Task::new("destroy-resource-manager", destroy(RESOURCE_MANAGER)).depends_on([system_resources]));
    Ok(graph.compile()?)
}

impl SeedReconciler {
    async fn bound_shoots(&self, seed: &str) -> Result<Vec<String>> {
        let mut shoots: Vec<String> = typed::list::<Shoot>(self.garden.as_ref(), None, None)
            .await?
            .into_iter()
            .filter(|shoot| shoot.seed_name() == Some(seed) || shoot.status.as_ref().and_then(|s| s.seed_name.as_deref()) == Some(seed))
            .map(|shoot| format!("{}/{}", shoot.namespace().unwrap_or_default(), shoot.name_any()))
            .collect();
        shoots.sort();
        Ok(shoots)
    }

    async fn bound_backup_buckets(&self, seed: &str) -> Result<Vec<String>> {
        let mut buckets: Vec<String> = typed::list::<BackupBucket>(self.garden.as_ref(), None, None)
            .await?
            .into_iter()
            .filter(|bucket| bucket.seed_name() == Some(seed))
            .map(|bucket| bucket.name_any())
            .collect();
        buckets.sort();
        Ok(buckets)
    }

    async fn referenced(&self, seed: &Seed, kind: &str, names: &[String]) -> GardenerError {
        let message = format!(
            "Cannot delete Seed, because the following {} are still referencing it: {}",
            kind,
            names.join(", ")
        );
        info!("{}", message);
        self.events
            .publish(
                &object_ref(seed),
                EventType::Normal,
                reasons::RESOURCE_REFERENCED,
                actions::DELETE,
                Some(message),
            )
            .await;
        GardenerError::StillReferenced(STILL_REFERENCED.to_string())
    }

    #[instrument(skip(self, seed), fields(seed = %seed.name_any()))]
    pub(super) async fn delete(&self, seed: &Seed) -> Result<Action> {
        if !has_finalizer(seed.meta(), finalizers::GARDENER) {
            return Ok(Action::await_change());
        }
        let name = seed.name_any();

        let shoots = self.bound_shoots(&name).await?;
        if !shoots.is_empty() {
            return Err(self.referenced(seed, "Shoots", &shoots).await);
        }

        if seed.backup_enabled() && typed::delete::<BackupBucket>(self.garden.as_ref(), None, &seed.backup_bucket_name()).await? {
            info!(bucket = %seed.backup_bucket_name(), "Requested deletion of the seed's backup bucket");
        }
        let buckets = self.bound_backup_buckets(&name).await?;
        if !buckets.is_empty() {
            return Err(self.referenced(seed, "BackupBuckets", &buckets).await);
        }

        let identity = self.cluster_identity(seed).await?;
        let state = Arc::new(Teardown {
            garden: self.garden.clone(),
            client: self.seed.clone(),
            seed: seed.clone(),
            components: seed_components::build(self.seed.clone(), seed, &identity, self.timeouts)?,
        });
        let timeout = self.timeouts.timeout * 2 + Duration::from_secs(30);
        if let Err(e) = flow(&state, self.feature_gates.managed_istio, timeout)?
            .run(RunOptions::default())
            .await
        {
            warn!(error = %e, "Seed deletion failed");
            self.events
                .publish(
                    &object_ref(seed),
                    EventType::Warning,
                    reasons::DELETE_ERROR,
                    actions::DELETE,
                    Some(e.to_string()),
                )
                .await;
            return Err(e.into());
        }

        remove_finalizer(self.garden.as_ref(), seed, finalizers::GARDENER).await?;
        self.events
            .publish(
                &object_ref(seed),
                EventType::Normal,
                reasons::DELETED,
                actions::DELETE,
                Some("Seed cluster has been cleaned up".to_string()),
            )
            .await;
        info!("Seed deleted");
        Ok(Action::await_change())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::test_utils::FakeCluster;
    use serde_json::json;

    async fn bootstrapped(env: &Env, spec: serde_json::Value) -> Seed {
        garden_secret(&env.garden, "internal-domain", "internal-domain");
        let seed = create_seed(&env.garden, spec).await;
        let rollout = roll_out_deployments(env.seed.clone());
        env.reconciler.reconcile(&seed).await.unwrap();
        rollout.abort();
        current(&env.garden).await
    }

    async fn mark_deleted(garden: &FakeCluster) -> Seed {
        typed::delete::<Seed>(garden, None, SEED).await.unwrap();
        current(garden).await
    }

    fn shoot(garden: &FakeCluster, seed: &str) {
        garden.insert(json!({
            "apiVersion": "core.gardener.cloud/v1beta1",
            "kind": "Shoot",
            "metadata": {"name": "web", "namespace": "garden-dev"},
            "spec": {
                "cloudProfileName": "local",
                "region": "eu-1",
                "seedName": seed,
                "provider": {"type": "local"},
                "kubernetes": {"version": "1.30.1"}
            }
        }));
    }

    fn spec() -> serde_json::Value {
        json!({"provider": {"type": "local", "region": "eu-1"}})
    }

    #[tokio::test]
    async fn test_delete_blocked_by_shoot() {
        let env = env();
        bootstrapped(&env, spec()).await;
        shoot(&env.garden, SEED);
        let seed = mark_deleted(&env.garden).await;
        env.seed.clear_calls();

        let err = env.reconciler.reconcile(&seed).await.unwrap_err();
        assert_eq!(err.to_string(), "seed still has references");

        let events = env.events.events();
        let referenced = events.iter().find(|e| e.reason == "ResourceReferenced").unwrap();
        assert!(referenced.note.as_deref().unwrap().contains("garden-dev/web"));
        assert!(env.seed.calls_of("delete", "ManagedResource").is_empty());
        assert!(has_finalizer(current(&env.garden).await.meta(), finalizers::GARDENER));

        env.garden.remove("core.gardener.cloud/v1beta1", "Shoot", "garden-dev", "web");
        let seed = current(&env.garden).await;
        env.reconciler.reconcile(&seed).await.unwrap();

        assert!(!env.garden.exists("core.gardener.cloud/v1beta1", "Seed", "", SEED));
        assert!(env.seed.objects_of("resources.gardener.cloud", "ManagedResource").is_empty());
        assert!(env.seed.objects_of("apps", "Deployment").is_empty());
        assert_eq!(env.events.reasons().last().map(String::as_str), Some("Deleted"));
    }

    #[tokio::test]
    async fn test_delete_waits_for_backup_buckets() {
        let env = env();
        let mut spec = spec();
        spec["backup"] = json!({"provider": "local", "secretRef": {"name": "backup", "namespace": "garden"}});
        let seed = bootstrapped(&env, spec).await;
        let bucket_name = seed.backup_bucket_name();

        // the BackupBucket controller still holds its finalizer
        let mut bucket = env
            .garden
            .object("core.gardener.cloud/v1beta1", "BackupBucket", "", &bucket_name)
            .unwrap();
        bucket["metadata"]["finalizers"] = json!(["gardener"]);
        env.garden.insert(bucket);

        let seed = mark_deleted(&env.garden).await;
        let err = env.reconciler.reconcile(&seed).await.unwrap_err();
        assert!(matches!(err, GardenerError::StillReferenced(_)));
        let bucket = typed::get_required::<BackupBucket>(env.garden.as_ref(), None, &bucket_name)
            .await
            .unwrap();
        assert!(bucket.meta().deletion_timestamp.is_some());
        assert!(has_finalizer(current(&env.garden).await.meta(), finalizers::GARDENER));

        env.garden.remove("core.gardener.cloud/v1beta1", "BackupBucket", "", &bucket_name);
        let seed = current(&env.garden).await;
        env.reconciler.reconcile(&seed).await.unwrap();
        assert!(!env.garden.exists("core.gardener.cloud/v1beta1", "Seed", "", SEED));
    }

    #[tokio::test]
    async fn test_delete_blocked_by_controller_installation() {
        let env = env();
        bootstrapped(&env, spec()).await;
        env.garden.insert(json!({
            "apiVersion": "core.gardener.cloud/v1beta1",
            "kind": "ControllerInstallation",
            "metadata": {"name": "provider-local"},
            "spec": {"registrationRef": {"name": "provider-local"}, "seedRef": {"name": SEED}}
        }));
        let seed = mark_deleted(&env.garden).await;

        let err = env.reconciler.reconcile(&seed).await.unwrap_err();
        let GardenerError::Flow(flow) = err else {
            panic!("expected a flow error");
        };
        assert_eq!(flow.failed_tasks().collect::<Vec<_>>(), vec!["ensure-no-controller-installations"]);
        // druid stays, everything independent of it is gone
        assert!(env.seed.exists("resources.gardener.cloud/v1alpha1", "ManagedResource", "garden", "etcd-druid"));
        assert!(!env.seed.exists("resources.gardener.cloud/v1alpha1", "ManagedResource", "garden", "vpa"));
        assert!(has_finalizer(current(&env.garden).await.meta(), finalizers::GARDENER));
        assert_eq!(env.events.reasons().last().map(String::as_str), Some("DeleteError"));
    }
}
