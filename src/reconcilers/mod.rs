// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Controller runtime wiring.
//!
//! Every reconciler of the crate is driven by a `kube::runtime::Controller`
//! through [`run`]. Failed reconciliations are requeued with a per-object
//! exponential backoff that never exceeds the controller's sync period.

use crate::backupbucket::BackupBucketReconciler;
use crate::config::ControllerConfig;
use crate::controllerinstallation::ControllerInstallationCareReconciler;
use crate::error::{GardenerError, Result};
use crate::managedresource::{HealthReconciler, ManagedResourceReconciler};
use crate::retry::RetryConfig;
use crate::seed::care::SeedCareReconciler;
use crate::seed::SeedReconciler;
use crate::shoot::ShootReconciler;
use crate::types::{BackupBucket, ControllerInstallation, ManagedResource, Seed, Shoot};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use kube::runtime::controller::{self, Action};
use kube::runtime::Controller;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::watcher::Config as WatcherConfig;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// A reconciler for objects of kind `K`.
#[async_trait]
pub trait Reconcile<K>: Send + Sync {
    async fn reconcile(&self, obj: &K) -> Result<Action>;
}

struct Context<R> {
    name: &'static str,
    reconciler: R,
    backoff: RetryConfig,
    /// Consecutive failures per object key
    failures: DashMap<String, u32>,
}

fn key<K: Resource>(obj: &K) -> String {
    match obj.meta().namespace.as_deref() {
        Some(ns) => format!("{}/{}", ns, obj.name_any()),
        None => obj.name_any(),
    }
}

impl<R> Context<R> {
    fn new(name: &'static str, reconciler: R, sync_period: Duration) -> Self {
        Self {
            name,
            reconciler,
            backoff: RetryConfig {
                max_attempts: 0,
                initial_delay: INITIAL_BACKOFF.min(sync_period),
                max_delay: sync_period,
                backoff_multiplier: 2.0,
            },
            failures: DashMap::new(),
        }
    }

    /// Delay before the next attempt for an object that just failed.
    fn requeue_after(&self, key: String, error: &GardenerError) -> Duration {
        if let GardenerError::DeletionPending { requeue_after, .. } = error {
            return *requeue_after;
        }
        let mut failures = self.failures.entry(key).or_insert(0);
        *failures = failures.saturating_add(1);
        self.backoff.backoff(*failures)
    }
}

async fn reconcile<K, R>(obj: Arc<K>, ctx: Arc<Context<R>>) -> Result<Action>
where
    K: Resource + Send + Sync,
    R: Reconcile<K>,
{
    let action = ctx.reconciler.reconcile(&obj).await?;
    ctx.failures.remove(&key(obj.as_ref()));
    Ok(action)
}

fn error_policy<K, R>(obj: Arc<K>, error: &GardenerError, ctx: Arc<Context<R>>) -> Action
where
    K: Resource,
{
    let key = key(obj.as_ref());
    let delay = ctx.requeue_after(key.clone(), error);
    match error {
        GardenerError::DeletionPending { .. } | GardenerError::StillReferenced(_) => {
            info!(controller = ctx.name, object = %key, error = %error, "Waiting before retry")
        }
        _ => error!(controller = ctx.name, object = %key, error = %error, "Reconciliation failed"),
    }
    Action::requeue(delay)
}

/// Run `reconciler` for every object `api` and `watcher_config` select until
/// the process receives a shutdown signal.
pub async fn run<K, R>(
    name: &'static str,
    api: Api<K>,
    watcher_config: WatcherConfig,
    reconciler: R,
    config: &ControllerConfig,
) -> anyhow::Result<()>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R: Reconcile<K> + 'static,
{
    info!(
        controller = name,
        concurrent_syncs = config.concurrent_syncs,
        sync_period = ?config.sync_period,
        "Starting controller"
    );
    let context = Arc::new(Context::new(name, reconciler, config.sync_period));

    Controller::new(api, watcher_config)
        .with_config(controller::Config::default().concurrency(config.concurrent_syncs))
        .shutdown_on_signal()
        .run(reconcile::<K, R>, error_policy::<K, R>, context)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(controller = name, object = %obj.name, "Reconciled"),
                Err(e) => warn!(controller = name, error = %e, "Controller error"),
            }
        })
        .await;

    info!(controller = name, "Controller stopped");
    Ok(())
}

#[async_trait]
impl Reconcile<ManagedResource> for ManagedResourceReconciler {
    async fn reconcile(&self, mr: &ManagedResource) -> Result<Action> {
        ManagedResourceReconciler::reconcile(self, mr).await
    }
}

#[async_trait]
impl Reconcile<ManagedResource> for HealthReconciler {
    async fn reconcile(&self, mr: &ManagedResource) -> Result<Action> {
        HealthReconciler::reconcile(self, mr).await
    }
}

#[async_trait]
impl Reconcile<Seed> for SeedReconciler {
    async fn reconcile(&self, seed: &Seed) -> Result<Action> {
        SeedReconciler::reconcile(self, seed).await
    }
}

#[async_trait]
impl Reconcile<Seed> for SeedCareReconciler {
    async fn reconcile(&self, seed: &Seed) -> Result<Action> {
        SeedCareReconciler::reconcile(self, seed).await
    }
}

#[async_trait]
impl Reconcile<Shoot> for ShootReconciler {
    async fn reconcile(&self, shoot: &Shoot) -> Result<Action> {
        ShootReconciler::reconcile(self, shoot).await
    }
}

#[async_trait]
impl Reconcile<BackupBucket> for BackupBucketReconciler {
    async fn reconcile(&self, bucket: &BackupBucket) -> Result<Action> {
        BackupBucketReconciler::reconcile(self, bucket).await
    }
}

#[async_trait]
impl Reconcile<ControllerInstallation> for ControllerInstallationCareReconciler {
    async fn reconcile(&self, installation: &ControllerInstallation) -> Result<Action> {
        ControllerInstallationCareReconciler::reconcile(self, installation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Reconcile<ConfigMap> for Flaky {
        async fn reconcile(&self, _obj: &ConfigMap) -> Result<Action> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(GardenerError::Timeout("not ready".to_string())),
                _ => Ok(Action::await_change()),
            }
        }
    }

    fn config_map(name: &str) -> Arc<ConfigMap> {
        Arc::new(ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("garden".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn context() -> Arc<Context<Flaky>> {
        Arc::new(Context::new(
            "test",
            Flaky {
                calls: AtomicU32::new(0),
            },
            Duration::from_secs(3),
        ))
    }

    #[test]
    fn test_backoff_grows_up_to_sync_period() {
        let ctx = context();
        let obj = config_map("a");
        let error = GardenerError::Timeout("not ready".to_string());
        let delays: Vec<Action> = (0..4).map(|_| error_policy(obj.clone(), &error, ctx.clone())).collect();
        assert_eq!(
            delays,
            vec![
                Action::requeue(Duration::from_secs(1)),
                Action::requeue(Duration::from_secs(2)),
                Action::requeue(Duration::from_secs(3)),
                Action::requeue(Duration::from_secs(3)),
            ]
        );
        // other objects have their own budget
        assert_eq!(
            error_policy(config_map("b"), &error, ctx),
            Action::requeue(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_pending_deletion_uses_its_own_interval() {
        let ctx = context();
        let error = GardenerError::DeletionPending {
            count: 2,
            requeue_after: Duration::from_secs(5),
        };
        assert_eq!(
            error_policy(config_map("a"), &error, ctx.clone()),
            Action::requeue(Duration::from_secs(5))
        );
        assert!(ctx.failures.is_empty());
    }

    #[tokio::test]
    async fn test_success_resets_backoff() {
        let ctx = context();
        let obj = config_map("a");
        for _ in 0..2 {
            let error = reconcile(obj.clone(), ctx.clone()).await.unwrap_err();
            error_policy(obj.clone(), &error, ctx.clone());
        }
        assert_eq!(ctx.failures.get("garden/a").map(|f| *f), Some(2));

        let action = reconcile(obj.clone(), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(ctx.failures.get("garden/a").is_none());
    }
}
