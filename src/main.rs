// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Api;
use kube_runtime::watcher::Config as WatcherConfig;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use gardener_core::authorizer::{maintain, Graph};
use gardener_core::backupbucket::{BackupBucketReconciler, ExtensionActuator};
use gardener_core::config::{Config, ControllerConfig};
use gardener_core::constants::OPERATOR_NAME;
use gardener_core::controllerinstallation::ControllerInstallationCareReconciler;
use gardener_core::events::{EventPublisher, KubeEventPublisher};
use gardener_core::kubernetes::{create_client, wait_for_crds, ClusterClient, KubeClusterClient};
use gardener_core::managedresource::{HealthReconciler, ManagedResourceReconciler};
use gardener_core::reconcilers::run;
use gardener_core::seed::care::SeedCareReconciler;
use gardener_core::seed::SeedReconciler;
use gardener_core::shoot::ShootReconciler;
use gardener_core::telemetry;
use gardener_core::types::{BackupBucket, ControllerInstallation, ManagedResource, Seed, Shoot};
use kube::core::GroupVersionKind;

/// Controller toggles the configuration accepts but this binary does not serve.
const UNSERVED: &[&str] = &[
    "kubeletCSRApprover",
    "garbageCollector",
    "rootCAPublisher",
    "secret",
    "tokenInvalidator",
    "tokenRequestor",
];

/// Run `controller` only if it is enabled.
async fn when_enabled<F>(config: &ControllerConfig, controller: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    if config.enabled {
        controller.await
    } else {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    telemetry::init(&config.log_level, config.log_format)?;

    info!("Starting gardener-core");
    for (name, _) in config.controllers.enabled_controllers() {
        if UNSERVED.contains(&name) {
            warn!(controller = name, "Controller is enabled but not served by this binary");
        }
    }

    let source_client = create_client(&config.source_client_connection).await?;
    let target_client = match config.target_client_connection.as_ref() {
        Some(connection) => create_client(connection).await?,
        None => source_client.clone(),
    };
    let source: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(source_client.clone()));
    let target: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(target_client.clone()));
    info!("Connected to source and target clusters");

    wait_for_crds(
        source.as_ref(),
        &[GroupVersionKind::gvk("resources.gardener.cloud", "v1alpha1", "ManagedResource")],
    )
    .await?;

    let events: Arc<dyn EventPublisher> = Arc::new(KubeEventPublisher::new(source_client.clone(), OPERATOR_NAME));
    let feature_gates = config.feature_gates();
    let controllers = &config.controllers;
    let seed_name = config.seed.as_ref().map(|s| s.name.clone()).unwrap_or_default();
    let has_seed = !seed_name.is_empty();
    if !has_seed {
        warn!("No seed configured, seed, shoot and backup bucket controllers stay idle");
    }
    let seed_controller = move |c: &ControllerConfig| {
        let mut c = c.clone();
        c.enabled &= has_seed;
        c
    };
    let managed_resources = || match config.source_client_connection.namespace.as_deref() {
        Some(ns) => Api::<ManagedResource>::namespaced(source_client.clone(), ns),
        None => Api::<ManagedResource>::all(source_client.clone()),
    };

    let mr_config = controllers.managed_resource.clone();
    let managed_resource = ManagedResourceReconciler::new(
        source.clone(),
        target.clone(),
        events.clone(),
        mr_config.clone(),
        controllers.garbage_collector.enabled,
    );
    let health = HealthReconciler::new(
        source.clone(),
        target.clone(),
        mr_config.class.clone(),
        controllers.health.sync_period,
    );
    let seed = SeedReconciler::new(
        source.clone(),
        target.clone(),
        events.clone(),
        feature_gates,
        controllers.seed.sync_period,
    );
    let seed_care = SeedCareReconciler::new(
        source.clone(),
        target.clone(),
        feature_gates,
        controllers.seed_care.sync_period,
    );
    let shoot = ShootReconciler::new(
        source.clone(),
        target.clone(),
        &seed_name,
        events.clone(),
        controllers.shoot.sync_period,
    );
    let backup_bucket = BackupBucketReconciler::new(
        source.clone(),
        Arc::new(ExtensionActuator::new(source.clone(), target.clone())),
        events.clone(),
        &seed_name,
        controllers.backup_bucket.sync_period,
    );
    let installation_care = ControllerInstallationCareReconciler::new(
        source.clone(),
        target.clone(),
        &seed_name,
        controllers.controller_installation_care.sync_period,
    );

    let seed_config = seed_controller(&controllers.seed);
    let seed_care_config = seed_controller(&controllers.seed_care);
    let shoot_config = seed_controller(&controllers.shoot);
    let backup_bucket_config = seed_controller(&controllers.backup_bucket);
    let installation_care_config = seed_controller(&controllers.controller_installation_care);
    let own_seed = || WatcherConfig::default().fields(&format!("metadata.name={}", seed_name));
    let graph = Arc::new(Graph::new());

    info!("Starting controllers...");
    tokio::try_join!(
        async {
            tokio::select! {
                result = maintain(source_client.clone(), graph.clone()) => result?,
                _ = tokio::signal::ctrl_c() => {}
            }
            Ok::<(), anyhow::Error>(())
        },
        when_enabled(
            &mr_config.common,
            run(
                "managedresource",
                managed_resources(),
                WatcherConfig::default(),
                managed_resource,
                &mr_config.common,
            )
        ),
        when_enabled(
            &controllers.health,
            run(
                "health",
                managed_resources(),
                WatcherConfig::default(),
                health,
                &controllers.health,
            )
        ),
        when_enabled(
            &seed_config,
            run("seed", Api::<Seed>::all(source_client.clone()), own_seed(), seed, &seed_config)
        ),
        when_enabled(
            &seed_care_config,
            run(
                "seed-care",
                Api::<Seed>::all(source_client.clone()),
                own_seed(),
                seed_care,
                &seed_care_config,
            )
        ),
        when_enabled(
            &shoot_config,
            run(
                "shoot",
                Api::<Shoot>::all(source_client.clone()),
                WatcherConfig::default(),
                shoot,
                &shoot_config,
            )
        ),
        when_enabled(
            &backup_bucket_config,
            run(
                "backupbucket",
                Api::<BackupBucket>::all(source_client.clone()),
                WatcherConfig::default(),
                backup_bucket,
                &backup_bucket_config,
            )
        ),
        when_enabled(
            &installation_care_config,
            run(
                "controllerinstallation-care",
                Api::<ControllerInstallation>::all(source_client.clone()),
                WatcherConfig::default(),
                installation_care,
                &installation_care_config,
            )
        ),
    )?;

    warn!("All controllers stopped");
    Ok(())
}
