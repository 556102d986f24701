// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use super::components::{self as seed_components, ALWAYS_DEPLOYED, HVPA, ISTIO, ISTIO_CRDS, NGINX_INGRESS, VPA};
use super::condition_reasons as reason;
use super::SeedReconciler;
use crate::components::{deploy_and_wait, destroy_and_wait, Components, WaitTimeouts};
use crate::config::FeatureGates;
use crate::constants::{labels, names};
use crate::error::{GardenerError, Result};
use crate::events::{actions, object_ref, reasons};
use crate::flow::{Graph, RunOptions, Task, TaskFn, TaskId};
use crate::kubernetes::{ensure_namespace, typed, ClusterClient};
use crate::retry::PollResult;
use crate::secrets::{CertificateConfig, GenerateOptions, RotationStrategy, SecretConfig, SecretsManager};
use crate::types::{
    condition_types, set_condition, BackupBucket, BackupBucketSpec, ConditionStatus, Provider, Seed,
};
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state of one bootstrap run.
struct Bootstrap {
    garden: Arc<dyn ClusterClient>,
    client: Arc<dyn ClusterClient>,
    secrets: Arc<SecretsManager>,
    seed: Seed,
    components: Components,
    monitoring: Option<Secret>,
    timeouts: WaitTimeouts,
}

impl Bootstrap {
    fn component(&self, name: &str) -> Result<Arc<dyn crate::components::DeployWaiter>> {
        self.components
            .get(name)
            .ok_or_else(|| GardenerError::UnknownResource(format!("seed component {}", name)))
    }

    async fn generate_ca(&self) -> Result<()> {
        let config = SecretConfig::Certificate(CertificateConfig::ca(names::CA_SEED, names::CA_SEED));
        self.secrets
            .generate(&config, GenerateOptions::default().rotate(RotationStrategy::KeepOld))
            .await?;
        Ok(())
    }

    async fn label_garden_namespace(&self) -> Result<()> {
        let labels = BTreeMap::from([(labels::ROLE.to_string(), labels::ROLE_GARDEN.to_string())]);
        ensure_namespace(self.client.as_ref(), names::GARDEN_NAMESPACE, labels).await?;
        Ok(())
    }

    async fn copy_secret(&self, source: &Secret, name: &str) -> Result<()> {
        let copy = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(names::GARDEN_NAMESPACE.to_string()),
                ..Default::default()
            },
            data: source.data.clone(),
            type_: source.type_.clone(),
            ..Default::default()
        };
        typed::create_or_update(self.client.as_ref(), &copy, |live| {
            let mut merged = live.clone();
            merged.data = copy.data.clone();
            merged.type_ = copy.type_.clone();
            merged
        })
        .await?;
        Ok(())
    }

    async fn sync_monitoring_secret(&self) -> Result<()> {
        match &self.monitoring {
            Some(source) => self.copy_secret(source, &self.seed.monitoring_secret_name()).await,
            None => {
                debug!("No global monitoring secret found in the garden");
                Ok(())
            }
        }
    }

    async fn deploy(&self, name: &str) -> Result<()> {
        self.component(name)?.deploy().await
    }

    async fn deploy_and_wait(&self, name: &str) -> Result<()> {
        deploy_and_wait(self.component(name)?.as_ref()).await
    }

    async fn destroy_and_wait(&self, name: &str) -> Result<()> {
        destroy_and_wait(self.component(name)?.as_ref()).await
    }

    async fn ingress_address(&self) -> Result<String> {
        let found = parking_lot::Mutex::new(None::<String>);
        let found_ref = &found;
        crate::components::poll("waiting for the ingress load balancer", self.timeouts, || async move {
            let service = match typed::get::<Service>(
                self.client.as_ref(),
                Some(names::GARDEN_NAMESPACE),
                seed_components::NGINX_INGRESS_SERVICE,
            )
            .await
            {
                Ok(service) => service,
                Err(e) => return PollResult::Failed(e),
            };
            let address = service
                .and_then(|s| s.status)
                .and_then(|s| s.load_balancer)
                .and_then(|lb| lb.ingress)
                .and_then(|i| i.into_iter().next())
                .and_then(|i| i.ip.or(i.hostname));
            match address {
                Some(address) => {
                    *found_ref.lock() = Some(address);
                    PollResult::Ready
                }
                None => PollResult::NotReady("load balancer has no address yet".to_string()),
            }
        })
        .await?;
        let address = found.lock().take();
        address.ok_or_else(|| GardenerError::Timeout("ingress load balancer has no address".to_string()))
    }

    async fn deploy_dns_record(&self) -> Result<()> {
        let Some(provider) = self.seed.spec.dns.as_ref().and_then(|d| d.provider.as_ref()) else {
            return Ok(());
        };
        let namespace = if provider.secret_ref.namespace.is_empty() {
            names::GARDEN_NAMESPACE
        } else {
            provider.secret_ref.namespace.as_str()
        };
        let credentials =
            typed::get_required::<Secret>(self.garden.as_ref(), Some(namespace), &provider.secret_ref.name).await?;
        self.copy_secret(&credentials, &seed_components::dns_secret_name(&self.seed)).await?;

        let address = self.ingress_address().await?;
        let record = seed_components::dns_record(
            self.client.clone(),
            &self.seed,
            &provider.provider_type,
            Some(&address),
            self.timeouts,
        );
        deploy_and_wait(&record).await
    }

    async fn reconcile_backup_bucket(&self) -> Result<()> {
        let Some(backup) = &self.seed.spec.backup else {
            return Ok(());
        };
        let bucket = BackupBucket::new(
            &self.seed.backup_bucket_name(),
            BackupBucketSpec {
                provider: Provider {
                    provider_type: backup.provider.clone(),
                    region: backup.region.clone().or_else(|| self.seed.spec.provider.region.clone()),
                    provider_config: None,
                },
                provider_config: backup.provider_config.clone(),
                secret_ref: backup.secret_ref.clone(),
                seed_name: Some(self.seed.name_any()),
            },
        );
        let live = typed::create_or_update(self.garden.as_ref(), &bucket, |live| {
            let mut merged = live.clone();
            merged.spec = bucket.spec.clone();
            merged
        })
        .await?;
        if let Some(last_error) = live.status.as_ref().and_then(|s| s.last_error.as_ref()) {
            return Err(GardenerError::coded(
                last_error.codes.clone(),
                format!("backup bucket reconciliation failed: {}", last_error.description),
            ));
        }
        Ok(())
    }

    async fn cleanup_secrets(&self) -> Result<()> {
        let deleted = self.secrets.cleanup().await?;
        if deleted > 0 {
            info!(deleted, "Removed outdated seed secrets");
        }
        Ok(())
    }
}

fn flow(state: &Arc<Bootstrap>, gates: &FeatureGates) -> Result<crate::flow::Flow> {
    let seed = &state.seed;
    let wait_timeout = state.timeouts.timeout * 2 + API_TIMEOUT;
    let deploy = |name: &'static str| {
        TaskFn::bound(state, move |s| async move { s.deploy(name).await }).timeout(API_TIMEOUT)
    };
    let destroy = |name: &'static str| {
        TaskFn::bound(state, move |s| async move { s.destroy_and_wait(name).await }).timeout(wait_timeout)
    };

    let mut graph = Graph::new("seed bootstrap");
    let ca = graph.add(Task::new(
        "generate-seed-ca",
        TaskFn::bound(state, |s| async move { s.generate_ca().await }).timeout(API_TIMEOUT),
    ));
    let namespace = graph.add(Task::new(
        "label-garden-namespace",
        TaskFn::bound(state, |s| async move { s.label_garden_namespace().await })
            .retry(Duration::from_secs(5), 3)
            .timeout(API_TIMEOUT),
    ));
    let monitoring = graph.add(
        Task::new(
            "sync-monitoring-secret",
            TaskFn::bound(state, |s| async move { s.sync_monitoring_secret().await }).timeout(API_TIMEOUT),
        )
        .depends_on([namespace]),
    );
    let resource_manager = graph.add(
        Task::new(
            "deploy-gardener-resource-manager",
            TaskFn::bound(state, |s| async move { s.deploy_and_wait(seed_components::RESOURCE_MANAGER).await })
                .timeout(wait_timeout),
        )
        .depends_on([ca, namespace]),
    );

    let mut all: Vec<TaskId> = vec![ca, monitoring, resource_manager];
    for &name in ALWAYS_DEPLOYED {
        all.push(graph.add(Task::new(format!("deploy-{}", name), deploy(name)).depends_on([resource_manager])));
    }
    let toggles = [(VPA, seed.vpa_enabled()), (HVPA, gates.hvpa)];
    for (name, enabled) in toggles {
        let task = if enabled {
            Task::new(format!("deploy-{}", name), deploy(name))
        } else {
            Task::new(format!("destroy-{}", name), destroy(name))
        };
        all.push(graph.add(task.depends_on([resource_manager])));
    }

    let ingress = seed.spec.ingress.is_some();
    let nginx_task = if ingress {
        Task::new("deploy-nginx-ingress", deploy(NGINX_INGRESS))
    } else {
        Task::new("destroy-nginx-ingress", destroy(NGINX_INGRESS))
    };
    let nginx = graph.add(nginx_task.depends_on([resource_manager]));
    all.push(nginx);

    let istio_crds = graph.add(
        Task::new("deploy-istio-crds", deploy(ISTIO_CRDS))
            .depends_on([resource_manager])
            .do_if(gates.managed_istio),
    );
    all.push(graph.add(
        Task::new("deploy-istio", deploy(ISTIO))
            .depends_on([istio_crds])
            .do_if(gates.managed_istio),
    ));

    let has_dns_provider = seed.spec.dns.as_ref().is_some_and(|d| d.provider.is_some());
    all.push(graph.add(
        Task::new(
            "deploy-ingress-dns-record",
            TaskFn::bound(state, |s| async move { s.deploy_dns_record().await }).timeout(wait_timeout * 2),
        )
        .depends_on([nginx])
        .do_if(ingress && has_dns_provider),
    ));
    all.push(graph.add(
        Task::new(
            "reconcile-backup-bucket",
            TaskFn::bound(state, |s| async move { s.reconcile_backup_bucket().await }).timeout(API_TIMEOUT),
        )
        .do_if(seed.backup_enabled()),
    ));

    let deployed = graph.add(Task::sync_point("system-components-deployed").depends_on(all));
    graph.add(
        Task::new(
            "cleanup-outdated-secrets",
            TaskFn::bound(state, |s| async move { s.cleanup_secrets().await }).timeout(API_TIMEOUT),
        )
        .depends_on([deployed]),
    );
    Ok(graph.compile()?)
}

impl SeedReconciler {
    pub(super) async fn bootstrap(&self, seed: &Seed) -> Result<Action> {
        let mut conditions = seed.conditions().to_vec();

        let selector = format!("{}={}", labels::ROLE, labels::ROLE_INTERNAL_DOMAIN);
        let internal_domain =
            typed::list::<Secret>(self.garden.as_ref(), Some(names::GARDEN_NAMESPACE), Some(&selector)).await?;
        if internal_domain.is_empty() {
            warn!("Seed cannot be bootstrapped without an internal domain secret");
            if set_condition(
                &mut conditions,
                condition_types::BOOTSTRAPPED,
                ConditionStatus::False,
                reason::GARDEN_SECRETS_ERROR,
                "need an internal domain secret but found none",
                Vec::new(),
            ) {
                self.write_status(seed, &conditions, json!({})).await?;
            }
            return Ok(Action::requeue(self.sync_period));
        }

        let bootstrapped = seed
            .condition(condition_types::BOOTSTRAPPED)
            .is_some_and(|c| c.is_true());
        if !bootstrapped
            && set_condition(
                &mut conditions,
                condition_types::BOOTSTRAPPED,
                ConditionStatus::Progressing,
                reason::BOOTSTRAP_PROGRESSING,
                "Seed cluster is currently being bootstrapped.",
                Vec::new(),
            )
        {
            self.write_status(seed, &conditions, json!({})).await?;
        }

        let identity = self.cluster_identity(seed).await?;
        let selector = format!("{}={}", labels::ROLE, labels::ROLE_GLOBAL_MONITORING);
        let monitoring = typed::list::<Secret>(self.garden.as_ref(), Some(names::GARDEN_NAMESPACE), Some(&selector))
            .await?
            .into_iter()
            .next();

        let state = Arc::new(Bootstrap {
            garden: self.garden.clone(),
            client: self.seed.clone(),
            secrets: self.secrets_manager(),
            seed: seed.clone(),
            components: seed_components::build(self.seed.clone(), seed, &identity, self.timeouts)?,
            monitoring,
            timeouts: self.timeouts,
        });

        match flow(&state, &self.feature_gates)?.run(RunOptions::default()).await {
            Ok(report) => {
                debug!(duration = ?report.duration, "Seed bootstrap flow finished");
                set_condition(
                    &mut conditions,
                    condition_types::BOOTSTRAPPED,
                    ConditionStatus::True,
                    reason::BOOTSTRAPPING_SUCCEEDED,
                    "Seed cluster has been bootstrapped successfully.",
                    Vec::new(),
                );
                if seed.condition(condition_types::SYSTEM_COMPONENTS_HEALTHY).is_none() {
                    set_condition(
                        &mut conditions,
                        condition_types::SYSTEM_COMPONENTS_HEALTHY,
                        ConditionStatus::Progressing,
                        reason::SYSTEM_COMPONENTS_PROGRESSING,
                        "System components are being deployed.",
                        Vec::new(),
                    );
                }
                let extra = json!({
                    "clusterIdentity": identity,
                    "observedGeneration": seed.meta().generation,
                });
                self.write_status(seed, &conditions, extra).await?;
                if !bootstrapped {
                    self.events
                        .publish(
                            &object_ref(seed),
                            EventType::Normal,
                            reasons::RECONCILED,
                            actions::RECONCILE,
                            Some("Seed cluster has been bootstrapped".to_string()),
                        )
                        .await;
                }
                info!("Seed bootstrapped");
                Ok(Action::requeue(self.sync_period))
            }
            Err(e) => {
                warn!(error = %e, "Seed bootstrap failed");
                set_condition(
                    &mut conditions,
                    condition_types::BOOTSTRAPPED,
                    ConditionStatus::False,
                    reason::BOOTSTRAPPING_FAILED,
                    &e.to_string(),
                    e.codes(),
                );
                self.write_status(seed, &conditions, json!({})).await?;
                self.events
                    .publish(
                        &object_ref(seed),
                        EventType::Warning,
                        reasons::RECONCILE_ERROR,
                        actions::RECONCILE,
                        Some(e.to_string()),
                    )
                    .await;
                Err(e.into())
            }
        }
    }
}
