// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use crate::components::{deploy_and_wait, destroy_and_wait, poll, ExtensionComponent, WaitTimeouts};
use crate::constants::labels;
use crate::error::{GardenerError, Result};
use crate::flow::{Flow, Graph, Task, TaskFn};
use crate::kubernetes::{delete_namespace, ensure_namespace, typed, ClusterClient};
use crate::retry::PollResult;
use crate::types::{ExtensionKind, SecretBinding, Shoot};
use futures::future::try_join_all;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const CLOUD_PROVIDER_SECRET: &str = "cloudprovider";
const EXTERNAL_DNS_SECRET: &str = "dnsrecord-external";
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Operations on one shoot's resources in its seed.
pub(super) struct Botanist {
    garden: Arc<dyn ClusterClient>,
    seed: Arc<dyn ClusterClient>,
    shoot: Shoot,
    namespace: String,
    ingress_domain: Option<String>,
    timeouts: WaitTimeouts,
}

impl Botanist {
    pub(super) fn new(
        garden: Arc<dyn ClusterClient>,
        seed: Arc<dyn ClusterClient>,
        shoot: Shoot,
        ingress_domain: Option<String>,
        timeouts: WaitTimeouts,
    ) -> Self {
        Self {
            namespace: shoot.technical_id(),
            garden,
            seed,
            shoot,
            ingress_domain,
            timeouts,
        }
    }

    fn extension(&self, kind: ExtensionKind, name: &str, extension_type: &str) -> ExtensionComponent {
        ExtensionComponent::new(self.seed.clone(), kind, Some(&self.namespace), name, extension_type)
            .with_timeouts(self.timeouts)
    }

    fn secret_ref(&self, name: &str) -> Value {
        json!({"name": name, "namespace": self.namespace})
    }

    fn infrastructure(&self) -> ExtensionComponent {
        let provider = &self.shoot.spec.provider;
        self.extension(ExtensionKind::Infrastructure, &self.shoot.name_any(), &provider.provider_type)
            .with_field("region", json!(self.shoot.spec.region))
            .with_field("providerConfig", json!(provider.infrastructure_config))
            .with_field("secretRef", self.secret_ref(CLOUD_PROVIDER_SECRET))
    }

    fn control_plane(&self, infrastructure_status: Value) -> ExtensionComponent {
        let provider = &self.shoot.spec.provider;
        self.extension(ExtensionKind::ControlPlane, &self.shoot.name_any(), &provider.provider_type)
            .with_field("region", json!(self.shoot.spec.region))
            .with_field("providerConfig", json!(provider.control_plane_config))
            .with_field("infrastructureProviderStatus", infrastructure_status)
            .with_field("secretRef", self.secret_ref(CLOUD_PROVIDER_SECRET))
    }

    fn worker(&self, infrastructure_status: Value) -> ExtensionComponent {
        let provider = &self.shoot.spec.provider;
        let hibernated = self.shoot.hibernation_enabled();
        let pools: Vec<Value> = provider
            .workers
            .iter()
            .map(|w| {
                json!({
                    "name": w.name,
                    "machineType": w.machine.machine_type,
                    "minimum": if hibernated { 0 } else { w.minimum },
                    "maximum": if hibernated { 0 } else { w.maximum },
                    "zones": w.zones,
                })
            })
            .collect();
        self.extension(ExtensionKind::Worker, &self.shoot.name_any(), &provider.provider_type)
            .with_field("region", json!(self.shoot.spec.region))
            .with_field("infrastructureProviderStatus", infrastructure_status)
            .with_field("pools", json!(pools))
            .with_field("secretRef", self.secret_ref(CLOUD_PROVIDER_SECRET))
    }

    fn external_dns_name(&self) -> String {
        format!("{}-external", self.shoot.name_any())
    }

    /// The external DNS record, if the shoot has a domain with a primary provider
    /// and the seed an ingress domain to point it to.
    fn dns_record(&self) -> Option<ExtensionComponent> {
        let dns = self.shoot.spec.dns.as_ref()?;
        let domain = dns.domain.as_deref()?;
        let provider = dns
            .providers
            .iter()
            .find(|p| p.primary.unwrap_or(false))
            .or_else(|| dns.providers.first())?;
        let provider_type = provider.provider_type.as_deref()?;
        let ingress = self.ingress_domain.as_deref()?;
        Some(
            self.extension(ExtensionKind::DnsRecord, &self.external_dns_name(), provider_type)
                .with_field("name", json!(format!("api.{}", domain)))
                .with_field("recordType", json!("CNAME"))
                .with_field("values", json!([format!("api.{}.{}", self.namespace, ingress)]))
                .with_field("secretRef", self.secret_ref(EXTERNAL_DNS_SECRET)),
        )
    }

    fn dns_secret_name(&self) -> Option<&str> {
        let dns = self.shoot.spec.dns.as_ref()?;
        dns.providers
            .iter()
            .find(|p| p.primary.unwrap_or(false))
            .or_else(|| dns.providers.first())?
            .secret_name
            .as_deref()
    }

    async fn ensure_namespace(&self) -> Result<()> {
        let labels = BTreeMap::from([
            (labels::ROLE.to_string(), labels::ROLE_SHOOT.to_string()),
            (labels::SHOOT_NAME.to_string(), self.shoot.name_any()),
            (labels::SHOOT_PROJECT.to_string(), self.shoot.project_name()),
        ]);
        ensure_namespace(self.seed.as_ref(), &self.namespace, labels).await?;
        Ok(())
    }

    async fn copy_secret(&self, namespace: &str, name: &str, target: &str) -> Result<()> {
        let source = typed::get_required::<Secret>(self.garden.as_ref(), Some(namespace), name).await?;
        let copy = Secret {
            metadata: ObjectMeta {
                name: Some(target.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            data: source.data,
            type_: source.type_,
            ..Default::default()
        };
        typed::create_or_update(self.seed.as_ref(), &copy, |live| {
            let mut merged = live.clone();
            merged.data = copy.data.clone();
            merged.type_ = copy.type_.clone();
            merged
        })
        .await?;
        Ok(())
    }

    async fn deploy_cloud_provider_secret(&self) -> Result<()> {
        let Some(binding_name) = self.shoot.spec.secret_binding_name.as_deref() else {
            debug!("Shoot has no secret binding");
            return Ok(());
        };
        let binding = typed::get_required::<SecretBinding>(
            self.garden.as_ref(),
            self.shoot.namespace().as_deref(),
            binding_name,
        )
        .await?;
        self.copy_secret(&binding.secret_namespace(), &binding.secret_ref.name, CLOUD_PROVIDER_SECRET)
            .await
    }

    async fn deploy_infrastructure(&self) -> Result<()> {
        deploy_and_wait(&self.infrastructure()).await
    }

    async fn infrastructure_status(&self) -> Result<Value> {
        let live = self.infrastructure().get().await?.ok_or_else(|| {
            GardenerError::UnknownResource(format!("Infrastructure {}/{}", self.namespace, self.shoot.name_any()))
        })?;
        Ok(live.data["status"]["providerStatus"].clone())
    }

    async fn deploy_control_plane(&self) -> Result<()> {
        let status = self.infrastructure_status().await?;
        deploy_and_wait(&self.control_plane(status)).await
    }

    async fn deploy_worker(&self) -> Result<()> {
        let status = self.infrastructure_status().await?;
        deploy_and_wait(&self.worker(status)).await
    }

    async fn deploy_external_dns_record(&self) -> Result<()> {
        let Some(record) = self.dns_record() else {
            return Ok(());
        };
        if let Some(secret) = self.dns_secret_name() {
            let namespace = self.shoot.namespace().unwrap_or_default();
            self.copy_secret(&namespace, secret, EXTERNAL_DNS_SECRET).await?;
        }
        deploy_and_wait(&record).await
    }

    /// Deploy the enabled extensions and remove the ones no longer wanted.
    async fn deploy_extensions(&self) -> Result<()> {
        let wanted: Vec<ExtensionComponent> = self
            .shoot
            .enabled_extensions()
            .map(|e| {
                self.extension(ExtensionKind::Extension, &e.extension_type, &e.extension_type)
                    .with_field("providerConfig", json!(e.provider_config))
            })
            .collect();
        try_join_all(wanted.iter().map(|e| deploy_and_wait(e))).await?;

        let keep: BTreeSet<&str> = wanted.iter().map(|e| e.name()).collect();
        let stale: Vec<ExtensionComponent> = self
            .live_extensions()
            .await?
            .into_iter()
            .filter(|(name, _)| !keep.contains(name.as_str()))
            .map(|(name, extension_type)| self.extension(ExtensionKind::Extension, &name, &extension_type))
            .collect();
        for extension in &stale {
            info!(extension = extension.name(), "Removing extension that is no longer enabled");
        }
        try_join_all(stale.iter().map(|e| destroy_and_wait(e))).await?;
        Ok(())
    }

    /// Name and type of every Extension in the shoot namespace.
    async fn live_extensions(&self) -> Result<Vec<(String, String)>> {
        let live = self
            .seed
            .list(&ExtensionKind::Extension.api_resource(), Some(&self.namespace), None)
            .await?;
        Ok(live
            .into_iter()
            .map(|obj| {
                let extension_type = obj.data["spec"]["type"].as_str().unwrap_or_default().to_string();
                (obj.name_any(), extension_type)
            })
            .collect())
    }

    async fn destroy_extensions(&self) -> Result<()> {
        let live: Vec<ExtensionComponent> = self
            .live_extensions()
            .await?
            .into_iter()
            .map(|(name, extension_type)| self.extension(ExtensionKind::Extension, &name, &extension_type))
            .collect();
        try_join_all(live.iter().map(|e| destroy_and_wait(e))).await?;
        Ok(())
    }

    async fn destroy_worker(&self) -> Result<()> {
        destroy_and_wait(&self.worker(Value::Null)).await
    }

    async fn destroy_control_plane(&self) -> Result<()> {
        destroy_and_wait(&self.control_plane(Value::Null)).await
    }

    async fn destroy_external_dns_record(&self) -> Result<()> {
        let record = self.extension(ExtensionKind::DnsRecord, &self.external_dns_name(), "");
        destroy_and_wait(&record).await
    }

    async fn destroy_infrastructure(&self) -> Result<()> {
        destroy_and_wait(&self.infrastructure()).await
    }

    async fn delete_secrets(&self) -> Result<()> {
        for name in [CLOUD_PROVIDER_SECRET, EXTERNAL_DNS_SECRET] {
            typed::delete::<Secret>(self.seed.as_ref(), Some(&self.namespace), name).await?;
        }
        Ok(())
    }

    async fn delete_namespace(&self) -> Result<()> {
        let namespace = &self.namespace;
        poll(
            &format!("waiting for deletion of namespace {}", namespace),
            self.timeouts,
            || async move {
                match delete_namespace(self.seed.as_ref(), namespace).await {
                    Ok(true) => PollResult::Ready,
                    Ok(false) => PollResult::NotReady("namespace is terminating".to_string()),
                    Err(e) => PollResult::Failed(e),
                }
            },
        )
        .await
    }

    pub(super) fn reconcile_flow(self: &Arc<Self>) -> Result<Flow> {
        let wait = self.timeouts.timeout * 2 + API_TIMEOUT;
        let mut graph = Graph::new("shoot reconciliation");

        let namespace = graph.add(Task::new(
            "ensure-namespace",
            TaskFn::bound(self, |b| async move { b.ensure_namespace().await })
                .retry(Duration::from_secs(5), 3)
                .timeout(API_TIMEOUT),
        ));
        let secret = graph.add(
            Task::new(
                "deploy-cloud-provider-secret",
                TaskFn::bound(self, |b| async move { b.deploy_cloud_provider_secret().await }).timeout(API_TIMEOUT),
            )
            .depends_on([namespace]),
        );
        let infrastructure = graph.add(
            Task::new(
                "deploy-infrastructure",
                TaskFn::bound(self, |b| async move { b.deploy_infrastructure().await }).timeout(wait),
            )
            .depends_on([secret]),
        );
        let dns_record = graph.add(
            Task::new(
                "deploy-external-dns-record",
                TaskFn::bound(self, |b| async move { b.deploy_external_dns_record().await }).timeout(wait),
            )
            .depends_on([namespace])
            .do_if(self.dns_record().is_some()),
        );
        let control_plane = graph.add(
            Task::new(
                "deploy-control-plane",
                TaskFn::bound(self, |b| async move { b.deploy_control_plane().await }).timeout(wait),
            )
            .depends_on([infrastructure]),
        );
        let extensions = graph.add(
            Task::new(
                "deploy-extensions",
                TaskFn::bound(self, |b| async move { b.deploy_extensions().await }).timeout(wait),
            )
            .depends_on([namespace]),
        );
        let worker = graph.add(
            Task::new(
                "deploy-worker",
                TaskFn::bound(self, |b| async move { b.deploy_worker().await }).timeout(wait),
            )
            .depends_on([control_plane]),
        );
        graph.add(Task::sync_point("shoot-reconciled").depends_on([dns_record, extensions, worker]));
        Ok(graph.compile()?)
    }

    pub(super) fn delete_flow(self: &Arc<Self>) -> Result<Flow> {
        let wait = self.timeouts.timeout * 2 + API_TIMEOUT;
        let mut graph = Graph::new("shoot deletion");

        let extensions = graph.add(Task::new(
            "destroy-extensions",
            TaskFn::bound(self, |b| async move { b.destroy_extensions().await }).timeout(wait),
        ));
        let worker = graph.add(Task::new(
            "destroy-worker",
            TaskFn::bound(self, |b| async move { b.destroy_worker().await }).timeout(wait),
        ));
        let dns_record = graph.add(Task::new(
            "destroy-external-dns-record",
            TaskFn::bound(self, |b| async move { b.destroy_external_dns_record().await }).timeout(wait),
        ));
        let control_plane = graph.add(
            Task::new(
                "destroy-control-plane",
                TaskFn::bound(self, |b| async move { b.destroy_control_plane().await }).timeout(wait),
            )
            .depends_on([worker]),
        );
        let infrastructure = graph.add(
            Task::new(
                "destroy-infrastructure",
                TaskFn::bound(self, |b| async move { b.destroy_infrastructure().await }).timeout(wait),
            )
            .depends_on([control_plane]),
        );
        let secrets = graph.add(
            Task::new(
                "delete-secrets",
                TaskFn::bound(self, |b| async move { b.delete_secrets().await }).timeout(API_TIMEOUT),
            )
            .depends_on([infrastructure, dns_record, extensions]),
        );
        graph.add(
            Task::new(
                "delete-namespace",
                TaskFn::bound(self, |b| async move { b.delete_namespace().await }).timeout(wait),
            )
            .depends_on([secrets]),
        );
        Ok(graph.compile()?)
    }
}
