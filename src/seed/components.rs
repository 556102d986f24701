// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The system components every seed runs.
//!
//! Rendering of the real charts happens outside of this crate; the objects
//! below are the minimal set each component ships in its ManagedResource.

use crate::components::{
    Components, DeploymentComponent, ExtensionComponent, ManagedResourceComponent, WaitTimeouts,
};
use crate::config::FeatureGates;
use crate::constants::{labels, names};
use crate::error::Result;
use crate::kubernetes::ClusterClient;
use crate::types::{ExtensionKind, Seed};
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use serde_json::{json, Value};
use std::sync::Arc;

/// Class of the ManagedResources reconciled by the seed's resource manager.
pub const SEED_CLASS: &str = "seed";

pub const CLUSTER_AUTOSCALER: &str = "cluster-autoscaler";
pub const CLUSTER_IDENTITY: &str = "cluster-identity";
pub const DWD_ENDPOINT: &str = "dependency-watchdog-endpoint";
pub const DWD_PROBE: &str = "dependency-watchdog-probe";
pub const ETCD_DRUID: &str = "etcd-druid";
pub const SEED_ADMISSION_CONTROLLER: &str = "gardener-seed-admission-controller";
pub const NETWORK_POLICIES: &str = "global-network-policies";
pub const KUBE_STATE_METRICS: &str = "kube-state-metrics";
pub const SYSTEM: &str = "system";
pub const VPA: &str = "vpa";
pub const HVPA: &str = "hvpa";
pub const ISTIO: &str = "istio";
pub const ISTIO_CRDS: &str = "istio-crds";
pub const NGINX_INGRESS: &str = "nginx-ingress";
pub const KUBE_SCHEDULER: &str = "kube-scheduler";
pub const VPN_AUTHZ_SERVER: &str = "vpn-authz-server";
pub const DNS_RECORD: &str = "dns-record";
pub const RESOURCE_MANAGER: &str = names::RESOURCE_MANAGER;

/// Components without their own toggle, deployed into every seed.
pub const ALWAYS_DEPLOYED: &[&str] = &[
    CLUSTER_AUTOSCALER,
    CLUSTER_IDENTITY,
    DWD_ENDPOINT,
    DWD_PROBE,
    ETCD_DRUID,
    SEED_ADMISSION_CONTROLLER,
    NETWORK_POLICIES,
    KUBE_STATE_METRICS,
    SYSTEM,
];

/// Components that are only ever removed, left over from older seed setups.
pub const LEGACY: &[&str] = &[KUBE_SCHEDULER, VPN_AUTHZ_SERVER];

pub const NGINX_INGRESS_SERVICE: &str = "nginx-ingress-controller";

const IMAGE_REPOSITORY: &str = "europe-docker.pkg.dev/gardener-project/releases";

fn image(component: &str) -> String {
    format!("{}/gardener/{}:v1.90.0", IMAGE_REPOSITORY, component)
}

/// The ManagedResources a seed should run with the given settings.
pub fn managed_resource_names(seed: &Seed, gates: &FeatureGates) -> Vec<&'static str> {
    let mut names = ALWAYS_DEPLOYED.to_vec();
    if seed.vpa_enabled() {
        names.push(VPA);
    }
    if gates.hvpa {
        names.push(HVPA);
    }
    if gates.managed_istio {
        names.extend([ISTIO_CRDS, ISTIO]);
    }
    if seed.spec.ingress.is_some() {
        names.push(NGINX_INGRESS);
    }
    names.sort_unstable();
    names
}

fn service_account(name: &str, namespace: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ServiceAccount",
        "metadata": {"name": name, "namespace": namespace}
    })
}

fn workload(name: &str, namespace: &str, args: &[&str]) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": {"app": name, labels::ROLE: labels::ROLE_SEED_SYSTEM_COMPONENT}
        },
        "spec": {
            "replicas": 1,
            "selector": {"matchLabels": {"app": name}},
            "template": {
                "metadata": {"labels": {"app": name}},
                "spec": {
                    "serviceAccountName": name,
                    "priorityClassName": "gardener-system-critical",
                    "containers": [{"name": name, "image": image(name), "args": args}]
                }
            }
        }
    })
}

fn single_workload(name: &str) -> Vec<Value> {
    vec![
        service_account(name, names::GARDEN_NAMESPACE),
        workload(name, names::GARDEN_NAMESPACE, &[]),
    ]
}

/// Objects shipped by the named component.
pub fn objects(component: &str, cluster_identity: &str) -> Vec<Value> {
    let garden = names::GARDEN_NAMESPACE;
    match component {
        CLUSTER_IDENTITY => vec![json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": names::CLUSTER_IDENTITY, "namespace": names::KUBE_SYSTEM_NAMESPACE},
            "data": {names::CLUSTER_IDENTITY: cluster_identity}
        })],
        NETWORK_POLICIES => vec![
            json!({
                "apiVersion": "networking.k8s.io/v1",
                "kind": "NetworkPolicy",
                "metadata": {"name": "deny-all", "namespace": garden},
                "spec": {"podSelector": {}, "policyTypes": ["Ingress", "Egress"]}
            }),
            json!({
                "apiVersion": "networking.k8s.io/v1",
                "kind": "NetworkPolicy",
                "metadata": {"name": "allow-to-dns", "namespace": garden},
                "spec": {
                    "podSelector": {"matchLabels": {"networking.gardener.cloud/to-dns": "allowed"}},
                    "egress": [{
                        "to": [{
                            "namespaceSelector": {"matchLabels": {"kubernetes.io/metadata.name": names::KUBE_SYSTEM_NAMESPACE}},
                            "podSelector": {"matchLabels": {"k8s-app": "kube-dns"}}
                        }],
                        "ports": [{"protocol": "UDP", "port": 53}, {"protocol": "TCP", "port": 53}]
                    }],
                    "policyTypes": ["Egress"]
                }
            }),
        ],
        SYSTEM => ["gardener-system-critical", "gardener-system-900"]
            .into_iter()
            .zip([999_998_950, 999_998_900])
            .map(|(name, value)| {
                json!({
                    "apiVersion": "scheduling.k8s.io/v1",
                    "kind": "PriorityClass",
                    "metadata": {"name": name},
                    "value": value,
                    "globalDefault": false
                })
            })
            .collect(),
        VPA => ["vpa-admission-controller", "vpa-recommender", "vpa-updater"]
            .into_iter()
            .flat_map(|name| [service_account(name, garden), workload(name, garden, &[])])
            .collect(),
        ISTIO_CRDS => vec![json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": {"name": "gateways.networking.istio.io"},
            "spec": {
                "group": "networking.istio.io",
                "names": {"kind": "Gateway", "plural": "gateways"},
                "scope": "Namespaced",
                "versions": [{"name": "v1beta1", "served": true, "storage": true,
                              "schema": {"openAPIV3Schema": {"type": "object", "x-kubernetes-preserve-unknown-fields": true}}}]
            }
        })],
        ISTIO => vec![
            json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "istio-system"}}),
            service_account("istiod", "istio-system"),
            workload("istiod", "istio-system", &[]),
        ],
        NGINX_INGRESS => vec![
            service_account(NGINX_INGRESS_SERVICE, garden),
            workload(NGINX_INGRESS_SERVICE, garden, &["--publish-service=garden/nginx-ingress-controller"]),
            json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": {"name": NGINX_INGRESS_SERVICE, "namespace": garden},
                "spec": {
                    "type": "LoadBalancer",
                    "selector": {"app": NGINX_INGRESS_SERVICE},
                    "ports": [{"name": "https", "port": 443, "targetPort": 443}]
                }
            }),
        ],
        other => single_workload(other),
    }
}

/// The resource manager, which has to run before any ManagedResource is reconciled.
pub fn resource_manager(cluster_identity: &str) -> Result<Deployment> {
    let mut deployment: Deployment = serde_json::from_value(workload(
        RESOURCE_MANAGER,
        names::GARDEN_NAMESPACE,
        &[],
    ))?;
    if let Some(container) = deployment
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .and_then(|s| s.containers.first_mut())
    {
        container.args = Some(vec![
            format!("--cluster-id={}", cluster_identity),
            format!("--resource-class={}", SEED_CLASS),
            format!("--namespace={}", names::GARDEN_NAMESPACE),
        ]);
    }
    Ok(deployment)
}

/// All components a seed may contain, addressed by name.
pub fn build(
    client: Arc<dyn ClusterClient>,
    seed: &Seed,
    cluster_identity: &str,
    timeouts: WaitTimeouts,
) -> Result<Components> {
    let mut components = Components::new();
    let every = ALWAYS_DEPLOYED
        .iter()
        .chain(LEGACY)
        .chain(&[VPA, HVPA, ISTIO, ISTIO_CRDS, NGINX_INGRESS]);
    for name in every {
        let component = ManagedResourceComponent::new(client.clone(), names::GARDEN_NAMESPACE, name)
            .with_class(SEED_CLASS)
            .with_objects(objects(name, cluster_identity))
            .keep_objects(*name == ISTIO_CRDS)
            .with_timeouts(timeouts);
        components.insert(*name, Arc::new(component));
    }

    components.insert(
        RESOURCE_MANAGER,
        Arc::new(DeploymentComponent::new(client.clone(), resource_manager(cluster_identity)?).with_timeouts(timeouts)),
    );

    let provider_type = seed
        .spec
        .dns
        .as_ref()
        .and_then(|d| d.provider.as_ref())
        .map(|p| p.provider_type.clone())
        .unwrap_or_default();
    components.insert(DNS_RECORD, Arc::new(dns_record(client, seed, &provider_type, None, timeouts)));
    Ok(components)
}

/// Name of the DNS provider credentials copied into the seed.
pub fn dns_secret_name(seed: &Seed) -> String {
    format!("seed-{}-ingress-dns", seed.name_any())
}

/// The DNSRecord pointing the seed's ingress domain at the ingress load balancer.
pub fn dns_record(
    client: Arc<dyn ClusterClient>,
    seed: &Seed,
    provider_type: &str,
    target: Option<&str>,
    timeouts: WaitTimeouts,
) -> ExtensionComponent {
    let domain = seed
        .spec
        .ingress
        .as_ref()
        .map(|i| format!("*.{}", i.domain))
        .unwrap_or_default();
    let record_type = match target {
        Some(t) if t.parse::<std::net::IpAddr>().is_ok() => "A",
        _ => "CNAME",
    };
    ExtensionComponent::new(
        client,
        ExtensionKind::DnsRecord,
        Some(names::GARDEN_NAMESPACE),
        &format!("{}-ingress", seed.name_any()),
        provider_type,
    )
    .with_field("name", json!(domain))
    .with_field("recordType", json!(record_type))
    .with_field("values", target.map(|t| json!([t])).unwrap_or(Value::Null))
    .with_field(
        "secretRef",
        json!({"name": dns_secret_name(seed), "namespace": names::GARDEN_NAMESPACE}),
    )
    .with_timeouts(timeouts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SeedSpec;
    use kube::api::ObjectMeta;

    fn seed(spec: serde_json::Value) -> Seed {
        Seed {
            metadata: ObjectMeta {
                name: Some("seed-a".to_string()),
                ..Default::default()
            },
            spec: serde_json::from_value::<SeedSpec>(spec).unwrap(),
            status: None,
        }
    }

    #[test]
    fn test_managed_resource_names_follow_settings() {
        let plain = seed(json!({"provider": {"type": "aws", "region": "eu-west-1"}}));
        let names = managed_resource_names(&plain, &FeatureGates::default());
        assert!(names.contains(&VPA));
        assert!(!names.contains(&HVPA));
        assert!(!names.contains(&NGINX_INGRESS));
        assert_eq!(names.len(), ALWAYS_DEPLOYED.len() + 1);

        let tuned = seed(json!({
            "provider": {"type": "aws", "region": "eu-west-1"},
            "ingress": {"domain": "ingress.example.com"},
            "settings": {"verticalPodAutoscaler": {"enabled": false}}
        }));
        let gates = FeatureGates {
            hvpa: true,
            managed_istio: true,
            ..Default::default()
        };
        let names = managed_resource_names(&tuned, &gates);
        assert!(!names.contains(&VPA));
        for name in [HVPA, ISTIO, ISTIO_CRDS, NGINX_INGRESS] {
            assert!(names.contains(&name), "{} missing", name);
        }
    }

    #[test]
    fn test_cluster_identity_objects() {
        let objects = objects(CLUSTER_IDENTITY, "garden-seed-a");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["data"]["cluster-identity"], "garden-seed-a");
        assert_eq!(objects[0]["metadata"]["namespace"], "kube-system");
    }

    #[test]
    fn test_resource_manager_args() {
        let deployment = resource_manager("id").unwrap();
        let args = deployment.spec.unwrap().template.spec.unwrap().containers[0]
            .args
            .clone()
            .unwrap();
        assert!(args.contains(&"--cluster-id=id".to_string()));
        assert!(args.contains(&"--resource-class=seed".to_string()));
    }
}
