// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Keeping the relationship graph in sync with the garden cluster.

use super::decision::seed_name_of_user;
use super::graph::{Graph, Vertex, VertexType};
use crate::constants::names;
use crate::error::{GardenerError, Result};
use crate::types::{
    BackupBucket, BackupEntry, Bastion, ControllerInstallation, ManagedSeed, Project, SecretBinding,
    Seed, Shoot,
};
use futures::TryStreamExt;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info};

/// An object that declares edges in the relationship graph.
pub trait Relationships {
    /// The vertex of the object itself, owner of all edges it declares.
    fn vertex(&self) -> Vertex;

    /// Edges `(from, to)` meaning "from is used by to".
    fn edges(&self) -> Vec<(Vertex, Vertex)>;
}

impl Graph {
    /// Record the current state of `obj`, replacing what it declared before.
    pub fn observe<T: Relationships>(&self, obj: &T) {
        let vertex = obj.vertex();
        let edges = obj.edges();
        debug!(%vertex, edges = edges.len(), "Updating graph");
        self.set_edges(&vertex, edges);
    }

    pub fn forget<T: Relationships>(&self, obj: &T) {
        let vertex = obj.vertex();
        debug!(%vertex, "Removing from graph");
        self.remove_owner(&vertex);
    }
}

fn seed(name: &str) -> Vertex {
    Vertex::cluster(VertexType::Seed, name)
}

fn namespaced<K: Resource>(vertex_type: VertexType, obj: &K) -> Vertex {
    Vertex::new(vertex_type, &obj.namespace().unwrap_or_default(), &obj.name_any())
}

impl Relationships for Shoot {
    fn vertex(&self) -> Vertex {
        namespaced(VertexType::Shoot, self)
    }

    fn edges(&self) -> Vec<(Vertex, Vertex)> {
        let shoot = self.vertex();
        let ns = shoot.namespace.clone();
        let name = shoot.name.clone();
        let mut edges = vec![
            (Vertex::cluster(VertexType::CloudProfile, &self.spec.cloud_profile_name), shoot.clone()),
            (Vertex::cluster(VertexType::Namespace, &ns), shoot.clone()),
            (Vertex::new(VertexType::ShootState, &ns, &name), shoot.clone()),
        ];
        if let Some(binding) = self.spec.secret_binding_name.as_deref().filter(|b| !b.is_empty()) {
            edges.push((Vertex::new(VertexType::SecretBinding, &ns, binding), shoot.clone()));
        }
        let dns_secrets = self
            .spec
            .dns
            .iter()
            .flat_map(|dns| dns.providers.iter())
            .filter_map(|p| p.secret_name.as_deref());
        for secret in dns_secrets {
            edges.push((Vertex::new(VertexType::Secret, &ns, secret), shoot.clone()));
        }
        // secrets the seed publishes into the project namespace
        for suffix in ["kubeconfig", "ca-cluster", "ssh-keypair", "monitoring"] {
            let secret = format!("{}.{}", name, suffix);
            edges.push((Vertex::new(VertexType::Secret, &ns, &secret), shoot.clone()));
        }
        let assigned = self.spec.seed_name.iter().chain(self.status.as_ref().and_then(|s| s.seed_name.as_ref()));
        for seed_name in assigned.filter(|s| !s.is_empty()) {
            edges.push((shoot.clone(), seed(seed_name)));
        }
        edges
    }
}

impl Relationships for Seed {
    fn vertex(&self) -> Vertex {
        seed(&self.name_any())
    }

    fn edges(&self) -> Vec<(Vertex, Vertex)> {
        let this = self.vertex();
        let mut edges = vec![(
            Vertex::new(VertexType::Lease, names::SEED_LEASE_NAMESPACE, &this.name),
            this.clone(),
        )];
        if let Some(backup) = &self.spec.backup {
            let secret = &backup.secret_ref;
            edges.push((Vertex::new(VertexType::Secret, &secret.namespace, &secret.name), this.clone()));
        }
        if let Some(provider) = self.spec.dns.as_ref().and_then(|d| d.provider.as_ref()) {
            let secret = &provider.secret_ref;
            edges.push((Vertex::new(VertexType::Secret, &secret.namespace, &secret.name), this.clone()));
        }
        edges
    }
}

impl Relationships for SecretBinding {
    fn vertex(&self) -> Vertex {
        namespaced(VertexType::SecretBinding, self)
    }

    fn edges(&self) -> Vec<(Vertex, Vertex)> {
        vec![(
            Vertex::new(VertexType::Secret, &self.secret_namespace(), &self.secret_ref.name),
            self.vertex(),
        )]
    }
}

impl Relationships for Project {
    fn vertex(&self) -> Vertex {
        Vertex::cluster(VertexType::Project, &self.name_any())
    }

    fn edges(&self) -> Vec<(Vertex, Vertex)> {
        self.spec
            .namespace
            .iter()
            .map(|ns| (self.vertex(), Vertex::cluster(VertexType::Namespace, ns)))
            .collect()
    }
}

impl Relationships for BackupBucket {
    fn vertex(&self) -> Vertex {
        Vertex::cluster(VertexType::BackupBucket, &self.name_any())
    }

    fn edges(&self) -> Vec<(Vertex, Vertex)> {
        let bucket = self.vertex();
        let secret = &self.spec.secret_ref;
        let mut edges = vec![(Vertex::new(VertexType::Secret, &secret.namespace, &secret.name), bucket.clone())];
        if let Some(generated) = self.status.as_ref().and_then(|s| s.generated_secret_ref.as_ref()) {
            edges.push((
                Vertex::new(VertexType::Secret, &generated.namespace, &generated.name),
                bucket.clone(),
            ));
        }
        if let Some(seed_name) = self.seed_name() {
            edges.push((bucket, seed(seed_name)));
        }
        edges
    }
}

impl Relationships for BackupEntry {
    fn vertex(&self) -> Vertex {
        namespaced(VertexType::BackupEntry, self)
    }

    fn edges(&self) -> Vec<(Vertex, Vertex)> {
        let entry = self.vertex();
        let mut edges = vec![(
            Vertex::cluster(VertexType::BackupBucket, &self.spec.bucket_name),
            entry.clone(),
        )];
        let assigned = self
            .spec
            .seed_name
            .iter()
            .chain(self.status.as_ref().and_then(|s| s.seed_name.as_ref()));
        for seed_name in assigned.filter(|s| !s.is_empty()) {
            edges.push((entry.clone(), seed(seed_name)));
        }
        edges
    }
}

impl Relationships for ControllerInstallation {
    fn vertex(&self) -> Vertex {
        Vertex::cluster(VertexType::ControllerInstallation, &self.name_any())
    }

    fn edges(&self) -> Vec<(Vertex, Vertex)> {
        let installation = self.vertex();
        vec![
            (
                Vertex::cluster(VertexType::ControllerRegistration, &self.spec.registration_ref.name),
                installation.clone(),
            ),
            (installation, seed(&self.spec.seed_ref.name)),
        ]
    }
}

impl Relationships for ManagedSeed {
    fn vertex(&self) -> Vertex {
        namespaced(VertexType::ManagedSeed, self)
    }

    fn edges(&self) -> Vec<(Vertex, Vertex)> {
        let managed_seed = self.vertex();
        self.spec
            .shoot
            .iter()
            .map(|shoot| {
                (
                    managed_seed.clone(),
                    Vertex::new(VertexType::Shoot, &managed_seed.namespace, &shoot.name),
                )
            })
            .collect()
    }
}

impl Relationships for Bastion {
    fn vertex(&self) -> Vertex {
        namespaced(VertexType::Bastion, self)
    }

    fn edges(&self) -> Vec<(Vertex, Vertex)> {
        let bastion = self.vertex();
        let mut edges = vec![(
            Vertex::new(VertexType::Shoot, &bastion.namespace, &self.spec.shoot_ref.name),
            bastion.clone(),
        )];
        if let Some(seed_name) = self.spec.seed_name.as_deref().filter(|s| !s.is_empty()) {
            edges.push((bastion, seed(seed_name)));
        }
        edges
    }
}

impl Relationships for CertificateSigningRequest {
    fn vertex(&self) -> Vertex {
        Vertex::cluster(VertexType::CertificateSigningRequest, &self.name_any())
    }

    fn edges(&self) -> Vec<(Vertex, Vertex)> {
        let groups = self.spec.groups.as_deref().unwrap_or_default();
        let requester = self
            .spec
            .username
            .as_deref()
            .and_then(|user| seed_name_of_user(user, groups));
        match requester {
            Some(seed_name) => vec![(self.vertex(), seed(seed_name))],
            None => Vec::new(),
        }
    }
}

async fn follow<K>(api: Api<K>, graph: Arc<Graph>) -> Result<()>
where
    K: Resource<DynamicType = ()> + Relationships + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let kind = K::kind(&());
    info!(%kind, "Starting graph informer");
    let mut events = Box::pin(watcher(api, watcher::Config::default()).default_backoff());
    while let Some(event) = events
        .try_next()
        .await
        .map_err(|e| GardenerError::Other(anyhow::anyhow!("{} informer failed: {}", kind, e)))?
    {
        match event {
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => graph.observe(&obj),
            watcher::Event::Delete(obj) => graph.forget(&obj),
            watcher::Event::Init | watcher::Event::InitDone => {}
        }
    }
    Ok(())
}

/// Feed the graph from informers on every object kind that declares edges.
pub async fn maintain(client: Client, graph: Arc<Graph>) -> Result<()> {
    tokio::try_join!(
        follow(Api::<Shoot>::all(client.clone()), graph.clone()),
        follow(Api::<Seed>::all(client.clone()), graph.clone()),
        follow(Api::<SecretBinding>::all(client.clone()), graph.clone()),
        follow(Api::<Project>::all(client.clone()), graph.clone()),
        follow(Api::<BackupBucket>::all(client.clone()), graph.clone()),
        follow(Api::<BackupEntry>::all(client.clone()), graph.clone()),
        follow(Api::<ControllerInstallation>::all(client.clone()), graph.clone()),
        follow(Api::<ManagedSeed>::all(client.clone()), graph.clone()),
        follow(Api::<Bastion>::all(client.clone()), graph.clone()),
        follow(Api::<CertificateSigningRequest>::all(client), graph),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shoot() -> Shoot {
        serde_json::from_value(json!({
            "apiVersion": "core.gardener.cloud/v1beta1",
            "kind": "Shoot",
            "metadata": {"name": "bar", "namespace": "garden-foo"},
            "spec": {
                "cloudProfileName": "aws",
                "secretBindingName": "creds",
                "seedName": "s1",
                "region": "eu-west-1",
                "provider": {"type": "aws", "workers": []},
                "kubernetes": {"version": "1.30.1"},
                "dns": {"providers": [{"type": "aws-route53", "secretName": "dns"}]}
            }
        }))
        .unwrap()
    }

    fn secret(name: &str) -> Vertex {
        Vertex::new(VertexType::Secret, "garden-foo", name)
    }

    #[test]
    fn test_shoot_connects_its_references_to_the_seed() {
        let graph = Graph::new();
        graph.observe(&shoot());
        let binding: SecretBinding = serde_json::from_value(json!({
            "metadata": {"name": "creds", "namespace": "garden-foo"},
            "secretRef": {"name": "aws-account"}
        }))
        .unwrap();
        graph.observe(&binding);

        let s1 = Vertex::cluster(VertexType::Seed, "s1");
        assert!(graph.has_path(&secret("dns"), &s1));
        assert!(graph.has_path(&secret("aws-account"), &s1));
        assert!(graph.has_path(&Vertex::cluster(VertexType::CloudProfile, "aws"), &s1));
        assert!(graph.has_path(&Vertex::cluster(VertexType::Namespace, "garden-foo"), &s1));
        assert!(graph.has_path(&secret("bar.kubeconfig"), &s1));
    }

    #[test]
    fn test_rescheduled_shoot_moves_edges() {
        let graph = Graph::new();
        let mut shoot = shoot();
        graph.observe(&shoot);
        shoot.spec.seed_name = Some("s2".to_string());
        graph.observe(&shoot);

        assert!(!graph.has_path(&secret("dns"), &Vertex::cluster(VertexType::Seed, "s1")));
        assert!(graph.has_path(&secret("dns"), &Vertex::cluster(VertexType::Seed, "s2")));

        graph.forget(&shoot);
        assert!(!graph.has_vertex(&secret("dns")));
    }

    #[test]
    fn test_project_and_backup_entries_reach_the_seed() {
        let graph = Graph::new();
        graph.observe(&shoot());
        let project: Project = serde_json::from_value(json!({
            "apiVersion": "core.gardener.cloud/v1beta1",
            "kind": "Project",
            "metadata": {"name": "foo"},
            "spec": {"namespace": "garden-foo"}
        }))
        .unwrap();
        graph.observe(&project);
        let bucket: BackupBucket = serde_json::from_value(json!({
            "apiVersion": "core.gardener.cloud/v1beta1",
            "kind": "BackupBucket",
            "metadata": {"name": "uid-1"},
            "spec": {
                "provider": {"type": "aws", "region": "eu-west-1"},
                "secretRef": {"name": "backup", "namespace": "garden"},
                "seedName": "s1"
            }
        }))
        .unwrap();
        graph.observe(&bucket);

        let s1 = Vertex::cluster(VertexType::Seed, "s1");
        assert!(graph.has_path(&Vertex::cluster(VertexType::Project, "foo"), &s1));
        assert!(graph.has_path(&Vertex::new(VertexType::Secret, "garden", "backup"), &s1));
        assert!(!graph.has_path(&Vertex::new(VertexType::Secret, "garden", "backup"), &Vertex::cluster(VertexType::Seed, "s2")));
    }
}
