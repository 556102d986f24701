// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Authorization decisions for requests made with a seed identity.

use super::graph::{Graph, Vertex, VertexType};
use crate::constants::names;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

pub const SEED_USER_PREFIX: &str = "gardener.cloud:system:seed:";
pub const SEEDS_GROUP: &str = "gardener.cloud:system:seeds";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    NoOpinion,
    Deny,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub name: String,
    pub groups: Vec<String>,
}

/// The parts of an API request relevant for the decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pub user: UserInfo,
    pub verb: String,
    pub api_group: String,
    pub resource: String,
    pub subresource: String,
    pub namespace: String,
    pub name: String,
}

/// Name of the seed acting with the given identity, if it is one.
pub fn seed_name_of_user<'a>(user: &'a str, groups: &[String]) -> Option<&'a str> {
    let name = user.strip_prefix(SEED_USER_PREFIX)?;
    (!name.is_empty() && groups.iter().any(|g| g == SEEDS_GROUP)).then_some(name)
}

/// ServiceAccount used to bootstrap the gardenlet of a seed.
pub fn bootstrap_service_account_name(seed: &str) -> String {
    format!("gardenlet-bootstrap-{}", seed)
}

pub fn bootstrap_cluster_role_binding_name(seed: &str) -> String {
    format!(
        "gardener.cloud:system:seed-bootstrapper:{}:{}",
        names::GARDEN_NAMESPACE,
        bootstrap_service_account_name(seed)
    )
}

/// Secret holding the bootstrap token of a seed; the token id derives from the seed name.
pub fn bootstrap_token_secret_name(seed: &str) -> String {
    let digest = hex::encode(Sha256::digest(seed.as_bytes()));
    format!("bootstrap-token-{}", &digest[..6])
}

struct Rule {
    vertex_type: VertexType,
    always: &'static [&'static str],
    permitted: &'static [&'static str],
    subresources: &'static [&'static str],
}

const READ: &[&str] = &["get", "list", "watch"];

fn rule(resource: &str) -> Option<Rule> {
    let (vertex_type, always, permitted, subresources): (_, &'static [&'static str], &'static [&'static str], &'static [&'static str]) =
        match resource {
            "backupbuckets" => (VertexType::BackupBucket, &["create", "get", "list", "watch"], &["update", "patch", "delete"], &["status"]),
            "backupentries" => (VertexType::BackupEntry, &["create", "get", "list", "watch"], &["update", "patch", "delete"], &["status"]),
            "bastions" => (VertexType::Bastion, READ, &["update", "patch"], &["status"]),
            "certificatesigningrequests" => (VertexType::CertificateSigningRequest, &["create"], &["get"], &["seedclient"]),
            "cloudprofiles" => (VertexType::CloudProfile, &["list", "watch"], &["get"], &[]),
            "configmaps" => (VertexType::ConfigMap, &[], &["get"], &[]),
            "controllerinstallations" => (VertexType::ControllerInstallation, READ, &["update", "patch"], &["status"]),
            "controllerregistrations" => (VertexType::ControllerRegistration, READ, &[], &[]),
            "leases" => (VertexType::Lease, &["create"], &["get", "update", "patch"], &[]),
            "managedseeds" => (VertexType::ManagedSeed, READ, &["update", "patch"], &["status"]),
            "namespaces" => (VertexType::Namespace, &[], &["get"], &[]),
            "projects" => (VertexType::Project, &["list", "watch"], &["get"], &[]),
            "secretbindings" => (VertexType::SecretBinding, &[], &["get"], &[]),
            "secrets" => (VertexType::Secret, &["create"], &["get", "patch", "update", "delete"], &[]),
            "seeds" => (
                VertexType::Seed,
                &["create", "update", "patch", "delete", "get", "list", "watch"],
                &[],
                &["status"],
            ),
            "shoots" => (VertexType::Shoot, READ, &["update", "patch"], &["status"]),
            "shootstates" => (VertexType::ShootState, &["create"], &["get", "update", "patch", "delete"], &[]),
            _ => return None,
        };
    Some(Rule {
        vertex_type,
        always,
        permitted,
        subresources,
    })
}

/// Restricts seeds to the objects related to them in the garden cluster.
pub struct SeedAuthorizer {
    graph: Arc<Graph>,
}

impl SeedAuthorizer {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }

    pub fn authorize(&self, attrs: &Attributes) -> (Decision, String) {
        let Some(seed) = seed_name_of_user(&attrs.user.name, &attrs.user.groups) else {
            return (Decision::NoOpinion, String::new());
        };
        let (decision, reason) = self.decide(seed, attrs);
        debug!(
            seed,
            verb = %attrs.verb,
            resource = %attrs.resource,
            namespace = %attrs.namespace,
            name = %attrs.name,
            ?decision,
            %reason,
            "Authorization decision"
        );
        (decision, reason)
    }

    fn decide(&self, seed: &str, attrs: &Attributes) -> (Decision, String) {
        let verb = attrs.verb.as_str();
        match attrs.resource.as_str() {
            // leader election happens outside the seed lease namespace
            "leases" if attrs.namespace != names::SEED_LEASE_NAMESPACE => {
                return (Decision::Allow, String::new());
            }
            "configmaps"
                if attrs.namespace == names::KUBE_SYSTEM_NAMESPACE
                    && attrs.name == names::CLUSTER_IDENTITY
                    && verb == "get" =>
            {
                return (Decision::Allow, String::new());
            }
            "namespaces" if attrs.name == names::GARDEN_NAMESPACE && verb == "get" => {
                return (Decision::Allow, String::new());
            }
            "events" if matches!(verb, "create" | "patch" | "update") => {
                return (Decision::Allow, String::new());
            }
            "secrets"
                if verb == "delete"
                    && attrs.namespace == names::KUBE_SYSTEM_NAMESPACE
                    && attrs.name == bootstrap_token_secret_name(seed) =>
            {
                return (Decision::Allow, String::new());
            }
            "serviceaccounts" => {
                let own = attrs.namespace == names::GARDEN_NAMESPACE
                    && attrs.name == bootstrap_service_account_name(seed);
                return if verb == "delete" && own {
                    (Decision::Allow, String::new())
                } else {
                    (Decision::NoOpinion, "only the bootstrap service account may be deleted".to_string())
                };
            }
            "clusterrolebindings" => {
                return if verb == "delete" && attrs.name == bootstrap_cluster_role_binding_name(seed) {
                    (Decision::Allow, String::new())
                } else {
                    (
                        Decision::NoOpinion,
                        "only the bootstrap cluster role binding may be deleted".to_string(),
                    )
                };
            }
            _ => {}
        }

        let Some(rule) = rule(&attrs.resource) else {
            return (Decision::NoOpinion, String::new());
        };
        self.check(seed, attrs, &rule)
    }

    fn check(&self, seed: &str, attrs: &Attributes, rule: &Rule) -> (Decision, String) {
        let verb = attrs.verb.as_str();
        if !attrs.subresource.is_empty() && !rule.subresources.contains(&attrs.subresource.as_str()) {
            return (
                Decision::Deny,
                format!(
                    "only the following subresources are allowed for this resource type: {:?}",
                    rule.subresources
                ),
            );
        }
        if rule.always.contains(&verb) {
            return (Decision::Allow, String::new());
        }
        if !rule.permitted.contains(&verb) {
            return (
                Decision::NoOpinion,
                format!(
                    "only the following verbs are allowed for this resource type: {:?}",
                    [rule.always, rule.permitted].concat()
                ),
            );
        }
        if attrs.name.is_empty() {
            return (Decision::NoOpinion, "No Object name found".to_string());
        }

        let vertex = Vertex::new(rule.vertex_type, &attrs.namespace, &attrs.name);
        if self.graph.has_path(&vertex, &Vertex::cluster(VertexType::Seed, seed)) {
            return (Decision::Allow, String::new());
        }
        // the object may already be gone, nothing left to protect
        if verb == "delete" && !self.graph.has_vertex(&vertex) {
            return (Decision::Allow, String::new());
        }
        (
            Decision::NoOpinion,
            format!("no relationship found between seed '{}' and this object", seed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Shoot;
    use serde_json::json;

    fn seed_user(seed: &str) -> UserInfo {
        UserInfo {
            name: format!("{}{}", SEED_USER_PREFIX, seed),
            groups: vec![SEEDS_GROUP.to_string()],
        }
    }

    fn request(seed: &str, verb: &str, resource: &str, namespace: &str, name: &str) -> Attributes {
        Attributes {
            user: seed_user(seed),
            verb: verb.to_string(),
            resource: resource.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn shoot_with_dns_secret(secret: &str, seed: &str) -> Shoot {
        serde_json::from_value(json!({
            "apiVersion": "core.gardener.cloud/v1beta1",
            "kind": "Shoot",
            "metadata": {"name": "bar", "namespace": "garden-foo"},
            "spec": {
                "cloudProfileName": "aws",
                "seedName": seed,
                "region": "eu-west-1",
                "provider": {"type": "aws"},
                "kubernetes": {"version": "1.30.1"},
                "dns": {"providers": [{"secretName": secret}]}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_secret_update_requires_relationship() {
        let graph = Arc::new(Graph::new());
        let authorizer = SeedAuthorizer::new(graph.clone());
        let attrs = request("s", "update", "secrets", "garden-foo", "sec");

        let (decision, reason) = authorizer.authorize(&attrs);
        assert_eq!(decision, Decision::NoOpinion);
        assert_eq!(reason, "no relationship found between seed 's' and this object");

        graph.observe(&shoot_with_dns_secret("sec", "s"));
        assert_eq!(authorizer.authorize(&attrs).0, Decision::Allow);

        let other = request("t", "update", "secrets", "garden-foo", "sec");
        assert_eq!(authorizer.authorize(&other).0, Decision::NoOpinion);
    }

    #[test]
    fn test_non_seed_users_get_no_opinion() {
        let authorizer = SeedAuthorizer::new(Arc::new(Graph::new()));
        let mut attrs = request("s", "get", "seeds", "", "s");
        attrs.user = UserInfo {
            name: "alice".to_string(),
            groups: vec![SEEDS_GROUP.to_string()],
        };
        assert_eq!(authorizer.authorize(&attrs), (Decision::NoOpinion, String::new()));

        attrs.user = UserInfo {
            name: format!("{}s", SEED_USER_PREFIX),
            groups: Vec::new(),
        };
        assert_eq!(authorizer.authorize(&attrs).0, Decision::NoOpinion);
    }

    #[test]
    fn test_always_allowed_verbs_and_subresources() {
        let authorizer = SeedAuthorizer::new(Arc::new(Graph::new()));
        assert_eq!(authorizer.authorize(&request("s", "list", "shoots", "", "")).0, Decision::Allow);
        assert_eq!(authorizer.authorize(&request("s", "create", "secrets", "garden", "x")).0, Decision::Allow);

        let mut status = request("s", "patch", "shoots", "garden-foo", "bar");
        status.subresource = "binding".to_string();
        assert_eq!(authorizer.authorize(&status).0, Decision::Deny);

        let (decision, reason) = authorizer.authorize(&request("s", "delete", "shoots", "garden-foo", "bar"));
        assert_eq!(decision, Decision::NoOpinion);
        assert!(reason.starts_with("only the following verbs are allowed"));
    }

    #[test]
    fn test_special_cases() {
        let authorizer = SeedAuthorizer::new(Arc::new(Graph::new()));
        let allowed = [
            request("s", "update", "leases", "garden", "gardenlet-leader-election"),
            request("s", "get", "configmaps", names::KUBE_SYSTEM_NAMESPACE, names::CLUSTER_IDENTITY),
            request("s", "get", "namespaces", "", names::GARDEN_NAMESPACE),
            request("s", "delete", "serviceaccounts", names::GARDEN_NAMESPACE, "gardenlet-bootstrap-s"),
            request(
                "s",
                "delete",
                "clusterrolebindings",
                "",
                "gardener.cloud:system:seed-bootstrapper:garden:gardenlet-bootstrap-s",
            ),
            request("s", "delete", "secrets", names::KUBE_SYSTEM_NAMESPACE, &bootstrap_token_secret_name("s")),
        ];
        for attrs in &allowed {
            assert_eq!(authorizer.authorize(attrs).0, Decision::Allow, "{:?}", attrs);
        }

        let denied = [
            request("s", "update", "leases", names::SEED_LEASE_NAMESPACE, "t"),
            request("s", "get", "namespaces", "", "garden-foo"),
            request("s", "delete", "serviceaccounts", names::GARDEN_NAMESPACE, "gardenlet-bootstrap-t"),
        ];
        for attrs in &denied {
            assert_eq!(authorizer.authorize(attrs).0, Decision::NoOpinion, "{:?}", attrs);
        }
    }

    #[test]
    fn test_delete_of_unknown_object_is_allowed() {
        let graph = Arc::new(Graph::new());
        let authorizer = SeedAuthorizer::new(graph.clone());
        let attrs = request("s", "delete", "shootstates", "garden-foo", "bar");
        assert_eq!(authorizer.authorize(&attrs).0, Decision::Allow);

        graph.observe(&shoot_with_dns_secret("sec", "t"));
        assert_eq!(authorizer.authorize(&attrs).0, Decision::NoOpinion);
    }

    #[test]
    fn test_bootstrap_token_name_is_stable() {
        let name = bootstrap_token_secret_name("s");
        assert_eq!(name.len(), "bootstrap-token-".len() + 6);
        assert_eq!(name, bootstrap_token_secret_name("s"));
        assert_ne!(name, bootstrap_token_secret_name("t"));
    }
}
