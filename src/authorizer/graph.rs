// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Directed graph of object relationships in the garden cluster.
//!
//! An edge `a -> b` means "a is used by b". Every edge is owned by the object
//! whose spec declared it, so updating or deleting that object replaces exactly
//! its edges.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VertexType {
    BackupBucket,
    BackupEntry,
    Bastion,
    CertificateSigningRequest,
    CloudProfile,
    ClusterRoleBinding,
    ConfigMap,
    ControllerInstallation,
    ControllerRegistration,
    Lease,
    ManagedSeed,
    Namespace,
    Project,
    Secret,
    SecretBinding,
    Seed,
    ServiceAccount,
    Shoot,
    ShootState,
}

impl fmt::Display for VertexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// `(type, namespace, name)`; cluster-scoped objects have an empty namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vertex {
    pub vertex_type: VertexType,
    pub namespace: String,
    pub name: String,
}

impl Vertex {
    pub fn new(vertex_type: VertexType, namespace: &str, name: &str) -> Self {
        Self {
            vertex_type,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn cluster(vertex_type: VertexType, name: &str) -> Self {
        Self::new(vertex_type, "", name)
    }
}

impl fmt::Display for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}:{}", self.vertex_type, self.name)
        } else {
            write!(f, "{}:{}/{}", self.vertex_type, self.namespace, self.name)
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// from -> to -> owners of the edge
    edges_out: HashMap<Vertex, HashMap<Vertex, BTreeSet<Vertex>>>,
    /// to -> from
    edges_in: HashMap<Vertex, HashSet<Vertex>>,
    /// owner -> edges it declared
    owned: HashMap<Vertex, Vec<(Vertex, Vertex)>>,
}

impl Inner {
    fn add_edge(&mut self, owner: &Vertex, from: Vertex, to: Vertex) {
        if from == to {
            return;
        }
        self.edges_in.entry(to.clone()).or_default().insert(from.clone());
        self.edges_out
            .entry(from.clone())
            .or_default()
            .entry(to.clone())
            .or_default()
            .insert(owner.clone());
        self.owned.entry(owner.clone()).or_default().push((from, to));
    }

    fn remove_owned(&mut self, owner: &Vertex) {
        let Some(edges) = self.owned.remove(owner) else {
            return;
        };
        for (from, to) in edges {
            let Some(targets) = self.edges_out.get_mut(&from) else {
                continue;
            };
            let mut gone = false;
            if let Some(owners) = targets.get_mut(&to) {
                owners.remove(owner);
                if owners.is_empty() {
                    targets.remove(&to);
                    gone = true;
                }
            }
            if targets.is_empty() {
                self.edges_out.remove(&from);
            }
            if gone {
                if let Some(sources) = self.edges_in.get_mut(&to) {
                    sources.remove(&from);
                    if sources.is_empty() {
                        self.edges_in.remove(&to);
                    }
                }
            }
        }
    }

    fn has_vertex(&self, vertex: &Vertex) -> bool {
        self.edges_out.contains_key(vertex) || self.edges_in.contains_key(vertex)
    }
}

/// Thread-safe relationship graph. Writers are the informer handlers, readers
/// the authorization decisions.
#[derive(Debug, Default)]
pub struct Graph {
    inner: RwLock<Inner>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all edges declared by `owner` with `edges`.
    pub fn set_edges(&self, owner: &Vertex, edges: Vec<(Vertex, Vertex)>) {
        let mut inner = self.inner.write();
        inner.remove_owned(owner);
        for (from, to) in edges {
            inner.add_edge(owner, from, to);
        }
    }

    /// Drop all edges declared by `owner`.
    pub fn remove_owner(&self, owner: &Vertex) {
        self.inner.write().remove_owned(owner);
    }

    pub fn has_vertex(&self, vertex: &Vertex) -> bool {
        self.inner.read().has_vertex(vertex)
    }

    pub fn has_edge(&self, from: &Vertex, to: &Vertex) -> bool {
        self.inner
            .read()
            .edges_out
            .get(from)
            .is_some_and(|targets| targets.contains_key(to))
    }

    /// Whether `to` is reachable from `from` along the edge direction.
    pub fn has_path(&self, from: &Vertex, to: &Vertex) -> bool {
        let inner = self.inner.read();
        if from == to {
            return inner.has_vertex(from);
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            let Some(targets) = inner.edges_out.get(current) else {
                continue;
            };
            for next in targets.keys() {
                if next == to {
                    return true;
                }
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().edges_out.values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(name: &str) -> Vertex {
        Vertex::new(VertexType::Secret, "garden-dev", name)
    }

    fn shoot(name: &str) -> Vertex {
        Vertex::new(VertexType::Shoot, "garden-dev", name)
    }

    fn seed(name: &str) -> Vertex {
        Vertex::cluster(VertexType::Seed, name)
    }

    #[test]
    fn test_path_through_intermediate_vertex() {
        let graph = Graph::new();
        let owner = shoot("a");
        graph.set_edges(
            &owner,
            vec![(secret("dns"), shoot("a")), (shoot("a"), seed("s1"))],
        );

        assert!(graph.has_path(&secret("dns"), &seed("s1")));
        assert!(!graph.has_path(&secret("dns"), &seed("s2")));
        assert!(!graph.has_path(&seed("s1"), &secret("dns")));
    }

    #[test]
    fn test_set_edges_replaces_previous_edges_of_owner() {
        let graph = Graph::new();
        let owner = shoot("a");
        graph.set_edges(&owner, vec![(shoot("a"), seed("s1"))]);
        graph.set_edges(&owner, vec![(shoot("a"), seed("s2"))]);

        assert!(!graph.has_edge(&shoot("a"), &seed("s1")));
        assert!(graph.has_edge(&shoot("a"), &seed("s2")));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_shared_edges_survive_removal_of_one_owner() {
        let graph = Graph::new();
        let binding = Vertex::new(VertexType::SecretBinding, "garden-dev", "b");
        graph.set_edges(&shoot("a"), vec![(binding.clone(), shoot("a"))]);
        graph.set_edges(&binding, vec![(secret("creds"), binding.clone())]);
        graph.set_edges(&shoot("x"), vec![(secret("creds"), binding.clone())]);

        graph.remove_owner(&shoot("x"));
        assert!(graph.has_edge(&secret("creds"), &binding));
        graph.remove_owner(&binding);
        assert!(!graph.has_edge(&secret("creds"), &binding));
        assert!(!graph.has_vertex(&secret("creds")));
        assert!(graph.has_vertex(&binding));
    }
}
