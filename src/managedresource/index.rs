// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Lookup of previously applied objects, group/kind equivalences and apply order.

use crate::types::{GroupKind, ObjectReference};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Group/kind pairs served under more than one API group.
const DEFAULT_EQUIVALENCES: &[&[(&str, &str)]] = &[
    &[("apps", "Deployment"), ("extensions", "Deployment")],
    &[("apps", "DaemonSet"), ("extensions", "DaemonSet")],
    &[("apps", "ReplicaSet"), ("extensions", "ReplicaSet")],
    &[("networking.k8s.io", "NetworkPolicy"), ("extensions", "NetworkPolicy")],
    &[("networking.k8s.io", "Ingress"), ("extensions", "Ingress")],
    &[("policy", "PodSecurityPolicy"), ("extensions", "PodSecurityPolicy")],
];

/// Equivalence classes of group/kind pairs.
#[derive(Debug, Clone, Default)]
pub struct Equivalences {
    classes: HashMap<GroupKind, BTreeSet<GroupKind>>,
}

impl Equivalences {
    /// The built-in classes extended with `additional` ones.
    pub fn new(additional: &[Vec<GroupKind>]) -> Self {
        let mut equivalences = Self::default();
        for class in DEFAULT_EQUIVALENCES {
            let class: Vec<GroupKind> = class.iter().map(|(g, k)| GroupKind::new(g, k)).collect();
            equivalences.add(&class);
        }
        for class in additional {
            equivalences.add(class);
        }
        equivalences
    }

    fn add(&mut self, class: &[GroupKind]) {
        let mut members: BTreeSet<GroupKind> = class.iter().cloned().collect();
        // merge with classes any member already belongs to
        for gk in class {
            if let Some(existing) = self.classes.get(gk) {
                members.extend(existing.iter().cloned());
            }
        }
        for gk in &members {
            self.classes.insert(gk.clone(), members.clone());
        }
    }

    /// All group/kinds equivalent to `gk`, including itself.
    pub fn equivalents(&self, gk: &GroupKind) -> Vec<GroupKind> {
        match self.classes.get(gk) {
            Some(class) => class.iter().cloned().collect(),
            None => vec![gk.clone()],
        }
    }

    /// A stable representative of the class of `gk`.
    pub fn canonical(&self, gk: &GroupKind) -> GroupKind {
        self.classes
            .get(gk)
            .and_then(|class| class.iter().next().cloned())
            .unwrap_or_else(|| gk.clone())
    }

    /// Key of an object that is identical for all equivalent group/kinds.
    pub fn canonical_key(&self, gk: &GroupKind, namespace: &str, name: &str) -> String {
        let canonical = self.canonical(gk);
        format!("{}/{}/{}/{}", canonical.group, canonical.kind, namespace, name)
    }
}

fn key(group: &str, kind: &str, namespace: &str, name: &str) -> String {
    format!("{}/{}/{}/{}", group, kind, namespace, name)
}

/// Index over the references recorded in a ManagedResource's status.
///
/// Every successful lookup marks the reference as found; the rest are the
/// objects to prune.
pub struct ObjectIndex<'a> {
    references: &'a [ObjectReference],
    by_key: HashMap<String, usize>,
    found: HashSet<usize>,
    equivalences: &'a Equivalences,
}

impl<'a> ObjectIndex<'a> {
    pub fn new(references: &'a [ObjectReference], equivalences: &'a Equivalences) -> Self {
        let by_key = references
            .iter()
            .enumerate()
            .map(|(i, r)| (r.key(), i))
            .collect();
        Self {
            references,
            by_key,
            found: HashSet::new(),
            equivalences,
        }
    }

    /// Find the previous reference of an object, also under equivalent group/kinds.
    pub fn lookup(&mut self, gk: &GroupKind, namespace: &str, name: &str) -> Option<&'a ObjectReference> {
        let exact = key(&gk.group, &gk.kind, namespace, name);
        let index = self.by_key.get(&exact).copied().or_else(|| {
            self.equivalences
                .equivalents(gk)
                .iter()
                .find_map(|eq| self.by_key.get(&key(&eq.group, &eq.kind, namespace, name)).copied())
        })?;
        self.found.insert(index);
        Some(&self.references[index])
    }

    /// References that were not looked up, in status order.
    pub fn unfound(&self) -> Vec<&'a ObjectReference> {
        self.references
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.found.contains(i))
            .map(|(_, r)| r)
            .collect()
    }
}

/// Apply order of a kind; lower values are applied first.
pub fn kind_priority(group: &str, kind: &str) -> u8 {
    match (group, kind) {
        ("", "Namespace") => 0,
        ("apiextensions.k8s.io", "CustomResourceDefinition") => 1,
        ("", "ServiceAccount") | ("", "Secret") | ("", "ConfigMap") => 2,
        ("rbac.authorization.k8s.io", "ClusterRole") | ("rbac.authorization.k8s.io", "Role") => 3,
        ("rbac.authorization.k8s.io", "ClusterRoleBinding")
        | ("rbac.authorization.k8s.io", "RoleBinding") => 4,
        ("", "Service") => 5,
        (_, "Deployment") | (_, "StatefulSet") | (_, "DaemonSet") | (_, "ReplicaSet") | ("batch", _) => 6,
        ("policy", "PodDisruptionBudget") => 8,
        _ => 7,
    }
}
