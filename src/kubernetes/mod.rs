// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for cluster access, CRD discovery, client creation, and namespace management.

pub mod client;
pub mod cluster;
pub mod crd;
pub mod finalizers;
pub mod namespaces;
pub mod typed;

pub use client::{client_from_kubeconfig, create_client};
pub use cluster::{ClusterClient, KubeClusterClient, Mapping};
pub use crd::wait_for_crds;
pub use finalizers::{add_finalizer, has_finalizer, remove_finalizer};
pub use namespaces::{delete_namespace, ensure_namespace};
