// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking utilities

use super::cluster::ClusterClient;
use crate::constants::crd::{POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS};
use crate::error::Result;
use kube::api::GroupVersionKind;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Wait until every kind in `kinds` is served by the cluster.
///
/// Polls with exponential backoff starting at [`POLL_INTERVAL_SECS`] seconds.
pub async fn wait_for_crds(client: &dyn ClusterClient, kinds: &[GroupVersionKind]) -> Result<()> {
    wait_for_crds_with_interval(client, kinds, Duration::from_secs(POLL_INTERVAL_SECS)).await
}

async fn wait_for_crds_with_interval(
    client: &dyn ClusterClient,
    kinds: &[GroupVersionKind],
    initial: Duration,
) -> Result<()> {
    let mut interval = initial;

    loop {
        match missing_kinds(client, kinds).await {
            Ok(missing) if missing.is_empty() => {
                info!(count = kinds.len(), "All required CRDs are available");
                return Ok(());
            }
            Ok(missing) => {
                info!(
                    "CRDs {:?} not yet available, waiting {} seconds...",
                    missing,
                    interval.as_secs_f64()
                );
                client.refresh_discovery();
            }
            Err(e) => {
                warn!(
                    "Error checking for CRDs: {}, retrying in {} seconds...",
                    e,
                    interval.as_secs_f64()
                );
            }
        }

        sleep(interval).await;

        // Exponential backoff with max cap
        interval = (interval * 2).min(Duration::from_secs(POLL_MAX_INTERVAL_SECS));
    }
}

async fn missing_kinds(client: &dyn ClusterClient, kinds: &[GroupVersionKind]) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for gvk in kinds {
        if client.resolve(gvk).await?.is_none() {
            missing.push(format!("{}/{}", gvk.group, gvk.kind));
        }
    }
    Ok(missing)
}
