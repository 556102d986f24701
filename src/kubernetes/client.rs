// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Client creation for the source (garden) and target (seed) clusters

use crate::config::ClientConnection;
use crate::error::{GardenerError, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use tracing::{info, instrument};

/// Create a client for a configured connection.
///
/// Without a kubeconfig path the in-cluster or default kubeconfig is used.
#[instrument(skip(connection), fields(kubeconfig = ?connection.kubeconfig))]
pub async fn create_client(connection: &ClientConnection) -> Result<Client> {
    let Some(path) = connection.kubeconfig.as_ref() else {
        info!("Using inferred kubeconfig");
        return Client::try_default().await.map_err(|e| {
            GardenerError::KubeconfigError(format!("Failed to infer config: {}", e))
        });
    };

    let raw = std::fs::read_to_string(path).map_err(|e| {
        GardenerError::KubeconfigError(format!("Failed to read {}: {}", path.display(), e))
    })?;
    info!("Using kubeconfig from {}", path.display());
    client_from_kubeconfig(&raw).await
}

/// Create a client from the contents of a kubeconfig document.
pub async fn client_from_kubeconfig(kubeconfig: &str) -> Result<Client> {
    let parsed: Kubeconfig = serde_yaml::from_str(kubeconfig)
        .map_err(|e| GardenerError::KubeconfigError(format!("Failed to parse kubeconfig: {}", e)))?;

    let client_config = kube::Config::from_custom_kubeconfig(parsed, &KubeConfigOptions::default())
        .await
        .map_err(|e| GardenerError::KubeconfigError(format!("Failed to create config: {}", e)))?;

    Client::try_from(client_config)
        .map_err(|e| GardenerError::KubeconfigError(format!("Failed to create client: {}", e)))
}
