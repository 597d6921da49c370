// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Client creation for the cluster whose workloads are served

use crate::config::Config;
use crate::error::{Result, StoreError};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use std::path::Path;
use tracing::{info, instrument};

/// Create a client for the user cluster: from the configured kubeconfig
/// file when set, otherwise from the environment.
pub async fn create_client(config: &Config) -> Result<Client> {
    match &config.downstream_kubeconfig {
        Some(path) => create_client_from_file(path).await,
        None => {
            info!("Using in-cluster or default kubeconfig");
            Ok(Client::try_default().await?)
        }
    }
}

#[instrument]
async fn create_client_from_file(path: &Path) -> Result<Client> {
    let kubeconfig = tokio::fs::read_to_string(path).await.map_err(|e| {
        StoreError::Kubeconfig(format!("Failed to read {}: {}", path.display(), e))
    })?;
    info!("Loaded downstream kubeconfig");
    create_client_from_kubeconfig(&kubeconfig).await
}

/// Create a Kubernetes client from a kubeconfig string
pub async fn create_client_from_kubeconfig(kubeconfig: &str) -> Result<Client> {
    let kubeconfig_parsed: Kubeconfig = serde_yaml::from_str(kubeconfig)
        .map_err(|e| StoreError::Kubeconfig(format!("Failed to parse kubeconfig: {}", e)))?;

    let client_config =
        kube::Config::from_custom_kubeconfig(kubeconfig_parsed, &KubeConfigOptions::default())
            .await
            .map_err(|e| StoreError::Kubeconfig(format!("Failed to create config: {}", e)))?;

    Client::try_from(client_config)
        .map_err(|e| StoreError::Kubeconfig(format!("Failed to create client: {}", e)))
}
