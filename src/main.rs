// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use workload_watch::config::Config;
use workload_watch::constants::{fields, options};
use workload_watch::kubernetes::{create_client, workload_schema, workload_store};
use workload_watch::store::Store;
use workload_watch::types::{ApiContext, QueryOptions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting workload watch");

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: namespace={}, show_hidden={}",
        config.watch_namespace.as_deref().unwrap_or("all"),
        config.show_hidden
    );

    let client = create_client(&config)
        .await
        .context("failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    // Closing this token tears down every shared upstream watch
    let shutdown = CancellationToken::new();
    let store = workload_store(
        client,
        config.watch_namespace.clone(),
        shutdown.clone(),
        config.subscriber_buffer,
    )?;
    let schema = workload_schema();

    let mut opts = QueryOptions::new();
    if config.show_hidden {
        opts = opts.with_option(options::HIDDEN, "true");
    }

    let request = ApiContext::new();
    let workloads = store
        .list(&request, &schema, &opts)
        .await
        .context("failed to list workloads")?;
    info!("Found {} workloads", workloads.len());
    for workload in &workloads {
        debug!(
            "Workload {}",
            workload.get(fields::ID).and_then(|v| v.as_str()).unwrap_or("<unknown>")
        );
    }

    let mut events = store
        .watch(&request, &schema, &opts)
        .await
        .context("failed to watch workloads")?;
    info!("Watching workloads...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            event = events.recv() => match event {
                Some(event) => {
                    let id = event.get(fields::ID).and_then(|v| v.as_str()).unwrap_or("<unknown>");
                    if event.get(fields::REMOVED).is_some_and(|v| v.as_bool() == Some(true)) {
                        info!("Workload removed: {}", id);
                    } else {
                        info!("Workload changed: {}", id);
                    }
                }
                None => {
                    warn!("Workload watch closed");
                    break;
                }
            }
        }
    }

    request.cancel_token().cancel();
    shutdown.cancel();
    Ok(())
}
