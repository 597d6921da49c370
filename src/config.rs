// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::SUBSCRIBER_BUFFER;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Only serve workloads from this namespace
    pub watch_namespace: Option<String>,
    /// Kubeconfig of the user cluster; the default client is used when unset
    pub downstream_kubeconfig: Option<PathBuf>,
    /// Include workloads owned by other resources
    pub show_hidden: bool,
    /// Capacity of each watch subscriber channel
    pub subscriber_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            downstream_kubeconfig: None,
            show_hidden: false,
            subscriber_buffer: SUBSCRIBER_BUFFER,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let watch_namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty());
        let downstream_kubeconfig = lookup("DOWNSTREAM_KUBECONFIG")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        let show_hidden: bool = lookup("SHOW_HIDDEN")
            .unwrap_or("false".to_string())
            .parse()
            .unwrap_or(false);
        let subscriber_buffer = match lookup("SUBSCRIBER_BUFFER") {
            Some(value) => value
                .parse()
                .with_context(|| format!("SUBSCRIBER_BUFFER is not a number: {}", value))?,
            None => SUBSCRIBER_BUFFER,
        };

        Ok(Config {
            watch_namespace,
            downstream_kubeconfig,
            show_hidden,
            subscriber_buffer,
        })
    }
}
