// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The `workload` type: every pod-managing kind behind one aggregate store.

use crate::constants::{fields, options};
use crate::error::Result;
use crate::kubernetes::KubeStore;
use crate::store::{AggregateStore, Store, TransformStore};
use crate::types::{Event, QueryOptions, Schema};
use crate::watch::{Broadcaster, WatchShare};
use kube::api::{ApiResource, GroupVersionKind};
use kube::Client;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A Kubernetes kind served as part of the workload type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadKind {
    pub schema_id: &'static str,
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
}

impl WorkloadKind {
    pub fn schema(&self) -> Schema {
        Schema::new(self.schema_id)
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(self.group, self.version, self.kind))
    }
}

pub const DEFAULT_WORKLOAD_TYPE: &str = "deployment";

/// Workload kinds, in create discriminator order
pub const WORKLOAD_KINDS: &[WorkloadKind] = &[
    WorkloadKind {
        schema_id: "deployment",
        group: "apps",
        version: "v1",
        kind: "Deployment",
    },
    WorkloadKind {
        schema_id: "replicationController",
        group: "",
        version: "v1",
        kind: "ReplicationController",
    },
    WorkloadKind {
        schema_id: "replicaSet",
        group: "apps",
        version: "v1",
        kind: "ReplicaSet",
    },
    WorkloadKind {
        schema_id: "daemonSet",
        group: "apps",
        version: "v1",
        kind: "DaemonSet",
    },
    WorkloadKind {
        schema_id: "statefulSet",
        group: "apps",
        version: "v1",
        kind: "StatefulSet",
    },
    WorkloadKind {
        schema_id: "job",
        group: "batch",
        version: "v1",
        kind: "Job",
    },
    WorkloadKind {
        schema_id: "cronJob",
        group: "batch",
        version: "v1",
        kind: "CronJob",
    },
];

pub fn workload_schema() -> Schema {
    Schema::new("workload")
}

/// Presentation fields every workload carries. Server-managed field
/// bookkeeping is only kept on direct lookups.
pub fn present_workload(
    _schema: &Schema,
    mut event: Event,
    opts: &QueryOptions,
) -> Option<Event> {
    let metadata = event.get_mut("metadata").and_then(Value::as_object_mut)?;
    if !opts.is_set(options::BY_ID) {
        metadata.remove("managedFields");
    }
    let name = metadata.get("name").cloned();
    let namespace = metadata.get("namespace").cloned();
    if let Some(name) = name {
        event.insert(fields::NAME.to_string(), name);
    }
    if let Some(namespace) = namespace {
        event.insert(fields::NAMESPACE_ID.to_string(), namespace);
    }
    Some(event)
}

/// Build the workload store: one shared-watch Kubernetes store per kind.
/// Upstream watches stay open until `close` is cancelled.
pub fn workload_store(
    client: Client,
    namespace: Option<String>,
    close: CancellationToken,
    subscriber_buffer: usize,
) -> Result<AggregateStore> {
    let backings = WORKLOAD_KINDS
        .iter()
        .map(|kind| {
            let store = KubeStore::new(client.clone(), kind.api_resource(), true)
                .in_namespace(namespace.clone());
            let presented = TransformStore::new(Arc::new(store), present_workload);
            let shared = WatchShare::with_broadcaster(
                Arc::new(presented),
                close.clone(),
                Broadcaster::with_capacity(subscriber_buffer),
            );
            (kind.schema(), Arc::new(shared) as Arc<dyn Store>)
        })
        .collect();

    let store = AggregateStore::new(DEFAULT_WORKLOAD_TYPE, backings)?;
    info!(
        "Workload store ready with {} kinds (namespace: {})",
        store.types().len(),
        namespace.as_deref().unwrap_or("all")
    );
    Ok(store)
}
