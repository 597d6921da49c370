// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes-backed stores, client creation and the workload type.

pub mod client;
pub mod store;
pub mod workload;

pub use client::create_client;
pub use store::KubeStore;
pub use workload::{workload_schema, workload_store, WORKLOAD_KINDS};
