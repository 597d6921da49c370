// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Resource, context and identifier types shared by the stores.

pub mod id;
pub mod resource;

pub use resource::{ApiContext, Event, EventChannel, QueryOptions, Schema, StorageContext};
