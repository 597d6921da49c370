// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The backing-store contract and the stores composed on top of it.

pub mod aggregate;
pub mod transform;

use crate::error::Result;
use crate::types::{ApiContext, Event, EventChannel, QueryOptions, Schema, StorageContext};
use async_trait::async_trait;

pub use aggregate::AggregateStore;
pub use transform::TransformStore;

/// CRUD, List and Watch over one resource type
#[async_trait]
pub trait Store: Send + Sync {
    fn context(&self) -> StorageContext;

    async fn by_id(&self, ctx: &ApiContext, schema: &Schema, id: &str) -> Result<Event>;

    async fn list(
        &self,
        ctx: &ApiContext,
        schema: &Schema,
        opts: &QueryOptions,
    ) -> Result<Vec<Event>>;

    async fn create(&self, ctx: &ApiContext, schema: &Schema, data: Event) -> Result<Event>;

    async fn update(
        &self,
        ctx: &ApiContext,
        schema: &Schema,
        data: Event,
        id: &str,
    ) -> Result<Event>;

    async fn delete(&self, ctx: &ApiContext, schema: &Schema, id: &str) -> Result<Event>;

    /// Stream of changes. The channel closes when the stream ends or the
    /// context is cancelled.
    async fn watch(
        &self,
        ctx: &ApiContext,
        schema: &Schema,
        opts: &QueryOptions,
    ) -> Result<EventChannel>;
}
