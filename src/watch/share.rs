// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Shares one upstream watch of a backing store between all watchers.

use crate::error::Result;
use crate::store::Store;
use crate::types::{ApiContext, Event, EventChannel, QueryOptions, Schema, StorageContext};
use crate::watch::Broadcaster;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Wraps a store so that concurrent watches collapse into a single
/// upstream watch. The upstream watch lives as long as `close` is not
/// cancelled and the wrapped store keeps its stream open, independent of
/// any one caller's request.
pub struct WatchShare {
    store: Arc<dyn Store>,
    close: CancellationToken,
    broadcaster: Broadcaster,
}

impl WatchShare {
    pub fn new(store: Arc<dyn Store>, close: CancellationToken) -> Self {
        Self::with_broadcaster(store, close, Broadcaster::new())
    }

    pub fn with_broadcaster(
        store: Arc<dyn Store>,
        close: CancellationToken,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            store,
            close,
            broadcaster,
        }
    }
}

#[async_trait]
impl Store for WatchShare {
    fn context(&self) -> StorageContext {
        self.store.context()
    }

    async fn by_id(&self, ctx: &ApiContext, schema: &Schema, id: &str) -> Result<Event> {
        self.store.by_id(ctx, schema, id).await
    }

    async fn list(
        &self,
        ctx: &ApiContext,
        schema: &Schema,
        opts: &QueryOptions,
    ) -> Result<Vec<Event>> {
        self.store.list(ctx, schema, opts).await
    }

    async fn create(&self, ctx: &ApiContext, schema: &Schema, data: Event) -> Result<Event> {
        self.store.create(ctx, schema, data).await
    }

    async fn update(
        &self,
        ctx: &ApiContext,
        schema: &Schema,
        data: Event,
        id: &str,
    ) -> Result<Event> {
        self.store.update(ctx, schema, data, id).await
    }

    async fn delete(&self, ctx: &ApiContext, schema: &Schema, id: &str) -> Result<Event> {
        self.store.delete(ctx, schema, id).await
    }

    #[instrument(skip_all, fields(schema = %schema.id))]
    async fn watch(
        &self,
        ctx: &ApiContext,
        schema: &Schema,
        _opts: &QueryOptions,
    ) -> Result<EventChannel> {
        let store = self.store.clone();
        let upstream_ctx = ApiContext::with_cancel(self.close.clone());
        let schema = schema.clone();

        self.broadcaster
            .subscribe(ctx.cancel_token().clone(), move || async move {
                debug!(schema = %schema.id, "Opening shared upstream watch");
                store
                    .watch(&upstream_ctx, &schema, &QueryOptions::default())
                    .await
            })
            .await
    }
}
