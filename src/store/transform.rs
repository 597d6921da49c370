// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Store decorator that rewrites or filters every item it returns.

use crate::constants::{fields, options, SUBSCRIBER_BUFFER};
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{ApiContext, Event, EventChannel, QueryOptions, Schema, StorageContext};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Maps an item to its presented form, or drops it with `None`
pub type TransformFn = dyn Fn(&Schema, Event, &QueryOptions) -> Option<Event> + Send + Sync;

pub struct TransformStore {
    store: Arc<dyn Store>,
    transform: Arc<TransformFn>,
}

impl TransformStore {
    pub fn new<F>(store: Arc<dyn Store>, transform: F) -> Self
    where
        F: Fn(&Schema, Event, &QueryOptions) -> Option<Event> + Send + Sync + 'static,
    {
        Self {
            store,
            transform: Arc::new(transform),
        }
    }

    fn apply(&self, schema: &Schema, event: Event, opts: &QueryOptions) -> Option<Event> {
        (self.transform)(schema, event, opts)
    }
}

fn event_id(event: &Event) -> String {
    event
        .get(fields::ID)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Store for TransformStore {
    fn context(&self) -> StorageContext {
        self.store.context()
    }

    async fn by_id(&self, ctx: &ApiContext, schema: &Schema, id: &str) -> Result<Event> {
        let event = self.store.by_id(ctx, schema, id).await?;
        let opts = QueryOptions::new().with_option(options::BY_ID, "true");
        self.apply(schema, event, &opts)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(
        &self,
        ctx: &ApiContext,
        schema: &Schema,
        opts: &QueryOptions,
    ) -> Result<Vec<Event>> {
        let items = self.store.list(ctx, schema, opts).await?;
        Ok(items
            .into_iter()
            .filter_map(|item| self.apply(schema, item, opts))
            .collect())
    }

    async fn create(&self, ctx: &ApiContext, schema: &Schema, data: Event) -> Result<Event> {
        let event = self.store.create(ctx, schema, data).await?;
        let id = event_id(&event);
        self.apply(schema, event, &QueryOptions::default())
            .ok_or(StoreError::NotFound(id))
    }

    async fn update(
        &self,
        ctx: &ApiContext,
        schema: &Schema,
        data: Event,
        id: &str,
    ) -> Result<Event> {
        let event = self.store.update(ctx, schema, data, id).await?;
        self.apply(schema, event, &QueryOptions::default())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn delete(&self, ctx: &ApiContext, schema: &Schema, id: &str) -> Result<Event> {
        self.store.delete(ctx, schema, id).await
    }

    async fn watch(
        &self,
        ctx: &ApiContext,
        schema: &Schema,
        opts: &QueryOptions,
    ) -> Result<EventChannel> {
        let mut upstream = self.store.watch(ctx, schema, opts).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let transform = self.transform.clone();
        let schema = schema.clone();
        let opts = opts.clone();

        tokio::spawn(
            async move {
                while let Some(event) = upstream.recv().await {
                    let Some(event) = transform(&schema, event, &opts) else {
                        continue;
                    };
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
            .in_current_span(),
        );

        Ok(rx)
    }
}
