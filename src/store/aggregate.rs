// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Presents several backing stores as one virtual resource type.
//!
//! Every identifier handed out is prefixed with the lower-cased name of the
//! backing type it came from (`deployment:default:nginx`), and incoming
//! identifiers are split on that prefix to find the backing store again.

use crate::constants::{fields, MERGED_WATCH_BUFFER};
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::id::{add_type_prefix, decompose};
use crate::types::{ApiContext, Event, EventChannel, QueryOptions, Schema, StorageContext};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn, Instrument};

/// A backing store and the schema it serves
#[derive(Clone)]
struct Backing {
    store: Arc<dyn Store>,
    schema: Schema,
}

pub struct AggregateStore {
    /// Type keys in registration order; also the create discriminator order
    order: Vec<String>,
    stores: HashMap<String, Arc<dyn Store>>,
    schemas: HashMap<String, Schema>,
    default_type: String,
}

impl AggregateStore {
    /// Build the registries from (schema, store) pairs. `default_type` picks
    /// the store for creates that name no type.
    pub fn new(default_type: &str, backings: Vec<(Schema, Arc<dyn Store>)>) -> Result<Self> {
        let mut order = Vec::with_capacity(backings.len());
        let mut stores = HashMap::new();
        let mut schemas = HashMap::new();

        for (schema, store) in backings {
            let key = schema.type_key();
            if stores.contains_key(&key) {
                return Err(StoreError::Config(format!("duplicate type {}", key)));
            }
            order.push(key.clone());
            stores.insert(key.clone(), store);
            schemas.insert(key, schema);
        }

        let default_type = default_type.to_lowercase();
        if !stores.contains_key(&default_type) {
            return Err(StoreError::Config(format!(
                "default type {} is not registered",
                default_type
            )));
        }

        Ok(Self {
            order,
            stores,
            schemas,
            default_type,
        })
    }

    /// Registered type keys, in registration order
    pub fn types(&self) -> &[String] {
        &self.order
    }

    pub fn default_type(&self) -> &str {
        &self.default_type
    }

    fn backing(&self, type_name: &str) -> Result<Backing> {
        match (self.stores.get(type_name), self.schemas.get(type_name)) {
            (Some(store), Some(schema)) => Ok(Backing {
                store: store.clone(),
                schema: schema.clone(),
            }),
            _ => Err(StoreError::UnknownType(type_name.to_string())),
        }
    }

    fn backings(&self) -> Vec<(String, Backing)> {
        self.order
            .iter()
            .filter_map(|key| self.backing(key).ok().map(|b| (key.clone(), b)))
            .collect()
    }

    /// Resolve a composite id to its backing store and the backing id
    fn route<'a>(&self, id: &'a str) -> Result<(&'a str, Backing)> {
        let (type_name, backing_id) = decompose(id);
        Ok((backing_id, self.backing(type_name)?))
    }

    /// Type selected by the first discriminator field present on the data
    fn create_type(&self, data: &Event) -> &str {
        self.order
            .iter()
            .find(|key| {
                self.schemas.get(*key).is_some_and(|schema| {
                    data.get(&schema.discriminator_field())
                        .is_some_and(|v| !v.is_null())
                })
            })
            .map(String::as_str)
            .unwrap_or(&self.default_type)
    }
}

/// Items owned by another resource are hidden unless asked for
fn is_visible(event: &Event, opts: &QueryOptions) -> bool {
    if opts.include_hidden() {
        return true;
    }
    match event.get(fields::OWNER_REFERENCES) {
        None | Some(Value::Null) => true,
        Some(Value::Array(refs)) => refs.is_empty(),
        Some(Value::Object(refs)) => refs.is_empty(),
        Some(Value::String(refs)) => refs.is_empty(),
        Some(_) => true,
    }
}

/// List one backing store into the shared items channel
async fn list_feeder(
    key: String,
    backing: Backing,
    group: ApiContext,
    opts: QueryOptions,
    items_tx: mpsc::UnboundedSender<Event>,
) -> Result<()> {
    let items = tokio::select! {
        _ = group.cancel_token().cancelled() => return Err(StoreError::Cancelled),
        res = backing.store.list(&group, &backing.schema, &opts) => res?,
    };
    debug!(backing = %key, count = items.len(), "Listed backing store");
    for item in items {
        if group.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if !is_visible(&item, &opts) {
            continue;
        }
        if items_tx.send(add_type_prefix(&backing.schema.id, item)).is_err() {
            return Err(StoreError::Cancelled);
        }
    }
    Ok(())
}

/// Pipe one backing store's watch into the merged channel. Always ends
/// with an error: `Disconnect` when the backing stream closes.
async fn watch_feeder(
    key: String,
    backing: Backing,
    group: ApiContext,
    opts: QueryOptions,
    merged_tx: mpsc::Sender<Event>,
) -> Result<()> {
    let mut events = match backing.store.watch(&group, &backing.schema, &opts).await {
        Ok(events) => events,
        Err(e) => {
            warn!(backing = %key, "Failed to open watch: {}", e);
            return Err(e);
        }
    };
    loop {
        let event = tokio::select! {
            _ = group.cancel_token().cancelled() => return Err(StoreError::Cancelled),
            event = events.recv() => match event {
                Some(event) => event,
                None => return Err(StoreError::Disconnect),
            },
        };
        if !is_visible(&event, &opts) {
            continue;
        }
        let event = add_type_prefix(&backing.schema.id, event);
        tokio::select! {
            _ = group.cancel_token().cancelled() => return Err(StoreError::Cancelled),
            sent = merged_tx.send(event) => {
                if sent.is_err() {
                    return Err(StoreError::Cancelled);
                }
            }
        }
    }
}

/// Cancel the group once any feeder returns or panics, or the merged
/// receiver is dropped. Returns after every feeder has finished.
async fn supervise_feeders(
    mut tasks: JoinSet<Result<()>>,
    group: ApiContext,
    merged_tx: mpsc::Sender<Event>,
) {
    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    debug!("Feeder finished: {}", e);
                    group.cancel_token().cancel();
                }
                Some(Err(e)) => {
                    warn!("Feeder failed: {}", e);
                    group.cancel_token().cancel();
                }
                None => break,
            },
            _ = merged_tx.closed(), if !group.is_cancelled() => {
                group.cancel_token().cancel();
            }
        }
    }
    debug!("All feeders finished, closing merged watch");
}

#[async_trait]
impl Store for AggregateStore {
    fn context(&self) -> StorageContext {
        StorageContext::User
    }

    #[instrument(skip(self, ctx, _schema))]
    async fn by_id(&self, ctx: &ApiContext, _schema: &Schema, id: &str) -> Result<Event> {
        let (backing_id, backing) = self.route(id)?;
        let event = backing.store.by_id(ctx, &backing.schema, backing_id).await?;
        Ok(add_type_prefix(&backing.schema.id, event))
    }

    #[instrument(skip_all, fields(schema = %schema.id))]
    async fn list(
        &self,
        ctx: &ApiContext,
        schema: &Schema,
        opts: &QueryOptions,
    ) -> Result<Vec<Event>> {
        let group = ctx.child();
        let (items_tx, mut items_rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        for (key, backing) in self.backings() {
            let group = group.clone();
            let items_tx = items_tx.clone();
            let opts = opts.clone();
            tasks.spawn(list_feeder(key, backing, group, opts, items_tx).in_current_span());
        }
        drop(items_tx);

        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| StoreError::Backend(e.to_string()))?;
            if let Err(e) = outcome {
                group.cancel_token().cancel();
                while tasks.join_next().await.is_some() {}
                warn!("List failed: {}", e);
                return Err(e);
            }
        }

        let mut result = Vec::new();
        while let Some(item) = items_rx.recv().await {
            result.push(item);
        }
        Ok(result)
    }

    #[instrument(skip_all, fields(schema = %schema.id))]
    async fn create(&self, ctx: &ApiContext, schema: &Schema, data: Event) -> Result<Event> {
        let backing = self.backing(self.create_type(&data))?;
        debug!(backing = %backing.schema.id, "Routing create");
        let event = backing.store.create(ctx, &backing.schema, data).await?;
        Ok(add_type_prefix(&backing.schema.id, event))
    }

    #[instrument(skip(self, ctx, _schema, data))]
    async fn update(
        &self,
        ctx: &ApiContext,
        _schema: &Schema,
        data: Event,
        id: &str,
    ) -> Result<Event> {
        let (backing_id, backing) = self.route(id)?;
        let event = backing
            .store
            .update(ctx, &backing.schema, data, backing_id)
            .await?;
        Ok(add_type_prefix(&backing.schema.id, event))
    }

    #[instrument(skip(self, ctx, _schema))]
    async fn delete(&self, ctx: &ApiContext, _schema: &Schema, id: &str) -> Result<Event> {
        let (backing_id, backing) = self.route(id)?;
        let event = backing.store.delete(ctx, &backing.schema, backing_id).await?;
        Ok(add_type_prefix(&backing.schema.id, event))
    }

    /// Merge the watches of every backing store into one channel.
    ///
    /// The first feeder to finish, whether its stream ended or its watch
    /// could not be opened, cancels the others. The merged channel closes
    /// once every feeder has returned.
    #[instrument(skip_all, fields(schema = %schema.id))]
    async fn watch(
        &self,
        ctx: &ApiContext,
        schema: &Schema,
        opts: &QueryOptions,
    ) -> Result<EventChannel> {
        let group = ctx.child();
        let (merged_tx, merged_rx) = mpsc::channel(MERGED_WATCH_BUFFER);
        let mut tasks = JoinSet::new();

        for (key, backing) in self.backings() {
            let group = group.clone();
            let merged_tx = merged_tx.clone();
            let opts = opts.clone();
            tasks.spawn(watch_feeder(key, backing, group, opts, merged_tx).in_current_span());
        }

        tokio::spawn(supervise_feeders(tasks, group, merged_tx).in_current_span());

        Ok(merged_rx)
    }
}
