// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Backing store over one Kubernetes resource kind.

use crate::constants::{fields, SUBSCRIBER_BUFFER};
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{ApiContext, Event, EventChannel, QueryOptions, Schema, StorageContext};
use async_trait::async_trait;
use futures::StreamExt;
use kube::{
    api::{ApiResource, DeleteParams, DynamicObject, ListParams, PostParams, TypeMeta},
    Api, Client, ResourceExt,
};
use kube_runtime::{watcher, WatchStreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn, Instrument};

/// Serves one kind through the Kubernetes API. Native ids are
/// `<namespace>:<name>`, or `<name>` for cluster-scoped objects.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    resource: ApiResource,
    namespaced: bool,
    /// Restricts List and Watch to one namespace
    namespace: Option<String>,
}

impl KubeStore {
    pub fn new(client: Client, resource: ApiResource, namespaced: bool) -> Self {
        Self {
            client,
            resource,
            namespaced,
            namespace: None,
        }
    }

    pub fn in_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn resource(&self) -> &ApiResource {
        &self.resource
    }

    fn api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &self.resource),
            None => Api::all_with(self.client.clone(), &self.resource),
        }
    }

    /// Split a native id into namespace and name
    fn split_id<'a>(&self, id: &'a str) -> Result<(Option<&'a str>, &'a str)> {
        let (namespace, name) = match id.split_once(':') {
            Some((ns, name)) => (Some(ns), name),
            None => (None, id),
        };
        if name.is_empty() {
            return Err(StoreError::InvalidInput(format!("invalid id {:?}", id)));
        }
        if self.namespaced && namespace.is_none() {
            return Err(StoreError::InvalidInput(format!(
                "{} id {:?} is missing a namespace",
                self.resource.kind, id
            )));
        }
        Ok((namespace.filter(|_| self.namespaced), name))
    }

    fn to_object(&self, mut data: Event) -> Result<DynamicObject> {
        for field in [
            fields::ID,
            fields::TYPE,
            fields::OWNER_REFERENCES,
            fields::REMOVED,
            fields::NAME,
            fields::NAMESPACE_ID,
        ] {
            data.remove(field);
        }
        let mut obj: DynamicObject = serde_json::from_value(Value::Object(data))
            .map_err(|e| StoreError::InvalidInput(e.to_string()))?;
        if obj.types.is_none() {
            obj.types = Some(TypeMeta {
                api_version: self.resource.api_version.clone(),
                kind: self.resource.kind.clone(),
            });
        }
        Ok(obj)
    }

    fn target_namespace(&self, obj: &DynamicObject) -> Result<Option<String>> {
        if !self.namespaced {
            return Ok(None);
        }
        obj.namespace()
            .or_else(|| self.namespace.clone())
            .map(Some)
            .ok_or_else(|| StoreError::InvalidInput("namespace is required".to_string()))
    }
}

/// Native id of an object
pub fn object_id(obj: &DynamicObject) -> String {
    match obj.namespace() {
        Some(ns) => format!("{}:{}", ns, obj.name_any()),
        None => obj.name_any(),
    }
}

/// Convert an object to its event form: the serialised object plus `id`,
/// `type` and a top-level copy of `metadata.ownerReferences`.
pub fn to_event(obj: &DynamicObject, schema: &Schema) -> Result<Event> {
    let Value::Object(mut event) =
        serde_json::to_value(obj).map_err(|e| StoreError::Backend(e.to_string()))?
    else {
        return Err(StoreError::Backend(format!(
            "{} did not serialise to an object",
            obj.name_any()
        )));
    };

    event.insert(fields::ID.to_string(), Value::String(object_id(obj)));
    event.insert(fields::TYPE.to_string(), Value::String(schema.id.clone()));
    if let Some(refs) = obj.metadata.owner_references.as_ref() {
        let refs = serde_json::to_value(refs).map_err(|e| StoreError::Backend(e.to_string()))?;
        event.insert(fields::OWNER_REFERENCES.to_string(), refs);
    }
    Ok(event)
}

/// Convert one watcher event. Initial and relisted objects count as changes,
/// deletions carry the removed marker, and list boundaries produce nothing.
fn watch_event(event: watcher::Event<DynamicObject>, schema: &Schema) -> Option<Event> {
    let (obj, removed) = match event {
        watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => (obj, false),
        watcher::Event::Delete(obj) => (obj, true),
        _ => return None,
    };
    let mut event = match to_event(&obj, schema) {
        Ok(event) => event,
        Err(e) => {
            warn!("Dropping watch event for {}: {}", obj.name_any(), e);
            return None;
        }
    };
    if removed {
        event.insert(fields::REMOVED.to_string(), Value::Bool(true));
    }
    Some(event)
}

fn not_found(err: kube::Error, id: &str) -> StoreError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound(id.to_string()),
        e => StoreError::Kube(e),
    }
}

#[async_trait]
impl Store for KubeStore {
    fn context(&self) -> StorageContext {
        StorageContext::User
    }

    #[instrument(skip(self, _ctx, schema), fields(kind = %self.resource.kind))]
    async fn by_id(&self, _ctx: &ApiContext, schema: &Schema, id: &str) -> Result<Event> {
        let (namespace, name) = self.split_id(id)?;
        let obj = self
            .api(namespace)
            .get(name)
            .await
            .map_err(|e| not_found(e, id))?;
        to_event(&obj, schema)
    }

    #[instrument(skip_all, fields(kind = %self.resource.kind))]
    async fn list(
        &self,
        _ctx: &ApiContext,
        schema: &Schema,
        _opts: &QueryOptions,
    ) -> Result<Vec<Event>> {
        let list = self
            .api(self.namespace.as_deref())
            .list(&ListParams::default())
            .await?;
        debug!("Listed {} objects", list.items.len());
        list.items.iter().map(|obj| to_event(obj, schema)).collect()
    }

    #[instrument(skip_all, fields(kind = %self.resource.kind))]
    async fn create(&self, _ctx: &ApiContext, schema: &Schema, data: Event) -> Result<Event> {
        let obj = self.to_object(data)?;
        let namespace = self.target_namespace(&obj)?;
        let created = self
            .api(namespace.as_deref())
            .create(&PostParams::default(), &obj)
            .await?;
        to_event(&created, schema)
    }

    #[instrument(skip(self, _ctx, schema, data), fields(kind = %self.resource.kind))]
    async fn update(
        &self,
        _ctx: &ApiContext,
        schema: &Schema,
        data: Event,
        id: &str,
    ) -> Result<Event> {
        let (namespace, name) = self.split_id(id)?;
        let mut obj = self.to_object(data)?;
        obj.metadata.name = Some(name.to_string());
        obj.metadata.namespace = namespace.map(str::to_string);
        let updated = self
            .api(namespace)
            .replace(name, &PostParams::default(), &obj)
            .await
            .map_err(|e| not_found(e, id))?;
        to_event(&updated, schema)
    }

    #[instrument(skip(self, _ctx, schema), fields(kind = %self.resource.kind))]
    async fn delete(&self, _ctx: &ApiContext, schema: &Schema, id: &str) -> Result<Event> {
        let (namespace, name) = self.split_id(id)?;
        let deleted = self
            .api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| not_found(e, id))?;
        match deleted.left() {
            Some(obj) => to_event(&obj, schema),
            // deleted immediately, the server only returned a status
            None => {
                let mut event = Event::new();
                event.insert(fields::ID.to_string(), Value::String(id.to_string()));
                event.insert(fields::TYPE.to_string(), Value::String(schema.id.clone()));
                Ok(event)
            }
        }
    }

    /// Stream applied and removed objects until the context is cancelled.
    /// Removed objects carry `".removed": true`.
    #[instrument(skip_all, fields(kind = %self.resource.kind))]
    async fn watch(
        &self,
        ctx: &ApiContext,
        schema: &Schema,
        _opts: &QueryOptions,
    ) -> Result<EventChannel> {
        let api = self.api(self.namespace.as_deref());
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let cancel = ctx.cancel_token().clone();
        let schema = schema.clone();

        tokio::spawn(
            async move {
                let stream = watcher(api, watcher::Config::default()).default_backoff();
                let mut stream = std::pin::pin!(stream);
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => break,
                        next = stream.next() => next,
                    };
                    let event = match next {
                        Some(Ok(event)) => watch_event(event, &schema),
                        Some(Err(e)) => {
                            warn!("Watch error: {}", e);
                            continue;
                        }
                        None => break,
                    };
                    let Some(event) = event else {
                        continue;
                    };
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                debug!("Watch stopped");
            }
            .in_current_span(),
        );

        Ok(rx)
    }
}
