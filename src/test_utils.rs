// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test doubles: a mocked Kubernetes API and an in-memory backing store.

use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{ApiContext, Event, EventChannel, QueryOptions, Schema, StorageContext};
use async_trait::async_trait;
use http::{Request, Response};
use kube::client::Body;
use kube::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::Service;

/// A mock HTTP service that returns predefined responses based on request paths.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Add a response for GET requests matching the exact path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    /// Add a response for POST requests matching the exact path
    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.on("POST", path, status, body)
    }

    pub fn on_delete(self, path: &str, status: u16, body: &str) -> Self {
        self.on("DELETE", path, status, body)
    }

    fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), (status, body.to_string()));
        self
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        self.responses
            .lock()
            .unwrap()
            .get(&(method.to_string(), path.to_string()))
            .cloned()
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

type ServiceResult = std::result::Result<Response<Body>, tower::BoxError>;

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = ServiceResult> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let response = self.find_response(&method, &path);

        Box::pin(async move {
            let (status, body) = response.unwrap_or_else(|| (404, not_found_json("path", &path)));
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("{} \"{}\" not found", resource, name),
        "reason": "NotFound",
        "code": 404
    })
    .to_string()
}

/// Build an event from a JSON literal
pub fn event(value: Value) -> Event {
    value.as_object().cloned().expect("event must be a JSON object")
}

/// Number of calls an in-memory store received, per operation
#[derive(Default)]
pub struct CallCounts {
    pub by_id: AtomicUsize,
    pub list: AtomicUsize,
    pub create: AtomicUsize,
    pub update: AtomicUsize,
    pub delete: AtomicUsize,
    pub watch: AtomicUsize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        [
            &self.by_id,
            &self.list,
            &self.create,
            &self.update,
            &self.delete,
            &self.watch,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

type Watchers = Arc<Mutex<Vec<(CancellationToken, mpsc::Sender<Event>)>>>;

/// A backing store over a fixed set of items
#[derive(Clone, Default)]
pub struct MemoryStore {
    items: Vec<Event>,
    list_error: Option<String>,
    watch_error: Option<String>,
    block_list: bool,
    pub calls: Arc<CallCounts>,
    pub last_id: Arc<Mutex<Option<String>>>,
    watchers: Watchers,
}

impl MemoryStore {
    pub fn new(items: Vec<Event>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    /// List fails with a backend error
    pub fn failing_list(mut self, message: &str) -> Self {
        self.list_error = Some(message.to_string());
        self
    }

    /// Watch setup fails with a backend error
    pub fn failing_watch(mut self, message: &str) -> Self {
        self.watch_error = Some(message.to_string());
        self
    }

    /// List does not return until the request is cancelled
    pub fn blocking_list(mut self) -> Self {
        self.block_list = true;
        self
    }

    /// Deliver an event to every open watch
    pub async fn emit(&self, event: Event) {
        let senders: Vec<_> = self
            .watchers
            .lock()
            .unwrap()
            .iter()
            .filter(|(token, _)| !token.is_cancelled())
            .map(|(_, tx)| tx.clone())
            .collect();
        for tx in senders {
            let _ = tx.send(event.clone()).await;
        }
    }

    /// End every open watch stream
    pub fn close_watches(&self) {
        self.watchers.lock().unwrap().clear();
    }

    pub fn open_watches(&self) -> usize {
        self.watchers.lock().unwrap().len()
    }

    fn record_id(&self, id: &str) {
        *self.last_id.lock().unwrap() = Some(id.to_string());
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn context(&self) -> StorageContext {
        StorageContext::User
    }

    async fn by_id(&self, _ctx: &ApiContext, _schema: &Schema, id: &str) -> Result<Event> {
        self.calls.by_id.fetch_add(1, Ordering::SeqCst);
        self.record_id(id);
        self.items
            .iter()
            .find(|item| item.get("id").and_then(Value::as_str) == Some(id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(
        &self,
        ctx: &ApiContext,
        _schema: &Schema,
        _opts: &QueryOptions,
    ) -> Result<Vec<Event>> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        if self.block_list {
            ctx.cancel_token().cancelled().await;
            return Err(StoreError::Cancelled);
        }
        if let Some(message) = &self.list_error {
            return Err(StoreError::Backend(message.clone()));
        }
        Ok(self.items.clone())
    }

    async fn create(&self, _ctx: &ApiContext, _schema: &Schema, mut data: Event) -> Result<Event> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        let name = data
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("created")
            .to_string();
        data.insert("id".to_string(), Value::String(format!("default:{}", name)));
        Ok(data)
    }

    async fn update(
        &self,
        _ctx: &ApiContext,
        _schema: &Schema,
        mut data: Event,
        id: &str,
    ) -> Result<Event> {
        self.calls.update.fetch_add(1, Ordering::SeqCst);
        self.record_id(id);
        data.insert("id".to_string(), Value::String(id.to_string()));
        Ok(data)
    }

    async fn delete(&self, _ctx: &ApiContext, _schema: &Schema, id: &str) -> Result<Event> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        self.record_id(id);
        Ok(event(serde_json::json!({ "id": id })))
    }

    async fn watch(
        &self,
        ctx: &ApiContext,
        _schema: &Schema,
        _opts: &QueryOptions,
    ) -> Result<EventChannel> {
        self.calls.watch.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.watch_error {
            return Err(StoreError::Backend(message.clone()));
        }
        let (tx, rx) = mpsc::channel(100);
        let token = ctx.cancel_token().clone();
        self.watchers.lock().unwrap().push((token.clone(), tx));

        let watchers = self.watchers.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            watchers
                .lock()
                .unwrap()
                .retain(|(token, _)| !token.is_cancelled());
        });
        Ok(rx)
    }
}
