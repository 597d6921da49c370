// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Resource representation and per-request context shared by all stores.

use crate::constants::{options, DISCRIMINATOR_SUFFIX};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One resource's field map, as it flows through List and Watch
pub type Event = Map<String, Value>;

/// Receiving side of a watch stream
pub type EventChannel = mpsc::Receiver<Event>;

/// Per-request context. Cancelling the token ends the request's interest
/// in any channel or fan-out task started on its behalf.
#[derive(Debug, Clone, Default)]
pub struct ApiContext {
    cancel: CancellationToken,
}

impl ApiContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context bound to the given token instead of the caller's
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// A context that is cancelled together with this one, and can also
    /// be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Type descriptor handed to a backing store with every call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Schema {
    /// Type name in camel case, e.g. `replicaSet`
    pub id: String,
    pub plural_name: String,
}

impl Schema {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let plural_name = format!("{}s", id);
        Self { id, plural_name }
    }

    /// Registry key and identifier prefix for this type
    pub fn type_key(&self) -> String {
        self.id.to_lowercase()
    }

    /// Field whose presence on create data selects this type
    pub fn discriminator_field(&self) -> String {
        format!("{}{}", self.id, DISCRIMINATOR_SUFFIX)
    }
}

/// Free-form query options of a List or Watch call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub options: HashMap<String, String>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_option(mut self, key: &str, value: &str) -> Self {
        self.options.insert(key.to_string(), value.to_string());
        self
    }

    /// True when a key is set to the literal "true"
    pub fn is_set(&self, key: &str) -> bool {
        self.options.get(key).is_some_and(|v| v == "true")
    }

    pub fn include_hidden(&self) -> bool {
        self.is_set(options::HIDDEN)
    }
}

/// Which cluster a store's data lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageContext {
    Management,
    User,
}
