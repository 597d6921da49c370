// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Composite identifiers of the form `<type-prefix>:<backing-id>`.

use crate::constants::{fields, ID_SEPARATOR};
use crate::types::resource::Event;
use serde_json::Value;

/// Build the composite identifier for a backing id of the given type
pub fn compose(type_name: &str, id: &str) -> String {
    format!("{}{}{}", type_name.to_lowercase(), ID_SEPARATOR, id)
}

/// Split a composite identifier on its first separator.
///
/// Ids without a separator yield an empty type prefix, which never
/// resolves to a backing store.
pub fn decompose(id: &str) -> (&str, &str) {
    id.split_once(ID_SEPARATOR).unwrap_or(("", id))
}

/// Rewrite the event's `id` field with the composite prefix of its type
pub fn add_type_prefix(type_name: &str, mut event: Event) -> Event {
    if let Some(Value::String(id)) = event.get(fields::ID) {
        let prefixed = compose(type_name, id);
        event.insert(fields::ID.to_string(), Value::String(prefixed));
    }
    event
}
