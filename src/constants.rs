// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Query option keys recognised by the stores
pub mod options {
    /// When set to "true", List/Watch include items that have owner references
    pub const HIDDEN: &str = "hidden";
    /// Set by TransformStore when transforming a direct by-id lookup
    pub const BY_ID: &str = "ByID";
}

/// Well-known event fields
pub mod fields {
    pub const ID: &str = "id";
    pub const TYPE: &str = "type";
    pub const OWNER_REFERENCES: &str = "ownerReferences";
    pub const NAME: &str = "name";
    pub const NAMESPACE_ID: &str = "namespaceId";
    /// Marks a watch event for an object that was deleted
    pub const REMOVED: &str = ".removed";
}

/// Separator between the type prefix and the backing id of a composite identifier
pub const ID_SEPARATOR: char = ':';

/// Capacity of each subscriber channel handed out by a Broadcaster
pub const SUBSCRIBER_BUFFER: usize = 100;

/// Capacity of the merged channel returned by AggregateStore::watch
pub const MERGED_WATCH_BUFFER: usize = 100;

/// Suffix of the field that selects a backing type on create, e.g. `deploymentConfig`
pub const DISCRIMINATOR_SUFFIX: &str = "Config";
