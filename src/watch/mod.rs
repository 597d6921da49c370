// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Watch multiplexing: one upstream connection, many subscribers.

pub mod broadcaster;
pub mod share;

pub use broadcaster::Broadcaster;
pub use share::WatchShare;
