// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter surface for the external coordination service

pub mod fake;
pub mod traits;

// Re-export traits
pub use traits::{
    perms, Acl, CoordinationAdapter, CoordinationError, CreateMode, EventKind, SessionListener,
    Stat, WatchedEvent, Watcher,
};

// Re-export fake adapter
pub use fake::FakeCoordination;
