// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! zklock-core: fair, reentrant, crash-tolerant distributed locks over a
//! ZooKeeper-family coordination service
//!
//! This crate provides:
//! - A capability trait for the coordination service, plus an in-memory fake
//! - Sequence-node helpers with idempotent and retrying create/delete
//! - A fair FIFO reentrant lock with optional container cleanup
//! - A bounded-wait executor that runs a job while holding a named lock
//!
//! The coordination-service client itself (connection management, session
//! renewal) lives outside this crate behind
//! [`adapters::CoordinationAdapter`].

pub mod adapters;
pub mod net;
pub mod znode;

pub mod executor;
pub mod lock;
pub mod primitive;
pub mod registry;

// Re-exports
pub use adapters::{
    Acl, CoordinationAdapter, CoordinationError, CreateMode, EventKind, FakeCoordination,
    SessionListener, Stat, WatchedEvent, Watcher,
};
pub use executor::{BoxError, ExecutorError, LockExecutor, LockJob};
pub use lock::{
    CancelToken, ContainerCleanup, DistributedLock, LockError, LOCK_DELIMITER, LOCK_PREFIX,
};
pub use primitive::{CoordinationPrimitive, PrimitiveError};
pub use registry::LockRegistry;
