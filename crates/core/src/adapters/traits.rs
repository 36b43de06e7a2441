// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capability trait for the external coordination service
//!
//! The lock core never talks to a concrete client. It consumes the narrow
//! surface defined here: atomic node create/delete, existence checks,
//! children listing, one-shot watches, and session lifecycle callbacks.

use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// Node metadata
// =============================================================================

/// Creation modes for namespace nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creating session.
    Persistent,
    /// Survives the creating session, with a service-assigned sequence suffix.
    PersistentSequential,
    /// Removed automatically when the creating session ends.
    Ephemeral,
    /// Ephemeral, with a service-assigned sequence suffix.
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }

    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }
}

/// Permission bits for an [`Acl`] entry.
pub mod perms {
    pub const READ: u32 = 1 << 0;
    pub const WRITE: u32 = 1 << 1;
    pub const CREATE: u32 = 1 << 2;
    pub const DELETE: u32 = 1 << 3;
    pub const ADMIN: u32 = 1 << 4;
    pub const ALL: u32 = READ | WRITE | CREATE | DELETE | ADMIN;
}

/// A single access-control entry attached to created nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub scheme: String,
    pub id: String,
    pub perms: u32,
}

impl Acl {
    /// The world-anything privilege set, the default for lock nodes.
    pub fn open_unsafe() -> Vec<Acl> {
        vec![Acl {
            scheme: "world".to_string(),
            id: "anyone".to_string(),
            perms: perms::ALL,
        }]
    }
}

/// Minimal metadata about an existing node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub version: i32,
    pub num_children: u32,
    /// Session id owning this node, `0` for persistent nodes.
    pub ephemeral_owner: u64,
}

// =============================================================================
// Watches and session events
// =============================================================================

/// What happened to the watched node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Deleted,
    DataChanged,
    ChildrenChanged,
}

/// A single watch notification.
#[derive(Debug, Clone)]
pub struct WatchedEvent {
    pub path: String,
    pub kind: EventKind,
}

/// A one-shot watch callback. Fires at most once per registration; callers
/// re-arm by registering again.
pub type Watcher = Arc<dyn Fn(&WatchedEvent) + Send + Sync>;

/// Session lifecycle callbacks. All methods default to no-ops so listeners
/// implement only the transitions they care about.
pub trait SessionListener: Send + Sync {
    /// The session connected for the first time.
    fn connected(&self) {}

    /// The session dropped and came back, possibly on another server. Watch
    /// events may have been missed in between.
    fn reconnected(&self) {}

    /// The session is gone for good; every ephemeral node it owned is gone.
    fn expired(&self) {}
}

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced by the coordination service.
///
/// `NoNode`, `NodeExists` and `NotEmpty` are the benign-race codes that call
/// sites are allowed to swallow; everything else is transient or fatal
/// depending on the call site.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("no node: {0}")]
    NoNode(String),
    #[error("node already exists: {0}")]
    NodeExists(String),
    #[error("node not empty: {0}")]
    NotEmpty(String),
    #[error("version mismatch on {0}")]
    BadVersion(String),
    #[error("connection to the coordination service lost")]
    ConnectionLoss,
    #[error("coordination session expired")]
    SessionExpired,
    #[error("coordination service error: {0}")]
    Other(String),
}

// =============================================================================
// The capability surface
// =============================================================================

/// The operations the lock core needs from a coordination-service client.
///
/// Implementations must be safe to share across threads; every lock instance
/// in a process holds the same `Arc<dyn CoordinationAdapter>`. The surface is
/// read-only with respect to the session itself: nothing here mutates
/// session state.
pub trait CoordinationAdapter: Send + Sync {
    /// Create a node, returning the actual path (which differs from the
    /// requested path for sequential modes).
    fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String, CoordinationError>;

    /// Delete a node. `version` of `-1` means "ignore version".
    fn delete(&self, path: &str, version: i32) -> Result<(), CoordinationError>;

    /// Check whether a node exists, optionally arming a one-shot watch on it.
    /// The watch may be armed on an absent path; it then fires on creation.
    fn exists(&self, path: &str, watch: Option<Watcher>) -> Result<Option<Stat>, CoordinationError>;

    /// List the names (not full paths) of a node's direct children,
    /// optionally arming a one-shot watch for membership changes.
    fn get_children(
        &self,
        path: &str,
        watch: Option<Watcher>,
    ) -> Result<Vec<String>, CoordinationError>;

    /// Read a node's payload.
    fn get_data(&self, path: &str) -> Result<Vec<u8>, CoordinationError>;

    /// Start delivering session lifecycle events to `listener`.
    fn add_session_listener(&self, listener: Arc<dyn SessionListener>);

    /// Stop delivering session lifecycle events. Identity is by pointer
    /// (`Arc::ptr_eq`), so pass the same handle given to
    /// [`CoordinationAdapter::add_session_listener`].
    fn remove_session_listener(&self, listener: &Arc<dyn SessionListener>);
}
