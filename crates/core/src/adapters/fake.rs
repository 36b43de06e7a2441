// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory fake of the coordination service for testing
//!
//! Models the pieces of a ZooKeeper-family namespace the lock core relies
//! on: a hierarchical node table, ephemeral/sequential creation, one-shot
//! watches, session expiry, and injectable transient failures.

use super::traits::*;
use crate::znode;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// A single node in the fake namespace. ACLs are accepted and ignored.
struct FakeNode {
    data: Vec<u8>,
    /// Session id for ephemeral nodes, `0` for persistent ones.
    owner: u64,
    version: i32,
}

/// Shared state for the fake service.
struct FakeState {
    session: u64,
    nodes: BTreeMap<String, FakeNode>,
    /// Per-parent counters for sequential suffixes. Counters survive node
    /// deletion so suffixes are never reused, matching the real service.
    seq_counters: HashMap<String, u64>,
    /// One-shot watches armed via `exists`, keyed by watched path.
    node_watches: HashMap<String, Vec<Watcher>>,
    /// One-shot watches armed via `get_children`, keyed by parent path.
    child_watches: HashMap<String, Vec<Watcher>>,
    listeners: Vec<Arc<dyn SessionListener>>,
    // Configurable failure modes
    create_failures: u32,
    delete_failures: u32,
}

/// Watches to deliver once the state mutex has been released.
type Pending = Vec<(Watcher, WatchedEvent)>;

/// An in-memory coordination service.
///
/// Clones share state, so a test can hand the same namespace to several lock
/// instances standing in for separate processes. Watches are delivered on
/// the mutating caller's thread, but only after the internal state mutex has
/// been released, mirroring the real client's separate event thread closely
/// enough that no lock-order cycle with waiters' local mutexes can form.
#[derive(Clone)]
pub struct FakeCoordination {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeCoordination {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCoordination {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            FakeNode {
                data: Vec::new(),
                owner: 0,
                version: 0,
            },
        );
        Self {
            state: Arc::new(Mutex::new(FakeState {
                session: 1,
                nodes,
                seq_counters: HashMap::new(),
                node_watches: HashMap::new(),
                child_watches: HashMap::new(),
                listeners: Vec::new(),
                create_failures: 0,
                delete_failures: 0,
            })),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // === Failure injection ===

    /// Make the next `n` create calls fail with `ConnectionLoss`.
    pub fn fail_next_creates(&self, n: u32) {
        self.lock_state().create_failures = n;
    }

    /// Make the next `n` delete calls fail with `ConnectionLoss`.
    pub fn fail_next_deletes(&self, n: u32) {
        self.lock_state().delete_failures = n;
    }

    // === Session simulation ===

    /// End the current session: every ephemeral node it owns disappears
    /// (firing watches), then listeners observe `expired`. A fresh session id
    /// takes effect for subsequent creates.
    pub fn expire_session(&self) {
        let (pending, listeners) = {
            let mut state = self.lock_state();
            let old = state.session;
            state.session += 1;
            let dead: Vec<String> = state
                .nodes
                .iter()
                .filter(|(_, node)| node.owner == old)
                .map(|(path, _)| path.clone())
                .collect();
            let mut pending = Pending::new();
            for path in dead {
                state.nodes.remove(&path);
                drain_node_watches(&mut state, &path, EventKind::Deleted, &mut pending);
                if let Some(parent) = znode::parent(&path) {
                    let parent = parent.to_string();
                    drain_child_watches(&mut state, &parent, EventKind::ChildrenChanged, &mut pending);
                }
            }
            (pending, state.listeners.clone())
        };
        deliver(pending);
        for listener in listeners {
            listener.expired();
        }
    }

    /// Simulate a disconnect/reconnect cycle: listeners observe
    /// `reconnected`; armed watches stay armed but may have missed events.
    pub fn reconnect(&self) {
        let listeners = self.lock_state().listeners.clone();
        for listener in listeners {
            listener.reconnected();
        }
    }

    /// Announce the initial connection to listeners.
    pub fn connect(&self) {
        let listeners = self.lock_state().listeners.clone();
        for listener in listeners {
            listener.connected();
        }
    }

    // === Inspection helpers for tests ===

    pub fn node_exists(&self, path: &str) -> bool {
        self.lock_state().nodes.contains_key(path)
    }

    pub fn children_of(&self, path: &str) -> Vec<String> {
        direct_children(&self.lock_state(), path)
    }

    pub fn data_of(&self, path: &str) -> Option<Vec<u8>> {
        self.lock_state().nodes.get(path).map(|n| n.data.clone())
    }

    pub fn listener_count(&self) -> usize {
        self.lock_state().listeners.len()
    }
}

impl CoordinationAdapter for FakeCoordination {
    fn create(
        &self,
        path: &str,
        data: &[u8],
        _acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String, CoordinationError> {
        let (actual, pending) = {
            let mut state = self.lock_state();
            if state.create_failures > 0 {
                state.create_failures -= 1;
                return Err(CoordinationError::ConnectionLoss);
            }
            validate_path(path)?;
            let parent = znode::parent(path)
                .ok_or_else(|| CoordinationError::Other(format!("path has no parent: {path}")))?
                .to_string();
            if !state.nodes.contains_key(&parent) {
                return Err(CoordinationError::NoNode(parent));
            }
            let actual = if mode.is_sequential() {
                let counter = state.seq_counters.entry(parent.clone()).or_insert(0);
                let seq = *counter;
                *counter += 1;
                format!("{path}{seq:010}")
            } else {
                if state.nodes.contains_key(path) {
                    return Err(CoordinationError::NodeExists(path.to_string()));
                }
                path.to_string()
            };
            let owner = if mode.is_ephemeral() { state.session } else { 0 };
            state.nodes.insert(
                actual.clone(),
                FakeNode {
                    data: data.to_vec(),
                    owner,
                    version: 0,
                },
            );
            let mut pending = Pending::new();
            drain_node_watches(&mut state, &actual, EventKind::Created, &mut pending);
            drain_child_watches(&mut state, &parent, EventKind::ChildrenChanged, &mut pending);
            (actual, pending)
        };
        deliver(pending);
        Ok(actual)
    }

    fn delete(&self, path: &str, version: i32) -> Result<(), CoordinationError> {
        let pending = {
            let mut state = self.lock_state();
            if state.delete_failures > 0 {
                state.delete_failures -= 1;
                return Err(CoordinationError::ConnectionLoss);
            }
            let node = state
                .nodes
                .get(path)
                .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?;
            if version >= 0 && node.version != version {
                return Err(CoordinationError::BadVersion(path.to_string()));
            }
            if !direct_children(&state, path).is_empty() {
                return Err(CoordinationError::NotEmpty(path.to_string()));
            }
            state.nodes.remove(path);
            let mut pending = Pending::new();
            drain_node_watches(&mut state, path, EventKind::Deleted, &mut pending);
            if let Some(parent) = znode::parent(path) {
                let parent = parent.to_string();
                drain_child_watches(&mut state, &parent, EventKind::ChildrenChanged, &mut pending);
            }
            pending
        };
        deliver(pending);
        Ok(())
    }

    fn exists(&self, path: &str, watch: Option<Watcher>) -> Result<Option<Stat>, CoordinationError> {
        let mut state = self.lock_state();
        if let Some(watcher) = watch {
            state
                .node_watches
                .entry(path.to_string())
                .or_default()
                .push(watcher);
        }
        match state.nodes.get(path) {
            Some(node) => {
                let stat = Stat {
                    version: node.version,
                    num_children: direct_children(&state, path).len() as u32,
                    ephemeral_owner: node.owner,
                };
                Ok(Some(stat))
            }
            None => Ok(None),
        }
    }

    fn get_children(
        &self,
        path: &str,
        watch: Option<Watcher>,
    ) -> Result<Vec<String>, CoordinationError> {
        let mut state = self.lock_state();
        if !state.nodes.contains_key(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        if let Some(watcher) = watch {
            state
                .child_watches
                .entry(path.to_string())
                .or_default()
                .push(watcher);
        }
        Ok(direct_children(&state, path))
    }

    fn get_data(&self, path: &str) -> Result<Vec<u8>, CoordinationError> {
        let state = self.lock_state();
        state
            .nodes
            .get(path)
            .map(|n| n.data.clone())
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    fn add_session_listener(&self, listener: Arc<dyn SessionListener>) {
        self.lock_state().listeners.push(listener);
    }

    fn remove_session_listener(&self, listener: &Arc<dyn SessionListener>) {
        self.lock_state()
            .listeners
            .retain(|l| !Arc::ptr_eq(l, listener));
    }
}

fn validate_path(path: &str) -> Result<(), CoordinationError> {
    if !path.starts_with('/') {
        return Err(CoordinationError::Other(format!(
            "path must be absolute: {path}"
        )));
    }
    Ok(())
}

/// Names (not full paths) of `path`'s direct children, lexicographic order.
fn direct_children(state: &FakeState, path: &str) -> Vec<String> {
    let prefix = if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    };
    state
        .nodes
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&prefix))
        .filter(|(key, _)| !key[prefix.len()..].contains('/'))
        .map(|(key, _)| key[prefix.len()..].to_string())
        .collect()
}

fn drain_node_watches(state: &mut FakeState, path: &str, kind: EventKind, out: &mut Pending) {
    if let Some(watchers) = state.node_watches.remove(path) {
        let event = WatchedEvent {
            path: path.to_string(),
            kind,
        };
        out.extend(watchers.into_iter().map(|w| (w, event.clone())));
    }
}

fn drain_child_watches(state: &mut FakeState, path: &str, kind: EventKind, out: &mut Pending) {
    if let Some(watchers) = state.child_watches.remove(path) {
        let event = WatchedEvent {
            path: path.to_string(),
            kind,
        };
        out.extend(watchers.into_iter().map(|w| (w, event.clone())));
    }
}

fn deliver(pending: Pending) {
    for (watcher, event) in pending {
        watcher(&event);
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
