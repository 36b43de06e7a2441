// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared plumbing for constructs built on the coordination namespace
//!
//! A primitive owns a base path, a privilege set, a handle to the service
//! adapter, and a local mutex/condition pair that bridges asynchronous watch
//! and session events into synchronous waits. The base path is guaranteed to
//! exist before the constructor returns.

use crate::adapters::{
    Acl, CoordinationAdapter, CoordinationError, CreateMode, SessionListener, WatchedEvent, Watcher,
};
use crate::znode;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use thiserror::Error;

/// Construction failures for namespace primitives.
#[derive(Debug, Error)]
pub enum PrimitiveError {
    #[error("base path must not be empty")]
    EmptyBasePath,
    #[error("failed to create base path: {0}")]
    Bootstrap(#[from] CoordinationError),
}

/// The local mutex/condition pair. Exclusively owned by one primitive and
/// never shared across instances.
pub(crate) struct LocalSync {
    mutex: Mutex<()>,
    cond: Condvar,
}

impl LocalSync {
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn wait<'a>(&self, guard: MutexGuard<'a, ()>) -> MutexGuard<'a, ()> {
        self.cond.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, ()>,
        timeout: std::time::Duration,
    ) -> MutexGuard<'a, ()> {
        self.cond
            .wait_timeout(guard, timeout)
            .map(|(guard, _)| guard)
            .unwrap_or_else(|e| e.into_inner().0)
    }

    pub(crate) fn notify_all(&self) {
        let _guard = self.lock();
        self.cond.notify_all();
    }
}

/// Forwards session lifecycle events into local wakeups. Both a reconnect
/// and an expiry are wake signals; waiters re-check remote state to find out
/// which one happened.
struct WakeOnSessionEvent {
    sync: Arc<LocalSync>,
}

impl SessionListener for WakeOnSessionEvent {
    fn reconnected(&self) {
        tracing::debug!("session reconnected, waking local waiters");
        self.sync.notify_all();
    }

    fn expired(&self) {
        tracing::debug!("session expired, waking local waiters");
        self.sync.notify_all();
    }
}

/// Detaches the session listener when the blocking operation that needed it
/// ends, so listeners never leak across unrelated operations.
pub(crate) struct SessionScope {
    adapter: Arc<dyn CoordinationAdapter>,
    listener: Arc<dyn SessionListener>,
}

impl Drop for SessionScope {
    fn drop(&mut self) {
        self.adapter.remove_session_listener(&self.listener);
    }
}

/// Base-path plumbing shared by every construct over the namespace.
pub struct CoordinationPrimitive {
    base_path: String,
    adapter: Arc<dyn CoordinationAdapter>,
    acl: Vec<Acl>,
    sync: Arc<LocalSync>,
    signal_watcher: Watcher,
}

impl CoordinationPrimitive {
    /// Validates the base path and guarantees it exists in the namespace,
    /// tolerating concurrent creators.
    pub fn new(
        base_path: impl Into<String>,
        adapter: Arc<dyn CoordinationAdapter>,
        acl: Vec<Acl>,
    ) -> Result<Self, PrimitiveError> {
        let base_path = base_path.into();
        if base_path.is_empty() {
            return Err(PrimitiveError::EmptyBasePath);
        }
        let sync = Arc::new(LocalSync {
            mutex: Mutex::new(()),
            cond: Condvar::new(),
        });
        let signal_watcher = {
            let sync = Arc::clone(&sync);
            Arc::new(move |event: &WatchedEvent| {
                tracing::debug!(path = %event.path, kind = ?event.kind, "signal watch fired");
                sync.notify_all();
            }) as Watcher
        };
        znode::recursive_safe_create(
            adapter.as_ref(),
            &base_path,
            &[],
            &acl,
            CreateMode::Persistent,
        )?;
        Ok(Self {
            base_path,
            adapter,
            acl,
            sync,
            signal_watcher,
        })
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub(crate) fn adapter(&self) -> &Arc<dyn CoordinationAdapter> {
        &self.adapter
    }

    pub(crate) fn acl(&self) -> &[Acl] {
        &self.acl
    }

    pub(crate) fn sync(&self) -> &Arc<LocalSync> {
        &self.sync
    }

    /// The single reusable one-shot watch bound to this instance. Every
    /// firing wakes all locally blocked waiters.
    pub(crate) fn signal_watcher(&self) -> Watcher {
        Arc::clone(&self.signal_watcher)
    }

    /// Wake every thread blocked on this instance.
    pub fn notify_parties(&self) {
        self.sync.notify_all();
    }

    /// Attach a listener that turns session reconnect/expiry into local
    /// wakeups. Dropping the returned scope detaches it. Held only for the
    /// duration of a blocking acquisition.
    pub(crate) fn session_scope(&self) -> SessionScope {
        let listener: Arc<dyn SessionListener> = Arc::new(WakeOnSessionEvent {
            sync: Arc::clone(&self.sync),
        });
        self.adapter.add_session_listener(Arc::clone(&listener));
        SessionScope {
            adapter: Arc::clone(&self.adapter),
            listener,
        }
    }
}

// Two primitives over the same base path are interchangeable for comparison;
// locking state stays per-instance plus per-thread.
impl PartialEq for CoordinationPrimitive {
    fn eq(&self, other: &Self) -> bool {
        self.base_path == other.base_path
    }
}

impl Eq for CoordinationPrimitive {}

impl Hash for CoordinationPrimitive {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.base_path.hash(state);
    }
}

#[cfg(test)]
#[path = "primitive_tests.rs"]
mod tests;
