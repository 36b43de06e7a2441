// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fair, reentrant, crash-tolerant distributed mutual exclusion
//!
//! Each acquisition attempt creates an ephemeral sequential contender node
//! under the lock's base path; the contender with the smallest live sequence
//! holds the lock. Waiters watch their nearest live predecessor and re-check
//! the queue after every wakeup, so ordering is FIFO across processes and a
//! crashed holder's contender disappears with its session.

use crate::adapters::{Acl, CoordinationAdapter, CoordinationError, CreateMode};
use crate::net;
use crate::primitive::{CoordinationPrimitive, LocalSync, PrimitiveError};
use crate::znode::{self, SequenceError, ZnodeError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Name prefix for contender nodes. Together with [`LOCK_DELIMITER`] this is
/// wire-compatible with existing deployments: contenders are named
/// `lock-<service-assigned-sequence>`.
pub const LOCK_PREFIX: &str = "lock";

/// Separates the prefix from the service-assigned sequence.
pub const LOCK_DELIMITER: char = '-';

/// Errors from lock operations. Timeouts are not errors; see
/// [`DistributedLock::try_lock_for`].
#[derive(Debug, Error)]
pub enum LockError {
    #[error(transparent)]
    Primitive(#[from] PrimitiveError),
    #[error("coordination error: {0}")]
    Coordination(#[from] CoordinationError),
    #[error(transparent)]
    Znode(#[from] ZnodeError),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    /// The contender node disappeared out from under a live attempt, which
    /// only happens when the session owning it expired. The lock state is
    /// unknowable at this point, so the attempt fails rather than guessing.
    #[error("contender node {node} vanished while contending (session expired?)")]
    LostContender { node: String },
    #[error("calling thread does not hold this lock")]
    NotHeld,
    #[error("lock wait cancelled")]
    Interrupted,
}

/// What to do with the base container node after the last local release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerCleanup {
    /// Leave the base path in place (the common case for long-lived names).
    Retain,
    /// Try to delete the base path once no local holder remains, for
    /// short-lived dynamically named resources. A concurrent contender
    /// repopulating the container makes the deletion a benign no-op.
    DeleteIfEmpty,
}

/// Per-thread reentrancy bookkeeping.
struct LockHolder {
    node: String,
    count: u32,
}

/// A fair reentrant lock over a named base path.
///
/// Safe for concurrent use by multiple threads; reentrancy is tracked per
/// calling thread, and threads of one process otherwise compete as
/// independent contenders. Release must happen on the acquiring thread.
pub struct DistributedLock {
    primitive: CoordinationPrimitive,
    holders: Mutex<HashMap<ThreadId, LockHolder>>,
    cleanup: ContainerCleanup,
}

/// Cancels a [`DistributedLock::lock_interruptibly`] wait from another
/// thread. Obtained from the lock it is meant to interrupt.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    sync: Arc<LocalSync>,
}

impl CancelToken {
    /// Request cancellation and wake the lock's blocked waiters.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.sync.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl DistributedLock {
    /// A lock whose base path outlives its holders.
    pub fn new(
        base_path: impl Into<String>,
        adapter: Arc<dyn CoordinationAdapter>,
        acl: Vec<Acl>,
    ) -> Result<Self, LockError> {
        Self::with_cleanup(base_path, adapter, acl, ContainerCleanup::Retain)
    }

    /// A lock that removes its base container after the last full release,
    /// for dynamically named resources.
    pub fn ephemeral(
        base_path: impl Into<String>,
        adapter: Arc<dyn CoordinationAdapter>,
        acl: Vec<Acl>,
    ) -> Result<Self, LockError> {
        Self::with_cleanup(base_path, adapter, acl, ContainerCleanup::DeleteIfEmpty)
    }

    pub fn with_cleanup(
        base_path: impl Into<String>,
        adapter: Arc<dyn CoordinationAdapter>,
        acl: Vec<Acl>,
        cleanup: ContainerCleanup,
    ) -> Result<Self, LockError> {
        Ok(Self {
            primitive: CoordinationPrimitive::new(base_path, adapter, acl)?,
            holders: Mutex::new(HashMap::new()),
            cleanup,
        })
    }

    pub fn base_path(&self) -> &str {
        self.primitive.base_path()
    }

    /// Whether the calling thread currently holds this lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.holders().contains_key(&thread::current().id())
    }

    /// Block until the lock is held by the calling thread.
    ///
    /// Reentrant: a thread that already holds returns immediately with its
    /// count incremented, without touching the coordination service. The
    /// wait itself is uninterruptible; use
    /// [`DistributedLock::lock_interruptibly`] for a cancellable variant.
    /// On failure the attempt's contender node is cleaned up and the lock is
    /// not held.
    pub fn lock(&self) -> Result<(), LockError> {
        if self.check_reentrancy() {
            return Ok(());
        }
        let _session = self.primitive.session_scope();
        let mut contender = None;
        let result = self.lock_loop(&mut contender);
        if let Err(e) = &result {
            tracing::error!(base = %self.base_path(), error = %e, "lock acquisition failed");
            self.abandon_contender(&mut contender);
        }
        result
    }

    /// One non-blocking attempt: succeeds only if no smaller-sequenced
    /// contender exists right now. A failed attempt leaves no contender
    /// behind.
    pub fn try_lock(&self) -> Result<bool, LockError> {
        if self.check_reentrancy() {
            return Ok(true);
        }
        let mut contender = None;
        let result = self.try_once(&mut contender);
        match result {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.abandon_contender(&mut contender);
                Ok(false)
            }
            Err(e) => {
                self.abandon_contender(&mut contender);
                Err(e)
            }
        }
    }

    /// Like [`DistributedLock::lock`], but gives up after `timeout` and
    /// returns `Ok(false)`. Expiry is a normal outcome, not an error, and
    /// the abandoned attempt's contender node is removed before returning,
    /// so it never occupies a queue slot after giving up.
    pub fn try_lock_for(&self, timeout: Duration) -> Result<bool, LockError> {
        if self.check_reentrancy() {
            return Ok(true);
        }
        let _session = self.primitive.session_scope();
        let deadline = Instant::now() + timeout;
        let mut contender = None;
        let result = self.timed_loop(&mut contender, deadline);
        match result {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.abandon_contender(&mut contender);
                Ok(false)
            }
            Err(e) => {
                tracing::error!(base = %self.base_path(), error = %e, "lock acquisition failed");
                self.abandon_contender(&mut contender);
                Err(e)
            }
        }
    }

    /// Like [`DistributedLock::lock`], but the wait can be cancelled through
    /// `token`. Cancellation cleans up the contender node, then surfaces as
    /// [`LockError::Interrupted`].
    pub fn lock_interruptibly(&self, token: &CancelToken) -> Result<(), LockError> {
        if self.check_reentrancy() {
            return Ok(());
        }
        let _session = self.primitive.session_scope();
        let mut contender = None;
        let result = self.interruptible_loop(&mut contender, token);
        if let Err(e) = &result {
            match e {
                LockError::Interrupted => {
                    tracing::debug!(base = %self.base_path(), "lock wait cancelled")
                }
                _ => tracing::error!(base = %self.base_path(), error = %e, "lock acquisition failed"),
            }
            self.abandon_contender(&mut contender);
        }
        result
    }

    /// A token that cancels this lock's interruptible waits.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            sync: Arc::clone(self.primitive.sync()),
        }
    }

    /// Release one level of the calling thread's hold. When the reentrancy
    /// count reaches zero the contender node is deleted (idempotently: it
    /// may already be gone after a session expiry) and, for
    /// [`ContainerCleanup::DeleteIfEmpty`] locks, the base container is
    /// removed if no contender repopulated it.
    ///
    /// Calling this from a thread that does not hold the lock is a caller
    /// error and returns [`LockError::NotHeld`].
    pub fn unlock(&self) -> Result<(), LockError> {
        let thread_id = thread::current().id();
        let released = {
            let mut holders = self.holders();
            let Some(holder) = holders.get_mut(&thread_id) else {
                return Err(LockError::NotHeld);
            };
            holder.count -= 1;
            if holder.count > 0 {
                tracing::debug!(node = %holder.node, count = holder.count, "reentrant release");
                None
            } else {
                holders.remove(&thread_id).map(|holder| holder.node)
            }
        };
        if let Some(node) = released {
            znode::ensure_delete(self.primitive.adapter().as_ref(), &node, -1);
            tracing::debug!(node = %node, "lock released");
            self.cleanup_container();
        }
        Ok(())
    }

    // === Acquisition internals ===

    fn lock_loop(&self, contender: &mut Option<String>) -> Result<(), LockError> {
        let sync = Arc::clone(self.primitive.sync());
        let mut guard = sync.lock();
        loop {
            let node = self.contender_node(contender)?;
            if self.try_acquire_distributed(&node, true)? {
                self.install_holder(node);
                tracing::debug!(base = %self.base_path(), "lock acquired");
                return Ok(());
            }
            // The signal watch is armed on the nearest live predecessor.
            // Session events wake us too; every wakeup loops back to
            // re-check the child list rather than trusting its cause.
            guard = sync.wait(guard);
        }
    }

    fn timed_loop(
        &self,
        contender: &mut Option<String>,
        deadline: Instant,
    ) -> Result<bool, LockError> {
        let sync = Arc::clone(self.primitive.sync());
        let mut guard = sync.lock();
        loop {
            let node = self.contender_node(contender)?;
            if self.try_acquire_distributed(&node, true)? {
                self.install_holder(node);
                tracing::debug!(base = %self.base_path(), "lock acquired");
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(base = %self.base_path(), "timed out waiting for lock");
                return Ok(false);
            }
            guard = sync.wait_timeout(guard, deadline - now);
        }
    }

    fn interruptible_loop(
        &self,
        contender: &mut Option<String>,
        token: &CancelToken,
    ) -> Result<(), LockError> {
        let sync = Arc::clone(self.primitive.sync());
        let mut guard = sync.lock();
        loop {
            if token.is_cancelled() {
                return Err(LockError::Interrupted);
            }
            let node = self.contender_node(contender)?;
            if self.try_acquire_distributed(&node, true)? {
                self.install_holder(node);
                tracing::debug!(base = %self.base_path(), "lock acquired");
                return Ok(());
            }
            guard = sync.wait(guard);
        }
    }

    fn try_once(&self, contender: &mut Option<String>) -> Result<bool, LockError> {
        let _guard = self.primitive.sync().lock();
        let node = self.contender_node(contender)?;
        if self.try_acquire_distributed(&node, false)? {
            self.install_holder(node);
            tracing::debug!(base = %self.base_path(), "lock acquired");
            return Ok(true);
        }
        Ok(false)
    }

    /// Create this attempt's contender node once, reusing it across loop
    /// iterations.
    fn contender_node(&self, contender: &mut Option<String>) -> Result<String, LockError> {
        if let Some(node) = contender.as_ref() {
            return Ok(node.clone());
        }
        let prefix_path = format!(
            "{}/{}{}",
            self.base_path(),
            LOCK_PREFIX,
            LOCK_DELIMITER
        );
        let node = znode::ensure_create(
            self.primitive.adapter().as_ref(),
            &prefix_path,
            net::local_addr().as_bytes(),
            self.primitive.acl(),
            CreateMode::EphemeralSequential,
        )?;
        tracing::debug!(node = %node, "created contender node");
        *contender = Some(node.clone());
        Ok(node)
    }

    /// Ask the service whether `node` is the smallest live contender. When
    /// it is not, probe the smaller sequences from the nearest one outward;
    /// the first live one becomes the watch target (`watch` permitting) and
    /// the attempt keeps waiting.
    fn try_acquire_distributed(&self, node: &str, watch: bool) -> Result<bool, LockError> {
        let adapter = self.primitive.adapter();
        let children = adapter.get_children(self.base_path(), None)?;
        let mut contenders = znode::filter_by_prefix(&children, &[LOCK_PREFIX]);
        znode::sort_by_sequence(&mut contenders, LOCK_DELIMITER)?;

        let name = node.rsplit('/').next().unwrap_or(node);
        let position = contenders
            .iter()
            .position(|contender| contender == name)
            .ok_or_else(|| LockError::LostContender {
                node: node.to_string(),
            })?;

        for predecessor in contenders[..position].iter().rev() {
            let path = znode::join(self.base_path(), predecessor);
            let stat = if watch {
                adapter.exists(&path, Some(self.primitive.signal_watcher()))?
            } else {
                adapter.exists(&path, None)?
            };
            if stat.is_some() {
                tracing::debug!(predecessor = %path, "queued behind live predecessor");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Record the calling thread as owner with a fresh count of one. The
    /// reentrancy fast path has already run, so no holder can exist here.
    fn install_holder(&self, node: String) {
        self.holders()
            .insert(thread::current().id(), LockHolder { node, count: 1 });
    }

    /// If the calling thread already owns the lock, bump its count.
    fn check_reentrancy(&self) -> bool {
        let mut holders = self.holders();
        if let Some(holder) = holders.get_mut(&thread::current().id()) {
            holder.count += 1;
            tracing::debug!(node = %holder.node, count = holder.count, "reentrant acquisition");
            true
        } else {
            false
        }
    }

    /// Best-effort removal of an abandoned attempt's contender node. Must
    /// not run while the local mutex is held: the deletion can fire a
    /// successor's watch, which takes that mutex to wake waiters.
    fn abandon_contender(&self, contender: &mut Option<String>) {
        if let Some(node) = contender.take() {
            znode::ensure_delete(self.primitive.adapter().as_ref(), &node, -1);
            tracing::debug!(node = %node, "removed abandoned contender");
        }
    }

    /// Post-release container cleanup for the delete-if-empty flavor.
    /// Failures here never unwind into the caller: "not empty" means another
    /// contender arrived and wants the container, anything else is logged.
    fn cleanup_container(&self) {
        if self.cleanup != ContainerCleanup::DeleteIfEmpty {
            return;
        }
        if !self.holders().is_empty() {
            return;
        }
        match znode::safe_delete(self.primitive.adapter().as_ref(), self.base_path(), -1) {
            Ok(true) => tracing::debug!(base = %self.base_path(), "removed lock container"),
            Ok(false) => {}
            Err(CoordinationError::NotEmpty(_)) => {
                tracing::debug!(base = %self.base_path(), "container repopulated, leaving in place");
            }
            Err(e) => {
                tracing::warn!(base = %self.base_path(), error = %e, "failed to remove lock container");
            }
        }
    }

    fn holders(&self) -> MutexGuard<'_, HashMap<ThreadId, LockHolder>> {
        self.holders.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
