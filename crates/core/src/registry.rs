// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named-lock registry
//!
//! One registry per process, created at startup with the shared adapter and
//! namespace prefix, passed to whoever needs locks, and dropped at shutdown.
//! Nothing here is global state.

use crate::adapters::{Acl, CoordinationAdapter};
use crate::lock::{DistributedLock, LockError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Maps lock names to lock instances under a namespace prefix.
pub struct LockRegistry {
    adapter: Arc<dyn CoordinationAdapter>,
    prefix: String,
    acl: Vec<Acl>,
    standard: Mutex<HashMap<String, Arc<DistributedLock>>>,
}

impl LockRegistry {
    /// `prefix` is the namespace subtree all lock base paths live under,
    /// e.g. `/locks`; a trailing slash is tolerated.
    pub fn new(
        adapter: Arc<dyn CoordinationAdapter>,
        prefix: impl Into<String>,
        acl: Vec<Acl>,
    ) -> Self {
        let mut prefix = prefix.into();
        while prefix.len() > 1 && prefix.ends_with('/') {
            prefix.pop();
        }
        Self {
            adapter,
            prefix,
            acl,
            standard: Mutex::new(HashMap::new()),
        }
    }

    /// The lock for a long-lived name. Instances are cached: every caller in
    /// the process shares one instance per name, which is what makes
    /// reentrancy and local hand-off work.
    pub fn standard(&self, name: &str) -> Result<Arc<DistributedLock>, LockError> {
        let mut standard = self.standard.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = standard.get(name) {
            return Ok(Arc::clone(lock));
        }
        let lock = Arc::new(DistributedLock::new(
            self.base_path(name),
            Arc::clone(&self.adapter),
            self.acl.clone(),
        )?);
        standard.insert(name.to_string(), Arc::clone(&lock));
        tracing::debug!(name, base = %lock.base_path(), "registered lock");
        Ok(lock)
    }

    /// A fresh delete-if-empty lock for a dynamically named resource. Not
    /// cached: the container may be removed at full release, so instances
    /// must not outlive their path.
    pub fn ephemeral(&self, name: &str) -> Result<Arc<DistributedLock>, LockError> {
        Ok(Arc::new(DistributedLock::ephemeral(
            self.base_path(name),
            Arc::clone(&self.adapter),
            self.acl.clone(),
        )?))
    }

    fn base_path(&self, name: &str) -> String {
        if self.prefix == "/" {
            format!("/{name}")
        } else {
            format!("{}/{name}", self.prefix)
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
