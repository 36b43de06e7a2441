// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run a unit of work while holding a named lock
//!
//! The executor bounds the acquisition wait, guarantees release on every
//! exit path, and keeps the work's own outcome untouched. A missed
//! acquisition surfaces as a distinguished timeout error and the work never
//! runs.

use crate::lock::{DistributedLock, LockError};
use crate::registry::LockRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Boxed error type produced by units of work.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A named locking job: which lock to take, how long to wait for it, and
/// whether the lock's container is use-and-discard.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockJob {
    /// Lock name, resolved to a base path by the registry.
    pub name: String,
    /// Longest time to wait for the lock before giving up.
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
    /// Use the delete-if-empty lock flavor.
    #[serde(default)]
    pub ephemeral: bool,
}

impl LockJob {
    pub fn new(name: impl Into<String>, max_wait: Duration) -> Self {
        Self {
            name: name.into(),
            max_wait,
            ephemeral: false,
        }
    }

    pub fn with_ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }
}

/// Errors from [`LockExecutor::execute_with_lock`].
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The lock could not be acquired within the job's wait budget. The unit
    /// of work did not run.
    #[error("lock acquisition timed out after {wait} for job {name}", wait = fmt_wait(.waited))]
    Timeout { name: String, waited: Duration },
    #[error(transparent)]
    Lock(#[from] LockError),
    /// The unit of work itself failed; passed through unchanged.
    #[error(transparent)]
    Job(BoxError),
}

fn fmt_wait(waited: &Duration) -> String {
    humantime::format_duration(*waited).to_string()
}

/// Releases the lock when the work is done, error or not.
struct ReleaseGuard<'a> {
    lock: &'a DistributedLock,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock() {
            tracing::warn!(base = %self.lock.base_path(), error = %e, "failed to release lock after job");
        }
    }
}

/// Runs jobs under locks resolved through a [`LockRegistry`].
pub struct LockExecutor {
    registry: Arc<LockRegistry>,
}

impl LockExecutor {
    pub fn new(registry: Arc<LockRegistry>) -> Self {
        Self { registry }
    }

    /// Acquire the job's lock within its wait budget, run `work` while
    /// holding it, and release on every exit path. The work's result or
    /// error propagates unchanged; a missed acquisition is
    /// [`ExecutorError::Timeout`] and the work never runs.
    pub fn execute_with_lock<T>(
        &self,
        job: &LockJob,
        work: impl FnOnce() -> Result<T, BoxError>,
    ) -> Result<T, ExecutorError> {
        let lock = if job.ephemeral {
            self.registry.ephemeral(&job.name)?
        } else {
            self.registry.standard(&job.name)?
        };

        if !lock.try_lock_for(job.max_wait)? {
            tracing::warn!(job = %job.name, waited = %fmt_wait(&job.max_wait), "lock acquisition timed out");
            return Err(ExecutorError::Timeout {
                name: job.name.clone(),
                waited: job.max_wait,
            });
        }

        tracing::debug!(job = %job.name, "lock acquired, running job");
        let _release = ReleaseGuard { lock: &lock };
        work().map_err(ExecutorError::Job)
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
