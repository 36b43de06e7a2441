// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node-name helpers and idempotent create/delete wrappers
//!
//! Sequence parsing and sorting operate on the numeric suffix the service
//! appends to sequential nodes. The safe/ensure wrappers turn the benign
//! races of a shared namespace ("already exists", "already gone") into
//! successful no-ops.

use crate::adapters::{Acl, CoordinationAdapter, CoordinationError, CreateMode};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Bound on [`ensure_create`] attempts before giving up.
pub const CREATE_RETRY_LIMIT: u32 = 50;

/// Every this-many failed attempts, [`ensure_create`] re-verifies the parent.
const PARENT_RECHECK_EVERY: u32 = 5;

/// Pause between retries of [`ensure_create`] and [`ensure_delete`].
const RETRY_PAUSE: Duration = Duration::from_millis(20);

/// A node name carried no parseable sequence suffix.
#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("no sequence parseable from node {node:?} with delimiter {delimiter:?}")]
    MissingDelimiter { node: String, delimiter: char },
    #[error("sequence suffix of node {node:?} is not numeric")]
    NotNumeric {
        node: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Failure of a retrying create.
#[derive(Debug, Error)]
pub enum ZnodeError {
    #[error(transparent)]
    Coordination(#[from] CoordinationError),
    #[error("gave up creating {path} after {attempts} attempts: {source}")]
    RetriesExhausted {
        path: String,
        attempts: u32,
        source: CoordinationError,
    },
}

/// Parse the numeric sequence following the last occurrence of `delimiter`.
///
/// The suffix is compared as an integer everywhere; zero-padding in the
/// service-assigned name is irrelevant.
pub fn parse_sequence(node: &str, delimiter: char) -> Result<u64, SequenceError> {
    let start = node
        .rfind(delimiter)
        .ok_or_else(|| SequenceError::MissingDelimiter {
            node: node.to_string(),
            delimiter,
        })?;
    node[start + delimiter.len_utf8()..]
        .parse()
        .map_err(|source| SequenceError::NotNumeric {
            node: node.to_string(),
            source,
        })
}

/// Stable ascending sort by parsed sequence. Sequence numbers are unique per
/// parent, so ties cannot occur.
pub fn sort_by_sequence(nodes: &mut Vec<String>, delimiter: char) -> Result<(), SequenceError> {
    let mut keyed = nodes
        .iter()
        .map(|node| parse_sequence(node, delimiter).map(|seq| (seq, node.clone())))
        .collect::<Result<Vec<_>, _>>()?;
    keyed.sort_by_key(|(seq, _)| *seq);
    *nodes = keyed.into_iter().map(|(_, node)| node).collect();
    Ok(())
}

/// Stable descending sort by parsed sequence.
pub fn sort_by_reverse_sequence(
    nodes: &mut Vec<String>,
    delimiter: char,
) -> Result<(), SequenceError> {
    sort_by_sequence(nodes, delimiter)?;
    nodes.reverse();
    Ok(())
}

/// Keep the nodes starting with any of `prefixes`, preserving input order.
pub fn filter_by_prefix(nodes: &[String], prefixes: &[&str]) -> Vec<String> {
    nodes
        .iter()
        .filter(|node| prefixes.iter().any(|prefix| node.starts_with(prefix)))
        .cloned()
        .collect()
}

/// Parent of an absolute path, derived from the path grammar: everything
/// before the final `/`. Top-level nodes have parent `/`; the root and
/// non-absolute strings have none.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/')? {
        0 => Some("/"),
        idx => Some(&path[..idx]),
    }
}

/// Join a parent path and a child name.
pub fn join(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Create a node, treating "already exists" as success. Returns the actual
/// path (for sequential modes the service-assigned one).
pub fn safe_create(
    adapter: &dyn CoordinationAdapter,
    path: &str,
    data: &[u8],
    acl: &[Acl],
    mode: CreateMode,
) -> Result<String, CoordinationError> {
    match adapter.create(path, data, acl, mode) {
        Ok(actual) => Ok(actual),
        Err(CoordinationError::NodeExists(_)) => {
            tracing::debug!(path, "node already exists");
            Ok(path.to_string())
        }
        Err(e) => Err(e),
    }
}

/// Delete a node, treating "does not exist" as success. Returns whether a
/// deletion actually happened.
pub fn safe_delete(
    adapter: &dyn CoordinationAdapter,
    path: &str,
    version: i32,
) -> Result<bool, CoordinationError> {
    match adapter.delete(path, version) {
        Ok(()) => Ok(true),
        Err(CoordinationError::NoNode(_)) => {
            tracing::debug!(path, "node already gone");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Create `path` and every missing ancestor, tolerating concurrent creators
/// at each level. Ancestors are plain persistent nodes with empty payloads.
pub fn recursive_safe_create(
    adapter: &dyn CoordinationAdapter,
    path: &str,
    data: &[u8],
    acl: &[Acl],
    mode: CreateMode,
) -> Result<String, CoordinationError> {
    if path == "/" {
        return Ok(path.to_string());
    }
    if let Some(parent) = parent(path) {
        if parent != "/" {
            recursive_safe_create(adapter, parent, &[], acl, CreateMode::Persistent)?;
        }
    }
    safe_create(adapter, path, data, acl, mode)
}

/// Delete `path` and every descendant, children first, ignoring "does not
/// exist" at any level.
pub fn recursive_safe_delete(
    adapter: &dyn CoordinationAdapter,
    path: &str,
    version: i32,
) -> Result<(), CoordinationError> {
    let children = match adapter.get_children(path, None) {
        Ok(children) => children,
        Err(CoordinationError::NoNode(_)) => return Ok(()),
        Err(e) => return Err(e),
    };
    for child in children {
        recursive_safe_delete(adapter, &join(path, &child), version)?;
    }
    safe_delete(adapter, path, version)?;
    Ok(())
}

/// Create with bounded retries. Every [`PARENT_RECHECK_EVERY`]-th failure,
/// the parent path (derived from the path grammar, see [`parent`]) is
/// re-verified and re-created before the next attempt. Exhausting
/// [`CREATE_RETRY_LIMIT`] is fatal.
pub fn ensure_create(
    adapter: &dyn CoordinationAdapter,
    path: &str,
    data: &[u8],
    acl: &[Acl],
    mode: CreateMode,
) -> Result<String, ZnodeError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match adapter.create(path, data, acl, mode) {
            Ok(actual) => return Ok(actual),
            Err(CoordinationError::NodeExists(_)) => {
                tracing::debug!(path, "node already exists");
                return Ok(path.to_string());
            }
            Err(e) if attempt >= CREATE_RETRY_LIMIT => {
                return Err(ZnodeError::RetriesExhausted {
                    path: path.to_string(),
                    attempts: attempt,
                    source: e,
                });
            }
            Err(e) => {
                tracing::warn!(path, attempt, error = %e, "create failed, retrying");
                if attempt % PARENT_RECHECK_EVERY == 0 {
                    if let Some(parent) = parent(path) {
                        // The retry bound stays authoritative even when the
                        // parent cannot be re-created right now.
                        if let Err(pe) =
                            recursive_safe_create(adapter, parent, &[], acl, CreateMode::Persistent)
                        {
                            tracing::warn!(parent, error = %pe, "parent re-creation failed");
                        }
                    }
                }
                thread::sleep(RETRY_PAUSE);
            }
        }
    }
}

/// Delete with unbounded retries on transient failures. "Does not exist" is
/// success (`false`). Intended for version `-1`; a genuine version conflict
/// would retry forever.
pub fn ensure_delete(adapter: &dyn CoordinationAdapter, path: &str, version: i32) -> bool {
    loop {
        match adapter.delete(path, version) {
            Ok(()) => return true,
            Err(CoordinationError::NoNode(_)) => {
                tracing::debug!(path, "node already gone");
                return false;
            }
            Err(e) => {
                tracing::warn!(path, error = %e, "delete failed, retrying");
                thread::sleep(RETRY_PAUSE);
            }
        }
    }
}

#[cfg(test)]
#[path = "znode_tests.rs"]
mod tests;
