//! In-memory registry of resources currently being operated on.
//!
//! Mutual exclusion is per-key, non-blocking: a second `try_lock` on a
//! held key returns `false` immediately and the caller surfaces
//! "resource in use" instead of waiting. Keys are normalized URL paths
//! for single-resource operations and literal disk paths for
//! move/rename, which hold two keys at once.
//!
//! State is process-local. It does not survive restart and provides no
//! cross-node exclusion; ownership assignment is what keeps two nodes
//! from mutating the same resource.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

/// An active hold on a resource. Exists only while an operation is in
/// flight.
#[derive(Debug, Clone)]
pub struct LockedResource {
    pub user: Option<Uuid>,
    pub verb: String,
    pub url: String,
    pub acquired_at: DateTime<Utc>,
}

/// The only mutable shared structure in the core: a mutex-guarded map
/// from resource key to its active hold.
#[derive(Debug, Default)]
pub struct LockManager {
    held: Mutex<HashMap<String, LockedResource>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grab `key` if nobody holds it. Never blocks.
    pub fn try_lock(&self, key: &str, user: Option<Uuid>, verb: &str) -> bool {
        let mut held = self.held.lock();
        if held.contains_key(key) {
            return false;
        }
        held.insert(
            key.to_string(),
            LockedResource {
                user,
                verb: verb.to_string(),
                url: key.to_string(),
                acquired_at: Utc::now(),
            },
        );
        true
    }

    /// Release `key`. Returns false if it was not held; an unlock is
    /// never silently lost.
    pub fn unlock(&self, key: &str) -> bool {
        self.held.lock().remove(key).is_some()
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.held.lock().contains_key(key)
    }

    /// Current holds, for introspection endpoints.
    pub fn snapshot(&self) -> Vec<LockedResource> {
        self.held.lock().values().cloned().collect()
    }

    /// Lock `key`, handing back a guard that releases on drop. This is
    /// the try/finally replacement: every orchestrator error path runs
    /// the unlock through the guard.
    pub fn acquire(
        self: &Arc<Self>,
        key: &str,
        user: Option<Uuid>,
        verb: &str,
    ) -> Option<LockGuard> {
        if !self.try_lock(key, user, verb) {
            return None;
        }
        Some(LockGuard {
            manager: self.clone(),
            keys: vec![key.to_string()],
        })
    }

    /// Lock two keys or neither. Move/rename touch a source and a
    /// destination path; failing to lock the second releases the first
    /// before reporting failure.
    pub fn acquire_pair(
        self: &Arc<Self>,
        first: &str,
        second: &str,
        user: Option<Uuid>,
        verb: &str,
    ) -> Option<LockGuard> {
        if !self.try_lock(first, user, verb) {
            return None;
        }
        if !self.try_lock(second, user, verb) {
            self.unlock(first);
            return None;
        }
        Some(LockGuard {
            manager: self.clone(),
            keys: vec![first.to_string(), second.to_string()],
        })
    }
}

/// Scoped hold on one or more lock keys; releases them all on drop.
#[must_use = "dropping the guard releases the lock"]
pub struct LockGuard {
    manager: Arc<LockManager>,
    keys: Vec<String>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        for key in &self.keys {
            if !self.manager.unlock(key) {
                tracing::error!("lock registry lost an entry for {key}");
            }
        }
    }
}
