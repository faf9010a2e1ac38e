//! Per-target execution serialization.
//!
//! The bridge gives no cross-call ordering guarantee for a target id, so
//! an execution context that mutates a shared external resource (start or
//! stop of the same container) holds the target's lock for the duration of
//! the mutation. One lock per key, created on first use; entries are kept
//! for the process lifetime, bounded by the number of distinct target ids
//! one node ever serves.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Keyed async mutex handed to execution contexts.
#[derive(Default)]
pub struct TargetLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting behind any holder of the same
    /// key. Guards for distinct keys never contend.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}
