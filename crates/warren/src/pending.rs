//! Caller-side correlation bookkeeping.
//!
//! One [`PendingRequest`] exists per in-flight call, registered before the
//! request is published so a fast reply can never race the bookkeeping.
//! Exactly one of resolve/reject happens per entry: the single removal
//! point is `DashMap::remove`, whichever of reply arrival, caller timeout
//! or the background sweep gets there first.

use crate::envelope::ReplyEnvelope;
use crate::error::BridgeError;
use crate::metrics::BridgeMetrics;
use crate::snowflake::Snowflake;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

pub type ReplyReceiver = oneshot::Receiver<Result<Value, BridgeError>>;

struct PendingRequest {
    method: String,
    created_at: DateTime<Utc>,
    deadline: Instant,
    tx: oneshot::Sender<Result<Value, BridgeError>>,
}

/// Map of in-flight calls owned by one dispatcher.
pub struct PendingRequests {
    map: DashMap<Snowflake, PendingRequest>,
    metrics: Arc<BridgeMetrics>,
}

impl PendingRequests {
    pub fn new(metrics: Arc<BridgeMetrics>) -> Self {
        Self {
            map: DashMap::new(),
            metrics,
        }
    }

    /// Register a pending entry and hand back the receiver the caller
    /// awaits. Must be called before the request is published.
    pub fn register(&self, id: Snowflake, method: &str, timeout: Duration) -> ReplyReceiver {
        let (tx, rx) = oneshot::channel();
        let previous = self.map.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                created_at: Utc::now(),
                deadline: Instant::now() + timeout,
                tx,
            },
        );
        // Snowflakes are never reused within a process; a collision here
        // would mean the generator is broken.
        debug_assert!(previous.is_none(), "correlation id {id} reused");
        self.metrics.pending_requests.set(self.map.len() as i64);
        rx
    }

    /// Resolve the entry matching an inbound reply. A reply with no entry
    /// (timed out, duplicate delivery) is discarded with a debug log.
    pub fn resolve(&self, reply: ReplyEnvelope) {
        let id = reply.correlation_id;
        match self.map.remove(&id) {
            Some((_, entry)) => {
                if entry.tx.send(reply.into_result()).is_err() {
                    tracing::debug!(
                        correlation_id = %id,
                        method = %entry.method,
                        "caller gone before reply arrived"
                    );
                }
                self.metrics.pending_requests.set(self.map.len() as i64);
            }
            None => {
                self.metrics.late_replies.inc();
                tracing::debug!(
                    correlation_id = %id,
                    method = %reply.method,
                    "discarding reply with no pending entry"
                );
            }
        }
    }

    /// Remove an entry whose caller gave up (publish failure or caller-side
    /// timeout). Returns the method name if the entry was still present.
    pub fn take(&self, id: Snowflake) -> Option<String> {
        let removed = self.map.remove(&id).map(|(_, entry)| entry.method);
        if removed.is_some() {
            self.metrics.pending_requests.set(self.map.len() as i64);
        }
        removed
    }

    /// Reject and remove every entry whose deadline has passed. Returns the
    /// number of entries expired.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Snowflake> = self
            .map
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| *entry.key())
            .collect();

        let mut count = 0;
        for id in expired {
            if let Some((_, entry)) = self.map.remove(&id) {
                count += 1;
                self.metrics.timeouts.inc();
                tracing::debug!(
                    correlation_id = %id,
                    method = %entry.method,
                    created_at = %entry.created_at,
                    "expiring pending request"
                );
                let _ = entry.tx.send(Err(BridgeError::Timeout {
                    method: entry.method,
                    correlation_id: id,
                }));
            }
        }
        if count > 0 {
            self.metrics.pending_requests.set(self.map.len() as i64);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
