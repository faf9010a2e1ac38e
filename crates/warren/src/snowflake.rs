//! Correlation-id generation.
//!
//! Correlation ids are snowflakes: 42-bit millisecond timestamp, 10-bit
//! node id, 12-bit sequence. The node id is derived by hashing the
//! [`NodeIdentity`], so two processes with distinct identities never mint
//! the same id and an id is never reused within a process. On the wire a
//! snowflake travels as its decimal string form.

use crate::hash::djb2_hash64;
use crate::types::NodeIdentity;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Error returned when the generator cannot produce an id.
#[derive(Debug, thiserror::Error)]
pub enum SnowflakeError {
    /// The system clock jumped backward by more than the maximum tolerable drift.
    #[error(
        "system clock jumped backward by {drift_ms}ms (>{max_drift_ms}ms max), check NTP configuration"
    )]
    ClockDriftExceeded { drift_ms: i64, max_drift_ms: i64 },
}

/// Custom epoch: 2025-01-01T00:00:00Z in milliseconds since Unix epoch.
const CUSTOM_EPOCH_MS: i64 = 1_735_689_600_000;

/// Maximum tolerable backward clock drift before giving up on id generation.
const MAX_CLOCK_DRIFT_MS: i64 = 5_000;

const NODE_ID_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const NODE_ID_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = NODE_ID_BITS + SEQUENCE_BITS;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;
const MAX_NODE_ID: i64 = (1 << NODE_ID_BITS) - 1;

/// A correlation id linking a request to its eventual reply.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Snowflake(pub i64);

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// The wire contract carries correlation ids as strings; JSON numbers above
// 2^53 would lose precision in the original JS peers.
impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<i64>()
            .map(Snowflake)
            .map_err(|e| D::Error::custom(format!("invalid correlation id {s:?}: {e}")))
    }
}

/// Lock-free snowflake generator.
///
/// A single `AtomicI64` stores timestamp and sequence together, so a
/// concurrent caller can never observe a stale sequence between a
/// timestamp update and a sequence reset. Layout of `ts_seq`: upper 52
/// bits = milliseconds since Unix epoch, lower 12 bits = sequence.
pub struct SnowflakeGenerator {
    node_id: i64,
    ts_seq: AtomicI64,
}

fn pack_ts_seq(timestamp: i64, sequence: i64) -> i64 {
    (timestamp << SEQUENCE_BITS) | sequence
}

fn unpack_timestamp(ts_seq: i64) -> i64 {
    ts_seq >> SEQUENCE_BITS
}

fn unpack_sequence(ts_seq: i64) -> i64 {
    ts_seq & SEQUENCE_MASK
}

impl SnowflakeGenerator {
    /// Create a generator whose node id is hashed from the given identity.
    pub fn for_identity(identity: &NodeIdentity) -> Self {
        let node_id = (djb2_hash64(identity.to_string().as_bytes()) & MAX_NODE_ID as u64) as i64;
        Self {
            node_id,
            // timestamp=-1, sequence=0 so the first CAS always succeeds
            ts_seq: AtomicI64::new(pack_ts_seq(-1, 0)),
        }
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_millis() as i64
    }

    /// Generate the next unique id. Lock-free.
    ///
    /// On small backward clock drift or sequence exhaustion within one
    /// millisecond this yields until the clock catches up. Returns
    /// `Err(SnowflakeError::ClockDriftExceeded)` if the clock jumped
    /// backward by more than 5 seconds.
    pub fn next(&self) -> Result<Snowflake, SnowflakeError> {
        loop {
            let timestamp = Self::current_timestamp();
            let current = self.ts_seq.load(Ordering::Acquire);
            let last_ts = unpack_timestamp(current);

            if timestamp < last_ts {
                let drift_ms = last_ts - timestamp;
                if drift_ms > MAX_CLOCK_DRIFT_MS {
                    return Err(SnowflakeError::ClockDriftExceeded {
                        drift_ms,
                        max_drift_ms: MAX_CLOCK_DRIFT_MS,
                    });
                }
                if drift_ms > 100 {
                    tracing::warn!(
                        drift_ms,
                        "snowflake: system clock jumped backward, waiting for clock to catch up"
                    );
                }
                std::thread::yield_now();
                continue;
            }

            let (new_val, seq) = if timestamp == last_ts {
                let seq = unpack_sequence(current) + 1;
                if seq > SEQUENCE_MASK {
                    // Sequence exhausted for this millisecond, wait for the next one.
                    std::thread::yield_now();
                    continue;
                }
                (pack_ts_seq(timestamp, seq), seq)
            } else {
                (pack_ts_seq(timestamp, 0), 0)
            };

            if self
                .ts_seq
                .compare_exchange(current, new_val, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }
            let id = ((timestamp - CUSTOM_EPOCH_MS) << TIMESTAMP_SHIFT)
                | (self.node_id << NODE_ID_SHIFT)
                | seq;

            return Ok(Snowflake(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeRole;

    fn generator() -> SnowflakeGenerator {
        SnowflakeGenerator::for_identity(&NodeIdentity::new(NodeRole::Gateway, "api"))
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let g = generator();
        let mut last = Snowflake(i64::MIN);
        for _ in 0..10_000 {
            let id = g.next().unwrap();
            assert!(id > last, "ids must be strictly increasing");
            last = id;
        }
    }

    #[test]
    fn distinct_identities_yield_distinct_node_ids() {
        let a = SnowflakeGenerator::for_identity(&NodeIdentity::new(NodeRole::VmAgent, "v1"));
        let b = SnowflakeGenerator::for_identity(&NodeIdentity::new(NodeRole::VmAgent, "v2"));
        assert_ne!(a.node_id, b.node_id);
        assert!(a.node_id <= MAX_NODE_ID && b.node_id <= MAX_NODE_ID);
    }

    #[test]
    fn serializes_as_string() {
        let id = Snowflake(1234567890123456789);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"1234567890123456789\"");
        let back: Snowflake = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn rejects_non_numeric_strings() {
        let res: Result<Snowflake, _> = serde_json::from_str("\"not-a-number\"");
        assert!(res.is_err());
    }

    #[test]
    fn concurrent_generation_has_no_duplicates() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let g = Arc::new(generator());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let g = Arc::clone(&g);
            handles.push(std::thread::spawn(move || {
                (0..5_000).map(|_| g.next().unwrap()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
    }
}
