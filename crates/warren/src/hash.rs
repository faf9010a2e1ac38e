/// DJB2 hash function for deterministic shard routing.
/// Produces the same hash for the same byte slice on every node.
pub fn djb2_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 5381;
    for &b in bytes {
        hash = hash.wrapping_mul(33).wrapping_add(b as u32);
    }
    hash
}

/// 64-bit DJB2 variant, used where more than 32 bits of spread are needed
/// (machine-id derivation for correlation ids).
pub fn djb2_hash64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &b in bytes {
        hash = hash.wrapping_mul(33).wrapping_add(b as u64);
    }
    hash
}

/// Compute the shard index owning an entity id.
///
/// Returns a 0-indexed shard in `[0, shard_count)`. Stable for a fixed
/// `shard_count`; changing the shard count requires a coordinated
/// rebalance of all nodes and is never handled silently here.
///
/// # Panics
///
/// Panics if `shard_count` is zero.
pub fn shard_for_entity(entity_id: &str, shard_count: u32) -> u32 {
    assert!(shard_count >= 1, "shard_count must be >= 1, got 0");
    djb2_hash(entity_id.as_bytes()) % shard_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let h1 = djb2_hash(b"guild-42");
        let h2 = djb2_hash(b"guild-42");
        assert_eq!(h1, h2);
    }

    #[test]
    fn different_inputs_differ() {
        assert_ne!(djb2_hash(b"guild-42"), djb2_hash(b"guild-43"));
    }

    #[test]
    fn djb2_hash64_deterministic() {
        assert_eq!(djb2_hash64(b"vm/v1"), djb2_hash64(b"vm/v1"));
    }

    #[test]
    fn shard_for_entity_in_range() {
        for i in 0..1000 {
            let shard = shard_for_entity(&format!("id-{i}"), 16);
            assert!(shard < 16);
        }
    }

    #[test]
    fn distribution() {
        let num_shards = 16;
        let num_keys = 10_000;
        let mut counts = vec![0u32; num_shards as usize];

        for i in 0..num_keys {
            let key = format!("entity-{i}");
            counts[shard_for_entity(&key, num_shards) as usize] += 1;
        }

        let expected = num_keys as f64 / num_shards as f64;
        let max_allowed = (expected * 2.0) as u32;
        for (i, &count) in counts.iter().enumerate() {
            assert!(
                count <= max_allowed,
                "shard {i} has {count} entities, expected at most {max_allowed}"
            );
        }
    }

    #[test]
    #[should_panic(expected = "shard_count must be >= 1")]
    fn shard_for_entity_zero_shards_panics() {
        shard_for_entity("test", 0);
    }
}
