//! Sharded, lock-striped key index: N independently lockable [`ShardTable`]s
//! addressed by the high bits of an FNV-1a-64 key hash.
//!
//! Grounded on `other_examples/.../sharded_index.rs.rs` (an array of
//! `parking_lot::RwLock`-wrapped shard maps, modulo-selected), adapted to
//! store compressed arena offsets instead of raw byte offsets and to hash
//! with the crate's own [`fnv1a64`] instead of `FxHashMap`'s built-in hasher.

use parking_lot::RwLock;

use crate::hash::fnv1a64;
use crate::shard_table::ShardTable;

/// Sentinel stored by [`ShardedIndex::delete`]: matches the original's
/// `m.maps[index][hashedKey] = 0` tombstone, where 0 can never be a real
/// compressed offset (slot 0 of a segment is reserved, see `segment`'s
/// `tail` starting value).
const TOMBSTONE: u32 = 0;

/// A key index split into `shards` independently lockable tables.
pub struct ShardedIndex {
    shards: Vec<RwLock<ShardTable>>,
    mask: u64,
}

impl ShardedIndex {
    /// Builds an index with `shard_count` shards (must already be a power
    /// of two; [`crate::config::Config::normalize`] guarantees this), each
    /// preallocated for `shard_map_size` entries.
    pub fn new(shard_count: u32, shard_map_size: usize) -> Self {
        debug_assert!(shard_count.is_power_of_two());
        let per_shard_hint = shard_map_size / (shard_count as usize).max(1);
        let shards = (0..shard_count)
            .map(|_| RwLock::new(ShardTable::with_capacity(per_shard_hint)))
            .collect();
        ShardedIndex {
            shards,
            mask: (shard_count - 1) as u64,
        }
    }

    #[inline]
    fn shard_for(&self, key: &str) -> (u64, &RwLock<ShardTable>) {
        let hash = fnv1a64(key.as_bytes());
        let shard = &self.shards[(hash & self.mask) as usize];
        (hash, shard)
    }

    /// Looks up the compressed offset stored for `key`.
    pub fn get_offset(&self, key: &str) -> Option<u32> {
        let (hash, shard) = self.shard_for(key);
        match shard.read().get(hash) {
            Some(TOMBSTONE) => None,
            other => other,
        }
    }

    /// Records `key -> offset`. `offset` must not be 0 (see [`TOMBSTONE`]).
    ///
    /// Returns `had_previous`: whether `key` already held a live (non-
    /// tombstoned) binding. A slot left behind by a prior `delete` does not
    /// count, even though [`ShardTable`] itself still considers it occupied.
    pub fn put(&self, key: &str, offset: u32) -> bool {
        debug_assert_ne!(offset, TOMBSTONE, "offset 0 is reserved as the tombstone");
        let (hash, shard) = self.shard_for(key);
        let mut table = shard.write();
        let had_previous = matches!(table.get(hash), Some(v) if v != TOMBSTONE);
        table.put(hash, offset);
        had_previous
    }

    /// Tombstones `key` by overwriting its slot with 0, mirroring the
    /// original's direct-write delete: the key's hash slot is not actually
    /// vacated, so a stale probe chain never needs the later insert to
    /// relink anything.
    ///
    /// Returns whether `key` held a live binding before this call; deleting
    /// a missing or already-tombstoned key returns `false` and leaves the
    /// table untouched.
    pub fn delete(&self, key: &str) -> bool {
        let (hash, shard) = self.shard_for(key);
        let mut table = shard.write();
        match table.get(hash) {
            Some(v) if v != TOMBSTONE => {
                table.put(hash, TOMBSTONE);
                true
            }
            _ => false,
        }
    }

    /// Total occupied slots across every shard (includes tombstones).
    pub fn count(&self) -> usize {
        self.shards.iter().map(|s| s.read().count()).sum()
    }

    /// Clears every shard without shrinking its backing allocation.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrips() {
        let idx = ShardedIndex::new(32, 1024);
        assert!(!idx.put("hello", 64), "fresh insert must report no previous binding");
        assert_eq!(idx.get_offset("hello"), Some(64));
        assert_eq!(idx.get_offset("missing"), None);
        assert!(idx.put("hello", 65), "overwrite must report a previous binding");
        assert_eq!(idx.get_offset("hello"), Some(65));
    }

    #[test]
    fn delete_tombstones_rather_than_removes() {
        let idx = ShardedIndex::new(32, 1024);
        idx.put("k", 32);
        assert!(idx.delete("k"));
        assert_eq!(idx.get_offset("k"), None);
        // count still reflects the tombstoned slot, matching the original's
        // direct-write delete semantics.
        assert_eq!(idx.count(), 1);
        // Deleting an already-tombstoned (or never-present) key reports no
        // previous binding and doesn't disturb the slot further.
        assert!(!idx.delete("k"));
        assert!(!idx.delete("never-written"));
    }

    #[test]
    fn distinct_keys_spread_across_shards() {
        let idx = ShardedIndex::new(32, 1024);
        for i in 0..1000 {
            idx.put(&format!("key-{i}"), (i + 1) as u32);
        }
        for i in 0..1000 {
            assert_eq!(idx.get_offset(&format!("key-{i}")), Some((i + 1) as u32));
        }
        assert_eq!(idx.count(), 1000);
    }

    #[test]
    fn clear_empties_every_shard() {
        let idx = ShardedIndex::new(32, 1024);
        for i in 0..100 {
            idx.put(&format!("key-{i}"), (i + 1) as u32);
        }
        idx.clear();
        assert_eq!(idx.count(), 0);
        assert_eq!(idx.get_offset("key-0"), None);
    }

    #[test]
    fn concurrent_reads_across_shards() {
        use std::sync::Arc;
        use std::thread;

        let idx = Arc::new(ShardedIndex::new(32, 1024));
        for i in 0..500 {
            idx.put(&format!("key-{i}"), (i + 1) as u32);
        }
        let mut handles = Vec::new();
        for t in 0..8 {
            let idx = Arc::clone(&idx);
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    let key = format!("key-{i}");
                    if t % 2 == 0 {
                        assert_eq!(idx.get_offset(&key), Some((i + 1) as u32));
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
