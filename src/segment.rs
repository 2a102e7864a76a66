//! One generation's worth of storage: a bump-allocated [`ByteArena`] plus the
//! [`ShardedIndex`] that maps keys into it.
//!
//! Grounded on `original_source/segment.go` (`set`/`get`/`delete`/`reset`,
//! the `MaxEntries` admission check, the CAS-decrement-unless-down-to-one
//! delete), redesigned per the distilled specification's entry header (a
//! control byte + little-endian length, 32-byte aligned, compressed into a
//! `u32` offset) in place of the original's 4-byte bare length header.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::arena::ByteArena;
use crate::index::ShardedIndex;

/// Byte written as the first header byte once an entry is fully written.
/// Chosen to make a torn or stale read distinguishable from a real entry
/// with overwhelming probability; it is not a format version tag.
const CONTROL_MARKER: u8 = 0x9A;
/// 1 control byte + 4 little-endian length bytes.
const HEADER_SIZE: usize = 5;
/// `tail` starts here, not 0: a compressed offset of 0 is reserved as
/// [`crate::index`]'s tombstone sentinel, so the first real entry must not
/// start at byte offset 0.
const INITIAL_TAIL: u64 = 32;

#[inline]
fn align32(n: usize) -> usize {
    (n + 31) & !31
}

/// Outcome of [`Segment::set`], distinguishing "won't fit / cap reached"
/// (caller should rotate and retry) from success.
pub enum SetOutcome {
    Stored,
    Denied,
}

/// A single generation: one arena, one index, a bump `tail`, a live-entry
/// `keys` counter.
pub struct Segment {
    arena: ByteArena,
    tail: AtomicU64,
    keys: AtomicU32,
    index: ArcSwap<ShardedIndex>,
    shard_count: u32,
    shard_map_size: usize,
    max_entries: u32,
}

impl Segment {
    /// Builds a segment over `arena`, with an index sized per `shard_count`
    /// / `shard_map_size` and an admission cap of `max_entries` (0 =
    /// unbounded).
    pub fn new(arena: ByteArena, shard_count: u32, shard_map_size: usize, max_entries: u32) -> Self {
        Segment {
            arena,
            tail: AtomicU64::new(INITIAL_TAIL),
            keys: AtomicU32::new(0),
            index: ArcSwap::new(Arc::new(ShardedIndex::new(shard_count, shard_map_size))),
            shard_count,
            shard_map_size,
            max_entries,
        }
    }


    /// Number of live (non-tombstoned-since-last-reset) keys, advisory only.
    pub fn keys(&self) -> u32 {
        self.keys.load(Ordering::Relaxed)
    }

    /// Shard layout this segment's index was built with, so a caller can
    /// build a same-shaped replacement index off-thread for
    /// [`Self::reset_with`].
    pub fn shard_layout(&self) -> (u32, usize) {
        (self.shard_count, self.shard_map_size)
    }

    /// Looks up `key`, validating the stored entry against the current
    /// `tail` and its own header before trusting the length it carries.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let offset = self.index.load().get_offset(key)?;
        self.read_entry(offset)
    }

    fn read_entry(&self, compressed_offset: u32) -> Option<Vec<u8>> {
        let start = (compressed_offset as usize) << 5;
        // Acquire: pairs with the Release tail store in `reset` and the
        // SeqCst fetch_add in `write_entry`, so a tail we observe here was
        // published no earlier than the bytes we're about to read.
        let tail = self.tail.load(Ordering::Acquire) as usize;
        if start + HEADER_SIZE > tail {
            return None;
        }
        // SAFETY: start + HEADER_SIZE <= tail <= arena.len() was just checked.
        let control = unsafe { self.arena.read_u8(start) };
        if control != CONTROL_MARKER {
            return None;
        }
        let value_len = unsafe { self.arena.read_u32_le(start + 1) } as usize;
        let end = start + HEADER_SIZE + value_len;
        if end > tail || end > self.arena.len() {
            return None;
        }
        // SAFETY: bounds checked above.
        let value = unsafe { self.arena.read_slice(start + HEADER_SIZE, value_len) };
        Some(value.to_vec())
    }

    /// Stores `value` under `key`. Returns `Denied` if the admission cap is
    /// reached or the value no longer fits in the remaining arena space;
    /// the caller ([`crate::cache::Cache`]) is responsible for rotating and
    /// retrying against a freshly reset segment. `keys` only increments on
    /// a key's first insert (or first insert after being deleted); an
    /// overwrite of a live key leaves it unchanged.
    pub fn set(&self, key: &str, value: &[u8]) -> SetOutcome {
        if self.max_entries > 0 && self.keys.load(Ordering::Relaxed) >= self.max_entries {
            return SetOutcome::Denied;
        }
        match self.write_entry(value) {
            Some(offset) => {
                let had_previous = self.index.load().put(key, offset);
                if !had_previous {
                    self.keys.fetch_add(1, Ordering::Relaxed);
                }
                SetOutcome::Stored
            }
            None => SetOutcome::Denied,
        }
    }

    fn write_entry(&self, value: &[u8]) -> Option<u32> {
        let entry_size = align32(HEADER_SIZE + value.len());
        // SeqCst: this is the single publication point new data becomes
        // reachable through; readers' Acquire load of `tail` must see a
        // consistent total order with it.
        let start = self.tail.fetch_add(entry_size as u64, Ordering::SeqCst) as usize;
        if start + entry_size > self.arena.len() {
            return None;
        }
        // SAFETY: [start, start+entry_size) was just reserved exclusively
        // by this fetch_add and fits the arena.
        unsafe {
            self.arena.write_u32_le(start + 1, value.len() as u32);
            self.arena.copy_from_slice(start + HEADER_SIZE, value);
            // Control byte last: a concurrent reader that raced ahead of
            // this fetch_add's Acquire-visible tail would see `start` still
            // beyond `tail`; one that lands here after tail updates must
            // never observe the marker before the length and value it
            // guards are in place.
            self.arena.write_u8(start, CONTROL_MARKER);
        }
        if ((start >> 5) as u32) == 0 {
            // INITIAL_TAIL keeps this unreachable in practice; guard anyway
            // since a real entry must never alias the tombstone sentinel.
            return None;
        }
        Some((start >> 5) as u32)
    }

    /// Removes `key`. Mirrors the original's CAS-decrement-unless-down-to-one
    /// counter: `keys` is never decremented past 1 by `delete`, only a full
    /// `reset` zeroes it. This keeps a segment that has ever held an entry
    /// from reporting `keys() == 0` before its next rotation.
    pub fn delete(&self, key: &str) -> bool {
        if !self.index.load().delete(key) {
            return false;
        }
        loop {
            let current = self.keys.load(Ordering::Relaxed);
            if current <= 1 {
                break;
            }
            if self
                .keys
                .compare_exchange_weak(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
        true
    }

    /// Resets this generation in place: clears the current index's shards,
    /// zeroes `keys`, then rewinds `tail`, in that order, so a reader
    /// concurrently racing the reset either sees the fully-reset state or
    /// the fully-prior one, never a mix with a rewound tail but a stale
    /// index. O(shards * capacity) — prefer [`Self::reset_with`] with a
    /// index prebuilt off the rotation path when one is available.
    pub fn reset(&self) {
        self.index.load().clear();
        self.keys.store(0, Ordering::Relaxed);
        self.tail.store(INITIAL_TAIL, Ordering::Release);
    }

    /// Resets this generation by swapping in `fresh_index` rather than
    /// clearing the old one in place.
    pub fn reset_with(&self, fresh_index: Arc<ShardedIndex>) {
        self.index.store(fresh_index);
        self.keys.store(0, Ordering::Relaxed);
        self.tail.store(INITIAL_TAIL, Ordering::Release);
    }

    /// Flushes and releases this segment's arena.
    pub fn close(self) -> std::io::Result<()> {
        self.arena.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(size: usize, max_entries: u32) -> Segment {
        let arena = ByteArena::open(size, None).unwrap();
        Segment::new(arena, 32, 1024, max_entries)
    }

    #[test]
    fn set_then_get_roundtrips() {
        let seg = segment(4096, 0);
        assert!(matches!(seg.set("a", b"hello"), SetOutcome::Stored));
        assert_eq!(seg.get("a"), Some(b"hello".to_vec()));
        assert_eq!(seg.keys(), 1);
    }

    #[test]
    fn get_missing_key_is_none() {
        let seg = segment(4096, 0);
        assert_eq!(seg.get("nope"), None);
    }

    #[test]
    fn delete_then_get_is_none() {
        let seg = segment(4096, 0);
        seg.set("a", b"v");
        assert!(seg.delete("a"));
        assert_eq!(seg.get("a"), None);
    }

    #[test]
    fn delete_keeps_keys_counter_at_least_one() {
        let seg = segment(4096, 0);
        seg.set("a", b"v");
        seg.delete("a");
        assert_eq!(seg.keys(), 1);
    }

    #[test]
    fn delete_of_missing_or_already_deleted_key_returns_false() {
        let seg = segment(4096, 0);
        assert!(!seg.delete("never-written"));
        seg.set("a", b"v");
        assert!(seg.delete("a"));
        assert!(!seg.delete("a"));
    }

    #[test]
    fn overwrite_does_not_inflate_keys_counter() {
        let seg = segment(4096, 0);
        seg.set("a", b"v1");
        seg.set("a", b"v2-longer");
        assert_eq!(seg.keys(), 1);
    }

    #[test]
    fn admission_cap_denies_once_reached() {
        let seg = segment(1 << 20, 2);
        assert!(matches!(seg.set("a", b"1"), SetOutcome::Stored));
        assert!(matches!(seg.set("b", b"2"), SetOutcome::Stored));
        assert!(matches!(seg.set("c", b"3"), SetOutcome::Denied));
    }

    #[test]
    fn overwrite_at_cap_is_not_denied() {
        let seg = segment(1 << 20, 2);
        seg.set("a", b"1");
        seg.set("b", b"2");
        // Both slots are taken, but this is an overwrite, not a new key, so
        // it must not be denied by the admission cap.
        assert!(matches!(seg.set("a", b"1-updated"), SetOutcome::Stored));
        assert_eq!(seg.get("a"), Some(b"1-updated".to_vec()));
    }

    #[test]
    fn out_of_space_denies_without_panicking() {
        let seg = segment(128, 0);
        let big = vec![0u8; 1024];
        assert!(matches!(seg.set("big", &big), SetOutcome::Denied));
    }

    #[test]
    fn reset_clears_index_and_counters() {
        let seg = segment(4096, 0);
        seg.set("a", b"v");
        seg.reset();
        assert_eq!(seg.keys(), 0);
        assert_eq!(seg.get("a"), None);
        // Space is reclaimed: a new write at the same logical spot succeeds.
        assert!(matches!(seg.set("a", b"v2"), SetOutcome::Stored));
        assert_eq!(seg.get("a"), Some(b"v2".to_vec()));
    }

    #[test]
    fn overwriting_same_key_updates_value() {
        let seg = segment(4096, 0);
        seg.set("a", b"first");
        seg.set("a", b"second-longer");
        assert_eq!(seg.get("a"), Some(b"second-longer".to_vec()));
    }
}
