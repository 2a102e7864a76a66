//! The public cache: two [`Segment`] generations, an atomic selector, and a
//! coarse mutex guarding the rare rotation path.
//!
//! Grounded on `original_source/cache.go` (`service.Set`/`Get`/`Delete`,
//! the background `newShardedMap` goroutine ahead of a rotation) and
//! `original_source/listener.go` (the `OnSegmentSwitch` callback shape),
//! with rotation now explicit rather than triggered from inside `Set`'s
//! own mutex the way the original interleaves it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::arena::ByteArena;
use crate::config::Config;
use crate::error::CacheError;
use crate::index::ShardedIndex;
use crate::segment::{Segment, SetOutcome};

/// Invoked after a rotation completes, with the newly active segment index,
/// the number of keys the displaced segment held, and how long the
/// rotation itself took. Mirrors `original_source/listener.go`'s
/// `OnSegmentSwitch(index, keys, timeTaken)`.
pub type RotateCallback = Box<dyn Fn(u32, u32, Duration) + Send + Sync>;

/// A fixed-capacity, bytes-oriented key/value cache with generational
/// segment rotation in place of per-key eviction.
pub struct Cache {
    segments: [Segment; 2],
    active: AtomicU32,
    rotate_mutex: Mutex<()>,
    spare_indexes: [Arc<Mutex<Option<Arc<ShardedIndex>>>>; 2],
    on_rotate: Option<RotateCallback>,
}

impl Cache {
    /// Builds a cache from `config`, with no rotation callback.
    pub fn new(config: Config) -> Result<Self, CacheError> {
        Self::with_rotate_callback(config, None)
    }

    /// Builds a cache from `config`, invoking `on_rotate` after every
    /// rotation.
    pub fn with_rotate_callback(config: Config, on_rotate: Option<RotateCallback>) -> Result<Self, CacheError> {
        let normalized = config.normalize()?;
        let segment_size = normalized.segment_data_size();

        let (arena_a, arena_b) = match normalized.location.as_deref() {
            Some(path) => (
                ByteArena::open_at(segment_size, Some(path), 0)?,
                ByteArena::open_at(segment_size, Some(path), segment_size as u64)?,
            ),
            None => (
                ByteArena::open(segment_size, None)?,
                ByteArena::open(segment_size, None)?,
            ),
        };

        let segments = [
            Segment::new(arena_a, normalized.shards, normalized.shard_map_size, normalized.max_entries),
            Segment::new(arena_b, normalized.shards, normalized.shard_map_size, normalized.max_entries),
        ];

        info!(
            size_mb = normalized.size_mb,
            shards = normalized.shards,
            max_entries = normalized.max_entries,
            mmap_backed = normalized.location.is_some(),
            "cache constructed"
        );

        Ok(Cache {
            segments,
            active: AtomicU32::new(0),
            rotate_mutex: Mutex::new(()),
            spare_indexes: [Arc::new(Mutex::new(None)), Arc::new(Mutex::new(None))],
            on_rotate,
        })
    }

    /// Looks up `key` in the active segment, falling back to the previous
    /// generation and, on a hit there, promoting the value back into the
    /// active segment so a key that's still being read doesn't fall out of
    /// cache purely because it landed just before a rotation.
    pub fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let active_idx = self.active.load(Ordering::Acquire) as usize;
        let primary = &self.segments[active_idx];
        if let Some(value) = primary.get(key) {
            return Ok(value);
        }
        let secondary = &self.segments[1 - active_idx];
        if let Some(value) = secondary.get(key) {
            // Best-effort promotion; a failure here (cap reached, no room)
            // just means the key will be read from the secondary again
            // until the next rotation evicts it.
            let _ = primary.set(key, &value);
            return Ok(value);
        }
        Err(CacheError::KeyNotFound)
    }

    /// Stores `key -> value` in the active segment, rotating once and
    /// retrying if the active segment denies admission (cap reached or out
    /// of space).
    pub fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let active_idx = self.active.load(Ordering::Acquire) as usize;
        if let SetOutcome::Stored = self.segments[active_idx].set(key, value) {
            return Ok(());
        }
        debug!(key, "active segment denied admission, rotating");
        self.rotate();
        let new_active_idx = self.active.load(Ordering::Acquire) as usize;
        match self.segments[new_active_idx].set(key, value) {
            SetOutcome::Stored => Ok(()),
            SetOutcome::Denied => Err(CacheError::SetFailed { key: key.to_string() }),
        }
    }

    /// Removes `key` from the active segment only. A stale binding left in
    /// the inactive segment (e.g. from before the last rotation) dies on
    /// the next rotation rather than being chased down here.
    pub fn delete(&self, key: &str) -> bool {
        let active_idx = self.active.load(Ordering::Acquire) as usize;
        self.segments[active_idx].delete(key)
    }

    /// Resets the inactive segment and flips the active selector, under the
    /// coarse rotation mutex. Double-checks `active` after acquiring the
    /// lock so concurrent callers that all hit admission denial at once
    /// only pay for one rotation.
    fn rotate(&self) {
        let observed_active = self.active.load(Ordering::Acquire);
        let guard = self.rotate_mutex.lock();
        if self.active.load(Ordering::Acquire) != observed_active {
            // Another writer already rotated while we waited for the lock.
            return;
        }

        let start = Instant::now();
        let inactive_idx = 1 - observed_active;
        let inactive = &self.segments[inactive_idx as usize];
        let evicted_keys = inactive.keys();

        match self.spare_indexes[inactive_idx as usize].lock().take() {
            Some(fresh) => inactive.reset_with(fresh),
            None => inactive.reset(),
        }

        self.active.store(inactive_idx, Ordering::Release);
        drop(guard);

        let elapsed = start.elapsed();
        info!(
            new_active = inactive_idx,
            evicted_keys,
            elapsed_us = elapsed.as_micros() as u64,
            "segment rotated"
        );
        if let Some(callback) = &self.on_rotate {
            callback(inactive_idx, evicted_keys, elapsed);
        }

        // The segment that just became inactive (observed_active) will be
        // this one's rotation target next time; start building its
        // replacement index now, off the rotation path.
        self.spawn_spare_prefetch(observed_active);
    }

    fn spawn_spare_prefetch(&self, segment_idx: u32) {
        let (shard_count, shard_map_size) = self.segments[segment_idx as usize].shard_layout();
        let slot = Arc::clone(&self.spare_indexes[segment_idx as usize]);
        std::thread::spawn(move || {
            let fresh = Arc::new(ShardedIndex::new(shard_count, shard_map_size));
            *slot.lock() = Some(fresh);
        });
    }

    /// Flushes and releases both segments' arenas.
    pub fn close(self) -> Result<(), CacheError> {
        let mut first_err = None;
        for segment in self.segments {
            if let Err(e) = segment.close() {
                warn!(error = %e, "segment close failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(CacheError::Io(e)),
            None => {
                info!("cache closed");
                Ok(())
            }
        }
    }
}
