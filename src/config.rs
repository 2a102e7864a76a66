//! Cache construction parameters.
//!
//! `Config` is the public, `serde`-deserializable shape a caller builds or
//! loads from its own configuration format. [`Config::normalize`] turns it
//! into the derived values the rest of the crate actually needs; callers
//! never see [`NormalizedConfig`] directly.

use std::path::PathBuf;

use crate::error::CacheError;

/// Default total cache size in MiB when `size_mb` is left at 0.
pub const DEFAULT_CACHE_SIZE_MB: u32 = 1;
/// Minimum shard count for a [`crate::index::ShardedIndex`].
pub const MIN_SHARDS: u32 = 32;
/// Default per-shard table preallocation when `max_entries` is unset.
pub const DEFAULT_SHARD_MAP_SIZE: usize = 32 * 1024;
/// Bytes per MiB.
pub const MIB: u64 = 1024 * 1024;
/// Maximum total cache size in MiB (256 GiB).
pub const MAX_SIZE_MB: u32 = 262_144;

/// Cache construction parameters.
///
/// All fields are optional in the sense that 0 / `None` selects a sane
/// default; see [`Config::normalize`] for the exact rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    /// Admission cap per segment. 0 means unbounded (limited only by bytes).
    #[serde(default)]
    pub max_entries: u32,
    /// Hint used to auto-size `size_mb` from `max_entries`.
    #[serde(default)]
    pub entry_size: u32,
    /// Total arena size in MiB, split evenly across the 2 segments.
    #[serde(default)]
    pub size_mb: u32,
    /// Shard count hint; rounded up to a power of two, clamped to
    /// `MIN_SHARDS` at minimum.
    #[serde(default)]
    pub shards: u32,
    /// If set, the arena is backed by this file (shared mmap); otherwise
    /// the arena is anonymous memory.
    #[serde(default)]
    pub location: Option<PathBuf>,
}

/// Derived, validated values used to build a [`crate::Cache`].
#[derive(Debug, Clone)]
pub(crate) struct NormalizedConfig {
    pub size_mb: u32,
    pub shards: u32,
    pub shard_map_size: usize,
    pub max_entries: u32,
    pub location: Option<PathBuf>,
}

impl NormalizedConfig {
    /// Size, in bytes, of a single segment's arena (half the total).
    pub fn segment_data_size(&self) -> usize {
        (self.size_mb as u64 * MIB / 2) as usize
    }
}

impl Config {
    /// Normalizes this config per the rules in `original_source/config.go`'s
    /// `Init()`, adjusted where the distilled specification overrides the
    /// original's literal behavior (see `DESIGN.md`).
    pub(crate) fn normalize(&self) -> Result<NormalizedConfig, CacheError> {
        let mut size_mb = self.size_mb;
        if size_mb == 0 {
            size_mb = DEFAULT_CACHE_SIZE_MB;
            if self.max_entries > 0 && self.entry_size > 0 {
                let extra_bytes = 2u64 * self.max_entries as u64 * self.entry_size as u64;
                size_mb = size_mb.saturating_add((extra_bytes / MIB) as u32);
            }
        }
        if size_mb > MAX_SIZE_MB {
            size_mb = MAX_SIZE_MB;
        }
        if size_mb == 0 {
            return Err(CacheError::Config("size_mb resolved to 0".to_string()));
        }

        let mut shards = self.shards;
        if shards < MIN_SHARDS {
            shards = MIN_SHARDS;
            let candidate = self.max_entries / (MIB as u32);
            if candidate > shards {
                shards = candidate;
            }
        }
        shards = shards.next_power_of_two();

        let shard_map_size = if self.max_entries > 0 {
            let per_shard = 2 * (self.max_entries as usize) / (shards as usize);
            per_shard.max(DEFAULT_SHARD_MAP_SIZE)
        } else {
            DEFAULT_SHARD_MAP_SIZE
        };

        Ok(NormalizedConfig {
            size_mb,
            shards,
            shard_map_size,
            max_entries: self.max_entries,
            location: self.location.clone(),
        })
    }
}
