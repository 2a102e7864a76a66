//! Fixed-size writable byte region, anonymous or file-backed.
//!
//! Mirrors `original_source/mmap.go` (open/assign) and the teacher's
//! `shm::region::ShmRegion`, minus the cross-process lock file: this design
//! only ever shares an arena across threads of one process, so a bare mmap
//! (or anonymous memory) is the whole story.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use memmap2::{MmapMut, MmapOptions};

/// A fixed-size, raw, mutable byte region.
///
/// All accessors are `unsafe`: callers (the [`crate::segment::Segment`]
/// bump allocator) are responsible for keeping offsets in bounds and for
/// the memory-ordering discipline described in the module's invariants.
/// `ByteArena` itself performs no synchronization — it is a dumb memory
/// view, by design, so the hot path never content for a lock over byte
/// access.
pub struct ByteArena {
    mmap: MmapMut,
    len: usize,
}

// SAFETY: every write goes through a raw pointer into a region reserved
// exclusively for that writer (via an atomic fetch_add upstream in
// `Segment::set`); concurrent access is a validated read, never a
// concurrent write to the same bytes.
unsafe impl Send for ByteArena {}
unsafe impl Sync for ByteArena {}

impl ByteArena {
    /// Opens an arena of `size` bytes.
    ///
    /// `path` absent maps anonymous zeroed memory; `path` present creates
    /// the file if missing, grows it to fit `size` at offset 0, and maps it
    /// shared read/write.
    pub fn open(size: usize, path: Option<&Path>) -> io::Result<Self> {
        Self::open_at(size, path, 0)
    }

    /// Like [`Self::open`], but for a file-backed arena, maps starting at
    /// `file_offset` bytes into the file. Used so that the cache's two
    /// segments can share a single backing file (`offset = segment_index *
    /// segment_data_size`).
    pub fn open_at(size: usize, path: Option<&Path>, file_offset: u64) -> io::Result<Self> {
        let mmap = match path {
            None => MmapMut::map_anon(size)?,
            Some(path) => {
                let required_len = file_offset + size as u64;
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(path)?;
                if file.metadata()?.len() < required_len {
                    file.set_len(required_len)?;
                }
                // SAFETY: we hold exclusive write access to a freshly
                // opened/sized file; no other process is assumed to mutate
                // it concurrently with our sizing step.
                unsafe {
                    MmapOptions::new()
                        .offset(file_offset)
                        .len(size)
                        .map_mut(&file)?
                }
            }
        };
        Ok(ByteArena { mmap, len: size })
    }

    /// Total size of the region in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn base_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    /// Reads one byte at `offset`.
    ///
    /// # Safety
    /// `offset < self.len()`.
    #[inline]
    pub unsafe fn read_u8(&self, offset: usize) -> u8 {
        *self.base_ptr().add(offset)
    }

    /// Writes one byte at `offset`.
    ///
    /// # Safety
    /// `offset < self.len()`, and the caller must own (have reserved) this
    /// byte for writing.
    #[inline]
    pub unsafe fn write_u8(&self, offset: usize, value: u8) {
        *(self.base_ptr().add(offset) as *mut u8) = value;
    }

    /// Reads a little-endian `u32` starting at `offset`.
    ///
    /// # Safety
    /// `offset + 4 <= self.len()`.
    #[inline]
    pub unsafe fn read_u32_le(&self, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        std::ptr::copy_nonoverlapping(self.base_ptr().add(offset), buf.as_mut_ptr(), 4);
        u32::from_le_bytes(buf)
    }

    /// Writes a little-endian `u32` starting at `offset`.
    ///
    /// # Safety
    /// `offset + 4 <= self.len()`, and the caller must own this range.
    #[inline]
    pub unsafe fn write_u32_le(&self, offset: usize, value: u32) {
        let bytes = value.to_le_bytes();
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base_ptr().add(offset) as *mut u8, 4);
    }

    /// Copies `data` into the arena starting at `offset`.
    ///
    /// # Safety
    /// `offset + data.len() <= self.len()`, and the caller must own this
    /// range exclusively.
    #[inline]
    pub unsafe fn copy_from_slice(&self, offset: usize, data: &[u8]) {
        std::ptr::copy_nonoverlapping(data.as_ptr(), self.base_ptr().add(offset) as *mut u8, data.len());
    }

    /// Borrows `len` bytes starting at `offset`.
    ///
    /// # Safety
    /// `offset + len <= self.len()`. The returned slice's lifetime is tied
    /// to `self` but nothing prevents a concurrent rotation from
    /// overwriting these bytes; callers must not hold the slice across a
    /// point where a rotation could occur (see `Segment::get`/`Cache::get`).
    #[inline]
    pub unsafe fn read_slice(&self, offset: usize, len: usize) -> &[u8] {
        std::slice::from_raw_parts(self.base_ptr().add(offset), len)
    }

    /// Flushes the mapping and releases it.
    pub fn close(self) -> io::Result<()> {
        let mut mmap = self.mmap;
        mmap.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_arena_is_zeroed() {
        let arena = ByteArena::open(4096, None).unwrap();
        unsafe {
            assert_eq!(arena.read_u8(0), 0);
            assert_eq!(arena.read_u32_le(100), 0);
        }
    }

    #[test]
    fn write_then_read_roundtrips() {
        let arena = ByteArena::open(4096, None).unwrap();
        unsafe {
            arena.write_u8(10, 0x9A);
            arena.write_u32_le(11, 42);
            arena.copy_from_slice(15, b"hello");
            assert_eq!(arena.read_u8(10), 0x9A);
            assert_eq!(arena.read_u32_le(11), 42);
            assert_eq!(arena.read_slice(15, 5), b"hello");
        }
    }

    #[test]
    fn file_backed_arena_persists_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arena.bin");
        let arena = ByteArena::open(8192, Some(&path)).unwrap();
        unsafe {
            arena.write_u8(0, 7);
        }
        arena.close().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8192);
    }

    #[test]
    fn two_segments_share_one_file_at_distinct_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.bin");
        let seg_size = 4096usize;
        let a = ByteArena::open_at(seg_size, Some(&path), 0).unwrap();
        let b = ByteArena::open_at(seg_size, Some(&path), seg_size as u64).unwrap();
        unsafe {
            a.write_u8(0, 1);
            b.write_u8(0, 2);
            assert_eq!(a.read_u8(0), 1);
            assert_eq!(b.read_u8(0), 2);
        }
        assert_eq!(std::fs::metadata(&path).unwrap().len(), (seg_size * 2) as u64);
    }
}
