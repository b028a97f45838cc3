//! Heap-backed block pool shared by all regular files of a filesystem.
//!
//! The disk hands out fixed-size zeroed blocks up to a configured capacity
//! and recycles returned blocks through a lock-free cache, so repeated
//! grow/shrink cycles reuse memory instead of churning the allocator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam_queue::SegQueue;
use tracing::trace;

use crate::error::{FsError, FsResult};

/// One fixed-size chunk of file content.
pub type Block = Box<[u8]>;

/// Default block size: 8 KiB.
pub const DEFAULT_BLOCK_SIZE: u64 = 8192;

/// Default disk capacity: 4 GiB.
pub const DEFAULT_MAX_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Fixed-capacity block allocator with a bounded cache of reclaimed blocks.
///
/// Space accounting invariant: `total = unallocated + live·B + cached·B`
/// where `B` is the block size. Blocks sitting in the cache still count as
/// reusable, so an allocation succeeds whenever `total - live·B` covers it.
pub struct Disk {
    block_size: u64,
    block_count: u64,
    max_cached_blocks: Option<u64>,
    allocated: Mutex<u64>,
    cache: SegQueue<Block>,
    cached: AtomicU64,
}

impl Disk {
    /// Creates a disk with the given block size, total byte capacity
    /// (rounded down to a block multiple) and reclaimed-block cache bound
    /// (`None` = unbounded).
    pub fn new(block_size: u64, max_size: u64, max_cached_blocks: Option<u64>) -> Self {
        assert!(block_size > 0, "block size must be positive");
        Disk {
            block_size,
            block_count: max_size / block_size,
            max_cached_blocks,
            allocated: Mutex::new(0),
            cache: SegQueue::new(),
            cached: AtomicU64::new(0),
        }
    }

    /// The size in bytes of every block this disk hands out.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Total capacity in bytes, a multiple of the block size.
    pub fn total_space(&self) -> u64 {
        self.block_count * self.block_size
    }

    /// Bytes neither held by files nor parked in the reclaimed-block cache.
    pub fn unallocated_space(&self) -> u64 {
        let allocated = *self.allocated.lock().expect("disk lock poisoned");
        let cached = self.cached.load(Ordering::Acquire);
        (self.block_count - allocated - cached) * self.block_size
    }

    /// Number of blocks currently held by files.
    pub fn allocated_blocks(&self) -> u64 {
        *self.allocated.lock().expect("disk lock poisoned")
    }

    /// Number of reclaimed blocks waiting in the cache.
    pub fn cached_blocks(&self) -> u64 {
        self.cached.load(Ordering::Acquire)
    }

    /// Reserves `count` blocks and appends them to `blocks`.
    ///
    /// All-or-nothing: on failure nothing is transferred and the accounting
    /// is unchanged. Cached blocks are reused first (re-zeroed), fresh
    /// zeroed blocks cover the rest.
    pub fn allocate(&self, blocks: &mut Vec<Block>, count: u64) -> FsResult<()> {
        if count == 0 {
            return Ok(());
        }
        let mut allocated = self.allocated.lock().expect("disk lock poisoned");
        let reusable = self.block_count - *allocated;
        if reusable < count {
            trace!(requested = count, reusable, "block allocation failed");
            return Err(FsError::NoSpace);
        }
        *allocated += count;

        let mut remaining = count;
        while remaining > 0 {
            match self.cache.pop() {
                Some(mut block) => {
                    self.cached.fetch_sub(1, Ordering::AcqRel);
                    block.fill(0);
                    blocks.push(block);
                }
                None => blocks.push(vec![0u8; self.block_size as usize].into_boxed_slice()),
            }
            remaining -= 1;
        }
        Ok(())
    }

    /// Returns the last `count` blocks of `blocks` to the disk; freed blocks
    /// park in the cache until it is full, the excess is dropped.
    pub fn free(&self, blocks: &mut Vec<Block>, count: u64) {
        let count = count.min(blocks.len() as u64);
        if count == 0 {
            return;
        }
        let mut allocated = self.allocated.lock().expect("disk lock poisoned");
        *allocated -= count;
        for _ in 0..count {
            let block = blocks.pop().expect("block list shorter than advertised");
            let cached = self.cached.load(Ordering::Acquire);
            let has_room = match self.max_cached_blocks {
                Some(limit) => cached < limit,
                None => true,
            };
            if has_room {
                self.cache.push(block);
                self.cached.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    /// Returns every block of `blocks` to the disk.
    pub fn free_all(&self, blocks: &mut Vec<Block>) {
        let count = blocks.len() as u64;
        self.free(blocks, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_disk() -> Disk {
        // 10 blocks of 4 bytes.
        Disk::new(4, 40, Some(16))
    }

    #[test]
    fn accounting_balances_across_allocate_and_free() {
        let disk = tiny_disk();
        let mut blocks = Vec::new();
        disk.allocate(&mut blocks, 3).unwrap();
        assert_eq!(disk.allocated_blocks(), 3);
        assert_eq!(disk.unallocated_space(), 28);

        disk.free(&mut blocks, 2);
        assert_eq!(disk.allocated_blocks(), 1);
        assert_eq!(disk.cached_blocks(), 2);
        assert_eq!(
            disk.total_space(),
            disk.unallocated_space()
                + (disk.allocated_blocks() + disk.cached_blocks()) * disk.block_size()
        );
    }

    #[test]
    fn full_disk_rejects_further_allocation_without_side_effects() {
        let disk = tiny_disk();
        let mut blocks = Vec::new();
        disk.allocate(&mut blocks, 10).unwrap();
        assert_eq!(disk.unallocated_space(), 0);

        let mut extra = Vec::new();
        assert!(matches!(disk.allocate(&mut extra, 1), Err(FsError::NoSpace)));
        assert!(extra.is_empty());
        assert_eq!(blocks.len(), 10);
        assert_eq!(disk.allocated_blocks(), 10);
        assert_eq!(disk.unallocated_space(), 0);
    }

    #[test]
    fn freed_blocks_are_reused_and_zeroed() {
        let disk = tiny_disk();
        let mut blocks = Vec::new();
        disk.allocate(&mut blocks, 1).unwrap();
        blocks[0][0] = 0xAB;
        disk.free_all(&mut blocks);
        assert_eq!(disk.cached_blocks(), 1);

        disk.allocate(&mut blocks, 1).unwrap();
        assert_eq!(disk.cached_blocks(), 0);
        assert_eq!(blocks[0][0], 0);
    }

    #[test]
    fn cache_bound_drops_excess_blocks() {
        let disk = Disk::new(4, 40, Some(2));
        let mut blocks = Vec::new();
        disk.allocate(&mut blocks, 5).unwrap();
        disk.free_all(&mut blocks);
        assert_eq!(disk.cached_blocks(), 2);
        assert_eq!(disk.unallocated_space(), 40 - 2 * 4);
    }

    #[test]
    fn capacity_rounds_down_to_block_multiple() {
        let disk = Disk::new(4, 42, None);
        assert_eq!(disk.total_space(), 40);
    }
}
