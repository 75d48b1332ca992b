//! `AllocManager`: the size-classed free-list shared by a pool tree.
//!
//! One `AllocManager` backs an entire tree rooted at a top-level [`crate::Pool`];
//! every pool created via `Pool::create` shares its root's manager. It is
//! internally locked so it may be handed to another thread once no pool in
//! the tree has an operation in flight, per the concurrency model in the
//! design notes.

use std::collections::BTreeMap;

use parking_lot::ReentrantMutex;
use std::cell::RefCell;

use crate::block::{size_class, Block, DEFAULT_BLOCK_SIZE};

/// Caps how many recycled bytes the free-list is allowed to retain.
/// Beyond this, freed blocks are deallocated immediately instead of queued.
pub const DEFAULT_MAX_FREE: usize = 2 * 1024 * 1024;

struct Inner {
    /// Free blocks bucketed by `size_class`; `last` below tracks the
    /// highest non-empty bucket so callers can skip a full scan.
    free_by_class: BTreeMap<usize, Vec<Block>>,
    max_free: usize,
    free_bytes: usize,
    /// Lifetime counters, exposed for diagnostics and the test suite.
    total_allocated: u64,
    total_returned: u64,
}

/// Owns the free-list of large (>= `BLOCK_THRESHOLD`) blocks for a pool tree.
pub struct AllocManager {
    inner: ReentrantMutex<RefCell<Inner>>,
}

impl AllocManager {
    pub fn new() -> Self {
        Self::with_max_free(DEFAULT_MAX_FREE)
    }

    pub fn with_max_free(max_free: usize) -> Self {
        AllocManager {
            inner: ReentrantMutex::new(RefCell::new(Inner {
                free_by_class: BTreeMap::new(),
                max_free,
                free_bytes: 0,
                total_allocated: 0,
                total_returned: 0,
            })),
        }
    }

    /// Obtains a block with at least `min_size` bytes of capacity, reusing a
    /// freed block of the right size class when one is available.
    pub(crate) fn acquire_block(&self, min_size: usize) -> Block {
        let class = size_class(min_size);
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        if let Some(bucket) = inner.free_by_class.get_mut(&class) {
            if let Some(block) = bucket.pop() {
                inner.free_bytes -= block.capacity();
                inner.total_allocated += 1;
                return block;
            }
        }
        inner.total_allocated += 1;
        drop(inner);
        Block::new(class.max(min_size))
    }

    /// Obtains the pool's default shared bump block.
    pub(crate) fn acquire_default_block(&self) -> Block {
        self.acquire_block(DEFAULT_BLOCK_SIZE)
    }

    /// Returns a block to the free-list, or drops it if `max_free` would be
    /// exceeded.
    pub(crate) fn release_block(&self, mut block: Block) {
        block.reset();
        let class = size_class(block.capacity());
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        inner.total_returned += 1;
        if inner.free_bytes + block.capacity() > inner.max_free {
            return; // drop(block) deallocates immediately
        }
        inner.free_bytes += block.capacity();
        inner.free_by_class.entry(class).or_default().push(block);
    }

    pub fn free_bytes(&self) -> usize {
        let guard = self.inner.lock();
        let free_bytes = guard.borrow().free_bytes;
        free_bytes
    }

    pub fn stats(&self) -> AllocStats {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        AllocStats {
            free_bytes: inner.free_bytes,
            total_allocated: inner.total_allocated,
            total_returned: inner.total_returned,
        }
    }
}

impl Default for AllocManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time counters for an [`AllocManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocStats {
    pub free_bytes: usize,
    pub total_allocated: u64,
    pub total_returned: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reused_block_is_bitwise_identical() {
        let mgr = AllocManager::new();
        let block = mgr.acquire_block(300);
        let addr = block.base_ptr().as_ptr() as usize;
        mgr.release_block(block);
        let block2 = mgr.acquire_block(300);
        assert_eq!(block2.base_ptr().as_ptr() as usize, addr);
    }

    #[test]
    fn max_free_caps_retained_bytes() {
        let mgr = AllocManager::with_max_free(0);
        let block = mgr.acquire_block(1024);
        mgr.release_block(block);
        assert_eq!(mgr.free_bytes(), 0);
    }
}
