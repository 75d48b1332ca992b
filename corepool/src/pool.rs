//! The pool tree: hierarchical arenas with cleanup hooks and userdata.
//!
//! Pools are modeled as nodes in a [`slab::Slab`] rather than as a graph of
//! `Rc<RefCell<_>>` nodes: parent/child/sibling links are stable slab keys,
//! not pointers, so the tree has no reference cycles and a [`Pool`] handle
//! is just `(tree, id)`. See the module-level design notes in the crate
//! root for the rationale.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;

use slab::Slab;

use crate::alloc_manager::AllocManager;
use crate::block::{Block, BLOCK_THRESHOLD, MAX_ALIGN};
use crate::error::{LogicViolation, PoolError, Result};

pub(crate) type PoolId = usize;

/// Opaque token returned by [`Pool::register_cleanup`], used to cancel a
/// cleanup before it would otherwise run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupHandle(u64);

struct CleanupEntry {
    id: u64,
    func: Box<dyn FnOnce() + 'static>,
}

struct UserDatum {
    value: Box<dyn Any>,
    cleanup: Option<Box<dyn FnOnce(Box<dyn Any>) + 'static>>,
}

/// Byte-level bookkeeping for one pool, surfaced via [`Pool::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub bytes_allocated: u64,
    pub bytes_returned: u64,
}

struct PoolNode {
    parent: Option<PoolId>,
    children: Vec<PoolId>,
    active_block: Option<Block>,
    spare_blocks: Vec<Block>,
    large_blocks: HashMap<usize, Block>,
    cleanups: Vec<CleanupEntry>,
    pre_cleanups: Vec<CleanupEntry>,
    userdata: HashMap<String, UserDatum>,
    tag: Option<String>,
    stats: PoolStats,
    destroying: bool,
}

impl PoolNode {
    fn new(parent: Option<PoolId>) -> Self {
        PoolNode {
            parent,
            children: Vec::new(),
            active_block: None,
            spare_blocks: Vec::new(),
            large_blocks: HashMap::new(),
            cleanups: Vec::new(),
            pre_cleanups: Vec::new(),
            userdata: HashMap::new(),
            tag: None,
            stats: PoolStats::default(),
            destroying: false,
        }
    }
}

pub(crate) struct PoolTree {
    slab: Slab<PoolNode>,
    allocator: Arc<AllocManager>,
    next_cleanup_id: u64,
}

impl PoolTree {
    fn node(&self, id: PoolId) -> &PoolNode {
        self.slab.get(id).expect("pool id outlived its tree")
    }

    fn node_mut(&mut self, id: PoolId) -> &mut PoolNode {
        self.slab.get_mut(id).expect("pool id outlived its tree")
    }

    fn next_id(&mut self) -> u64 {
        self.next_cleanup_id += 1;
        self.next_cleanup_id
    }
}

/// A handle to one node in a pool tree.
///
/// Cloning a `Pool` is cheap (it clones an `Rc` and copies a slab index) and
/// yields another handle to the *same* node, not a new pool. `Pool` is
/// intentionally `!Send`/`!Sync`: the concurrency model requires that no
/// operation on a pool run concurrently from multiple threads, and the
/// borrow-checked `Rc<RefCell<_>>` backing enforces that statically.
#[derive(Clone)]
pub struct Pool {
    tree: Rc<RefCell<PoolTree>>,
    id: PoolId,
}

impl Pool {
    /// Creates a new root pool with its own [`AllocManager`].
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(AllocManager::new()))
    }

    /// Creates a new root pool backed by an existing, possibly shared,
    /// allocator.
    pub fn with_allocator(allocator: Arc<AllocManager>) -> Self {
        let mut slab = Slab::new();
        let id = slab.insert(PoolNode::new(None));
        let tree = PoolTree { slab, allocator, next_cleanup_id: 0 };
        Pool { tree: Rc::new(RefCell::new(tree)), id }
    }

    pub(crate) fn id(&self) -> PoolId {
        self.id
    }

    pub(crate) fn tree_ptr(&self) -> *const RefCell<PoolTree> {
        Rc::as_ptr(&self.tree)
    }

    /// Creates a child of `self`. The child's lifetime is bounded by its
    /// parent: destroying `self` destroys every descendant first.
    pub fn create(&self) -> Self {
        let mut tree = self.tree.borrow_mut();
        let child_id = tree.slab.insert(PoolNode::new(Some(self.id)));
        tree.node_mut(self.id).children.push(child_id);
        drop(tree);
        Pool { tree: self.tree.clone(), id: child_id }
    }

    /// Sets a diagnostic tag, surfaced by the context stack and by
    /// [`Pool::tag`].
    pub fn set_tag(&self, tag: impl Into<String>) {
        self.tree.borrow_mut().node_mut(self.id).tag = Some(tag.into());
    }

    pub fn tag(&self) -> Option<String> {
        self.tree.borrow().node(self.id).tag.clone()
    }

    pub fn stats(&self) -> PoolStats {
        self.tree.borrow().node(self.id).stats
    }

    fn check_alignment(align: usize) -> Result<()> {
        if align == 0 || !align.is_power_of_two() || align > MAX_ALIGN {
            tracing::warn!(align, "pool: invalid alignment requested");
            return Err(PoolError::InvalidAlignment(align));
        }
        Ok(())
    }

    /// Allocates `size` bytes aligned to at least `align` (must be a power
    /// of two <= [`crate::MAX_ALIGN`]). The allocation is owned by the pool
    /// and becomes invalid once the pool is cleared or destroyed.
    pub fn alloc(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        Self::check_alignment(align)?;
        let mut tree = self.tree.borrow_mut();
        if tree.node(self.id).destroying {
            return Err(PoolError::Destroying);
        }

        if size >= BLOCK_THRESHOLD {
            let allocator = tree.allocator.clone();
            drop(tree);
            let block = allocator.acquire_block(size.max(BLOCK_THRESHOLD));
            let mut tree = self.tree.borrow_mut();
            let node = tree.node_mut(self.id);
            let ptr = block.base_ptr();
            let key = ptr.as_ptr() as usize;
            node.large_blocks.insert(key, block);
            node.stats.bytes_allocated += size as u64;
            return Ok(ptr);
        }

        // Small allocation: bump-allocate from the active block, walking
        // the active -> spare chain before asking the allocator for a new
        // block, mirroring the contract's "try active, then chain, then
        // request new" policy.
        let node = tree.node_mut(self.id);
        if let Some(active) = node.active_block.as_mut() {
            if let Some(ptr) = active.try_alloc(size, align) {
                node.stats.bytes_allocated += size as u64;
                return Ok(ptr);
            }
        }
        for spare in node.spare_blocks.iter_mut() {
            if let Some(ptr) = spare.try_alloc(size, align) {
                node.stats.bytes_allocated += size as u64;
                return Ok(ptr);
            }
        }

        // Neither the active block nor any spare had room: retire the
        // active block to the spare chain and pull a fresh one.
        if let Some(old_active) = node.active_block.take() {
            node.spare_blocks.push(old_active);
        }
        let allocator = tree.allocator.clone();
        drop(tree);
        let mut fresh = allocator.acquire_default_block();
        let ptr = match fresh.try_alloc(size, align) {
            Some(p) => p,
            None => {
                // `size` can legitimately exceed DEFAULT_BLOCK_SIZE while
                // still being under BLOCK_THRESHOLD only if align is huge;
                // fall back to a block sized for this one allocation.
                let mut oversized = Block::new(size + align);
                let p = oversized
                    .try_alloc(size, align)
                    .expect("freshly sized block must fit its own allocation");
                fresh = oversized;
                p
            }
        };
        let mut tree = self.tree.borrow_mut();
        let node = tree.node_mut(self.id);
        node.active_block = Some(fresh);
        node.stats.bytes_allocated += size as u64;
        Ok(ptr)
    }

    /// Allocates with the default alignment of 16.
    pub fn alloc_default(&self, size: usize) -> Result<NonNull<u8>> {
        self.alloc(size, 16)
    }

    /// Allocates `count * eltsize` bytes and zero-fills them.
    pub fn calloc(&self, count: usize, eltsize: usize) -> Result<NonNull<u8>> {
        let size = count.checked_mul(eltsize).expect("calloc size overflow");
        let ptr = self.alloc_default(size)?;
        // SAFETY: `alloc_default` just returned `size` freshly allocated,
        // exclusively-owned bytes.
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, size) };
        Ok(ptr)
    }

    /// Returns a region to the pool, allowing it to be reused by a future
    /// allocation. Only valid for allocations of at least
    /// [`crate::block::BLOCK_THRESHOLD`] bytes obtained from this pool;
    /// smaller allocations silently do nothing, matching the bump allocator
    /// contract (they can't be individually reclaimed).
    pub fn free(&self, ptr: NonNull<u8>, size: usize) {
        if size < BLOCK_THRESHOLD {
            return;
        }
        let mut tree = self.tree.borrow_mut();
        let key = ptr.as_ptr() as usize;
        let node = tree.node_mut(self.id);
        let Some(block) = node.large_blocks.remove(&key) else {
            return;
        };
        node.stats.bytes_returned += size as u64;
        let allocator = tree.allocator.clone();
        drop(tree);
        allocator.release_block(block);
    }

    /// Copies `data` into pool-owned memory and returns a slice borrowed
    /// from the pool.
    pub fn memdup<'p>(&'p self, data: &[u8]) -> &'p [u8] {
        if data.is_empty() {
            return &[];
        }
        let ptr = self
            .alloc_default(data.len())
            .expect("pool allocation failed");
        // SAFETY: `ptr` is freshly allocated, exclusively owned, and at
        // least `data.len()` bytes; it outlives `'p` because the pool isn't
        // cleared/destroyed while this borrow is alive (enforced by Rust's
        // borrow checker tying the return value to `&'p self`).
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len());
            std::slice::from_raw_parts(ptr.as_ptr(), data.len())
        }
    }

    /// Copies `s` into pool-owned memory and returns a `&str` borrowed from
    /// the pool.
    pub fn strdup<'p>(&'p self, s: &str) -> &'p str {
        let bytes = self.memdup(s.as_bytes());
        // SAFETY: bytes is an exact copy of a valid `&str`'s bytes.
        unsafe { std::str::from_utf8_unchecked(bytes) }
    }

    /// Registers a cleanup to run when the pool is cleared or destroyed,
    /// after all descendants have been torn down.
    pub fn register_cleanup(&self, f: impl FnOnce() + 'static) -> CleanupHandle {
        let mut tree = self.tree.borrow_mut();
        let id = tree.next_id();
        tree.node_mut(self.id)
            .cleanups
            .push(CleanupEntry { id, func: Box::new(f) });
        CleanupHandle(id)
    }

    /// Registers a cleanup that runs before any descendant is destroyed.
    pub fn register_pre_cleanup(&self, f: impl FnOnce() + 'static) -> CleanupHandle {
        let mut tree = self.tree.borrow_mut();
        let id = tree.next_id();
        tree.node_mut(self.id)
            .pre_cleanups
            .push(CleanupEntry { id, func: Box::new(f) });
        CleanupHandle(id)
    }

    /// Cancels a previously registered cleanup so it never runs.
    pub fn cleanup_kill(&self, handle: CleanupHandle) -> Result<()> {
        let mut tree = self.tree.borrow_mut();
        let node = tree.node_mut(self.id);
        for list in [&mut node.cleanups, &mut node.pre_cleanups] {
            if let Some(pos) = list.iter().position(|e| e.id == handle.0) {
                list.remove(pos);
                return Ok(());
            }
        }
        Err(PoolError::UnknownCleanup)
    }

    /// Stores `value` under `key`, copying `key` into an owned `String`.
    /// `cleanup`, if given, runs on the value when it is removed by a clear
    /// or destroy.
    pub fn userdata_set<T: 'static>(
        &self,
        key: &str,
        value: T,
        cleanup: Option<impl FnOnce(T) + 'static>,
    ) {
        self.userdata_insert(key.to_string(), value, cleanup);
    }

    /// Like [`Pool::userdata_set`], but `key` is a `'static` string so no
    /// copy is needed to keep it alive for the pool's lifetime.
    pub fn userdata_setn<T: 'static>(
        &self,
        key: &'static str,
        value: T,
        cleanup: Option<impl FnOnce(T) + 'static>,
    ) {
        self.userdata_insert(key.to_string(), value, cleanup);
    }

    fn userdata_insert<T: 'static>(
        &self,
        key: String,
        value: T,
        cleanup: Option<impl FnOnce(T) + 'static>,
    ) {
        let cleanup: Option<Box<dyn FnOnce(Box<dyn Any>) + 'static>> = cleanup.map(|f| {
            let boxed: Box<dyn FnOnce(Box<dyn Any>)> = Box::new(move |value: Box<dyn Any>| {
                if let Ok(value) = value.downcast::<T>() {
                    f(*value);
                }
            });
            boxed
        });
        let mut tree = self.tree.borrow_mut();
        if tree.node(self.id).destroying {
            return;
        }
        tree.node_mut(self.id).userdata.insert(
            key,
            UserDatum { value: Box::new(value), cleanup },
        );
    }

    /// Returns a clone of the userdata stored under `key`, if present and
    /// of type `T`.
    pub fn userdata_get<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        let tree = self.tree.borrow();
        tree.node(self.id)
            .userdata
            .get(key)
            .and_then(|d| d.value.downcast_ref::<T>())
            .cloned()
    }

    /// Runs cleanups and recycles this pool's own blocks, but leaves the
    /// pool itself (and its identity/tag) usable for further allocation.
    /// Every descendant is destroyed first, since a child may never outlive
    /// a cleared parent.
    pub fn clear(&self) {
        self.destroy_children();
        self.run_pre_cleanups();
        self.run_cleanups();
        self.release_blocks();
    }

    /// Runs cleanups, destroys every descendant bottom-up, and releases all
    /// memory. After this call the pool id is no longer valid.
    pub fn destroy(&self) {
        if crate::context::is_pool_on_stack(self) {
            LogicViolation::PoolOnContextStack.trigger();
            return;
        }
        self.tree.borrow_mut().node_mut(self.id).destroying = true;
        self.run_pre_cleanups();
        self.destroy_children();
        self.run_cleanups();
        self.release_blocks();

        let mut tree = self.tree.borrow_mut();
        let parent = tree.node(self.id).parent;
        if let Some(parent_id) = parent {
            if let Some(parent_node) = tree.slab.get_mut(parent_id) {
                parent_node.children.retain(|c| *c != self.id);
            }
        }
        tree.slab.remove(self.id);
    }

    fn destroy_children(&self) {
        let children: Vec<PoolId> = self.tree.borrow().node(self.id).children.clone();
        for child_id in children {
            let child = Pool { tree: self.tree.clone(), id: child_id };
            child.destroy();
        }
    }

    fn run_pre_cleanups(&self) {
        let entries = {
            let mut tree = self.tree.borrow_mut();
            std::mem::take(&mut tree.node_mut(self.id).pre_cleanups)
        };
        for entry in entries.into_iter().rev() {
            (entry.func)();
        }
    }

    fn run_cleanups(&self) {
        let entries = {
            let mut tree = self.tree.borrow_mut();
            std::mem::take(&mut tree.node_mut(self.id).cleanups)
        };
        for entry in entries.into_iter().rev() {
            (entry.func)();
        }
        let userdata = {
            let mut tree = self.tree.borrow_mut();
            std::mem::take(&mut tree.node_mut(self.id).userdata)
        };
        for (_, datum) in userdata {
            if let Some(cleanup) = datum.cleanup {
                cleanup(datum.value);
            }
        }
    }

    fn release_blocks(&self) {
        let mut tree = self.tree.borrow_mut();
        let allocator = tree.allocator.clone();
        let node = tree.node_mut(self.id);
        let active = node.active_block.take();
        let spares = std::mem::take(&mut node.spare_blocks);
        let larges: Vec<Block> = node.large_blocks.drain().map(|(_, b)| b).collect();
        node.stats = PoolStats::default();
        drop(tree);
        for block in active.into_iter().chain(spares).chain(larges) {
            allocator.release_block(block);
        }
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("tag", &self.tag())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc as StdRc;

    #[test]
    fn alloc_and_free_reuse_same_address() {
        let pool = Pool::new();
        let a = pool.alloc_default(300).unwrap();
        pool.free(a, 300);
        let b = pool.alloc_default(300).unwrap();
        assert_eq!(a.as_ptr(), b.as_ptr());
        pool.destroy();
    }

    #[test]
    fn cleanup_order_is_lifo() {
        let pool = Pool::new();
        let log: StdRc<StdRefCell<Vec<&'static str>>> = StdRc::new(StdRefCell::new(Vec::new()));
        let a = log.clone();
        pool.register_cleanup(move || a.borrow_mut().push("A"));
        let b = log.clone();
        pool.register_cleanup(move || b.borrow_mut().push("B"));
        let c = log.clone();
        pool.register_cleanup(move || c.borrow_mut().push("C"));
        pool.destroy();
        assert_eq!(*log.borrow(), vec!["C", "B", "A"]);
    }

    #[test]
    fn pre_cleanup_runs_before_children_destroyed() {
        let pool = Pool::new();
        let child = pool.create();
        let log: StdRc<StdRefCell<Vec<&'static str>>> = StdRc::new(StdRefCell::new(Vec::new()));
        let child_log = log.clone();
        child.register_cleanup(move || child_log.borrow_mut().push("child"));
        let pre_log = log.clone();
        pool.register_pre_cleanup(move || pre_log.borrow_mut().push("pre"));
        pool.destroy();
        assert_eq!(*log.borrow(), vec!["pre", "child"]);
    }

    #[test]
    fn destroying_parent_destroys_descendants_once() {
        let pool = Pool::new();
        let child = pool.create();
        let grandchild = child.create();
        let count = StdRc::new(StdRefCell::new(0));
        for p in [&pool, &child, &grandchild] {
            let c = count.clone();
            p.register_cleanup(move || *c.borrow_mut() += 1);
        }
        pool.destroy();
        assert_eq!(*count.borrow(), 3);
    }

    #[test]
    fn invalid_alignment_is_rejected() {
        let pool = Pool::new();
        assert!(matches!(
            pool.alloc(16, 3),
            Err(PoolError::InvalidAlignment(3))
        ));
        assert!(matches!(
            pool.alloc(16, 2048),
            Err(PoolError::InvalidAlignment(2048))
        ));
        pool.destroy();
    }

    #[test]
    fn userdata_roundtrip_and_cleanup() {
        let pool = Pool::new();
        let dropped = StdRc::new(StdRefCell::new(false));
        let d = dropped.clone();
        pool.userdata_set("k", 42i32, Some(move |_v: i32| *d.borrow_mut() = true));
        assert_eq!(pool.userdata_get::<i32>("k"), Some(42));
        pool.destroy();
        assert!(*dropped.borrow());
    }

    #[test]
    fn strdup_copies_into_pool() {
        let pool = Pool::new();
        let copy = pool.strdup("hello");
        assert_eq!(copy, "hello");
        pool.destroy();
    }

    #[test]
    fn clear_preserves_identity() {
        let pool = Pool::new();
        pool.set_tag("root");
        let _child = pool.create();
        let ran = StdRc::new(StdRefCell::new(false));
        let r = ran.clone();
        pool.register_cleanup(move || *r.borrow_mut() = true);
        pool.clear();
        assert!(*ran.borrow());
        assert_eq!(pool.tag(), Some("root".to_string()));
        pool.alloc_default(16).expect("pool still usable after clear");
        pool.destroy();
    }
}
