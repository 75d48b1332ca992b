//! Hierarchical arena memory pool.
//!
//! A [`Pool`] is a bump allocator that frees all of its memory at once when
//! destroyed. Pools form a tree: creating a pool from another makes it a
//! child, and destroying a pool first runs its pre-cleanups, then destroys
//! every descendant bottom-up, then runs its own cleanups, then returns its
//! blocks to the shared [`AllocManager`].
//!
//! The [`context`] module layers a per-thread stack of `(pool, tag)` frames
//! on top, so code deep in a call chain can reach the pool that scopes its
//! allocations via [`context::acquire`] without threading a `&Pool`
//! everywhere explicitly.
//!
//! ```
//! use corepool::Pool;
//!
//! let root = Pool::new();
//! let request = root.create();
//! request.register_cleanup(|| { /* ... */ });
//! let buf = request.alloc_default(128).unwrap();
//! let _ = buf;
//! request.destroy();
//! root.destroy();
//! ```

mod alloc_manager;
mod block;
pub mod context;
mod error;
mod pool;

pub use alloc_manager::{AllocManager, AllocStats, DEFAULT_MAX_FREE};
pub use block::{BLOCK_THRESHOLD, DEFAULT_BLOCK_SIZE, MAX_ALIGN};
pub use error::{LogicViolation, PoolError, Result};
pub use pool::{CleanupHandle, Pool, PoolStats};
