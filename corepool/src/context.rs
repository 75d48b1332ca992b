//! Per-thread context stack: `(pool, tag, source-location)` frames with
//! RAII push/pop discipline.
//!
//! `perform*` helpers push a frame, run a closure, and pop the frame on
//! every exit path including a panic unwinding through the closure. The
//! stack is thread-local; pools may move between threads but a frame
//! pushed on one thread must be popped on that same thread.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe, Location};

use crate::error::LogicViolation;
use crate::pool::Pool;

/// Frames beyond this depth are treated as a logic error (most likely an
/// unbounded recursive `perform`), matching the fixed-capacity stack in the
/// design notes.
pub const MAX_STACK_DEPTH: usize = 4096;

struct Frame {
    pool: Pool,
    tag: Option<String>,
    location: &'static Location<'static>,
}

thread_local! {
    static STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Returns the pool at the top of this thread's context stack, if any.
pub fn acquire() -> Option<Pool> {
    STACK.with(|s| s.borrow().last().map(|f| f.pool.clone()))
}

/// Returns the tag attached to the top frame, if any.
pub fn current_tag() -> Option<String> {
    STACK.with(|s| s.borrow().last().and_then(|f| f.tag.clone()))
}

pub(crate) fn is_pool_on_stack(pool: &Pool) -> bool {
    STACK.with(|s| {
        s.borrow()
            .iter()
            .any(|f| f.pool.tree_ptr() == pool.tree_ptr() && f.pool.id() == pool.id())
    })
}

fn push(pool: Pool, tag: Option<String>) -> bool {
    STACK.with(|s| {
        let mut stack = s.borrow_mut();
        if stack.len() >= MAX_STACK_DEPTH {
            LogicViolation::StackOverflow.trigger();
            return false;
        }
        stack.push(Frame { pool, tag, location: Location::caller() });
        true
    })
}

fn pop_expect(depth_before: usize) {
    STACK.with(|s| {
        let mut stack = s.borrow_mut();
        if stack.len() != depth_before + 1 {
            drop(stack);
            LogicViolation::StackImbalance.trigger();
            return;
        }
        stack.pop();
    });
}

fn depth() -> usize {
    STACK.with(|s| s.borrow().len())
}

/// Pushes `pool`, runs `cb`, and pops on every exit path (including panics).
#[track_caller]
pub fn perform<R>(pool: &Pool, cb: impl FnOnce() -> R) -> R {
    perform_tagged(pool, None, cb)
}

/// Like [`perform`], additionally recording `tag` on the frame.
#[track_caller]
pub fn perform_tagged<R>(pool: &Pool, tag: Option<&str>, cb: impl FnOnce() -> R) -> R {
    let depth_before = depth();
    if !push(pool.clone(), tag.map(str::to_string)) {
        // Logged and (in release) survived; run without a frame rather
        // than corrupt the stack further.
        return cb();
    }
    let result = panic::catch_unwind(AssertUnwindSafe(cb));
    pop_expect(depth_before);
    match result {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Like [`perform`], but skips pushing a new frame if `pool` is already on
/// top of the stack.
#[track_caller]
pub fn perform_conditional<R>(pool: &Pool, cb: impl FnOnce() -> R) -> R {
    let already_top = STACK.with(|s| {
        s.borrow()
            .last()
            .map(|f| f.pool.tree_ptr() == pool.tree_ptr() && f.pool.id() == pool.id())
            .unwrap_or(false)
    });
    if already_top {
        cb()
    } else {
        perform(pool, cb)
    }
}

/// Creates a child of `parent`, pushes it, runs `cb`, and destroys the
/// child pool before returning (even if `cb` panics).
#[track_caller]
pub fn perform_temporary<R>(parent: &Pool, cb: impl FnOnce(&Pool) -> R) -> R {
    let child = parent.create();
    let depth_before = depth();
    if !push(child.clone(), None) {
        let result = cb(&child);
        child.destroy();
        return result;
    }
    let result = panic::catch_unwind(AssertUnwindSafe(|| cb(&child)));
    pop_expect(depth_before);
    child.destroy();
    match result {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Pushes `pool`, runs `cb`, clears `pool` (not destroying it), and pops.
#[track_caller]
pub fn perform_clear<R>(pool: &Pool, cb: impl FnOnce() -> R) -> R {
    let result = perform(pool, cb);
    pool.clear();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perform_pushes_and_pops() {
        let pool = Pool::new();
        assert!(acquire().is_none());
        perform(&pool, || {
            assert!(acquire().is_some());
        });
        assert!(acquire().is_none());
        pool.destroy();
    }

    #[test]
    fn stack_restored_after_panic() {
        let pool = Pool::new();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            perform(&pool, || {
                panic!("boom");
            })
        }));
        assert!(result.is_err());
        assert!(acquire().is_none(), "frame must be popped even on panic");
        pool.destroy();
    }

    #[test]
    fn perform_conditional_skips_redundant_push() {
        let pool = Pool::new();
        perform(&pool, || {
            let depth_before = depth();
            perform_conditional(&pool, || {
                assert_eq!(depth(), depth_before, "no new frame pushed");
            });
        });
        pool.destroy();
    }

    #[test]
    fn perform_temporary_destroys_child_after_use() {
        let pool = Pool::new();
        let ran = std::cell::RefCell::new(false);
        perform_temporary(&pool, |child| {
            child.alloc_default(16).unwrap();
            *ran.borrow_mut() = true;
        });
        assert!(*ran.borrow());
        pool.destroy();
    }
}
