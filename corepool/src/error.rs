//! Error types for pool operations.

use thiserror::Error;

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors that can be returned by non-fatal pool operations.
///
/// Out-of-memory conditions are not represented here: the allocator treats
/// them as fatal and aborts the process, matching the contract in the
/// design notes for hosted platforms.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// `align` was zero, not a power of two, or exceeded [`crate::MAX_ALIGN`].
    #[error("alignment {0} is invalid (must be a power of two <= {max})", max = crate::MAX_ALIGN)]
    InvalidAlignment(usize),

    /// The pool is in the middle of running its cleanups and can no longer
    /// accept new allocations, cleanups, or userdata.
    #[error("pool is being destroyed")]
    Destroying,

    /// A cleanup handle did not refer to a still-registered cleanup.
    #[error("cleanup handle is not registered")]
    UnknownCleanup,
}

/// Programmer errors that indicate a broken invariant.
///
/// These correspond to the `logic` error kind: in debug builds the process
/// aborts immediately so the bug is caught where it happens; in release
/// builds the offending call instead returns `false`/`None`/a `PoolError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicViolation {
    /// `perform`/`perform_temporary`/... frames were popped out of order.
    StackImbalance,
    /// A pool was destroyed while it, or a descendant, is still referenced
    /// by a context-stack frame.
    PoolOnContextStack,
    /// The fixed-capacity context stack overflowed.
    StackOverflow,
}

impl LogicViolation {
    /// Aborts in debug builds, logs and returns in release builds.
    ///
    /// Every call site funnels through here so the abort-vs-report policy
    /// lives in one place instead of being re-decided at each check.
    #[track_caller]
    pub(crate) fn trigger(self) -> Self {
        tracing::error!(violation = ?self, location = %std::panic::Location::caller(), "pool logic violation");
        if cfg!(debug_assertions) {
            std::process::abort();
        }
        self
    }
}

impl std::fmt::Display for LogicViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            LogicViolation::StackImbalance => "context stack push/pop imbalance",
            LogicViolation::PoolOnContextStack => "pool destroyed while still on the context stack",
            LogicViolation::StackOverflow => "context stack capacity exceeded",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for LogicViolation {}
