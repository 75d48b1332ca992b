//! Shared error type used by `corestore` and its backend adapters.

pub mod error;

pub use error::{Result, StoreError};
