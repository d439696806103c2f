//! core::ops
//!
//! Process-level coordination primitives.
//!
//! # Modules
//!
//! - [`lock`] - Exclusive template repository lock

pub mod lock;

pub use lock::{LockError, StoreLock};
