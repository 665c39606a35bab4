//! Kernel trace log.
//!
//! Variable-length event entries in a fixed ring with oldest-first eviction,
//! a logical-index cursor over them, and the `traced` query command with its
//! filter language. See [`tracing`] for the overview.

#![cfg_attr(not(test), no_std)]

pub mod spinlock;
pub mod tracing;
