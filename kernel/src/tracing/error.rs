//! Errors reported while setting up the trace log.
//!
//! Only construction can fail loudly. Everything on the recording and query
//! paths is total and reports problems through `Option`, `bool` or
//! [`QueryOutcome`](super::query::QueryOutcome) values.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceError {
    /// The backing storage cannot hold a single entry plus its sentinel.
    ArenaTooSmall {
        /// Bytes supplied by the caller.
        bytes: usize,
        /// Minimum number of bytes required.
        required: usize,
    },
    /// `startup` was called with new storage after the log already existed.
    AlreadyInitialized,
    /// A configuration value is out of range.
    InvalidConfig(&'static str),
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArenaTooSmall { bytes, required } => write!(
                f,
                "trace arena too small: got {} bytes, need at least {}",
                bytes, required
            ),
            Self::AlreadyInitialized => write!(f, "trace log already initialized"),
            Self::InvalidConfig(what) => write!(f, "invalid trace configuration: {}", what),
        }
    }
}

pub type TraceResult<T> = Result<T, TraceError>;
