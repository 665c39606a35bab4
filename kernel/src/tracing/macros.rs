//! Recording macros.
//!
//! # Usage
//!
//! ```rust,ignore
//! use ktrace::ktrace;
//!
//! // Into the global log (dropped if startup has not run yet)
//! ktrace!("page fault at {:#x}", address);
//!
//! // Into an explicit handle
//! ktrace!(log: &trace_log, "sched: {} -> {}", old_tid, new_tid);
//! ```
//!
//! Messages are formatted into a fixed stack buffer and cut at 256 bytes;
//! nothing allocates. They render as `kern: <text>` in `traced`.

/// Record a formatted message entry.
///
/// Evaluates to `Option<EntryHandle>`; `None` means the message was
/// dropped.
#[macro_export]
macro_rules! ktrace {
    (log: $log:expr, $($arg:tt)+) => {
        $log.message(::core::format_args!($($arg)+))
    };
    ($($arg:tt)+) => {
        $crate::tracing::message(::core::format_args!($($arg)+))
    };
}
