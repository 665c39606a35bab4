//! Tunables for the trace log and the `traced` command.
//!
//! Limits that size fixed arrays are compile-time constants; the rest lives
//! in [`TraceConfig`] and is chosen once at startup.

use super::error::{TraceError, TraceResult};

/// Maximum number of nodes in a parsed filter expression.
pub const MAX_FILTERS: usize = 32;

/// Longest `#text` pattern kept by a filter node, in bytes.
pub const MAX_PATTERN_LEN: usize = 64;

/// Capacity of the text buffer an entry is rendered into.
pub const RENDER_CAPACITY: usize = 512;

/// Longest message recorded by `ktrace!`, in bytes.
pub const MAX_MESSAGE_LEN: usize = 256;

/// Entries printed by `traced` when no count is given.
pub const DEFAULT_PAGE_SIZE: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceConfig {
    /// Entries printed per `traced` page when no count is given.
    pub default_page_size: u32,
    /// Bytes copied from memory for `s#<address>` filters. At most
    /// [`MAX_PATTERN_LEN`].
    pub max_string_pattern: usize,
    /// Whether recording starts enabled.
    pub start_enabled: bool,
}

impl TraceConfig {
    pub const fn new() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_string_pattern: MAX_PATTERN_LEN,
            start_enabled: true,
        }
    }

    pub fn validate(&self) -> TraceResult<()> {
        if self.default_page_size == 0 {
            return Err(TraceError::InvalidConfig("default_page_size must be non-zero"));
        }
        if self.default_page_size > i32::MAX as u32 {
            return Err(TraceError::InvalidConfig("default_page_size too large"));
        }
        if self.max_string_pattern == 0 || self.max_string_pattern > MAX_PATTERN_LEN {
            return Err(TraceError::InvalidConfig("max_string_pattern out of range"));
        }
        Ok(())
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::new()
    }
}
