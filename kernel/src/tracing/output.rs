//! Fixed-capacity text output for rendering trace entries.
//!
//! The query path runs with the ring lock held and possibly from a stopped
//! debugger context, so nothing here allocates. Rendering goes into a
//! [`TraceOutput`] whose capacity is fixed at compile time; text that does not
//! fit is silently cut off, the same way a serial line dump would be.
//!
//! # Output Format
//!
//! ```text
//!    41. [    12]      88213: heap allocate: 0xffff800000123000 (64 bytes)
//!    42. [    12]      88397: kern: page fault at 0x1000
//! printed 2 entries within range 41 to 42 (2 of 42 total, 57 ever)
//! ```

use core::fmt;

use bitflags::bitflags;

bitflags! {
    /// Presentation options selected on the `traced` command line.
    pub struct OutputFlags: u32 {
        /// Print `[thread:team]` instead of `[thread]`.
        const TEAM_ID = 0x01;
        /// Print the time since the previously printed entry.
        const DIFF_TIME = 0x02;
    }
}

/// Options handed to an entry renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub flags: OutputFlags,
    /// Timestamp of the previously printed entry, for `DIFF_TIME`.
    pub last_entry_time: Option<u64>,
}

impl RenderOptions {
    pub const fn plain() -> Self {
        Self {
            flags: OutputFlags::empty(),
            last_entry_time: None,
        }
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::plain()
    }
}

// =============================================================================
// TraceOutput
// =============================================================================

/// Text buffer of `N` bytes implementing [`fmt::Write`].
///
/// Writes never fail. Once the buffer is full further text is dropped and
/// [`is_full`](Self::is_full) reports it, so renderers can stop early.
pub struct TraceOutput<const N: usize> {
    buffer: [u8; N],
    len: usize,
    truncated: bool,
}

impl<const N: usize> TraceOutput<N> {
    pub const fn new() -> Self {
        Self {
            buffer: [0; N],
            len: 0,
            truncated: false,
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.truncated = false;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.truncated || self.len == N
    }

    /// Rendered text. A multi-byte character cut by truncation is dropped.
    pub fn as_str(&self) -> &str {
        match core::str::from_utf8(&self.buffer[..self.len]) {
            Ok(text) => text,
            Err(err) => {
                let valid = err.valid_up_to();
                // The prefix was validated just above.
                core::str::from_utf8(&self.buffer[..valid]).unwrap_or("")
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    /// Rendered text without one trailing newline.
    pub fn trimmed(&self) -> &str {
        let text = self.as_str();
        text.strip_suffix('\n').unwrap_or(text)
    }
}

impl<const N: usize> Default for TraceOutput<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Write for TraceOutput<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let room = N - self.len;
        let take = bytes.len().min(room);
        self.buffer[self.len..self.len + take].copy_from_slice(&bytes[..take]);
        self.len += take;
        if take < bytes.len() {
            self.truncated = true;
        }
        Ok(())
    }
}

impl<const N: usize> fmt::Debug for TraceOutput<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceOutput")
            .field("text", &self.as_str())
            .field("truncated", &self.truncated)
            .finish()
    }
}

// =============================================================================
// Substring search
// =============================================================================

/// Whether `needle` occurs in `haystack`. An empty needle always matches.
pub fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;

    #[test]
    fn writes_are_truncated_at_capacity() {
        let mut out = TraceOutput::<8>::new();
        write!(out, "0123").unwrap();
        assert!(!out.is_full());
        write!(out, "456789").unwrap();
        assert!(out.is_full());
        assert_eq!(out.as_str(), "01234567");
    }

    #[test]
    fn split_character_is_dropped() {
        let mut out = TraceOutput::<4>::new();
        write!(out, "ab\u{e9}\u{e9}").unwrap();
        assert_eq!(out.as_str(), "ab\u{e9}");

        let mut out = TraceOutput::<3>::new();
        write!(out, "ab\u{e9}").unwrap();
        assert_eq!(out.as_str(), "ab");
    }

    #[test]
    fn trimmed_strips_one_newline() {
        let mut out = TraceOutput::<16>::new();
        write!(out, "line\n\n").unwrap();
        assert_eq!(out.trimmed(), "line\n");
        out.clear();
        assert!(out.is_empty());
        assert_eq!(out.trimmed(), "");
    }

    #[test]
    fn substring_search() {
        assert!(contains_bytes(b"heap allocate", b"alloc"));
        assert!(contains_bytes(b"abc", b""));
        assert!(!contains_bytes(b"ab", b"abc"));
        assert!(!contains_bytes(b"heap free", b"alloc"));
    }
}
