//! Logical-index cursor over the trace ring.
//!
//! Logical entries are numbered `1..=entries()`, oldest first. Buffer-only
//! blobs are skipped and never get an index. Index 0 is the position before
//! the first entry and `entries() + 1` the position after the last one; both
//! have no current entry.
//!
//! The cursor is plain state and borrows the ring per call, so it can be kept
//! between query invocations. It is only meaningful while the ring is not
//! mutated; callers reset it when the ring has changed.

use super::entry::{EntryFlags, EntryHandle};
use super::ring::RingLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryCursor {
    entry: Option<EntryHandle>,
    index: u32,
}

impl EntryCursor {
    pub const fn new() -> Self {
        Self { entry: None, index: 0 }
    }

    /// Back to the position before the first entry.
    pub fn reset(&mut self) {
        self.entry = None;
        self.index = 0;
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn current(&self) -> Option<EntryHandle> {
        self.entry
    }

    /// Step to the next logical entry.
    pub fn next(&mut self, ring: &RingLog<'_>) -> Option<EntryHandle> {
        if self.index == 0 {
            self.entry = skip_forward(ring, ring.first());
            self.index = 1;
        } else if let Some(entry) = self.entry {
            self.entry = skip_forward(ring, ring.next(entry));
            self.index += 1;
        }
        self.entry
    }

    /// Step to the previous logical entry.
    pub fn previous(&mut self, ring: &RingLog<'_>) -> Option<EntryHandle> {
        let end = ring.entries() + 1;
        if self.index == end {
            self.entry = skip_backward(ring, ring.last());
            self.index -= 1;
        } else if let Some(entry) = self.entry {
            self.entry = skip_backward(ring, ring.previous(entry));
            self.index -= 1;
        }
        self.entry
    }

    /// Move to logical `index`.
    ///
    /// Starts from whichever of the current position, the first entry or the
    /// end is closest. Indices outside `1..=entries()` park the cursor on the
    /// matching end position and return `None`.
    pub fn seek_to(&mut self, ring: &RingLog<'_>, index: u32) -> Option<EntryHandle> {
        let entries = ring.entries();
        let end = entries + 1;
        if index == self.index && index != 0 && index != end {
            return self.entry;
        }
        if index == 0 || index > entries {
            self.index = if index == 0 { 0 } else { end };
            self.entry = None;
            return None;
        }
        if self.index > end {
            // Stale position from a larger ring.
            self.reset();
        }

        let mut distance = self.index.abs_diff(index);
        let mut forward = index > self.index;
        if index < distance {
            self.reset();
            distance = index;
            forward = true;
        }
        if end - index < distance {
            self.index = end;
            self.entry = None;
            forward = false;
        }

        while self.index != index {
            let stepped = if forward { self.next(ring) } else { self.previous(ring) };
            if stepped.is_none() {
                // The ring holds fewer entries than it claims.
                self.reset();
                return None;
            }
        }
        self.entry
    }
}

impl Default for EntryCursor {
    fn default() -> Self {
        Self::new()
    }
}

fn skip_forward(ring: &RingLog<'_>, mut entry: Option<EntryHandle>) -> Option<EntryHandle> {
    while let Some(handle) = entry {
        if !ring.header(handle).flags().contains(EntryFlags::BUFFER_ONLY) {
            break;
        }
        entry = ring.next(handle);
    }
    entry
}

fn skip_backward(ring: &RingLog<'_>, mut entry: Option<EntryHandle>) -> Option<EntryHandle> {
    while let Some(handle) = entry {
        if !ring.header(handle).flags().contains(EntryFlags::BUFFER_ONLY) {
            break;
        }
        entry = ring.previous(handle);
    }
    entry
}
