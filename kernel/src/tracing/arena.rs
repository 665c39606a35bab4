//! Fixed-size granule arena backing the trace ring.
//!
//! The arena is a plain byte slice handed over at startup. It has no
//! allocation policy of its own; it only translates granule offsets into
//! byte ranges. All offset arithmetic is bounds-checked here so the ring
//! never indexes the slice directly.

use core::ops::Range;

use super::entry::{EntryHeader, GRANULE_SIZE};

/// Fewest granules the ring can work with: one entry header plus the
/// sentinel that always follows the last entry.
pub const MIN_ARENA_GRANULES: u32 = 2;

pub struct Arena<'a> {
    bytes: &'a mut [u8],
    granules: u32,
}

impl<'a> Arena<'a> {
    /// Wrap `storage`, ignoring any trailing bytes that do not form a whole
    /// granule. Returns `None` if fewer than [`MIN_ARENA_GRANULES`] remain.
    pub fn new(storage: &'a mut [u8]) -> Option<Self> {
        let granules = (storage.len() / GRANULE_SIZE).min(u32::MAX as usize) as u32;
        if granules < MIN_ARENA_GRANULES {
            return None;
        }
        let len = granules as usize * GRANULE_SIZE;
        let bytes = &mut storage[..len];
        Some(Self { bytes, granules })
    }

    /// Capacity in granules.
    #[inline]
    pub fn granules(&self) -> u32 {
        self.granules
    }

    /// Byte range covered by `count` granules starting at `at`.
    fn span(&self, at: u32, count: u32) -> Option<Range<usize>> {
        let end = at.checked_add(count)?;
        if end > self.granules {
            return None;
        }
        Some(at as usize * GRANULE_SIZE..end as usize * GRANULE_SIZE)
    }

    fn payload_span(&self, at: u32, granules: u32) -> Option<Range<usize>> {
        let len = granules.checked_sub(1)?;
        self.span(at.checked_add(1)?, len)
    }

    /// Header stored at `at`, or an `INVALID` header for offsets outside
    /// the arena.
    pub fn header(&self, at: u32) -> EntryHeader {
        match self.span(at, 1) {
            Some(range) => {
                let mut raw = [0u8; GRANULE_SIZE];
                raw.copy_from_slice(&self.bytes[range]);
                EntryHeader::from_bytes(raw)
            }
            None => EntryHeader::invalid(),
        }
    }

    /// Store `header` at `at`. Returns false for offsets outside the arena.
    pub fn set_header(&mut self, at: u32, header: EntryHeader) -> bool {
        match self.span(at, 1) {
            Some(range) => {
                self.bytes[range].copy_from_slice(&header.into_bytes());
                true
            }
            None => false,
        }
    }

    /// Read-modify-write of the header at `at`.
    pub fn update_header(&mut self, at: u32, f: impl FnOnce(&mut EntryHeader)) -> bool {
        let mut header = self.header(at);
        if header.is_invalid() {
            return false;
        }
        f(&mut header);
        self.set_header(at, header)
    }

    /// Bytes following a header at `at` that spans `granules` granules.
    pub fn payload(&self, at: u32, granules: u32) -> &[u8] {
        match self.payload_span(at, granules) {
            Some(range) => &self.bytes[range],
            None => &[],
        }
    }

    pub fn payload_mut(&mut self, at: u32, granules: u32) -> &mut [u8] {
        match self.payload_span(at, granules) {
            Some(range) => &mut self.bytes[range],
            None => &mut [],
        }
    }
}
