//! Variable-length entry ring with oldest-first eviction.
//!
//! # Design
//!
//! - Entries are laid out back to back in an [`Arena`]; each header records
//!   its own length and the length of its predecessor, which gives a doubly
//!   linked chain without any pointers.
//! - The live region is `[first, after_last)`, or
//!   `[first, end) + [0, after_last)` once it has wrapped.
//! - A sentinel header follows the last entry. Its `previous_size` lets
//!   iteration step backward from `after_last`, and it is the slot that
//!   becomes a wrap marker when the tail of the arena runs out. When an entry
//!   exactly fills the gap up to `first`, the ring is full and the sentinel
//!   link is kept in `first`'s header instead (the oldest entry never needs
//!   its own back link).
//! - Space is reclaimed by evicting the oldest entry. An entry that was
//!   reserved but not committed yet is never evicted: allocation fails
//!   instead, because its producer may still be writing into it.
//!
//! ```text
//!  0                      after_last         first                 end
//!  +--------+--------+----+------------------+--------+-----+---+--+
//!  | e5     | e6     |sent|   (free)         | e2     | e3  |e4 |W |
//!  +--------+--------+----+------------------+--------+-----+---+--+
//!                                                                 ^ wrap marker
//! ```
//!
//! The ring itself does no locking. [`TraceLog`](super::core::TraceLog) wraps
//! it in an interrupt-safe spinlock and every mutation happens under it.

use super::arena::{Arena, MIN_ARENA_GRANULES};
use super::entry::{
    granules_for_payload, EntryFlags, EntryHandle, EntryHeader, EntryView, GRANULE_SIZE,
};
use super::error::{TraceError, TraceResult};

pub struct RingLog<'a> {
    arena: Arena<'a>,
    /// Oldest live entry.
    first: u32,
    /// Sentinel slot following the newest entry. Equal to `first` when the
    /// ring is empty or exactly full.
    after_last: u32,
    /// Entries of any kind in the live region, uncommitted ones included.
    live: u32,
    /// Logical entries currently stored (buffer-only entries excluded).
    entries: u32,
    /// Entries ever committed. Never decreases.
    entries_ever: u32,
}

impl<'a> RingLog<'a> {
    pub fn new(storage: &'a mut [u8]) -> TraceResult<Self> {
        let bytes = storage.len();
        let arena = Arena::new(storage).ok_or(TraceError::ArenaTooSmall {
            bytes,
            required: MIN_ARENA_GRANULES as usize * GRANULE_SIZE,
        })?;
        let mut ring = Self {
            arena,
            first: 0,
            after_last: 0,
            live: 0,
            entries: 0,
            entries_ever: 0,
        };
        ring.arena.set_header(0, EntryHeader::new());
        Ok(ring)
    }

    /// Capacity of the arena in granules.
    pub fn capacity_granules(&self) -> u32 {
        self.arena.granules()
    }

    /// Number of logical entries, excluding buffer-only blobs.
    pub fn entries(&self) -> u32 {
        self.entries
    }

    /// Number of entries ever committed.
    pub fn entries_ever(&self) -> u32 {
        self.entries_ever
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Reserve an entry with room for `payload_bytes` bytes.
    ///
    /// Only [`EntryFlags::BUFFER_ONLY`] is taken from `flags`. Returns `None`
    /// when the size is zero or too large, or when room cannot be made
    /// without evicting an uncommitted entry. A `None` means the event is
    /// dropped; nothing in the ring changes in that case except entries
    /// evicted before the blocking one was reached.
    pub fn allocate(&mut self, payload_bytes: usize, flags: EntryFlags) -> Option<EntryHandle> {
        let granules = granules_for_payload(payload_bytes)?;
        let flags = flags & EntryFlags::BUFFER_ONLY;

        if !self.make_space(granules) {
            #[cfg(feature = "ring_debug")]
            log::trace!("ktrace: dropping entry of {} granules", granules);
            return None;
        }

        let at = self.after_last;
        self.arena.update_header(at, |header| {
            header.set_size(granules as u16);
            header.set_flags(flags);
        });
        self.after_last = at + granules;
        if self.after_last == self.first {
            self.arena.update_header(self.first, |header| {
                header.set_previous_size(granules as u16);
            });
        } else {
            let sentinel = EntryHeader::new().with_previous_size(granules as u16);
            self.arena.set_header(self.after_last, sentinel);
        }
        self.live += 1;

        if !flags.contains(EntryFlags::BUFFER_ONLY) {
            self.entries += 1;
        }
        Some(EntryHandle(at))
    }

    /// Mark a reserved entry as fully written.
    ///
    /// Returns false if `handle` does not name a reserved, uncommitted
    /// logical entry.
    pub fn commit(&mut self, handle: EntryHandle) -> bool {
        let header = self.arena.header(handle.0);
        let flags = header.flags();
        if header.granules() == 0
            || flags.intersects(
                EntryFlags::INITIALIZED | EntryFlags::BUFFER_ONLY | EntryFlags::WRAP | EntryFlags::INVALID,
            )
        {
            return false;
        }
        self.arena.update_header(handle.0, |header| {
            header.set_flags(flags | EntryFlags::INITIALIZED);
        });
        self.entries_ever = self.entries_ever.wrapping_add(1);
        true
    }

    /// Make room for an entry of `needed` granules at `after_last`.
    fn make_space(&mut self, needed: u32) -> bool {
        let capacity = self.arena.granules();
        // The tail always keeps one granule for the sentinel or a wrap marker.
        if needed + 1 > capacity {
            return false;
        }

        if self.after_last + needed + 1 > capacity {
            #[cfg(feature = "ring_debug")]
            log::trace!(
                "ktrace: wrapping, first {} after_last {} needed {}",
                self.first,
                self.after_last,
                needed
            );

            // Everything between after_last and the end of the arena goes.
            while !self.is_empty() && self.first >= self.after_last {
                if !self.evict_oldest() {
                    return false;
                }
            }
            if self.is_empty() {
                return true;
            }
            // first must not sit at offset 0 once after_last moves there.
            if self.first == 0 && !self.evict_oldest() {
                return false;
            }
            if self.is_empty() {
                return true;
            }

            let wrap_at = self.after_last;
            self.arena.update_header(wrap_at, |header| {
                header.set_size(0);
                header.set_flags(EntryFlags::WRAP);
            });
            let start = EntryHeader::new().with_previous_size((capacity - wrap_at) as u16);
            self.arena.set_header(0, start);
            self.after_last = 0;
        }

        loop {
            if self.is_empty()
                || self.first < self.after_last
                || self.first - self.after_last >= needed
            {
                return true;
            }
            if !self.evict_oldest() {
                return false;
            }
        }
    }

    /// Drop the oldest entry.
    ///
    /// Fails without touching anything if the ring is empty or the oldest
    /// entry has not been committed yet.
    fn evict_oldest(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        let flags = self.arena.header(self.first).flags();
        if flags.contains(EntryFlags::BUFFER_ONLY) {
            // Raw blob, not counted.
        } else if flags.contains(EntryFlags::INITIALIZED) {
            self.entries -= 1;
        } else {
            return false;
        }

        self.live -= 1;
        match self.next(EntryHandle(self.first)) {
            Some(next) if self.live > 0 => self.first = next.0,
            _ => {
                self.first = 0;
                self.after_last = 0;
                self.live = 0;
                self.arena.set_header(0, EntryHeader::new());
            }
        }
        true
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Oldest live entry, if any.
    pub fn first(&self) -> Option<EntryHandle> {
        if self.is_empty() {
            None
        } else {
            Some(EntryHandle(self.first))
        }
    }

    /// Newest live entry, if any.
    pub fn last(&self) -> Option<EntryHandle> {
        if self.is_empty() {
            None
        } else {
            self.link_back(self.after_last)
        }
    }

    /// Entry following `entry`, hopping over a wrap marker.
    pub fn next(&self, entry: EntryHandle) -> Option<EntryHandle> {
        let header = self.arena.header(entry.0);
        if header.is_invalid() || header.granules() == 0 {
            return None;
        }
        let mut next = entry.0.checked_add(header.granules())?;
        let following = self.arena.header(next);
        if following.is_invalid() {
            return None;
        }
        if following.is_wrap() {
            next = 0;
        }
        if next == self.after_last || self.is_empty() {
            None
        } else {
            Some(EntryHandle(next))
        }
    }

    /// Entry preceding `entry`, hopping back over a wrap marker.
    pub fn previous(&self, entry: EntryHandle) -> Option<EntryHandle> {
        if entry.0 == self.first || self.is_empty() {
            return None;
        }
        self.link_back(entry.0)
    }

    /// Follow the back link stored at `at`.
    fn link_back(&self, mut at: u32) -> Option<EntryHandle> {
        if at == 0 {
            // The previous entry sits in front of the wrap marker, whose
            // distance from the end is stored at offset 0.
            let back = self.arena.header(0).previous_granules();
            at = self.arena.granules().checked_sub(back)?;
        }
        let back = self.arena.header(at).previous_granules();
        if back == 0 {
            return None;
        }
        at.checked_sub(back).map(EntryHandle)
    }

    // =========================================================================
    // Entry access
    // =========================================================================

    pub fn header(&self, entry: EntryHandle) -> EntryHeader {
        self.arena.header(entry.0)
    }

    pub fn view(&self, entry: EntryHandle) -> EntryView<'_> {
        let header = self.arena.header(entry.0);
        EntryView {
            handle: entry,
            header,
            payload: self.arena.payload(entry.0, header.granules()),
        }
    }

    /// Payload of an entry, for the producer that reserved it.
    pub fn payload_mut(&mut self, entry: EntryHandle) -> &mut [u8] {
        let granules = self.arena.header(entry.0).granules();
        self.arena.payload_mut(entry.0, granules)
    }

    /// Set or clear the query scratch bit on an entry.
    pub fn set_filter_match(&mut self, entry: EntryHandle, matched: bool) {
        self.arena.update_header(entry.0, |header| {
            let mut flags = header.flags();
            flags.set(EntryFlags::FILTER_MATCH, matched);
            header.set_flags(flags);
        });
    }

    /// Whether `entry` is the start of a live entry.
    ///
    /// Constant time: a range check against the live region plus a check
    /// that the back link of `entry` leads to an entry whose successor is
    /// `entry` again.
    pub fn is_live(&self, entry: EntryHandle) -> bool {
        if self.is_empty() {
            return false;
        }
        let at = entry.0;
        let in_region = if self.first < self.after_last {
            at >= self.first && at < self.after_last
        } else {
            // Wrapped, or exactly full.
            at >= self.first || at < self.after_last
        };
        if !in_region {
            return false;
        }
        let header = self.arena.header(at);
        if header.is_invalid() || header.is_wrap() || header.granules() == 0 {
            return false;
        }
        if at == self.first {
            return true;
        }
        self.link_back(at)
            .is_some_and(|previous| self.next(previous) == Some(entry))
    }

    /// Walk the live region and check the back links and the entry count.
    ///
    /// Returns the number of links checked, or `None` on the first broken
    /// link.
    pub fn verify_links(&self) -> Option<u32> {
        let mut links = 0;
        let mut logical = 0;
        let mut seen = 0;
        let mut cursor = self.first();
        while let Some(current) = cursor {
            seen += 1;
            if seen > self.live {
                return None;
            }
            let header = self.arena.header(current.0);
            if header.is_invalid() || header.is_wrap() || header.granules() == 0 {
                return None;
            }
            if !header.flags().contains(EntryFlags::BUFFER_ONLY) {
                logical += 1;
            }
            match self.next(current) {
                Some(next) => {
                    if self.previous(next) != Some(current) {
                        return None;
                    }
                    links += 1;
                    cursor = Some(next);
                }
                None => {
                    if self.last() != Some(current) {
                        return None;
                    }
                    cursor = None;
                }
            }
        }
        if logical != self.entries || seen != self.live {
            return None;
        }
        Some(links)
    }
}
