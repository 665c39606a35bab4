//! In-place entry headers and handles.
//!
//! Every entry in the trace arena starts with a single 4-byte granule that
//! packs the entry length, the length of the entry before it, and a small
//! flag set:
//!
//! ```text
//! 31        26 25                  13 12                    0
//! +-----------+----------------------+----------------------+
//! |   flags   |    previous_size     |         size         |
//! |  (6 bits) |      (13 bits)       |      (13 bits)       |
//! +-----------+----------------------+----------------------+
//! ```
//!
//! Both lengths are counted in granules and include the header itself. A
//! size of zero is only legal for a wrap marker.

use bitflags::bitflags;
use modular_bitfield::prelude::*;

/// Size of one allocation unit in bytes.
pub const GRANULE_SIZE: usize = 4;

/// Granules occupied by an entry header.
pub const HEADER_GRANULES: u32 = 1;

/// Largest entry length expressible in the 13-bit size field.
pub const MAX_ENTRY_GRANULES: u32 = (1 << 13) - 1;

/// Largest payload (in bytes) a single entry can carry.
pub const MAX_PAYLOAD_BYTES: usize = (MAX_ENTRY_GRANULES - HEADER_GRANULES) as usize * GRANULE_SIZE;

bitflags! {
    /// Per-entry state bits stored in the header.
    pub struct EntryFlags: u8 {
        /// Zero-length marker: continue at the start of the arena.
        const WRAP = 0x01;
        /// The producer finished writing the payload.
        const INITIALIZED = 0x02;
        /// Raw blob without logical-entry semantics.
        const BUFFER_ONLY = 0x04;
        /// Scratch bit used by the backward query pre-scan.
        const FILTER_MATCH = 0x08;
        /// Reported for offsets outside the arena.
        const INVALID = 0x10;
    }
}

/// Packed entry header, exactly one granule.
#[bitfield(bits = 32)]
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryHeader {
    pub size: B13,
    pub previous_size: B13,
    raw_flags: B6,
}

impl EntryHeader {
    /// Header returned for out-of-bounds reads.
    pub fn invalid() -> Self {
        Self::new().with_raw_flags(EntryFlags::INVALID.bits())
    }

    pub fn flags(&self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.raw_flags())
    }

    pub fn set_flags(&mut self, flags: EntryFlags) {
        self.set_raw_flags(flags.bits());
    }

    pub fn with_flags(self, flags: EntryFlags) -> Self {
        self.with_raw_flags(flags.bits())
    }

    #[inline]
    pub fn is_wrap(&self) -> bool {
        self.flags().contains(EntryFlags::WRAP)
    }

    #[inline]
    pub fn is_invalid(&self) -> bool {
        self.flags().contains(EntryFlags::INVALID)
    }

    /// Entry length in granules.
    #[inline]
    pub fn granules(&self) -> u32 {
        u32::from(self.size())
    }

    #[inline]
    pub fn previous_granules(&self) -> u32 {
        u32::from(self.previous_size())
    }
}

/// Granule offset of an entry inside the arena.
///
/// Handles are plain offsets: they stay meaningful only while the entry they
/// name has not been evicted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryHandle(pub(crate) u32);

impl EntryHandle {
    /// Offset of the entry header, in granules.
    pub fn granule(self) -> u32 {
        self.0
    }
}

/// Granules needed to hold a header plus `payload_bytes`.
///
/// Returns `None` when the payload is empty or does not fit the size field.
pub fn granules_for_payload(payload_bytes: usize) -> Option<u32> {
    if payload_bytes == 0 || payload_bytes > MAX_PAYLOAD_BYTES {
        return None;
    }
    let payload = payload_bytes.div_ceil(GRANULE_SIZE) as u32;
    Some(HEADER_GRANULES + payload)
}

/// Read-only view of a live entry.
#[derive(Clone, Copy, Debug)]
pub struct EntryView<'a> {
    pub handle: EntryHandle,
    pub header: EntryHeader,
    /// Payload bytes, padded up to a whole number of granules.
    pub payload: &'a [u8],
}

impl EntryView<'_> {
    pub fn flags(&self) -> EntryFlags {
        self.header.flags()
    }

    pub fn is_initialized(&self) -> bool {
        self.flags().contains(EntryFlags::INITIALIZED)
    }

    pub fn is_buffer_only(&self) -> bool {
        self.flags().contains(EntryFlags::BUFFER_ONLY)
    }
}

// The header must stay one granule wide.
const _: () = assert!(core::mem::size_of::<EntryHeader>() == GRANULE_SIZE);
