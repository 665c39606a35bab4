//! Standard record layout and rendering.
//!
//! The ring stores opaque payloads. Entries written through
//! [`TraceLog::record`](super::core::TraceLog::record) share a common layout
//! so they can be rendered, filtered by identity and validated later:
//!
//! ```text
//! +--------+--------+-----------+-----------+------------------+---------
//! | kind   | flags  | thread    | team      | time             | body ...
//! | u16    | u16    | i32       | i32       | u64              |
//! +--------+--------+-----------+-----------+------------------+---------
//! ```
//!
//! All fields are little endian. A record kind is a static [`RecordKind`]
//! descriptor whose `dump` function renders the body; producers implement
//! [`TraceRecord`] to encode one.
//!
//! # Rendering
//!
//! ```text
//! [    12]      88213: kern: page fault at 0x1000
//! [    12:     3]      88213: kern: page fault at 0x1000     (--printteam)
//! ```

use core::fmt;

use super::config::MAX_MESSAGE_LEN;
use super::entry::EntryView;
use super::output::{OutputFlags, RenderOptions};

/// Size of the encoded [`RecordHeader`].
pub const RECORD_HEADER_SIZE: usize = 20;

/// `RecordHeader::flags` bit: thread and team were recorded.
pub const RECORD_HAS_IDENTITY: u16 = 0x0001;

// =============================================================================
// Identity and header
// =============================================================================

/// Thread and team that produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryIdentity {
    pub thread: i32,
    pub team: i32,
}

/// Fixed prefix of every standard record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: u16,
    pub flags: u16,
    pub thread: i32,
    pub team: i32,
    pub time: u64,
}

impl RecordHeader {
    pub fn new(kind: u16, identity: Option<EntryIdentity>, time: u64) -> Self {
        match identity {
            Some(identity) => Self {
                kind,
                flags: RECORD_HAS_IDENTITY,
                thread: identity.thread,
                team: identity.team,
                time,
            },
            None => Self { kind, flags: 0, thread: -1, team: -1, time },
        }
    }

    pub fn identity(&self) -> Option<EntryIdentity> {
        if self.flags & RECORD_HAS_IDENTITY != 0 {
            Some(EntryIdentity { thread: self.thread, team: self.team })
        } else {
            None
        }
    }

    /// Write the header into the first [`RECORD_HEADER_SIZE`] bytes of `out`.
    ///
    /// Returns false if `out` is too short.
    pub fn encode(&self, out: &mut [u8]) -> bool {
        let Some(out) = out.get_mut(..RECORD_HEADER_SIZE) else {
            return false;
        };
        out[0..2].copy_from_slice(&self.kind.to_le_bytes());
        out[2..4].copy_from_slice(&self.flags.to_le_bytes());
        out[4..8].copy_from_slice(&self.thread.to_le_bytes());
        out[8..12].copy_from_slice(&self.team.to_le_bytes());
        out[12..20].copy_from_slice(&self.time.to_le_bytes());
        true
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..RECORD_HEADER_SIZE)?;
        Some(Self {
            kind: u16::from_le_bytes(bytes[0..2].try_into().ok()?),
            flags: u16::from_le_bytes(bytes[2..4].try_into().ok()?),
            thread: i32::from_le_bytes(bytes[4..8].try_into().ok()?),
            team: i32::from_le_bytes(bytes[8..12].try_into().ok()?),
            time: u64::from_le_bytes(bytes[12..20].try_into().ok()?),
        })
    }
}

// =============================================================================
// Record kinds
// =============================================================================

/// Renders a record body. The slice is padded up to the entry's granule
/// boundary, so variable-length bodies must carry their own length.
pub type DumpFn = fn(body: &[u8], out: &mut dyn fmt::Write) -> fmt::Result;

/// Static descriptor of a record kind.
pub struct RecordKind {
    pub id: u16,
    pub name: &'static str,
    pub dump: DumpFn,
}

impl fmt::Debug for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordKind")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// A value that can be stored as a standard record.
pub trait TraceRecord {
    /// Kind id, resolved through the renderer's kind table.
    const KIND: u16;

    /// Encoded body length in bytes.
    fn body_len(&self) -> usize;

    /// Encode the body. `body` is exactly `body_len()` bytes long.
    fn encode(&self, body: &mut [u8]);
}

pub const KIND_START: u16 = 0x0001;
pub const KIND_MESSAGE: u16 = 0x0002;

/// Written once when the log starts.
pub static START_KIND: RecordKind = RecordKind {
    id: KIND_START,
    name: "start",
    dump: dump_start,
};

/// Free-form text from `ktrace!` and the log bridge.
pub static MESSAGE_KIND: RecordKind = RecordKind {
    id: KIND_MESSAGE,
    name: "message",
    dump: dump_message,
};

static BUILTIN_KINDS: [&RecordKind; 2] = [&START_KIND, &MESSAGE_KIND];

fn dump_start(_body: &[u8], out: &mut dyn fmt::Write) -> fmt::Result {
    out.write_str("ktrace start")
}

fn dump_message(body: &[u8], out: &mut dyn fmt::Write) -> fmt::Result {
    let Some(len) = body.get(..2) else {
        return out.write_str("<corrupt record>");
    };
    let len = u16::from_le_bytes([len[0], len[1]]) as usize;
    let text = body.get(2..2 + len).unwrap_or(&[]);
    let text = match core::str::from_utf8(text) {
        Ok(text) => text,
        Err(err) => core::str::from_utf8(&text[..err.valid_up_to()]).unwrap_or(""),
    };
    write!(out, "kern: {}", text)
}

/// The start marker record.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartRecord;

impl TraceRecord for StartRecord {
    const KIND: u16 = KIND_START;

    fn body_len(&self) -> usize {
        0
    }

    fn encode(&self, _body: &mut [u8]) {}
}

/// A text message, cut at [`MAX_MESSAGE_LEN`] bytes on a character boundary.
#[derive(Debug, Clone, Copy)]
pub struct MessageRecord<'a> {
    text: &'a str,
}

impl<'a> MessageRecord<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut end = text.len().min(MAX_MESSAGE_LEN);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        Self { text: &text[..end] }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }
}

impl TraceRecord for MessageRecord<'_> {
    const KIND: u16 = KIND_MESSAGE;

    fn body_len(&self) -> usize {
        2 + self.text.len()
    }

    fn encode(&self, body: &mut [u8]) {
        body[..2].copy_from_slice(&(self.text.len() as u16).to_le_bytes());
        body[2..].copy_from_slice(self.text.as_bytes());
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// Turns entries into text and exposes their identity and time.
///
/// Used for `traced` output and by pattern, thread and team filters. Must not
/// allocate or lock: it runs with the ring lock held.
pub trait EntryRenderer: Sync {
    fn render(&self, entry: &EntryView<'_>, options: &RenderOptions, out: &mut dyn fmt::Write) -> fmt::Result;

    /// Thread and team of the producer, if recorded.
    fn identity(&self, entry: &EntryView<'_>) -> Option<EntryIdentity>;

    fn timestamp(&self, entry: &EntryView<'_>) -> Option<u64>;
}

/// Renderer for standard records.
///
/// Kind ids are looked up in the built-in table first and then in the
/// caller's `kinds`.
#[derive(Debug, Clone, Copy)]
pub struct StandardRenderer {
    kinds: &'static [&'static RecordKind],
}

/// Renderer knowing only the built-in kinds.
pub static BUILTIN_RENDERER: StandardRenderer = StandardRenderer::new(&[]);

impl StandardRenderer {
    pub const fn new(kinds: &'static [&'static RecordKind]) -> Self {
        Self { kinds }
    }

    pub fn kind(&self, id: u16) -> Option<&'static RecordKind> {
        BUILTIN_KINDS
            .iter()
            .chain(self.kinds.iter())
            .find(|kind| kind.id == id)
            .copied()
    }
}

impl EntryRenderer for StandardRenderer {
    fn render(&self, entry: &EntryView<'_>, options: &RenderOptions, out: &mut dyn fmt::Write) -> fmt::Result {
        let Some(header) = RecordHeader::decode(entry.payload) else {
            return out.write_str("<corrupt record>");
        };

        let time = if options.flags.contains(OutputFlags::DIFF_TIME) {
            options
                .last_entry_time
                .map_or(header.time, |last| header.time.wrapping_sub(last))
        } else {
            header.time
        };

        match header.identity() {
            Some(id) if options.flags.contains(OutputFlags::TEAM_ID) => {
                write!(out, "[{:6}:{:6}] {:10}: ", id.thread, id.team, time)?
            }
            Some(id) => write!(out, "[{:6}] {:10}: ", id.thread, time)?,
            None => write!(out, "[{:>6}] {:10}: ", "-", time)?,
        }

        let body = &entry.payload[RECORD_HEADER_SIZE..];
        match self.kind(header.kind) {
            Some(kind) => (kind.dump)(body, out),
            None => write!(out, "<unknown record kind {}>", header.kind),
        }
    }

    fn identity(&self, entry: &EntryView<'_>) -> Option<EntryIdentity> {
        RecordHeader::decode(entry.payload)?.identity()
    }

    fn timestamp(&self, entry: &EntryView<'_>) -> Option<u64> {
        RecordHeader::decode(entry.payload).map(|header| header.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracing::entry::{EntryFlags, EntryHandle, EntryHeader};
    use crate::tracing::output::TraceOutput;

    fn encode_record<R: TraceRecord>(record: &R, identity: Option<EntryIdentity>, time: u64, out: &mut [u8]) -> usize {
        let len = RECORD_HEADER_SIZE + record.body_len();
        assert!(RecordHeader::new(R::KIND, identity, time).encode(out));
        record.encode(&mut out[RECORD_HEADER_SIZE..len]);
        len
    }

    fn view(payload: &[u8]) -> EntryView<'_> {
        EntryView {
            handle: EntryHandle(0),
            header: EntryHeader::new().with_flags(EntryFlags::INITIALIZED),
            payload,
        }
    }

    fn render(renderer: &StandardRenderer, payload: &[u8], options: RenderOptions) -> TraceOutput<256> {
        let mut out = TraceOutput::new();
        renderer.render(&view(payload), &options, &mut out).unwrap();
        out
    }

    #[test]
    fn header_layout() {
        let header = RecordHeader::new(0x0102, Some(EntryIdentity { thread: 7, team: 3 }), 0x1122);
        let mut bytes = [0u8; RECORD_HEADER_SIZE];
        assert!(header.encode(&mut bytes));
        assert_eq!(&bytes[..4], &[0x02, 0x01, 0x01, 0x00]);
        assert_eq!(&bytes[4..8], &7i32.to_le_bytes());
        assert_eq!(RecordHeader::decode(&bytes), Some(header));
        assert_eq!(RecordHeader::decode(&bytes[..19]), None);
        assert!(!header.encode(&mut [0u8; 8]));
    }

    #[test]
    fn renders_message_with_prefix() {
        let mut payload = [0xaau8; 64];
        let id = EntryIdentity { thread: 12, team: 3 };
        encode_record(&MessageRecord::new("page fault"), Some(id), 88213, &mut payload);

        let out = render(&BUILTIN_RENDERER, &payload, RenderOptions::plain());
        assert_eq!(out.as_str(), "[    12]      88213: kern: page fault");

        let options = RenderOptions { flags: OutputFlags::TEAM_ID, last_entry_time: None };
        let out = render(&BUILTIN_RENDERER, &payload, options);
        assert_eq!(out.as_str(), "[    12:     3]      88213: kern: page fault");
    }

    #[test]
    fn diff_time_uses_previous_entry() {
        let mut payload = [0u8; 32];
        encode_record(&StartRecord, None, 1000, &mut payload);
        let options = RenderOptions { flags: OutputFlags::DIFF_TIME, last_entry_time: Some(900) };
        let out = render(&BUILTIN_RENDERER, &payload, options);
        assert_eq!(out.as_str(), "[     -]        100: ktrace start");
    }

    #[test]
    fn unknown_and_corrupt_records() {
        let mut payload = [0u8; 24];
        assert!(RecordHeader::new(0x7777, None, 5).encode(&mut payload));
        let out = render(&BUILTIN_RENDERER, &payload, RenderOptions::plain());
        assert!(out.as_str().ends_with("<unknown record kind 30583>"));

        let out = render(&BUILTIN_RENDERER, &payload[..8], RenderOptions::plain());
        assert_eq!(out.as_str(), "<corrupt record>");
    }

    #[test]
    fn custom_kinds_are_found() {
        fn dump_alloc(body: &[u8], out: &mut dyn fmt::Write) -> fmt::Result {
            write!(out, "heap allocate: {} bytes", body[0])
        }
        static ALLOC_KIND: RecordKind = RecordKind { id: 0x0400, name: "alloc", dump: dump_alloc };
        static KINDS: [&RecordKind; 1] = [&ALLOC_KIND];
        let renderer = StandardRenderer::new(&KINDS);

        let mut payload = [0u8; 24];
        assert!(RecordHeader::new(0x0400, None, 1).encode(&mut payload));
        payload[RECORD_HEADER_SIZE] = 64;
        let out = render(&renderer, &payload, RenderOptions::plain());
        assert!(out.as_str().ends_with("heap allocate: 64 bytes"));
        assert_eq!(renderer.kind(KIND_MESSAGE).map(|k| k.name), Some("message"));
    }

    #[test]
    fn message_is_cut_on_char_boundary() {
        let mut long = [b'x'; MAX_MESSAGE_LEN + 8];
        long[MAX_MESSAGE_LEN - 1] = 0xc3;
        long[MAX_MESSAGE_LEN] = 0xa9;
        let text = core::str::from_utf8(&long).unwrap();
        let message = MessageRecord::new(text);
        assert_eq!(message.text().len(), MAX_MESSAGE_LEN - 1);
    }

    #[test]
    fn identity_requires_flag() {
        let mut payload = [0u8; 24];
        assert!(RecordHeader::new(KIND_START, None, 1).encode(&mut payload));
        assert_eq!(BUILTIN_RENDERER.identity(&view(&payload)), None);
        assert_eq!(BUILTIN_RENDERER.timestamp(&view(&payload)), Some(1));

        let id = EntryIdentity { thread: 5, team: 1 };
        assert!(RecordHeader::new(KIND_START, Some(id), 1).encode(&mut payload));
        assert_eq!(BUILTIN_RENDERER.identity(&view(&payload)), Some(id));
    }
}
