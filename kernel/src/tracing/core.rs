//! The trace log handle.
//!
//! [`TraceLog`] ties the ring, the query engine and the platform together.
//! It is normally created once by [`startup`](super::startup) and reached
//! through [`log_handle`](super::log_handle), but it can also be built
//! directly over any storage, which is what the tests do.
//!
//! # Locking
//!
//! - Every ring mutation and every payload write happens under one
//!   [`SpinLockIrq`]. Critical sections never allocate, sleep or log through
//!   a path that could take the same lock.
//! - `traced` runs with the ring lock held for the whole scan, taken with
//!   `try_lock`. A producer stopped mid-allocation therefore makes the
//!   command report [`QueryOutcome::Busy`] instead of deadlocking.
//!
//! # Recording
//!
//! ```rust,ignore
//! // Structured record, stamped with time and identity:
//! log.record(&MessageRecord::new("page fault"));
//!
//! // Raw reservation, for producers with their own layout:
//! if let Some(reservation) = log.allocate(16, EntryFlags::empty()) {
//!     log.write_payload(&reservation, |payload| payload.copy_from_slice(&bytes));
//!     log.commit(reservation);
//! }
//! ```

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::spinlock::SpinLockIrq;

use super::config::{TraceConfig, MAX_MESSAGE_LEN};
use super::entry::{EntryFlags, EntryHandle};
use super::error::TraceResult;
use super::output::TraceOutput;
use super::platform::TracePlatform;
use super::query::{QueryContext, QueryEngine, QueryOutcome};
use super::record::{
    EntryRenderer, MessageRecord, RecordHeader, StartRecord, TraceRecord, BUILTIN_RENDERER,
    RECORD_HEADER_SIZE,
};
use super::ring::RingLog;

/// A reserved, not yet committed entry.
///
/// Deliberately neither `Copy` nor `Clone`: [`TraceLog::commit`] consumes it.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an uncommitted reservation blocks eviction"]
pub struct Reservation {
    handle: EntryHandle,
    len: usize,
}

impl Reservation {
    pub fn handle(&self) -> EntryHandle {
        self.handle
    }

    /// Payload length requested at allocation.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

pub struct TraceLog<'a> {
    ring: SpinLockIrq<RingLog<'a>>,
    engine: spin::Mutex<QueryEngine>,
    platform: &'a dyn TracePlatform,
    renderer: &'a dyn EntryRenderer,
    config: TraceConfig,
    enabled: AtomicBool,
}

impl<'a> TraceLog<'a> {
    /// Build a log over `storage` that renders the built-in record kinds.
    pub fn new(storage: &'a mut [u8], platform: &'a dyn TracePlatform, config: TraceConfig) -> TraceResult<Self> {
        Self::with_renderer(storage, platform, &BUILTIN_RENDERER, config)
    }

    /// Build a log with a custom renderer, for producers with their own
    /// record kinds.
    pub fn with_renderer(
        storage: &'a mut [u8],
        platform: &'a dyn TracePlatform,
        renderer: &'a dyn EntryRenderer,
        config: TraceConfig,
    ) -> TraceResult<Self> {
        if let Err(err) = config.validate() {
            log::warn!("ktrace: rejecting configuration: {}", err);
            return Err(err);
        }
        let bytes = storage.len();
        let ring = RingLog::new(storage)?;
        let capacity = ring.capacity_granules();

        let log = Self {
            ring: SpinLockIrq::new(ring),
            engine: spin::Mutex::new(QueryEngine::new()),
            platform,
            renderer,
            config,
            enabled: AtomicBool::new(config.start_enabled),
        };
        log.record(&StartRecord);
        log::info!("ktrace: {} bytes ({} granules) of trace buffer", bytes, capacity);
        Ok(log)
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn recording on or off. While off, every allocation is dropped.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Logical entries currently stored.
    pub fn entries(&self) -> u32 {
        self.ring.lock(self.platform).entries()
    }

    /// Entries ever committed.
    pub fn entries_ever(&self) -> u32 {
        self.ring.lock(self.platform).entries_ever()
    }

    // =========================================================================
    // Producer API
    // =========================================================================

    /// Reserve an entry with `payload` bytes.
    ///
    /// `None` means the event is dropped: recording is off, the size is zero
    /// or too large, or an uncommitted entry blocks eviction.
    pub fn allocate(&self, payload: usize, flags: EntryFlags) -> Option<Reservation> {
        if !self.is_enabled() {
            return None;
        }
        let handle = self.ring.lock(self.platform).allocate(payload, flags)?;
        Some(Reservation { handle, len: payload })
    }

    /// Give `write` the reserved payload bytes.
    pub fn write_payload<R>(&self, reservation: &Reservation, write: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut ring = self.ring.lock(self.platform);
        let payload = ring.payload_mut(reservation.handle);
        let len = reservation.len.min(payload.len());
        write(&mut payload[..len])
    }

    /// Mark a reservation as fully written.
    pub fn commit(&self, reservation: Reservation) -> bool {
        self.ring.lock(self.platform).commit(reservation.handle)
    }

    /// Copy `bytes` into a buffer-only entry.
    ///
    /// Blobs hold auxiliary data referenced by a real entry; they are not
    /// counted, iterated or filtered.
    pub fn store_bytes(&self, bytes: &[u8]) -> Option<EntryHandle> {
        if !self.is_enabled() {
            return None;
        }
        let mut ring = self.ring.lock(self.platform);
        let handle = ring.allocate(bytes.len(), EntryFlags::BUFFER_ONLY)?;
        ring.payload_mut(handle)[..bytes.len()].copy_from_slice(bytes);
        Some(handle)
    }

    /// Store `text` NUL-terminated in a buffer-only entry, cut to at most
    /// `max_len` bytes on a character boundary.
    pub fn store_str(&self, text: &str, max_len: usize) -> Option<EntryHandle> {
        if !self.is_enabled() {
            return None;
        }
        let mut end = text.len().min(max_len);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let text = &text.as_bytes()[..end];

        let mut ring = self.ring.lock(self.platform);
        let handle = ring.allocate(text.len() + 1, EntryFlags::BUFFER_ONLY)?;
        let payload = ring.payload_mut(handle);
        payload[..text.len()].copy_from_slice(text);
        payload[text.len()] = 0;
        Some(handle)
    }

    /// Copy the payload of a live entry into `out`. Returns the number of
    /// bytes copied.
    pub fn copy_payload(&self, handle: EntryHandle, out: &mut [u8]) -> Option<usize> {
        let ring = self.ring.lock(self.platform);
        if !ring.is_live(handle) {
            return None;
        }
        let payload = ring.view(handle).payload;
        let len = payload.len().min(out.len());
        out[..len].copy_from_slice(&payload[..len]);
        Some(len)
    }

    /// Store `record` as a committed standard record.
    pub fn record<R: TraceRecord>(&self, record: &R) -> Option<EntryHandle> {
        if !self.is_enabled() {
            return None;
        }
        let header = RecordHeader::new(R::KIND, self.platform.current_identity(), self.platform.timestamp());
        let mut ring = self.ring.lock(self.platform);
        Self::store_record(&mut ring, &header, record)
    }

    /// Like [`record`](Self::record) but gives up instead of spinning when
    /// the ring is locked.
    pub fn try_record<R: TraceRecord>(&self, record: &R) -> Option<EntryHandle> {
        if !self.is_enabled() {
            return None;
        }
        let header = RecordHeader::new(R::KIND, self.platform.current_identity(), self.platform.timestamp());
        let mut ring = self.ring.try_lock(self.platform)?;
        Self::store_record(&mut ring, &header, record)
    }

    fn store_record<R: TraceRecord>(ring: &mut RingLog<'a>, header: &RecordHeader, record: &R) -> Option<EntryHandle> {
        let body_len = record.body_len();
        let handle = ring.allocate(RECORD_HEADER_SIZE + body_len, EntryFlags::empty())?;
        let payload = ring.payload_mut(handle);
        header.encode(payload);
        record.encode(&mut payload[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + body_len]);
        ring.commit(handle);
        Some(handle)
    }

    /// Record formatted text as a message entry (`kern: ...`).
    pub fn message(&self, args: fmt::Arguments<'_>) -> Option<EntryHandle> {
        if !self.is_enabled() {
            return None;
        }
        let mut text = TraceOutput::<MAX_MESSAGE_LEN>::new();
        // TraceOutput truncates instead of failing.
        let _ = text.write_fmt(args);
        self.record(&MessageRecord::new(text.as_str()))
    }

    /// Non-blocking [`message`](Self::message), for the log bridge.
    pub fn try_message(&self, args: fmt::Arguments<'_>) -> Option<EntryHandle> {
        if !self.is_enabled() {
            return None;
        }
        let mut text = TraceOutput::<MAX_MESSAGE_LEN>::new();
        let _ = text.write_fmt(args);
        self.try_record(&MessageRecord::new(text.as_str()))
    }

    /// Whether `handle` still names the committed standard record stamped
    /// with `time`.
    ///
    /// Lets a consumer holding a handle from an earlier lookup check that
    /// the entry has not been evicted and reused in the meantime.
    pub fn is_entry_valid(&self, handle: EntryHandle, time: u64) -> bool {
        let ring = self.ring.lock(self.platform);
        if !ring.is_live(handle) {
            return false;
        }
        let view = ring.view(handle);
        if !view.is_initialized() || view.is_buffer_only() {
            return false;
        }
        RecordHeader::decode(view.payload).is_some_and(|header| header.time == time)
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Run `f` on the ring with producers locked out.
    ///
    /// Use with an [`EntryCursor`](super::iterator::EntryCursor) to walk
    /// entries by logical index.
    pub fn inspect<R>(&self, f: impl FnOnce(&RingLog<'a>) -> R) -> R {
        let ring = self.ring.lock(self.platform);
        f(&ring)
    }

    /// Run one `traced` command line, printing the page to `out`.
    pub fn run_query(&self, argv: &[&str], out: &mut dyn fmt::Write) -> QueryOutcome {
        let Some(mut engine) = self.engine.try_lock() else {
            let _ = writeln!(out, "traced: another query is running");
            return QueryOutcome::Busy;
        };
        let outcome = match self.ring.try_lock(self.platform) {
            Some(mut ring) => {
                let ctx = QueryContext {
                    renderer: self.renderer,
                    reader: self.platform.memory_reader(),
                    config: &self.config,
                };
                engine.run(&mut ring, &ctx, argv, out)
            }
            None => {
                let _ = writeln!(out, "traced: trace buffer is locked, try again");
                QueryOutcome::Busy
            }
        };
        drop(engine);

        match outcome {
            QueryOutcome::Page(summary) => log::debug!(
                "ktrace: traced printed {} of {} entries",
                summary.printed,
                summary.entries
            ),
            other => log::debug!("ktrace: traced finished with {:?}", other),
        }
        outcome
    }
}
