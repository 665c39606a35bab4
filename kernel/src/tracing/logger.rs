//! `log` facade bridge.
//!
//! [`TraceLogger`] stores every log line as a `message` entry, so kernel
//! log output shows up in `traced` next to the events around it:
//!
//! ```text
//!    17. [     4]   73310021: kern: [ WARN] vm: low on pages
//! ```
//!
//! Recording goes through [`TraceLog::try_message`], which drops the line
//! when the ring lock is already held. A log call made while the lock is
//! held (e.g. `ring_debug` tracing inside the allocator) therefore cannot
//! deadlock.

use log::{LevelFilter, Log, Metadata, Record};

use super::core::TraceLog;
use super::entry::EntryHandle;

pub struct TraceLogger {
    max_level: LevelFilter,
}

impl TraceLogger {
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    pub fn max_level(&self) -> LevelFilter {
        self.max_level
    }

    /// Store `record` in `log`, if its level passes.
    pub fn record_into(&self, log: &TraceLog<'_>, record: &Record<'_>) -> Option<EntryHandle> {
        if !self.enabled(record.metadata()) {
            return None;
        }
        log.try_message(format_args!(
            "[{:>5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        ))
    }
}

impl Log for TraceLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if let Some(log) = super::log_handle() {
            self.record_into(log, record);
        }
    }

    fn flush(&self) {}
}
