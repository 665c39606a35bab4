//! Kernel trace log: an always-on ring of variable-length entries plus the
//! `traced` inspection command.
//!
//! # Design Principles
//!
//! 1. **Never block producers on the log**: allocation spins only on a short,
//!    interrupt-safe critical section and drops the event when it cannot
//!    make room
//! 2. **Never corrupt**: every offset goes through one bounds-checked arena;
//!    entries still being written are never evicted
//! 3. **No allocation anywhere**: recording, rendering, filtering and paging
//!    all work on fixed buffers, so the log is usable from interrupt and
//!    debugger contexts
//!
//! # Architecture
//!
//! ```text
//! +-------------+   record / allocate+commit   +-------------------------+
//! |  producers  | ---------------------------> | TraceLog                |
//! |  ktrace!    |                              |  SpinLockIrq<RingLog>   |
//! |  log facade |                              |    Arena (granules)     |
//! +-------------+                              |  Mutex<QueryEngine>     |
//!                                              |    FilterPool           |
//! +-------------+   run_query(argv)            |    EntryCursor          |
//! |  traced     | ---------------------------> |  TracePlatform          |
//! +-------------+                              +-------------------------+
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! static mut TRACE_STORAGE: [u8; 1 << 20] = [0; 1 << 20];
//!
//! let log = ktrace::tracing::startup(
//!     unsafe { &mut *core::ptr::addr_of_mut!(TRACE_STORAGE) },
//!     &ktrace::tracing::DEFAULT_PLATFORM,
//!     TraceConfig::default(),
//! )?;
//!
//! ktrace!("vm: mapped {} pages", count);
//!
//! // Debugger command: last 30 entries of thread 7
//! log.run_query(&["thread", "7"], &mut console);
//! ```

pub mod arena;
pub mod command;
pub mod config;
pub mod core;
pub mod entry;
pub mod error;
pub mod filter;
pub mod iterator;
pub mod logger;
pub mod macros;
pub mod output;
pub mod platform;
pub mod query;
pub mod record;
pub mod ring;
pub mod timestamp;

use ::core::fmt;

use conquer_once::spin::OnceCell;

pub use self::config::TraceConfig;
pub use self::core::{Reservation, TraceLog};
pub use self::entry::{EntryFlags, EntryHandle};
pub use self::error::{TraceError, TraceResult};
pub use self::iterator::EntryCursor;
pub use self::logger::TraceLogger;
pub use self::output::TraceOutput;
pub use self::platform::{DefaultPlatform, TracePlatform, DEFAULT_PLATFORM};
pub use self::query::{QueryOutcome, QuerySummary};
pub use self::record::{EntryIdentity, EntryRenderer, RecordKind, StandardRenderer, TraceRecord};

/// The global trace log.
static TRACE_LOG: OnceCell<TraceLog<'static>> = OnceCell::uninit();

/// Create the global trace log over `storage`.
///
/// Idempotent: once the log exists, later calls return it and leave their
/// `storage` unused.
pub fn startup(
    storage: &'static mut [u8],
    platform: &'static dyn TracePlatform,
    config: TraceConfig,
) -> TraceResult<&'static TraceLog<'static>> {
    startup_with_renderer(storage, platform, &record::BUILTIN_RENDERER, config)
}

/// [`startup`] with a renderer for additional record kinds.
pub fn startup_with_renderer(
    storage: &'static mut [u8],
    platform: &'static dyn TracePlatform,
    renderer: &'static dyn EntryRenderer,
    config: TraceConfig,
) -> TraceResult<&'static TraceLog<'static>> {
    if let Ok(log) = TRACE_LOG.try_get() {
        log::warn!("ktrace: already started, ignoring {} bytes of storage", storage.len());
        return Ok(log);
    }

    let log = TraceLog::with_renderer(storage, platform, renderer, config)?;
    // Another CPU may have won the race since the check above.
    TRACE_LOG
        .try_init_once(|| log)
        .map_err(|_| TraceError::AlreadyInitialized)?;
    TRACE_LOG.try_get().map_err(|_| TraceError::AlreadyInitialized)
}

/// The global trace log, if [`startup`] has run.
pub fn log_handle() -> Option<&'static TraceLog<'static>> {
    TRACE_LOG.try_get().ok()
}

/// Record a message in the global log. Used by [`ktrace!`](crate::ktrace).
pub fn message(args: fmt::Arguments<'_>) -> Option<EntryHandle> {
    log_handle()?.message(args)
}

/// Run `traced` against the global log.
pub fn traced(argv: &[&str], out: &mut dyn fmt::Write) -> Option<QueryOutcome> {
    Some(log_handle()?.run_query(argv, out))
}

/// Install [`TraceLogger`] as the `log` backend, recording lines up to
/// `level` into the global log.
pub fn install_logger(level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    static LOGGER: TraceLogger = TraceLogger::new(log::LevelFilter::Trace);
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
