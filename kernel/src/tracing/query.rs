//! The `traced` scan engine.
//!
//! # Design
//!
//! A query examines a window of logical indices `[first, last]` and prints
//! up to `count` entries from it, in ascending index order:
//!
//! - Forward scans walk the window from `first` and stop after `count`
//!   printed entries; `last` is then pulled in to the last index examined.
//! - Backward scans with a filter first walk the window from `last` down,
//!   setting [`EntryFlags::FILTER_MATCH`] on matches until `count` are
//!   found, and then replay the marked stretch forward. `first` is pulled
//!   up to where the backward walk stopped.
//!
//! The checked window, the page parameters and the ring's entry counters
//! are kept after every scan. `forward` / `backward` resume from just past
//! the window as long as the counters are unchanged; any new or evicted
//! entry invalidates the saved position.
//!
//! The engine runs under the ring lock and never allocates: rendering goes
//! into a buffer owned by the engine, filters live in a fixed node pool.

use core::fmt;

use super::command::{parse_command, Continuation, Direction, USAGE};
use super::config::{TraceConfig, RENDER_CAPACITY};
use super::entry::EntryFlags;
use super::filter::{FilterPool, MatchContext, MemoryReader};
use super::iterator::EntryCursor;
use super::output::{OutputFlags, RenderOptions, TraceOutput};
use super::record::EntryRenderer;
use super::ring::RingLog;

/// Result of one `traced` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Page(QuerySummary),
    /// Malformed arguments or filter; the usage line was printed.
    Usage,
    /// `forward` / `backward` without a compatible previous scan.
    CannotContinue,
    /// The ring is locked by a producer; nothing was scanned.
    Busy,
}

/// Numbers printed in the summary line of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySummary {
    pub printed: u32,
    /// First logical index examined.
    pub first_checked: i64,
    /// Last logical index examined; below `first_checked` for an empty window.
    pub last_checked: i64,
    pub entries: u32,
    pub entries_ever: u32,
    pub direction: Direction,
    /// Whether this page continued a previous scan.
    pub continued: bool,
}

impl QuerySummary {
    /// Number of indices examined.
    pub fn checked(&self) -> i64 {
        (self.last_checked - self.first_checked + 1).max(0)
    }
}

/// Parameters and position of the previous scan.
#[derive(Debug, Clone, Copy)]
struct ScanState {
    direction: Direction,
    count: i64,
    range: i64,
    has_filter: bool,
    flags: OutputFlags,
    first_checked: i64,
    last_checked: i64,
    entries: u32,
    entries_ever: u32,
}

impl ScanState {
    fn still_valid(&self, entries: u32, entries_ever: u32) -> bool {
        entries_ever != 0 && self.entries_ever == entries_ever && self.entries == entries
    }
}

/// Everything a scan needs besides the ring.
pub struct QueryContext<'a> {
    pub renderer: &'a dyn EntryRenderer,
    pub reader: Option<&'a dyn MemoryReader>,
    pub config: &'a TraceConfig,
}

/// Continuable `traced` implementation.
pub struct QueryEngine {
    previous: Option<ScanState>,
    filters: FilterPool,
    cursor: EntryCursor,
    text: TraceOutput<RENDER_CAPACITY>,
}

impl QueryEngine {
    pub const fn new() -> Self {
        Self {
            previous: None,
            filters: FilterPool::new(),
            cursor: EntryCursor::new(),
            text: TraceOutput::new(),
        }
    }

    /// Forget the previous scan.
    pub fn reset(&mut self) {
        self.previous = None;
        self.cursor.reset();
    }

    /// Run one `traced` command line against `ring`, printing to `out`.
    ///
    /// Output errors are ignored; the page is still accounted for.
    pub fn run(
        &mut self,
        ring: &mut RingLog<'_>,
        ctx: &QueryContext<'_>,
        argv: &[&str],
        out: &mut dyn fmt::Write,
    ) -> QueryOutcome {
        let entries = ring.entries();
        let entries_ever = ring.entries_ever();

        let Ok(request) = parse_command(argv) else {
            let _ = writeln!(out, "{}", USAGE);
            return QueryOutcome::Usage;
        };

        let compatible = self
            .previous
            .filter(|previous| previous.still_valid(entries, entries_ever));
        if compatible.is_none() {
            self.cursor.reset();
        }

        let resumed = match request.continuation {
            Some(Continuation::Explicit(direction)) => match compatible {
                Some(previous) => Some((previous, direction)),
                None => {
                    let _ = writeln!(
                        out,
                        "Can't continue iteration. \"traced\" has not been invoked before, \
                         or there were new entries written since the last invocation."
                    );
                    return QueryOutcome::CannotContinue;
                }
            },
            Some(Continuation::Implicit) => compatible.map(|previous| (previous, previous.direction)),
            None => None,
        };

        let entries_i = i64::from(entries);
        let (direction, count, range, has_filter, flags, start) = match resumed {
            Some((previous, direction)) => {
                let start = match direction {
                    Direction::Backward => previous.first_checked - 1,
                    Direction::Forward => previous.last_checked + 1,
                };
                (direction, previous.count, previous.range, previous.has_filter, previous.flags, start)
            }
            None => {
                let has_filter = request.filter.is_some();
                if let Some(tokens) = request.filter {
                    let parsed = self.filters.parse(tokens, ctx.reader, ctx.config.max_string_pattern);
                    if parsed.is_none() {
                        // The saved scan may refer to the discarded filter.
                        self.reset();
                        let _ = writeln!(out, "{}", USAGE);
                        return QueryOutcome::Usage;
                    }
                }

                let count = if request.count == 0 {
                    i64::from(ctx.config.default_page_size)
                } else {
                    request.count
                };
                let range = if request.range == 0 || !has_filter {
                    count
                } else if request.range < 0 {
                    entries_i
                } else {
                    request.range
                };
                let direction = if request.start <= 0 || count < 0 {
                    Direction::Backward
                } else {
                    Direction::Forward
                };

                let range = (range.unsigned_abs().min(u64::from(entries))) as i64;
                let count = (count.unsigned_abs() as i64).min(range);
                let start = if request.start <= 0 { entries_i.max(1) } else { request.start };
                (direction, count, range, has_filter, request.flags, start)
            }
        };

        let (mut first, mut last) = if start > entries_i {
            (start, entries_i)
        } else {
            match direction {
                Direction::Backward => ((start - range + 1).max(1), start),
                Direction::Forward => (start, (start + range - 1).min(entries_i)),
            }
        };

        let mut options = RenderOptions { flags, last_entry_time: None };

        // Backward pre-scan: mark up to `count` matches from the end.
        let mut marked = false;
        let mut dump_first = first;
        let mut dump_last = last;
        if direction == Direction::Backward && has_filter && last - first >= count {
            marked = true;
            let mut matching = 0;
            let mut newest = None;
            let mut oldest = None;

            self.cursor.seek_to(ring, (last + 1) as u32);
            while i64::from(self.cursor.index()) > first {
                let Some(handle) = self.cursor.previous(ring) else {
                    break;
                };
                let view = ring.view(handle);
                if !view.is_initialized() {
                    continue;
                }
                let matched = {
                    let mut match_ctx = MatchContext::new(view, ctx.renderer, &options, &mut self.text);
                    self.filters.matches(&mut match_ctx)
                };
                ring.set_filter_match(handle, matched);
                if matched {
                    let index = i64::from(self.cursor.index());
                    newest.get_or_insert(index);
                    oldest = Some(index);
                    matching += 1;
                    if matching >= count {
                        break;
                    }
                }
            }

            first = i64::from(self.cursor.index()).max(1);
            (dump_first, dump_last) = match (oldest, newest) {
                (Some(oldest), Some(newest)) => (oldest, newest),
                _ => (1, 0),
            };
        }

        let mut printed: u32 = 0;
        if dump_first <= dump_last {
            self.cursor.seek_to(ring, (dump_first - 1) as u32);
            while let Some(handle) = self.cursor.next(ring) {
                let index = i64::from(self.cursor.index());
                if index > dump_last || i64::from(printed) >= count {
                    if direction == Direction::Forward {
                        last = index - 1;
                    }
                    break;
                }

                let view = ring.view(handle);
                if view.is_initialized() {
                    let mut match_ctx = MatchContext::new(view, ctx.renderer, &options, &mut self.text);
                    let selected = if !has_filter {
                        true
                    } else if marked {
                        view.flags().contains(EntryFlags::FILTER_MATCH)
                    } else {
                        self.filters.matches(&mut match_ctx)
                    };
                    if !selected {
                        continue;
                    }
                    let text = match_ctx.text();
                    let text = text.strip_suffix('\n').unwrap_or(text);
                    let _ = writeln!(out, "{:5}. {}", index, text);
                    options.last_entry_time = ctx.renderer.timestamp(&view);
                } else if !has_filter {
                    let _ = writeln!(out, "{:5}. ** uninitialized entry **", index);
                } else {
                    continue;
                }
                printed += 1;
            }
        }

        let summary = QuerySummary {
            printed,
            first_checked: first,
            last_checked: last,
            entries,
            entries_ever,
            direction,
            continued: resumed.is_some(),
        };
        let _ = writeln!(
            out,
            "printed {} entries within range {} to {} ({} of {} total, {} ever)",
            printed,
            first,
            last,
            summary.checked(),
            entries,
            entries_ever
        );

        self.previous = Some(ScanState {
            direction,
            count,
            range,
            has_filter,
            flags,
            first_checked: first,
            last_checked: last,
            entries,
            entries_ever,
        });
        QueryOutcome::Page(summary)
    }
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new()
    }
}
