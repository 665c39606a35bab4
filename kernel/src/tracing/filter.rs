//! Boolean filter expressions for `traced`.
//!
//! # Grammar
//!
//! Expressions are prefix notation over pre-split tokens:
//!
//! ```text
//! expr := '#'<text>           rendered entry contains <text>
//!       | 'd#'<number>        ... contains the decimal form of <number>
//!       | 'x#'<number>        ... contains the hex form (lowercase, no 0x)
//!       | 's#'<address>       ... contains the C string at <address>
//!       | 'thread' <id>       entry recorded by thread <id>
//!       | 'team' <id>         entry recorded by team <id>
//!       | 'not' expr
//!       | 'and' expr expr
//!       | 'or' expr expr
//! ```
//!
//! The whole token list must be consumed.
//!
//! # Design
//!
//! Nodes live in a [`FilterPool`] of [`MAX_FILTERS`] slots and refer to each
//! other by index, so parsing never allocates. A parse resets the pool.
//! Evaluation renders the entry at most once, on the first pattern node that
//! needs the text.

use core::fmt::{self, Write};

use super::command::parse_number;
use super::config::{MAX_FILTERS, MAX_PATTERN_LEN, RENDER_CAPACITY};
use super::entry::EntryView;
use super::output::{contains_bytes, RenderOptions, TraceOutput};
use super::record::{EntryIdentity, EntryRenderer};

/// Bounded copy from kernel or user memory, for `s#` patterns.
pub trait MemoryReader: Sync {
    /// Copy the NUL-terminated string at `address` into `out`, stopping at
    /// the terminator or when `out` is full. Returns the number of bytes
    /// copied, or `None` if the address cannot be read.
    fn read_c_string(&self, address: u64, out: &mut [u8]) -> Option<usize>;
}

/// Pattern text stored inline in a filter node.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PatternText {
    bytes: [u8; MAX_PATTERN_LEN],
    len: u8,
}

impl PatternText {
    pub const fn empty() -> Self {
        Self { bytes: [0; MAX_PATTERN_LEN], len: 0 }
    }

    /// Copy of `bytes`, cut at [`MAX_PATTERN_LEN`].
    pub fn new(bytes: &[u8]) -> Self {
        let mut text = Self::empty();
        let len = bytes.len().min(MAX_PATTERN_LEN);
        text.bytes[..len].copy_from_slice(&bytes[..len]);
        text.len = len as u8;
        text
    }

    fn formatted(args: fmt::Arguments<'_>) -> Self {
        let mut out = TraceOutput::<MAX_PATTERN_LEN>::new();
        // TraceOutput never reports an error.
        let _ = out.write_fmt(args);
        Self::new(out.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl fmt::Debug for PatternText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match core::str::from_utf8(self.as_bytes()) {
            Ok(text) => write!(f, "{:?}", text),
            Err(_) => write!(f, "{:?}", self.as_bytes()),
        }
    }
}

/// Index of a node in a [`FilterPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterId(u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Substring of the rendered entry.
    Pattern(PatternText),
    /// Decimal form of a number; the text is formatted once at parse time.
    DecimalPattern { value: i64, text: PatternText },
    /// Hex form of a number, lowercase without prefix.
    HexPattern { value: u64, text: PatternText },
    /// String copied from `address` when the filter was parsed; `None` if
    /// it could not be read, in which case the node never matches.
    StringPattern { address: u64, text: Option<PatternText> },
    Thread(i32),
    Team(i32),
    Not(FilterId),
    And(FilterId, FilterId),
    Or(FilterId, FilterId),
}

// =============================================================================
// Evaluation
// =============================================================================

/// Per-entry evaluation state.
///
/// Holds the entry's rendered text once a pattern node has asked for it, so
/// the caller can print the same text without rendering twice.
pub struct MatchContext<'e, 'o> {
    entry: EntryView<'e>,
    renderer: &'o dyn EntryRenderer,
    options: &'o RenderOptions,
    text: &'o mut TraceOutput<RENDER_CAPACITY>,
    rendered: bool,
}

impl<'e, 'o> MatchContext<'e, 'o> {
    pub fn new(
        entry: EntryView<'e>,
        renderer: &'o dyn EntryRenderer,
        options: &'o RenderOptions,
        text: &'o mut TraceOutput<RENDER_CAPACITY>,
    ) -> Self {
        text.clear();
        Self { entry, renderer, options, text, rendered: false }
    }

    /// Rendered text of the entry, rendering it on first use.
    pub fn text(&mut self) -> &str {
        if !self.rendered {
            self.text.clear();
            // Rendering errors leave partial text, which is still matched.
            let _ = self.renderer.render(&self.entry, self.options, &mut *self.text);
            self.rendered = true;
        }
        self.text.as_str()
    }

    fn identity(&self) -> Option<EntryIdentity> {
        self.renderer.identity(&self.entry)
    }
}

/// Fixed-capacity node storage plus the root of the last parsed expression.
#[derive(Debug, Clone)]
pub struct FilterPool {
    nodes: [Filter; MAX_FILTERS],
    count: usize,
    root: Option<FilterId>,
}

// FilterId is a u8.
const _: () = assert!(MAX_FILTERS <= u8::MAX as usize);

impl FilterPool {
    pub const fn new() -> Self {
        Self {
            nodes: [Filter::Thread(0); MAX_FILTERS],
            count: 0,
            root: None,
        }
    }

    /// Root of the last successful parse.
    pub fn root(&self) -> Option<FilterId> {
        self.root
    }

    pub fn node(&self, id: FilterId) -> Option<&Filter> {
        self.nodes[..self.count].get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn clear(&mut self) {
        self.count = 0;
        self.root = None;
    }

    /// Parse `tokens` into a new expression, replacing the previous one.
    ///
    /// Returns the root on success. On failure the pool is left empty.
    pub fn parse(&mut self, tokens: &[&str], reader: Option<&dyn MemoryReader>, max_string: usize) -> Option<FilterId> {
        self.clear();
        let mut parser = Parser {
            pool: self,
            tokens,
            position: 0,
            reader,
            max_string: max_string.min(MAX_PATTERN_LEN),
        };
        let root = parser.expression();
        let consumed = parser.position == tokens.len();
        match root {
            Some(root) if consumed => {
                self.root = Some(root);
                Some(root)
            }
            _ => {
                self.clear();
                None
            }
        }
    }

    /// Evaluate the parsed expression. An empty pool matches everything.
    pub fn matches(&self, ctx: &mut MatchContext<'_, '_>) -> bool {
        match self.root {
            Some(root) => self.evaluate(root, ctx),
            None => true,
        }
    }

    /// Evaluate the subtree rooted at `id`.
    pub fn evaluate(&self, id: FilterId, ctx: &mut MatchContext<'_, '_>) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        match *node {
            Filter::Pattern(ref text)
            | Filter::DecimalPattern { ref text, .. }
            | Filter::HexPattern { ref text, .. } => {
                contains_bytes(ctx.text().as_bytes(), text.as_bytes())
            }
            Filter::StringPattern { text: Some(ref text), .. } => {
                contains_bytes(ctx.text().as_bytes(), text.as_bytes())
            }
            Filter::StringPattern { text: None, .. } => false,
            Filter::Thread(thread) => ctx.identity().is_some_and(|id| id.thread == thread),
            Filter::Team(team) => ctx.identity().is_some_and(|id| id.team == team),
            Filter::Not(inner) => !self.evaluate(inner, ctx),
            Filter::And(a, b) => self.evaluate(a, ctx) && self.evaluate(b, ctx),
            Filter::Or(a, b) => self.evaluate(a, ctx) || self.evaluate(b, ctx),
        }
    }

    /// Claim the next free node, or `None` when the pool is full.
    fn reserve(&mut self) -> Option<FilterId> {
        let slot = self.nodes.get_mut(self.count)?;
        *slot = Filter::Pattern(PatternText::empty());
        let id = FilterId(self.count as u8);
        self.count += 1;
        Some(id)
    }

    fn fill(&mut self, id: FilterId, filter: Filter) {
        if let Some(slot) = self.nodes.get_mut(usize::from(id.0)) {
            *slot = filter;
        }
    }
}

impl Default for FilterPool {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Parser
// =============================================================================

struct Parser<'p, 't, 'r> {
    pool: &'p mut FilterPool,
    tokens: &'t [&'t str],
    position: usize,
    reader: Option<&'r dyn MemoryReader>,
    max_string: usize,
}

impl<'t> Parser<'_, 't, '_> {
    fn next_token(&mut self) -> Option<&'t str> {
        let token = *self.tokens.get(self.position)?;
        self.position += 1;
        Some(token)
    }

    fn expression(&mut self) -> Option<FilterId> {
        let token = self.next_token()?;
        // Claim the node before descending: nesting depth is bounded by the
        // pool size.
        let id = self.pool.reserve()?;

        let filter = if let Some(text) = token.strip_prefix('#') {
            Filter::Pattern(PatternText::new(text.as_bytes()))
        } else if let Some(number) = token.strip_prefix("d#") {
            let value = parse_number(number)?;
            Filter::DecimalPattern { value, text: PatternText::formatted(format_args!("{}", value)) }
        } else if let Some(number) = token.strip_prefix("x#") {
            let value = parse_number(number)? as u64;
            Filter::HexPattern { value, text: PatternText::formatted(format_args!("{:x}", value)) }
        } else if let Some(number) = token.strip_prefix("s#") {
            let address = parse_number(number)? as u64;
            Filter::StringPattern { address, text: self.read_string(address) }
        } else {
            match token {
                "not" => Filter::Not(self.expression()?),
                "and" => {
                    let a = self.expression()?;
                    Filter::And(a, self.expression()?)
                }
                "or" => {
                    let a = self.expression()?;
                    Filter::Or(a, self.expression()?)
                }
                "thread" => Filter::Thread(self.id_argument()?),
                "team" => Filter::Team(self.id_argument()?),
                _ => return None,
            }
        };

        self.pool.fill(id, filter);
        Some(id)
    }

    fn id_argument(&mut self) -> Option<i32> {
        let token = self.next_token()?;
        i32::try_from(parse_number(token)?).ok()
    }

    fn read_string(&self, address: u64) -> Option<PatternText> {
        let reader = self.reader?;
        let mut buffer = [0u8; MAX_PATTERN_LEN];
        let len = reader.read_c_string(address, &mut buffer[..self.max_string])?;
        Some(PatternText::new(&buffer[..len.min(self.max_string)]))
    }
}
