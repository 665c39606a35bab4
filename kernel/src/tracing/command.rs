//! Argument parsing for the `traced` inspection command.
//!
//! ```text
//! traced [--printteam] [--difftime] [forward | backward]
//!        [<start> [<count> [<range>]]] [filter] [<expression>]
//! ```
//!
//! `forward` and `backward` continue the previous scan and take no further
//! arguments. With no arguments at all (output flags aside) the previous
//! scan is continued in its own direction. See [`super::filter`] for the
//! expression grammar.

use super::output::OutputFlags;

pub const USAGE: &str = "usage: traced [--printteam] [--difftime] [forward | backward] \
     [<start> [<count> [<range>]]] [filter] [<expression>]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// How a request relates to the previous scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Empty argument list: continue if possible, otherwise start fresh.
    Implicit,
    /// `forward` / `backward`: continue or fail.
    Explicit(Direction),
}

/// A parsed `traced` command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryRequest<'a> {
    pub flags: OutputFlags,
    pub continuation: Option<Continuation>,
    /// Logical index to start at; `<= 0` means "from the end".
    pub start: i64,
    /// Entries to print; `0` selects the default, negative scans backward.
    pub count: i64,
    /// Entries to examine when filtering; `0` defaults to `count`,
    /// negative means all.
    pub range: i64,
    /// Tokens of the filter expression, not parsed yet.
    pub filter: Option<&'a [&'a str]>,
}

/// The command line does not follow the grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageError;

pub fn parse_command<'a>(argv: &'a [&'a str]) -> Result<QueryRequest<'a>, UsageError> {
    let mut request = QueryRequest {
        flags: OutputFlags::empty(),
        continuation: None,
        start: 0,
        count: 0,
        range: 0,
        filter: None,
    };
    let mut rest = argv;

    while let Some((&token, tail)) = rest.split_first() {
        match token {
            "--printteam" => request.flags |= OutputFlags::TEAM_ID,
            "--difftime" => request.flags |= OutputFlags::DIFF_TIME,
            _ => break,
        }
        rest = tail;
    }

    match rest.split_first() {
        None => {
            request.continuation = Some(Continuation::Implicit);
            return Ok(request);
        }
        Some((&"forward", tail)) | Some((&"backward", tail)) => {
            if !tail.is_empty() {
                return Err(UsageError);
            }
            let direction = if rest[0] == "forward" { Direction::Forward } else { Direction::Backward };
            request.continuation = Some(Continuation::Explicit(direction));
            return Ok(request);
        }
        Some(_) => {}
    }

    let mut keyword = false;
    for slot in [&mut request.start, &mut request.count, &mut request.range] {
        let Some((&token, tail)) = rest.split_first() else {
            break;
        };
        if token == "filter" {
            keyword = true;
            rest = tail;
            break;
        }
        match parse_number(token) {
            Some(value) => {
                *slot = value;
                rest = tail;
            }
            // '#' patterns and operators start the expression.
            None => break,
        }
    }

    if !keyword && rest.first() == Some(&"filter") {
        keyword = true;
        rest = &rest[1..];
    }
    if !rest.is_empty() {
        request.filter = Some(rest);
    } else if keyword {
        return Err(UsageError);
    }
    Ok(request)
}

/// Parse a signed integer: decimal, or hex with a `0x` prefix.
pub fn parse_number(token: &str) -> Option<i64> {
    let (negative, digits) = match token.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, token),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u64>().ok()?,
    };
    if negative {
        0i64.checked_sub_unsigned(magnitude)
    } else {
        // Hex addresses above i64::MAX keep their bit pattern.
        Some(magnitude as i64)
    }
}
