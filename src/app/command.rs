//! Inbound dose commands.
//!
//! A [`Command`] is built once from a raw characteristic write and consumed
//! once by the [`ActuationController`](super::controller::ActuationController).
//! Fields are private; there is no way to mutate a command after parsing.
//!
//! ## Wire format (ASCII, case-sensitive)
//!
//! | Payload           | Kind    |
//! |-------------------|---------|
//! | `PUSH:<decimal>`  | Push    |
//! | `FLUSH`           | Flush   |
//! | anything else     | Unknown |

use core::fmt;

/// Maximum accepted payload length.  Longer writes are malformed.
pub const MAX_PAYLOAD_LEN: usize = 32;

const PUSH_PREFIX: &str = "PUSH:";
const FLUSH_LITERAL: &str = "FLUSH";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Push,
    Flush,
    Unknown,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => write!(f, "PUSH"),
            Self::Flush => write!(f, "FLUSH"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// A parsed command value.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    kind: CommandKind,
    magnitude: f32,
    raw: heapless::String<MAX_PAYLOAD_LEN>,
}

impl Command {
    /// Parse a raw characteristic write.
    ///
    /// Never fails: anything that is not a well-formed `PUSH` or `FLUSH`
    /// comes back as [`CommandKind::Unknown`], with `raw` holding a
    /// printable copy of the payload for diagnostics.
    pub fn parse(payload: &[u8]) -> Self {
        let raw = printable_copy(payload);

        if payload.len() > MAX_PAYLOAD_LEN {
            return Self::unknown(raw);
        }
        let Ok(text) = core::str::from_utf8(payload) else {
            return Self::unknown(raw);
        };
        let text = text.trim_end_matches(['\r', '\n', '\0']);

        if text == FLUSH_LITERAL {
            return Self {
                kind: CommandKind::Flush,
                magnitude: 0.0,
                raw,
            };
        }

        match text.strip_prefix(PUSH_PREFIX).and_then(parse_decimal) {
            Some(magnitude) => Self {
                kind: CommandKind::Push,
                magnitude,
                raw,
            },
            None => Self::unknown(raw),
        }
    }

    /// A dose of `magnitude` units.
    pub fn push(magnitude: f32) -> Self {
        let mut raw = heapless::String::new();
        let _ = fmt::Write::write_fmt(&mut raw, format_args!("{PUSH_PREFIX}{magnitude}"));
        Self {
            kind: CommandKind::Push,
            magnitude,
            raw,
        }
    }

    /// A full-purge actuation.
    pub fn flush() -> Self {
        let mut raw = heapless::String::new();
        let _ = raw.push_str(FLUSH_LITERAL);
        Self {
            kind: CommandKind::Flush,
            magnitude: 0.0,
            raw,
        }
    }

    fn unknown(raw: heapless::String<MAX_PAYLOAD_LEN>) -> Self {
        Self {
            kind: CommandKind::Unknown,
            magnitude: 0.0,
            raw,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Dose in units.  Only meaningful for [`CommandKind::Push`].
    pub fn magnitude(&self) -> f32 {
        self.magnitude
    }

    /// Printable copy of the original payload (truncated, non-ASCII as `?`).
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_executable(&self) -> bool {
        self.kind != CommandKind::Unknown
    }
}

/// Accept a plain decimal: optional sign, digits, optional fraction.
/// Exponents, `inf` and `NaN` are rejected.
fn parse_decimal(s: &str) -> Option<f32> {
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    if digits.is_empty() || digits == "." {
        return None;
    }
    if !digits.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return None;
    }
    if digits.bytes().filter(|&b| b == b'.').count() > 1 {
        return None;
    }
    s.parse::<f32>().ok().filter(|v| v.is_finite())
}

fn printable_copy(payload: &[u8]) -> heapless::String<MAX_PAYLOAD_LEN> {
    let mut out = heapless::String::new();
    for &b in payload.iter().take(MAX_PAYLOAD_LEN) {
        let c = if (0x20..=0x7E).contains(&b) { b as char } else { '?' };
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
