//! Parsing of lines received from the daemon.
//!
//! Every line starts with a three digit status code. Solicited replies carry
//! the command's sequence number next (when sequence numbers are enabled),
//! unsolicited `6xx` events never do.

use crate::command::{TokenizeError, tokenize};

/// Status code class of a daemon line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// `1xx`: more lines follow for the same command.
    Continuing,
    /// `2xx`: command completed.
    Ok,
    /// `4xx` / `5xx`: command failed.
    Failed,
    /// `6xx`: event pushed by the daemon.
    Unsolicited,
}

impl ResponseClass {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            100..=199 => Some(ResponseClass::Continuing),
            200..=299 => Some(ResponseClass::Ok),
            400..=599 => Some(ResponseClass::Failed),
            600..=699 => Some(ResponseClass::Unsolicited),
            _ => None,
        }
    }
}

/// Errors from parsing a daemon line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyParseError {
    #[error("missing or invalid status code in {0:?}")]
    InvalidCode(String),

    #[error("status code {0} is outside every known class")]
    UnknownClass(u16),

    #[error("missing or invalid sequence number in {0:?}")]
    InvalidSequence(String),
}

/// A reply to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub seq: Option<u32>,
    pub message: String,
    /// Messages of `1xx` lines received before the final line.
    pub continuations: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, seq: Option<u32>, message: impl Into<String>) -> Self {
        Self {
            code,
            seq,
            message: message.into(),
            continuations: Vec::new(),
        }
    }

    pub fn class(&self) -> Option<ResponseClass> {
        ResponseClass::from_code(self.code)
    }

    pub fn is_final(&self) -> bool {
        self.class() != Some(ResponseClass::Continuing)
    }

    /// The message split into tokens.
    pub fn cooked(&self) -> Result<Vec<String>, TokenizeError> {
        tokenize(&self.message)
    }
}

/// An unsolicited event pushed by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonEvent {
    pub code: u16,
    pub message: String,
    /// The full line as received.
    pub raw: String,
}

impl DaemonEvent {
    /// The message split into tokens.
    pub fn cooked(&self) -> Result<Vec<String>, TokenizeError> {
        tokenize(&self.message)
    }
}

/// A parsed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Reply(Reply),
    Event(DaemonEvent),
}

/// Parse one received line (terminator already stripped).
pub fn parse_line(raw: &str, with_seq: bool) -> Result<Line, ReplyParseError> {
    let (code_str, rest) = split_word(raw);
    let code: u16 = code_str
        .parse()
        .ok()
        .filter(|_| code_str.len() == 3)
        .ok_or_else(|| ReplyParseError::InvalidCode(raw.to_string()))?;
    let class = ResponseClass::from_code(code).ok_or(ReplyParseError::UnknownClass(code))?;

    if class == ResponseClass::Unsolicited {
        return Ok(Line::Event(DaemonEvent {
            code,
            message: rest.to_string(),
            raw: raw.to_string(),
        }));
    }

    let (seq, message) = if with_seq {
        let (seq_str, message) = split_word(rest);
        let seq = seq_str
            .parse::<u32>()
            .map_err(|_| ReplyParseError::InvalidSequence(raw.to_string()))?;
        (Some(seq), message)
    } else {
        (None, rest)
    };

    Ok(Line::Reply(Reply::new(code, seq, message)))
}

/// Split off the first space-delimited word.
fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(' ') {
        Some((word, rest)) => (word, rest),
        None => (s, ""),
    }
}
