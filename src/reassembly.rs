//! Strategies deciding where one log message ends and the next begins.

use regex::Regex;
use serde::Deserialize;

use crate::cursor::{Cursor, Message};

/// What to do with a line that arrives while nothing is buffered and that
/// does not look like the start of a message.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FirstLine {
    /// Drop it; buffering only begins at a boundary line.
    #[default]
    RequireBoundary,
    /// Treat it as the start of the first message.
    Accumulate,
}

/// When a buffered message is closed if no boundary line follows it.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Flush {
    /// Only the next boundary line closes a message.
    #[default]
    Defer,
    /// Reaching the end of the file on a line boundary also closes it.
    AtEof,
}

/// Message reassembly strategy of a registration.
#[derive(Clone, Debug)]
pub enum Reassembly {
    /// Plain text where `boundary` matches the first line of every message.
    Multiline {
        boundary: Regex,
        first_line: FirstLine,
        flush: Flush,
    },
    /// One self-describing JSON record per line.
    Records,
}

impl Reassembly {
    pub fn multiline(boundary: Regex, first_line: FirstLine, flush: Flush) -> Self {
        Reassembly::Multiline {
            boundary,
            first_line,
            flush,
        }
    }

    /// Feeds one terminated `line`, read up to `cursor`, into `message`.
    ///
    /// Returns the message this line completed, if any. `message` is left
    /// holding whatever is still in progress.
    pub fn feed(&self, message: &mut Message, cursor: &Cursor, line: &str) -> Option<Message> {
        match self {
            Reassembly::Multiline {
                boundary,
                first_line,
                ..
            } => {
                if boundary.is_match(line.trim_end_matches(['\n', '\r'])) {
                    let done = message.completed();
                    *message = Message::start(line, cursor.clone());
                    done
                } else if !message.is_idle() {
                    message.push_line(line);
                    None
                } else {
                    if *first_line == FirstLine::Accumulate {
                        *message = Message::start(line, cursor.clone());
                    }
                    None
                }
            }
            Reassembly::Records => Message::start(line, cursor.clone()).completed(),
        }
    }

    /// Called when a pass stops exactly at the end of the file, with no
    /// partial line pending. Returns the message this closes, if any.
    pub fn end_of_file(&self, message: &mut Message) -> Option<Message> {
        match self {
            Reassembly::Multiline {
                flush: Flush::AtEof,
                ..
            } if !message.is_idle() => {
                let done = message.completed();
                *message = Message::idle(message.cursor().clone());
                done
            }
            _ => None,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Reassembly::Records)
    }
}
