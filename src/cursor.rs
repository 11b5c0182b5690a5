//! Per-file read positions and the in-progress message buffer.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

/// How far a tailed file has been consumed.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Cursor {
    path: PathBuf,
    /// Byte offset right after the last fully-consumed line.
    offset: u64,
    /// Number of fully-consumed lines.
    line: u64,
}

impl Cursor {
    pub fn new(path: impl Into<PathBuf>, offset: u64, line: u64) -> Self {
        Cursor {
            path: path.into(),
            offset,
            line,
        }
    }

    /// Builds the cursor for an existing file as if everything up to its
    /// last newline had already been consumed.
    ///
    /// A trailing line without terminator is left unconsumed so that it is
    /// read in full once the writer completes it.
    pub async fn at_end_of(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let mut reader = BufReader::new(File::open(&path).await?);

        let mut consumed = 0u64;
        let mut offset = 0u64;
        let mut line = 0u64;
        loop {
            let buf = reader.fill_buf().await?;
            let len = buf.len();
            if len == 0 {
                break;
            }
            for (i, byte) in buf.iter().enumerate() {
                if *byte == b'\n' {
                    line += 1;
                    offset = consumed + i as u64 + 1;
                }
            }
            consumed += len as u64;
            reader.consume(len);
        }

        Ok(Cursor { path, offset, line })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn line(&self) -> u64 {
        self.line
    }

    /// Records one more terminated line ending at `offset`.
    pub(crate) fn advance(&mut self, offset: u64) {
        self.line += 1;
        self.offset = offset;
    }
}

/// Text of a log message that is being reassembled, along with the cursor
/// taken when its first line was read.
///
/// An empty message is idle: nothing is buffered.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    text: String,
    cursor: Cursor,
}

impl Message {
    pub fn idle(cursor: Cursor) -> Self {
        Message {
            text: String::new(),
            cursor,
        }
    }

    pub fn start(line: &str, cursor: Cursor) -> Self {
        Message {
            text: line.to_owned(),
            cursor,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn is_idle(&self) -> bool {
        self.text.is_empty()
    }

    pub(crate) fn push_line(&mut self, line: &str) {
        self.text.push_str(line);
    }

    /// Returns a copy suitable for matching, with trailing line terminators
    /// stripped, or `None` when there is nothing to match.
    pub fn completed(&self) -> Option<Message> {
        let text = self.text.trim_end_matches(['\n', '\r']);
        if text.is_empty() {
            return None;
        }

        Some(Message {
            text: text.to_owned(),
            cursor: self.cursor.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_cursor_at_end_of_terminated_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"one\ntwo\nthree\n").unwrap();

        let cursor = Cursor::at_end_of(file.path()).await.unwrap();
        assert_eq!(cursor.line(), 3);
        assert_eq!(cursor.offset(), 14);
        assert_eq!(cursor.path(), file.path());
    }

    #[tokio::test]
    async fn test_cursor_at_end_of_leaves_partial_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"one\ntw").unwrap();

        let cursor = Cursor::at_end_of(file.path()).await.unwrap();
        assert_eq!(cursor.line(), 1);
        assert_eq!(cursor.offset(), 4);
    }

    #[tokio::test]
    async fn test_cursor_at_end_of_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();

        let cursor = Cursor::at_end_of(file.path()).await.unwrap();
        assert_eq!(cursor, Cursor::new(file.path(), 0, 0));
    }

    #[tokio::test]
    async fn test_cursor_at_end_of_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Cursor::at_end_of(dir.path().join("nope.log")).await.is_err());
    }

    #[test]
    fn test_message_completed_strips_terminators() {
        let cursor = Cursor::new("/var/log/app.log", 10, 2);
        let mut message = Message::start("head\n", cursor.clone());
        message.push_line("tail\r\n");

        let done = message.completed().unwrap();
        assert_eq!(done.text(), "head\ntail");
        assert_eq!(done.cursor(), &cursor);
        // The buffer itself is left untouched.
        assert_eq!(message.text(), "head\ntail\r\n");
    }

    #[test]
    fn test_idle_message_never_completes() {
        let message = Message::idle(Cursor::new("/a.log", 0, 0));
        assert!(message.is_idle());
        assert!(message.completed().is_none());
        assert!(Message::start("\n", Cursor::new("/a.log", 1, 1))
            .completed()
            .is_none());
    }
}
