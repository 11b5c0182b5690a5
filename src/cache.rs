//! Path-keyed state of every tracked file in one registration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::cursor::{Cursor, Message};

/// Cached tailing state of one file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    pub cursor: Cursor,
    pub message: Message,
}

impl Entry {
    /// Entry for a file whose existing content is considered consumed.
    pub fn seeded(cursor: Cursor) -> Self {
        let message = Message::idle(cursor.clone());
        Entry { cursor, message }
    }
}

/// Mapping from absolute path to its [`Entry`].
///
/// Not synchronised: the owning registration only touches it while holding
/// its lock.
#[derive(Debug, Default)]
pub struct WatchCache {
    entries: HashMap<PathBuf, Entry>,
}

impl WatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&Entry> {
        self.entries.get(path)
    }

    pub fn put(&mut self, path: PathBuf, entry: Entry) -> Option<Entry> {
        self.entries.insert(path, entry)
    }

    /// Removing an absent path is a no-op, so repeated delete/move
    /// notifications are harmless.
    pub fn remove(&mut self, path: &Path) -> Option<Entry> {
        self.entries.remove(path)
    }

    /// Drops every entry below the directory `dir`, returning how many.
    pub fn remove_under(&mut self, dir: &Path) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|path, _| path == dir || !path.starts_with(dir));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
