//! A watch registration: one directory tree, its tailing state, and the
//! triggers that turn completed messages into router calls.

use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use crate::cache::{Entry, WatchCache};
use crate::config::{Format, WatchConfig};
use crate::cursor::{Cursor, Message};
use crate::error::{self, Error, Result};
use crate::events::{absolutify, EventKind, WatchEvent};
use crate::matcher::{MatchRule, RouterTarget, Trigger, Triggers};
use crate::reassembly::{FirstLine, Flush, Reassembly};
use crate::router::RouterTable;

async fn open_at(path: &Path, pos: u64) -> io::Result<BufReader<File>> {
    let mut file = File::open(path).await?;
    file.seek(io::SeekFrom::Start(pos)).await?;

    Ok(BufReader::new(file))
}

/// One configured watch.
///
/// All cache access and all reassembly work happen under a single lock, so
/// at most one event is processed at a time per registration. Different
/// registrations share nothing.
#[derive(Debug)]
pub struct Registration {
    root: PathBuf,
    filename: Regex,
    reassembly: Reassembly,
    triggers: Triggers,
    routers: RouterTable,
    cache: Mutex<WatchCache>,
}

impl Registration {
    /// Compiles and validates `config` against the available `routers`.
    ///
    /// Any invalid pattern, missing message boundary, or unknown router name
    /// fails the whole registration.
    pub fn new(config: &WatchConfig, routers: &RouterTable) -> Result<Self> {
        let filename = error::pattern("filename", &config.filename)?;

        let reassembly = match config.format {
            Format::Text => {
                let boundary = config.text_pattern.as_deref().ok_or_else(|| {
                    Error::Rule("text watches need a `text_pattern` message boundary".into())
                })?;
                Reassembly::multiline(
                    error::pattern("text_pattern", boundary)?,
                    config.first_line,
                    config.flush,
                )
            }
            Format::Json => {
                if config.text_pattern.is_some()
                    || config.first_line != FirstLine::default()
                    || config.flush != Flush::default()
                {
                    return Err(Error::Rule(
                        "`text_pattern`, `first_line` and `flush` only apply to the `text` format"
                            .into(),
                    ));
                }
                Reassembly::Records
            }
        };

        let mut triggers = Vec::with_capacity(config.triggers.len());
        for trigger in &config.triggers {
            let rule = MatchRule::compile(&trigger.pattern)?;
            if rule.is_structured() && !reassembly.is_structured() {
                return Err(Error::Rule(
                    "field-match triggers need the `json` format".into(),
                ));
            }

            let targets = trigger
                .routers
                .iter()
                .map(|target| {
                    if !routers.contains(&target.name) {
                        return Err(Error::UnknownRouter {
                            name: target.name.clone(),
                        });
                    }
                    Ok(RouterTarget {
                        name: target.name.clone(),
                        args: target.args.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            triggers.push(Trigger::new(rule, targets));
        }

        Ok(Registration {
            root: absolutify(&config.dir, false)?,
            filename,
            reassembly,
            triggers: Triggers::new(triggers),
            routers: routers.clone(),
            cache: Mutex::new(WatchCache::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `event` concerns a file this registration tails. Checked
    /// before the lock is taken.
    pub fn accepts(&self, event: &WatchEvent) -> bool {
        !event.is_dir && self.accepts_path(&event.path)
    }

    fn accepts_path(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| self.filename.is_match(&name.to_string_lossy()))
            .unwrap_or(false)
    }

    /// Snapshot of the tailing state of `path`, if tracked.
    pub async fn entry(&self, path: impl AsRef<Path>) -> Option<Entry> {
        let path = absolutify(path.as_ref(), true).ok()?;
        self.cache.lock().await.get(&path).cloned()
    }

    /// Number of tracked files.
    pub async fn tracked(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Starts tracking every matching file already present under the root,
    /// at its current end. Returns how many files were seeded.
    pub async fn scan(&self) -> Result<usize> {
        if !self.root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", self.root.display()),
            )
            .into());
        }

        let mut cache = self.cache.lock().await;
        let mut seeded = 0;
        for entry in WalkDir::new(&self.root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %self.root.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.accepts_path(entry.path()) {
                continue;
            }

            let path = absolutify(entry.path(), true)?;
            if let Some(entry) = self.seed(&mut cache, path).await {
                info!(
                    path = %entry.cursor.path().display(),
                    line = entry.cursor.line(),
                    offset = entry.cursor.offset(),
                    "Caching current state of watched file"
                );
                seeded += 1;
            }
        }

        Ok(seeded)
    }

    /// Processes one filesystem notification.
    ///
    /// Transient failures (unreadable or vanished files) are logged and leave
    /// the cached state as it was. A deleted or moved path also drops every
    /// tracked file below it, since removing a directory reports only the
    /// directory itself.
    pub async fn handle(&self, event: &WatchEvent) {
        let removal = matches!(event.kind, EventKind::Deleted | EventKind::Moved);
        if !self.accepts(event) {
            if removal {
                self.forget_tree(&event.path).await;
            } else {
                trace!(path = %event.path.display(), "Ignoring event");
            }
            return;
        }

        let path = match absolutify(&event.path, true) {
            Ok(path) => path,
            Err(e) => {
                warn!(path = %event.path.display(), error = %e, "Failed to resolve path");
                return;
            }
        };

        let mut cache = self.cache.lock().await;
        match event.kind {
            EventKind::Created => {
                self.seed(&mut cache, path).await;
            }
            EventKind::Deleted | EventKind::Moved => {
                forget(&mut cache, &path);
                cache.remove_under(&path);
            }
            EventKind::Modified => self.tail(&mut cache, path).await,
        }
    }

    async fn forget_tree(&self, dir: &Path) {
        let Ok(dir) = absolutify(dir, true) else {
            return;
        };

        let removed = self.cache.lock().await.remove_under(&dir);
        if removed > 0 {
            debug!(path = %dir.display(), removed, "Stopped tracking files below removed path");
        }
    }

    async fn seed(&self, cache: &mut WatchCache, path: PathBuf) -> Option<Entry> {
        match Cursor::at_end_of(&path).await {
            Ok(cursor) => {
                debug!(path = %path.display(), line = cursor.line(), "Tracking file");
                let entry = Entry::seeded(cursor);
                cache.put(path, entry.clone());
                Some(entry)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open watched file");
                None
            }
        }
    }

    /// Reads every line completed since the cached cursor.
    ///
    /// A line without terminator ends the pass and is re-read on the next
    /// modification, so messages are never closed on a partial line.
    async fn tail(&self, cache: &mut WatchCache, path: PathBuf) {
        let entry = match cache.get(&path).cloned() {
            Some(entry) => entry,
            None => match self.seed(cache, path.clone()).await {
                Some(entry) => entry,
                None => return,
            },
        };
        let Entry {
            mut cursor,
            mut message,
        } = entry;

        let mut reader = match open_at(&path, cursor.offset()).await {
            Ok(reader) => reader,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open watched file");
                return;
            }
        };

        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(_) if buf.ends_with(b"\n") => {}
                Ok(_) => {
                    if buf.is_empty() {
                        if let Some(done) = self.reassembly.end_of_file(&mut message) {
                            self.dispatch(&done).await;
                        }
                    }
                    break;
                }
                Err(e) => {
                    warn!(path = %path.display(), line = cursor.line(), error = %e, "Failed to read watched file");
                    break;
                }
            }

            cursor.advance(cursor.offset() + buf.len() as u64);
            let line = String::from_utf8_lossy(&buf);
            if let Some(done) = self.reassembly.feed(&mut message, &cursor, &line) {
                self.dispatch(&done).await;
            }
        }

        cache.put(path, Entry { cursor, message });
    }

    /// Routes a completed message to every target of every matching trigger,
    /// in configuration order.
    async fn dispatch(&self, message: &Message) {
        let record = if self.reassembly.is_structured() {
            match serde_json::from_str::<Value>(message.text()) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(
                        path = %message.cursor().path().display(),
                        line = message.cursor().line(),
                        error = %Error::Record(e),
                        "Dropping message"
                    );
                    return;
                }
            }
        } else {
            None
        };

        for hit in self.triggers.evaluate(message, record.as_ref()) {
            for target in hit.trigger.targets() {
                let Some(router) = self.routers.get(&target.name) else {
                    continue;
                };

                let payload =
                    router.payload(message.text(), message.cursor(), &hit.captures, &target.args);
                if let Err(e) = router.send(payload).await {
                    warn!(
                        router = %target.name,
                        path = %message.cursor().path().display(),
                        line = message.cursor().line(),
                        error = %e,
                        "Failed to deliver message"
                    );
                }
            }
        }
    }
}

fn forget(cache: &mut WatchCache, path: &Path) {
    if let Some(entry) = cache.remove(path) {
        if !entry.message.is_idle() {
            debug!(
                path = %path.display(),
                line = entry.message.cursor().line(),
                "Discarding partially buffered message"
            );
        }
        debug!(path = %path.display(), "Stopped tracking file");
    }
}
