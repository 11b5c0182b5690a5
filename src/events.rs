//! Filesystem change notifications for a watched directory tree.

use std::collections::VecDeque;
use std::fmt::{self, Debug, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task;

use futures_util::ready;
use futures_util::stream::{Stream as FuturesStream, StreamExt};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::Watcher as _;
use pin_project_lite::pin_project;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::Result;

/// Kind of change reported for a path.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventKind {
    Created,
    Modified,
    Deleted,
    /// The path was renamed away; its old name is reported.
    Moved,
}

/// One change notification, already reduced to what tailing cares about.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub path: PathBuf,
    pub is_dir: bool,
}

impl WatchEvent {
    pub fn new(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        WatchEvent {
            kind,
            path: path.into(),
            is_dir: false,
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(EventKind::Created, path)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(EventKind::Modified, path)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(EventKind::Deleted, path)
    }

    pub fn moved(path: impl Into<PathBuf>) -> Self {
        Self::new(EventKind::Moved, path)
    }

    pub fn directory(mut self) -> Self {
        self.is_dir = true;
        self
    }

    /// Translates a `notify` event into zero or more [`WatchEvent`]s.
    ///
    /// Access and metadata-only events are dropped. A rename carrying both
    /// names becomes a move of the old path plus a creation of the new one.
    pub fn from_notify(event: notify::Event) -> Vec<WatchEvent> {
        use notify::EventKind as Kind;

        let notify::Event { kind, paths, .. } = event;
        let probe = |kind: EventKind, path: PathBuf| {
            let is_dir = path.is_dir();
            WatchEvent { kind, path, is_dir }
        };

        match kind {
            Kind::Create(CreateKind::Folder) => paths
                .into_iter()
                .map(|path| WatchEvent::created(path).directory())
                .collect(),
            Kind::Create(_) => paths
                .into_iter()
                .map(|path| probe(EventKind::Created, path))
                .collect(),
            Kind::Remove(RemoveKind::Folder) => paths
                .into_iter()
                .map(|path| WatchEvent::deleted(path).directory())
                .collect(),
            Kind::Remove(_) => paths.into_iter().map(WatchEvent::deleted).collect(),
            Kind::Modify(ModifyKind::Name(RenameMode::From)) => {
                paths.into_iter().map(WatchEvent::moved).collect()
            }
            Kind::Modify(ModifyKind::Name(RenameMode::To)) => paths
                .into_iter()
                .map(|path| probe(EventKind::Created, path))
                .collect(),
            Kind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut paths = paths.into_iter();
                let mut events = Vec::with_capacity(2);
                if let Some(from) = paths.next() {
                    events.push(WatchEvent::moved(from));
                }
                if let Some(to) = paths.next() {
                    events.push(probe(EventKind::Created, to));
                }
                events
            }
            // Backends that can't tell the two rename halves apart.
            Kind::Modify(ModifyKind::Name(_)) => paths
                .into_iter()
                .map(|path| {
                    if path.exists() {
                        probe(EventKind::Created, path)
                    } else {
                        WatchEvent::moved(path)
                    }
                })
                .collect(),
            Kind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
            Kind::Modify(_) => paths
                .into_iter()
                .map(|path| probe(EventKind::Modified, path))
                .collect(),
            _ => Vec::new(),
        }
    }
}

pin_project! {
/// Recursive watch over one directory tree, polled as a stream of
/// [`WatchEvent`]s.
///
/// Internally a [`notify::RecommendedWatcher`] proxies its events through an
/// unbounded channel; watcher errors are logged and skipped.
pub struct DirectoryEvents {
    inner: notify::RecommendedWatcher,
    root: PathBuf,
    pending: VecDeque<WatchEvent>,
    event_stream: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
}
}

impl Debug for DirectoryEvents {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("DirectoryEvents")
            .field("root", &self.root)
            .field("pending", &self.pending)
            .finish()
    }
}

impl DirectoryEvents {
    /// Subscribes recursively to `root`, which has to exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = absolutify(root.as_ref(), false)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // Only fails once the receiver is gone, at which point nobody
            // is interested anymore.
            let _ = tx.send(res);
        })?;
        inner.watch(&root, notify::RecursiveMode::Recursive)?;

        Ok(DirectoryEvents {
            inner,
            root,
            pending: VecDeque::new(),
            event_stream: rx,
        })
    }

    /// The absolute root of the watch.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.next().await
    }
}

impl FuturesStream for DirectoryEvents {
    type Item = WatchEvent;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        let this = self.project();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return task::Poll::Ready(Some(event));
            }

            match ready!(this.event_stream.poll_recv(cx)) {
                Some(Ok(event)) => this.pending.extend(WatchEvent::from_notify(event)),
                Some(Err(e)) => warn!(root = %this.root.display(), error = %e, "Watcher error"),
                None => return task::Poll::Ready(None),
            }
        }
    }
}

/// Makes `path` absolute without requiring it to exist.
///
/// For files only the parent directory is resolved, so a path keeps the
/// same form before and after the file itself is deleted.
pub(crate) fn absolutify(path: &Path, is_file: bool) -> io::Result<PathBuf> {
    let resolve = |dir: &Path| -> io::Result<PathBuf> {
        if dir == Path::new("") {
            return std::env::current_dir();
        }
        match dir.canonicalize() {
            Ok(abs_dir) => Ok(abs_dir),
            Err(_) if dir.is_absolute() => Ok(dir.to_path_buf()),
            Err(_) => Ok(std::env::current_dir()?.join(dir)),
        }
    };

    if !is_file {
        return resolve(path);
    }

    let filename = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Filename not found in path"))?;
    let dir = resolve(path.parent().unwrap_or_else(|| Path::new("")))?;

    Ok(dir.join(filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange, MetadataKind};
    use std::time::Duration;
    use tempfile::tempdir;

    fn notify_event(kind: notify::EventKind, paths: &[&Path]) -> notify::Event {
        paths
            .iter()
            .fold(notify::Event::new(kind), |event, path| event.add_path(path.to_path_buf()))
    }

    #[test]
    fn test_from_notify_kinds() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("app.log");
        std::fs::write(&file, b"").unwrap();
        let gone = dir.path().join("gone.log");

        let created = WatchEvent::from_notify(notify_event(
            notify::EventKind::Create(CreateKind::File),
            &[&file],
        ));
        assert_eq!(created, vec![WatchEvent::created(&file)]);

        let modified = WatchEvent::from_notify(notify_event(
            notify::EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &[&file],
        ));
        assert_eq!(modified, vec![WatchEvent::modified(&file)]);

        let removed = WatchEvent::from_notify(notify_event(
            notify::EventKind::Remove(RemoveKind::File),
            &[&gone],
        ));
        assert_eq!(removed, vec![WatchEvent::deleted(&gone)]);

        let renamed = WatchEvent::from_notify(notify_event(
            notify::EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[&gone, &file],
        ));
        assert_eq!(
            renamed,
            vec![WatchEvent::moved(&gone), WatchEvent::created(&file)]
        );
    }

    #[test]
    fn test_from_notify_ignored_and_directories() {
        let dir = tempdir().unwrap();

        let metadata = WatchEvent::from_notify(notify_event(
            notify::EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &[dir.path()],
        ));
        assert!(metadata.is_empty());

        let access = WatchEvent::from_notify(notify_event(
            notify::EventKind::Access(AccessKind::Read),
            &[dir.path()],
        ));
        assert!(access.is_empty());

        let folder = WatchEvent::from_notify(notify_event(
            notify::EventKind::Create(CreateKind::Folder),
            &[dir.path()],
        ));
        assert!(folder[0].is_dir);
    }

    #[test]
    fn test_absolutify() {
        let dir = tempdir().unwrap();
        let canonical = dir.path().canonicalize().unwrap();

        assert_eq!(absolutify(dir.path(), false).unwrap(), canonical);
        assert_eq!(
            absolutify(&dir.path().join("missing.log"), true).unwrap(),
            canonical.join("missing.log")
        );
        assert!(absolutify(&dir.path().join(".."), true).is_err());

        let relative = absolutify(Path::new("some.log"), true).unwrap();
        assert!(relative.is_absolute());
        assert!(relative.ends_with("some.log"));
    }

    #[tokio::test]
    async fn test_missing_root_fails() {
        let dir = tempdir().unwrap();
        assert!(DirectoryEvents::new(dir.path().join("nope")).is_err());
    }

    #[tokio::test]
    async fn test_events_for_new_file() {
        let dir = tempdir().unwrap();
        let mut events = DirectoryEvents::new(dir.path()).unwrap();
        let path = events.root().join("new.log");

        std::fs::write(&path, b"hello\n").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.next_event().await {
                    Some(event) if event.path == path => break event,
                    Some(_) => continue,
                    None => panic!("event stream ended"),
                }
            }
        })
        .await
        .expect("no event for new file");
        assert!(!event.is_dir);
        assert!(matches!(event.kind, EventKind::Created | EventKind::Modified));
    }
}
