//! Everything related to watching paths for creations, modifications,
//! deletions, etc.
//!
//! Watches are always placed on the parent directory of a path rather than on
//! the file itself, so that a file may disappear and reappear (log rotation,
//! an output file removed from under us) without the watch being lost.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task;

use futures_util::stream::Stream as FuturesStream;
use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
use thiserror::Error;
use tokio::sync::mpsc;

/// What happened to a watched path.
///
/// Events are only hints: consumers are expected to look at the filesystem
/// again to decide what actually changed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Change {
    /// The path now refers to a (possibly new) file.
    Created,
    /// Data was written to, or truncated from, the file at the path.
    Modified,
    /// The path no longer refers to a file (deleted or renamed away).
    Removed,
    /// Something happened that could not be classified, e.g. the event queue
    /// overflowed and the backend asked for a rescan.
    Other,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to start filesystem watcher: {0}")]
    Start(#[source] notify::Error),
    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("{0} is a directory")]
    IsDirectory(PathBuf),
    #[error("directory containing {0} does not exist")]
    MissingParent(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            Error::MissingParent(_) => io::Error::new(io::ErrorKind::NotFound, err),
            Error::IsDirectory(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            err => io::Error::other(err),
        }
    }
}

type Subscribers = Arc<Mutex<HashMap<PathBuf, Vec<mpsc::UnboundedSender<Change>>>>>;

/// Owns a single [`notify::Watcher`] and fans its events out to one
/// [`PathEvents`] receiver per subscribed path.
///
/// [`notify::Watcher`]: ../notify/trait.Watcher.html
pub struct PathWatcher {
    inner: notify::RecommendedWatcher,
    watched_directories: HashMap<PathBuf, usize>,
    subscribers: Subscribers,
}

impl Debug for PathWatcher {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        let subscribed = self
            .subscribers
            .lock()
            .map(|subs| subs.len())
            .unwrap_or_default();

        f.debug_struct("PathWatcher")
            .field("watched_directories", &self.watched_directories)
            .field("subscribed_paths", &subscribed)
            .finish()
    }
}

impl PathWatcher {
    /// Constructs a new `PathWatcher` instance.
    pub fn new() -> Result<Self, Error> {
        let subscribers = Subscribers::default();
        let dispatch_to = Arc::clone(&subscribers);

        let inner = notify::recommended_watcher(move |res| dispatch(&dispatch_to, res))
            .map_err(Error::Start)?;

        Ok(PathWatcher {
            inner,
            watched_directories: HashMap::new(),
            subscribers,
        })
    }

    fn add_directory(&mut self, path: &Path) -> Result<(), Error> {
        if let Some(count) = self.watched_directories.get_mut(path) {
            *count += 1;
            return Ok(());
        }

        notify::Watcher::watch(&mut self.inner, path, notify::RecursiveMode::NonRecursive)
            .map_err(|source| Error::Watch {
                path: path.to_path_buf(),
                source,
            })?;

        self.watched_directories.insert(path.to_path_buf(), 1);

        Ok(())
    }

    /// Starts delivering changes for `path`, which does not need to exist yet
    /// but whose parent directory must.
    ///
    /// Returns the absolute path changes are matched against, along with the
    /// receiving end.
    pub fn subscribe(&mut self, path: impl Into<PathBuf>) -> Result<(PathBuf, PathEvents), Error> {
        let path = absolutify(path)?;

        if path.is_dir() {
            return Err(Error::IsDirectory(path));
        }

        let parent = path
            .parent()
            .filter(|parent| parent.is_dir())
            .ok_or_else(|| Error::MissingParent(path.clone()))?
            .to_path_buf();

        self.add_directory(&parent)?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.clone())
            .or_default()
            .push(tx);

        Ok((path, PathEvents { rx }))
    }
}

/// Runs on the watcher's own thread.
fn dispatch(subscribers: &Subscribers, res: notify::Result<notify::Event>) {
    let event = match res {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(error = %err, paths = ?err.paths, "filesystem watcher error");
            // Wake whoever was affected so they re-check the filesystem.
            err.paths
                .into_iter()
                .fold(notify::Event::new(EventKind::Other), notify::Event::add_path)
        }
    };

    let mut subs = subscribers.lock().unwrap_or_else(PoisonError::into_inner);

    if event.need_rescan() || (event.kind.is_other() && event.paths.is_empty()) {
        for senders in subs.values_mut() {
            senders.retain(|tx| tx.send(Change::Other).is_ok());
        }
    } else {
        for (idx, path) in event.paths.iter().enumerate() {
            let Some(change) = classify(&event.kind, idx) else {
                continue;
            };
            if let Some(senders) = subs.get_mut(path) {
                // The only way `send` can fail is if the receiver was dropped,
                // in which case the subscription is pruned.
                senders.retain(|tx| tx.send(change).is_ok());
            }
        }
    }

    subs.retain(|_, senders| !senders.is_empty());
}

/// Maps a notify event kind to a `Change` for the `idx`th path of the event.
fn classify(kind: &EventKind, idx: usize) -> Option<Change> {
    // Windows returns `Any` for file creation and modification, so handle that
    let change = match kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => Change::Created,
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => Change::Modified,
        EventKind::Modify(ModifyKind::Name(mode)) => match (mode, idx) {
            (RenameMode::From, _) | (RenameMode::Both, 0) => Change::Removed,
            (RenameMode::To, _) | (RenameMode::Both, _) => Change::Created,
            _ => Change::Other,
        },
        EventKind::Remove(RemoveKind::File | RemoveKind::Any) => Change::Removed,
        EventKind::Other => Change::Other,
        _ => return None,
    };

    Some(change)
}

/// Receiving end of a [`PathWatcher`] subscription.
#[derive(Debug)]
pub struct PathEvents {
    rx: mpsc::UnboundedReceiver<Change>,
}

impl PathEvents {
    /// Waits for the next change. Returns `None` once the owning watcher has
    /// been dropped.
    pub async fn next_change(&mut self) -> Option<Change> {
        self.rx.recv().await
    }

    /// Returns an already queued change without waiting.
    pub fn try_change(&mut self) -> Option<Change> {
        self.rx.try_recv().ok()
    }
}

impl FuturesStream for PathEvents {
    type Item = Change;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Makes `path` absolute, resolving symlinks in the directory part only, so
/// that it matches the paths reported by notify for the parent watch.
fn absolutify(path: impl Into<PathBuf>) -> io::Result<PathBuf> {
    let path = path.into();

    let parent = match path.parent() {
        None => std::env::current_dir()?,
        Some(parent) if parent == Path::new("") => std::env::current_dir()?,
        Some(parent) => parent.to_path_buf(),
    };
    let filename = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Filename not found in path"))?
        .to_os_string();

    let parent = parent.canonicalize().unwrap_or(parent);

    Ok(parent.join(filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn test_subscribe_directory() {
        let tmp_dir = tempdir().expect("Failed to create tempdir");

        let mut watcher = PathWatcher::new().unwrap();
        assert!(matches!(
            watcher.subscribe(tmp_dir.path()),
            Err(Error::IsDirectory(_))
        ));
    }

    #[test]
    fn test_subscribe_bad_filename() {
        let tmp_dir = tempdir().expect("Failed to create tempdir");

        let mut watcher = PathWatcher::new().unwrap();

        // This is not okay
        let file_path = tmp_dir.path().join("..");
        assert!(watcher.subscribe(&file_path).is_err());
    }

    #[test]
    fn test_subscribe_missing_parent() {
        let tmp_dir = tempdir().expect("Failed to create tempdir");
        let file_path = tmp_dir.path().join("nope").join("file.log");

        let mut watcher = PathWatcher::new().unwrap();
        let err = watcher.subscribe(&file_path).unwrap_err();
        assert!(matches!(err, Error::MissingParent(_)));
        assert_eq!(io::Error::from(err).kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_error_into_io_kind() {
        let err = io::Error::from(Error::Start(notify::Error::generic("no inotify")));
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert!(err.to_string().contains("no inotify"));

        let err = io::Error::from(Error::IsDirectory(PathBuf::from("/tmp")));
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_directory_watch_is_shared() {
        let tmp_dir = tempdir().expect("Failed to create tempdir");

        let mut watcher = PathWatcher::new().unwrap();
        watcher.subscribe(tmp_dir.path().join("a.log")).unwrap();
        watcher.subscribe(tmp_dir.path().join("b.log")).unwrap();

        assert_eq!(watcher.watched_directories.len(), 1);
        assert_eq!(watcher.watched_directories.values().next(), Some(&2));
    }

    #[test]
    fn test_classify_rename() {
        let both = EventKind::Modify(ModifyKind::Name(RenameMode::Both));
        assert_eq!(classify(&both, 0), Some(Change::Removed));
        assert_eq!(classify(&both, 1), Some(Change::Created));

        let access = EventKind::Access(notify::event::AccessKind::Any);
        assert_eq!(classify(&access, 0), None);
    }

    #[tokio::test]
    async fn test_missing_file_lifecycle() {
        let tmp_dir = tempdir().expect("Failed to create tempdir");
        let file_path = tmp_dir.path().join("missing_file.txt");

        let mut watcher = PathWatcher::new().unwrap();
        let (_, mut changes) = watcher.subscribe(&file_path).unwrap();

        tokio::fs::write(&file_path, b"foo\n").await.unwrap();
        let created = timeout(WAIT, changes.next_change()).await.unwrap();
        assert_eq!(created, Some(Change::Created));

        tokio::fs::remove_file(&file_path).await.unwrap();
        loop {
            let change = timeout(WAIT, changes.next_change()).await.unwrap();
            if change == Some(Change::Removed) {
                break;
            }
        }
    }
}
