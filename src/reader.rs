//! Everything related to reading lines out of a followed file.

use std::fmt;
use std::fs::Metadata;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::{metadata, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::events::PathEvents;
use crate::merge::Feed;
use crate::registry::Source;

const READ_CHUNK: usize = 8 * 1024;

/// A source that stopped for good, e.g. its file could not be read.
#[derive(Debug, Error)]
#[error("{origin}: {error}")]
pub struct SourceError {
    origin: Source,
    #[source]
    error: io::Error,
}

impl SourceError {
    pub fn new(origin: Source, error: io::Error) -> Self {
        SourceError { origin, error }
    }

    /// The source that stopped.
    pub fn origin(&self) -> &Source {
        &self.origin
    }

    pub fn error(&self) -> &io::Error {
        &self.error
    }
}

/// Accumulates raw bytes and splits them into complete lines, keeping a
/// trailing partial line until a later chunk terminates it.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Appends `bytes`, returning every line completed by them in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = bytes;

        while let Some(idx) = rest.iter().position(|b| *b == b'\n') {
            self.pending.extend_from_slice(&rest[..idx]);
            rest = &rest[idx + 1..];
            lines.push(decode(mem::take(&mut self.pending)));
        }
        self.pending.extend_from_slice(rest);

        lines
    }

    /// Takes an unterminated trailing line, if any.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(decode(mem::take(&mut self.pending)))
        }
    }
}

fn decode(mut line: Vec<u8>) -> String {
    if line.last() == Some(&b'\r') {
        line.pop();
    }

    match String::from_utf8(line) {
        Ok(line) => line,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}

#[cfg(unix)]
fn file_id(meta: &Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;

    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_id(_meta: &Metadata) -> Option<(u64, u64)> {
    None
}

/// An open handle on the file currently being followed.
struct Tail {
    file: File,
    id: Option<(u64, u64)>,
    pos: u64,
}

impl Tail {
    async fn open(path: &Path, at_end: bool) -> io::Result<Tail> {
        let mut file = File::open(path).await?;
        let meta = file.metadata().await?;
        if meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", path.display()),
            ));
        }

        let pos = if at_end { meta.len() } else { 0 };
        if pos > 0 {
            file.seek(io::SeekFrom::Start(pos)).await?;
        }

        Ok(Tail {
            file,
            id: file_id(&meta),
            pos,
        })
    }

    /// Whether `meta` still describes the file this handle points at.
    fn is_same(&self, meta: &Metadata) -> bool {
        self.id.is_none() || self.id == file_id(meta)
    }

    async fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(io::SeekFrom::Start(0)).await?;
        self.pos = 0;
        Ok(())
    }
}

enum State {
    /// Not opened yet; the first open starts at end of content.
    Opening,
    Following(Tail),
    /// The file is gone; waiting for it to reappear.
    Reopening,
    Failed,
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match self {
            State::Opening => write!(f, "Opening"),
            State::Following(tail) => write!(f, "Following(pos: {})", tail.pos),
            State::Reopening => write!(f, "Reopening"),
            State::Failed => write!(f, "Failed"),
        }
    }
}

/// Follows a single file, pushing each complete line into a [`Feed`].
///
/// ## Following
///
/// `LineSource` is a small state machine driven by [`PathEvents`]:
///   1. `Opening`: the file is opened positioned at its current end, so
///      nothing written before startup is replayed. A missing file moves to
///      `Reopening` instead.
///   2. `Following`: on every change, newly appended bytes are read and split
///      into lines. A shrunk file (truncation) is re-read from the start; a
///      different file at the same path (rotation) is switched to after the
///      old handle is drained; a removed file moves to `Reopening`.
///   3. `Reopening`: waits for the path to exist again, then follows the new
///      file from its first byte.
///   4. `Failed`: any other I/O error. Reported once, and the source stops.
pub struct LineSource {
    source: Source,
    path: PathBuf,
    state: State,
    buffer: LineBuffer,
}

impl fmt::Debug for LineSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("LineSource")
            .field("source", &self.source)
            .field("path", &self.path)
            .field("state", &self.state)
            .finish()
    }
}

impl LineSource {
    /// `path` is the resolved location `changes` were subscribed for.
    pub fn new(source: Source, path: PathBuf) -> Self {
        LineSource {
            source,
            path,
            state: State::Opening,
            buffer: LineBuffer::default(),
        }
    }

    /// Follows the file until it fails or `feed`'s merger goes away.
    pub async fn run(mut self, mut changes: PathEvents, feed: Feed) {
        if let Err(err) = self.step(&feed).await {
            return self.fail(err, &feed);
        }

        while let Some(_change) = changes.next_change().await {
            // Bursts of events only need one look at the file.
            while changes.try_change().is_some() {}

            if let Err(err) = self.step(&feed).await {
                return self.fail(err, &feed);
            }
            if feed.is_closed() {
                break;
            }
        }

        tracing::debug!(file = self.source.name(), "follower finished");
    }

    fn fail(&mut self, err: io::Error, feed: &Feed) {
        tracing::debug!(file = self.source.name(), error = %err, "follower failed");
        self.state = State::Failed;
        feed.fail(SourceError::new(self.source.clone(), err));
    }

    /// Advances the state machine by looking at the file once.
    async fn step(&mut self, feed: &Feed) -> io::Result<()> {
        let state = mem::replace(&mut self.state, State::Failed);

        self.state = match state {
            State::Opening => match Tail::open(&self.path, true).await {
                Ok(tail) => State::Following(tail),
                Err(err) if err.kind() == io::ErrorKind::NotFound => State::Reopening,
                Err(err) => return Err(err),
            },
            State::Following(tail) => self.follow(tail, feed).await?,
            State::Reopening => self.reopen(feed).await?,
            State::Failed => State::Failed,
        };

        Ok(())
    }

    async fn follow(&mut self, mut tail: Tail, feed: &Feed) -> io::Result<State> {
        match metadata(&self.path).await {
            Ok(meta) if tail.is_same(&meta) => {
                if meta.len() < tail.pos {
                    tracing::info!(file = self.source.name(), "file truncated, reading from start");
                    self.flush_partial(feed);
                    tail.rewind().await?;
                }
                self.read_available(&mut tail, feed).await?;
                Ok(State::Following(tail))
            }
            Ok(_) => {
                tracing::info!(file = self.source.name(), "file replaced, following new file");
                self.read_available(&mut tail, feed).await?;
                self.flush_partial(feed);
                self.reopen(feed).await
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::info!(file = self.source.name(), "file removed, waiting for it to return");
                self.read_available(&mut tail, feed).await?;
                self.flush_partial(feed);
                Ok(State::Reopening)
            }
            Err(err) => Err(err),
        }
    }

    async fn reopen(&mut self, feed: &Feed) -> io::Result<State> {
        match Tail::open(&self.path, false).await {
            Ok(mut tail) => {
                self.read_available(&mut tail, feed).await?;
                Ok(State::Following(tail))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(State::Reopening),
            Err(err) => Err(err),
        }
    }

    async fn read_available(&mut self, tail: &mut Tail, feed: &Feed) -> io::Result<()> {
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            let n = tail.file.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            tail.pos += n as u64;

            for line in self.buffer.push(&chunk[..n]) {
                feed.line(&self.source, line);
            }
        }
    }

    fn flush_partial(&mut self, feed: &Feed) {
        if let Some(line) = self.buffer.take_partial() {
            feed.line(&self.source, line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PathWatcher;
    use crate::merge::{self, Merger, Message};
    use crate::registry::Color;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn split_all(chunks: &[&[u8]]) -> (Vec<String>, Option<String>) {
        let mut buffer = LineBuffer::default();
        let lines = chunks.iter().flat_map(|chunk| buffer.push(chunk)).collect();

        (lines, buffer.take_partial())
    }

    #[test]
    fn test_line_buffer_any_split() {
        let input = b"foo\nbar baz\r\n\nqux\n";
        let expected = vec!["foo", "bar baz", "", "qux"];

        let (whole, partial) = split_all(&[input]);
        assert_eq!(whole, expected);
        assert_eq!(partial, None);

        for at in 0..input.len() {
            let (head, tail) = input.split_at(at);
            let (lines, partial) = split_all(&[head, tail]);
            assert_eq!(lines, expected, "split at {at}");
            assert_eq!(partial, None);
        }

        let bytewise: Vec<&[u8]> = input.chunks(1).collect();
        assert_eq!(split_all(&bytewise).0, expected);
    }

    #[test]
    fn test_line_buffer_holds_partial() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"hel").is_empty());
        assert!(buffer.push(b"lo").is_empty());
        assert_eq!(buffer.push(b" world\nnext"), vec!["hello world"]);
        assert_eq!(buffer.take_partial().as_deref(), Some("next"));
        assert_eq!(buffer.take_partial(), None);
    }

    #[test]
    fn test_line_buffer_lossy_utf8() {
        let mut buffer = LineBuffer::default();
        assert_eq!(buffer.push(b"ok \xff\n"), vec!["ok \u{fffd}"]);
    }

    async fn next_line(merger: &mut Merger) -> String {
        match timeout(WAIT, merger.next_message()).await.unwrap() {
            Some(Message::Line(line)) => line.text().to_string(),
            other => panic!("expected a line, got {other:?}"),
        }
    }

    async fn start(path: &Path) -> (PathWatcher, Merger) {
        let mut watcher = PathWatcher::new().unwrap();
        let (resolved, changes) = watcher.subscribe(path).unwrap();
        let (feed, merger) = merge::channel();

        let source = Source::new(path.display().to_string(), Color::Red);
        tokio::spawn(LineSource::new(source, resolved).run(changes, feed));
        // Let the follower open the file before anything is written.
        tokio::time::sleep(Duration::from_millis(100)).await;

        (watcher, merger)
    }

    #[tokio::test]
    async fn test_skips_existing_content() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("existing.log");
        tokio::fs::write(&path, b"old line\n").await.unwrap();

        let (_watcher, mut merger) = start(&path).await;

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        file.write_all(b"new li").await.unwrap();
        file.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        file.write_all(b"ne\n").await.unwrap();
        file.flush().await.unwrap();

        assert_eq!(next_line(&mut merger).await, "new line");
    }

    #[tokio::test]
    async fn test_follows_truncation() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("truncated.log");
        tokio::fs::write(&path, b"").await.unwrap();

        let (_watcher, mut merger) = start(&path).await;

        tokio::fs::write(&path, b"first line that is long\n")
            .await
            .unwrap();
        assert_eq!(next_line(&mut merger).await, "first line that is long");

        tokio::fs::write(&path, b"short\n").await.unwrap();
        assert_eq!(next_line(&mut merger).await, "short");
    }

    #[tokio::test]
    async fn test_directory_fails_once() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("dir-not-file");
        tokio::fs::create_dir(&path).await.unwrap();

        let mut watcher = PathWatcher::new().unwrap();
        let (_, changes) = watcher.subscribe(tmp_dir.path().join("other.log")).unwrap();
        let (feed, mut merger) = merge::channel();

        // Following a directory is an unrecoverable open error.
        let source = Source::new("dir-not-file", Color::Red);
        tokio::spawn(LineSource::new(source, path).run(changes, feed));

        match timeout(WAIT, merger.next_message()).await.unwrap() {
            Some(Message::Failed(err)) => assert_eq!(err.origin().name(), "dir-not-file"),
            other => panic!("expected a failure, got {other:?}"),
        }
        assert!(timeout(WAIT, merger.next_message()).await.unwrap().is_none());
    }
}
