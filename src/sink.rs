//! Where rendered output ends up.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter, Stdout};

use crate::events::{Change, PathEvents, PathWatcher};

/// The output target: standard output, or an append-only file that is
/// recreated if it gets deleted while in use.
pub enum Sink {
    Stdout(Stdout),
    File(FileSink),
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match self {
            Sink::Stdout(_) => write!(f, "Stdout"),
            Sink::File(file) => write!(f, "File({})", file.path.display()),
        }
    }
}

impl Sink {
    pub fn stdout() -> Self {
        Sink::Stdout(tokio::io::stdout())
    }

    /// Opens `path` for appending, creating it if needed, and starts watching
    /// it for deletion.
    pub async fn file(path: impl Into<PathBuf>) -> io::Result<Self> {
        FileSink::open(path.into()).await.map(Sink::File)
    }

    /// Appends `text` and a line terminator.
    pub async fn write(&mut self, text: &str) -> io::Result<()> {
        match self {
            Sink::Stdout(stdout) => {
                let mut line = String::with_capacity(text.len() + 1);
                line.push_str(text);
                line.push('\n');
                stdout.write_all(line.as_bytes()).await?;
                stdout.flush().await
            }
            Sink::File(file) => file.write(text).await,
        }
    }

    /// Waits for the next change to the output file. Never completes for
    /// standard output.
    ///
    /// Cancel safe, so it can sit in a `select!` next to other work; pass
    /// whatever it returns to [`Sink::handle_change`].
    pub async fn next_change(&mut self) -> Change {
        match self {
            Sink::File(file) => match file.changes.next_change().await {
                Some(change) => change,
                None => std::future::pending().await,
            },
            Sink::Stdout(_) => std::future::pending().await,
        }
    }

    pub async fn handle_change(&mut self, change: Change) -> io::Result<()> {
        match self {
            Sink::File(file) => file.handle_change(change).await,
            Sink::Stdout(_) => Ok(()),
        }
    }

    /// Flushes and closes the target. Nothing written before is lost.
    pub async fn close(self) -> io::Result<()> {
        match self {
            Sink::Stdout(mut stdout) => stdout.flush().await,
            Sink::File(file) => file.close().await,
        }
    }
}

pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    changes: PathEvents,
    /// Kept alive for `changes`.
    _watcher: PathWatcher,
}

impl FileSink {
    async fn open(path: PathBuf) -> io::Result<Self> {
        let mut watcher = PathWatcher::new()?;
        let (path, changes) = watcher.subscribe(path)?;
        let writer = open_append(&path).await?;

        Ok(FileSink {
            path,
            writer,
            changes,
            _watcher: watcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&mut self, text: &str) -> io::Result<()> {
        // Pick up a deletion that was reported but not handled yet.
        while let Some(change) = self.changes.try_change() {
            self.handle_change(change).await?;
        }

        self.writer.write_all(text.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    async fn handle_change(&mut self, change: Change) -> io::Result<()> {
        if !matches!(change, Change::Removed | Change::Other) {
            return Ok(());
        }
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }

        tracing::info!(path = %self.path.display(), "output file deleted, reopening");

        let fresh = open_append(&self.path).await?;
        let mut stale = std::mem::replace(&mut self.writer, fresh);
        stale.shutdown().await
    }

    async fn close(mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

async fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    Ok(BufWriter::new(file))
}
