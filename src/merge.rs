//! Fan-in of every follower's output into a single ordered stream.
//!
//! Followers push into a shared queue through their own [`Feed`] handle, and
//! one consumer drains it through the [`Merger`]. Events come out in the order
//! they were pushed; nothing orders lines of different files against each
//! other.

use std::pin::Pin;
use std::task;

use futures_util::stream::Stream as FuturesStream;
use tokio::sync::mpsc;

use crate::reader::SourceError;
use crate::registry::{Color, Source};

/// A single line read from a source, tagged with where it came from.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct LineEvent {
    source: String,
    color: Color,
    text: String,
}

impl LineEvent {
    pub fn new(source: &Source, text: impl Into<String>) -> Self {
        LineEvent {
            source: source.name().to_string(),
            color: source.color(),
            text: text.into(),
        }
    }

    /// The name of the file the line was read from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn color(&self) -> Color {
        self.color
    }

    /// The line, without its terminator.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the internal components that make up a `LineEvent`.
    #[doc(hidden)]
    pub fn into_inner(self) -> (String, Color, String) {
        let LineEvent {
            source,
            color,
            text,
        } = self;

        (source, color, text)
    }
}

/// Everything a follower can report.
#[derive(Debug)]
pub enum Message {
    Line(LineEvent),
    /// The source stopped for good. Sent at most once per source.
    Failed(SourceError),
}

/// Producer half, cloned into every follower.
#[derive(Clone, Debug)]
pub struct Feed {
    tx: mpsc::UnboundedSender<Message>,
}

impl Feed {
    pub fn line(&self, source: &Source, text: impl Into<String>) {
        // The consumer going away means shutdown, nothing left to deliver to.
        let _ = self.tx.send(Message::Line(LineEvent::new(source, text)));
    }

    pub fn fail(&self, err: SourceError) {
        let _ = self.tx.send(Message::Failed(err));
    }

    /// Returns `true` once the [`Merger`] has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half. Yields `None` once every [`Feed`] has been dropped.
#[derive(Debug)]
pub struct Merger {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Merger {
    pub async fn next_message(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl FuturesStream for Merger {
    type Item = Message;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Creates a connected [`Feed`] / [`Merger`] pair.
pub fn channel() -> (Feed, Merger) {
    let (tx, rx) = mpsc::unbounded_channel();

    (Feed { tx }, Merger { rx })
}
