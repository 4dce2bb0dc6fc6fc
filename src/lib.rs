//! A library for following several growing (namely log) files and
//! multiplexing them into one annotated, colored output stream.
//!
//! Each file is followed across truncation and rotation, every line is tagged
//! with the file it came from and a color picked round-robin from a palette,
//! and the result is written to stdout or to an output file that is recreated
//! if it gets deleted while in use.
//!
//! ## Example
//!
//! ```no_run
//! use splex::{merge, FormatMode, Formatter, Message, Palette, Sink, SourceRegistry, TerminalGeometry};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let (feed, mut merger) = merge::channel();
//!
//!     // Register some files to be followed, whether they currently exist or not.
//!     let mut registry = SourceRegistry::new(Palette::default());
//!     registry.register(["some/file.log", "/some/other/file.log"]);
//!     registry.start_all(&feed)?;
//!     drop(feed);
//!
//!     let formatter = Formatter::new(FormatMode::Plain, true);
//!     let geometry = TerminalGeometry::detect();
//!     let mut sink = Sink::stdout();
//!
//!     while let Some(Message::Line(line)) = merger.next_message().await {
//!         for text in formatter.render(&line, &geometry).lines() {
//!             sink.write(text).await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Caveats
//!
//! A file that does not exist yet can be followed, but its parent directory
//! must exist so that a directory watch can be registered with `notify`.
//! Lines of different files come out in the order their changes were noticed;
//! there is no ordering across files beyond that.

pub mod config;
pub mod events;
pub mod format;
pub mod geometry;
pub mod merge;
mod reader;
pub mod registry;
pub mod sink;

pub use events::{Change, PathEvents, PathWatcher};
pub use format::{FormatMode, Formatter, Rendered};
pub use geometry::{GeometryTracker, TerminalGeometry};
pub use merge::{Feed, LineEvent, Merger, Message};
pub use reader::{LineSource, SourceError};
pub use registry::{Color, Palette, Source, SourceRegistry};
pub use sink::Sink;

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
