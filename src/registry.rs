//! Sources, their colors, and starting a follower for each of them.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use owo_colors::AnsiColors;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::events::PathWatcher;
use crate::merge::Feed;
use crate::reader::{LineSource, SourceError};

/// A display color for a source.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    Gray,
    BrightRed,
    BrightGreen,
    BrightYellow,
    BrightBlue,
    BrightMagenta,
    BrightCyan,
    BrightWhite,
}

impl Color {
    pub(crate) fn ansi(self) -> AnsiColors {
        match self {
            Color::Black => AnsiColors::Black,
            Color::Red => AnsiColors::Red,
            Color::Green => AnsiColors::Green,
            Color::Yellow => AnsiColors::Yellow,
            Color::Blue => AnsiColors::Blue,
            Color::Magenta => AnsiColors::Magenta,
            Color::Cyan => AnsiColors::Cyan,
            Color::White => AnsiColors::White,
            Color::Gray => AnsiColors::BrightBlack,
            Color::BrightRed => AnsiColors::BrightRed,
            Color::BrightGreen => AnsiColors::BrightGreen,
            Color::BrightYellow => AnsiColors::BrightYellow,
            Color::BrightBlue => AnsiColors::BrightBlue,
            Color::BrightMagenta => AnsiColors::BrightMagenta,
            Color::BrightCyan => AnsiColors::BrightCyan,
            Color::BrightWhite => AnsiColors::BrightWhite,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown color {0:?}")]
pub struct ColorError(pub String);

impl FromStr for Color {
    type Err = ColorError;

    /// Accepts plain names (`red`) and bright variants spelled `redBright`,
    /// `bright-red` or `bright_red`, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_' && !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();

        let (base, bright) = if let Some(base) = name.strip_suffix("bright") {
            (base, true)
        } else if let Some(base) = name.strip_prefix("bright") {
            (base, true)
        } else {
            (name.as_str(), false)
        };

        let color = match (base, bright) {
            ("black", false) => Color::Black,
            ("red", false) => Color::Red,
            ("green", false) => Color::Green,
            ("yellow", false) => Color::Yellow,
            ("blue", false) => Color::Blue,
            ("magenta", false) => Color::Magenta,
            ("cyan", false) => Color::Cyan,
            ("white", false) => Color::White,
            ("gray" | "grey", false) | ("black", true) => Color::Gray,
            ("red", true) => Color::BrightRed,
            ("green", true) => Color::BrightGreen,
            ("yellow", true) => Color::BrightYellow,
            ("blue", true) => Color::BrightBlue,
            ("magenta", true) => Color::BrightMagenta,
            ("cyan", true) => Color::BrightCyan,
            ("white", true) => Color::BrightWhite,
            _ => return Err(ColorError(s.to_string())),
        };

        Ok(color)
    }
}

/// Ordered list of colors handed out round-robin to sources.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Palette {
    colors: Vec<Color>,
}

impl Palette {
    /// Builds a palette from an explicit, non-empty list of colors.
    pub fn new(colors: Vec<Color>) -> Option<Self> {
        if colors.is_empty() {
            None
        } else {
            Some(Palette { colors })
        }
    }

    /// Parses a comma-separated list such as `red,green,blueBright`.
    pub fn parse_list(list: &str) -> Result<Self, ColorError> {
        let colors = list
            .split(',')
            .map(str::parse)
            .collect::<Result<Vec<Color>, _>>()?;

        Palette::new(colors).ok_or_else(|| ColorError(list.to_string()))
    }

    /// Color for the source registered at `index`.
    pub fn color_for(&self, index: usize) -> Color {
        self.colors[index % self.colors.len()]
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

impl Default for Palette {
    fn default() -> Self {
        Palette {
            colors: vec![
                Color::Red,
                Color::Green,
                Color::Blue,
                Color::Yellow,
                Color::Magenta,
                Color::Cyan,
            ],
        }
    }
}

/// One followed file: the name it was given as, and its display color.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Source {
    name: String,
    color: Color,
}

impl Source {
    pub fn new(name: impl Into<String>, color: Color) -> Self {
        Source {
            name: name.into(),
            color,
        }
    }

    /// The file name as configured, used in rendered output.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> Color {
        self.color
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Owns every [`Source`] and the [`LineSource`] task following it.
#[derive(Debug)]
pub struct SourceRegistry {
    palette: Palette,
    sources: Vec<Source>,
    watcher: Option<PathWatcher>,
    tasks: Vec<JoinHandle<()>>,
    started: usize,
}

impl SourceRegistry {
    pub fn new(palette: Palette) -> Self {
        SourceRegistry {
            palette,
            sources: Vec::new(),
            watcher: None,
            tasks: Vec::new(),
            started: 0,
        }
    }

    /// Registers `paths` in order, coloring each by its position in the list.
    ///
    /// A path listed more than once is only followed once, at its first
    /// position, but takes the color of its last position.
    pub fn register<I, P>(&mut self, paths: I) -> &[Source]
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let mut seen: HashMap<String, usize> = self
            .sources
            .iter()
            .enumerate()
            .map(|(pos, source)| (source.name.clone(), pos))
            .collect();
        let offset = self.sources.len();

        for (idx, path) in paths.into_iter().enumerate() {
            let name = path.as_ref();
            let color = self.palette.color_for(offset + idx);
            if let Some(&pos) = seen.get(name) {
                tracing::debug!(file = name, "duplicate file, following it once");
                // Only sources that are not running yet can still be recolored.
                if pos >= self.started {
                    self.sources[pos].color = color;
                }
                continue;
            }
            seen.insert(name.to_string(), self.sources.len());
            self.sources.push(Source::new(name, color));
        }

        &self.sources
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Starts following every registered source that is not running yet.
    ///
    /// A source that cannot even be watched is reported through `feed` and
    /// skipped; the rest keep going. Only failing to create the watcher
    /// itself is an error.
    pub fn start_all(&mut self, feed: &Feed) -> io::Result<()> {
        let mut watcher = match self.watcher.take() {
            Some(watcher) => watcher,
            None => PathWatcher::new()?,
        };

        for source in &self.sources[self.started..] {
            match watcher.subscribe(PathBuf::from(source.name())) {
                Ok((path, changes)) => {
                    tracing::debug!(file = source.name(), path = %path.display(), "starting follower");
                    let follower = LineSource::new(source.clone(), path);
                    self.tasks.push(tokio::spawn(follower.run(changes, feed.clone())));
                }
                Err(err) => feed.fail(SourceError::new(source.clone(), err.into())),
            }
        }

        self.started = self.sources.len();
        self.watcher = Some(watcher);

        Ok(())
    }

    /// Stops every follower. Lines already delivered stay delivered.
    pub fn stop_all(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.watcher = None;
    }
}

impl Drop for SourceRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}
