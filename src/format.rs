//! Rendering line events into output text.

use owo_colors::{AnsiColors, OwoColorize};

use crate::geometry::TerminalGeometry;
use crate::merge::LineEvent;
use crate::reader::SourceError;
use crate::registry::{Color, Source};

/// How every line is rendered, decided once at startup.
///
/// Monochrome always wins over colors, custom or not. Custom colors only
/// change the palette, never the shape of the output.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FormatMode {
    /// `# <file>: <text>` in the source color.
    Plain,
    /// Same as `Plain`, with a user-supplied palette.
    ColorPlain,
    /// `# <file>: | <text>` in the source color, then a separator line.
    Table,
    /// Same as `Table`, with a user-supplied palette.
    ColorTable,
    /// `# <file>: <text>` without any color.
    Mono,
    /// `# <file>: | <text>` then a separator line, without any color.
    MonoTable,
}

const TABLE: usize = 1;
const CUSTOM_COLORS: usize = 2;
const MONOCHROME: usize = 4;

/// Indexed by the sum of the active flag bits.
const MODES: [FormatMode; 8] = [
    FormatMode::Plain,      // 0
    FormatMode::Table,      // 1
    FormatMode::ColorPlain, // 2
    FormatMode::ColorTable, // 3
    FormatMode::Mono,       // 4
    FormatMode::MonoTable,  // 5
    FormatMode::Mono,       // 6: custom colors are meaningless without color
    FormatMode::MonoTable,  // 7: same
];

impl FormatMode {
    pub fn from_flags(table: bool, custom_colors: bool, monochrome: bool) -> Self {
        let mut bits = 0;
        if table {
            bits |= TABLE;
        }
        if custom_colors {
            bits |= CUSTOM_COLORS;
        }
        if monochrome {
            bits |= MONOCHROME;
        }

        MODES[bits]
    }

    pub fn is_table(self) -> bool {
        matches!(
            self,
            FormatMode::Table | FormatMode::ColorTable | FormatMode::MonoTable
        )
    }

    pub fn is_monochrome(self) -> bool {
        matches!(self, FormatMode::Mono | FormatMode::MonoTable)
    }
}

/// Output for one line event: a single line, or a table row plus separator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Rendered {
    Line(String),
    Table { row: String, separator: String },
}

impl Rendered {
    /// The output lines, without terminators.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        let (first, second) = match self {
            Rendered::Line(line) => (line.as_str(), None),
            Rendered::Table { row, separator } => (row.as_str(), Some(separator.as_str())),
        };

        std::iter::once(first).chain(second)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Formatter {
    mode: FormatMode,
    /// Whether ANSI escapes are emitted at all. Off in monochrome modes.
    styled: bool,
}

impl Formatter {
    pub fn new(mode: FormatMode, styled: bool) -> Self {
        Formatter {
            mode,
            styled: styled && !mode.is_monochrome(),
        }
    }

    pub fn mode(&self) -> FormatMode {
        self.mode
    }

    fn paint(&self, text: &str, color: AnsiColors) -> String {
        if self.styled {
            text.color(color).to_string()
        } else {
            text.to_string()
        }
    }

    pub fn render(&self, event: &LineEvent, geometry: &TerminalGeometry) -> Rendered {
        let prefix = format!("# {}: ", event.source());
        let color = event.color().ansi();

        match self.mode {
            FormatMode::Plain | FormatMode::ColorPlain => Rendered::Line(format!(
                "{}{}",
                self.paint(&prefix, color),
                self.paint(event.text(), AnsiColors::White)
            )),
            FormatMode::Table | FormatMode::ColorTable => Rendered::Table {
                row: format!(
                    "{}{}{}",
                    self.paint(&prefix, color),
                    self.paint("| ", AnsiColors::Green),
                    self.paint(event.text(), AnsiColors::White)
                ),
                separator: self.paint(geometry.separator_line(), AnsiColors::Green),
            },
            FormatMode::Mono => Rendered::Line(format!("{prefix}{}", event.text())),
            FormatMode::MonoTable => Rendered::Table {
                row: format!("{prefix}| {}", event.text()),
                separator: geometry.separator_line().to_string(),
            },
        }
    }

    /// Announces that `source` is being followed.
    pub fn announce(&self, source: &Source) -> String {
        format!(
            "{}{}",
            self.paint("Setting up listener for: ", source.color().ansi()),
            source.name()
        )
    }

    /// An informational notice for the terminal, in bright blue.
    pub fn info(&self, text: &str) -> String {
        self.paint(text, AnsiColors::BrightBlue)
    }

    /// Reports a source that stopped.
    pub fn error(&self, err: &SourceError) -> String {
        format!("{} {err}", self.paint("Error:", Color::Red.ansi()))
    }
}
