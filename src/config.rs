//! Command line flags and the per-directory `.splexrc.json` file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use crate::format::FormatMode;
use crate::registry::{ColorError, Palette};

pub const DEFAULT_RC_FILE: &str = ".splexrc.json";

const AFTER_HELP: &str = "\
Config file:
  A per-directory .splexrc.json file can list the files to follow:

    {
      \"files\": [
        \"logs/log-0.log\",
        \"logs/log-1.log\"
      ]
    }

  If it exists, splex can be run without listing any files.";

#[derive(Debug, Parser)]
#[command(
    name = "splex",
    version,
    about = "Follow several log files as one colored stream",
    after_help = AFTER_HELP
)]
pub struct Args {
    /// Files to follow
    pub files: Vec<String>,

    /// Config file read when no files are given
    #[arg(short, long, default_value = DEFAULT_RC_FILE)]
    pub file: PathBuf,

    /// Print as table rows
    #[arg(short, long)]
    pub table: bool,

    /// Custom colors, as: -c color1,color2
    #[arg(short, long)]
    pub colors: Option<String>,

    /// Monochrome mode
    #[arg(short, long)]
    pub monochrome: bool,

    /// Force color support (0: none, 1: 16, 2: 256, 3: 16m)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub level: Option<u8>,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No files specified.")]
    NoFiles,
    #[error("failed to read {path}: {source}")]
    RcRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    RcParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Color(#[from] ColorError),
}

#[derive(Debug, Deserialize)]
struct RcFile {
    #[serde(default)]
    files: Vec<String>,
}

/// Where the list of files came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FileOrigin {
    Args,
    RcFile(PathBuf),
}

/// Everything the core needs, resolved from [`Args`].
#[derive(Clone, Debug)]
pub struct Config {
    pub files: Vec<String>,
    pub origin: FileOrigin,
    pub mode: FormatMode,
    pub palette: Palette,
    pub level: Option<u8>,
    pub output: Option<PathBuf>,
}

impl Config {
    pub fn resolve(args: Args) -> Result<Self, ConfigError> {
        let (files, origin) = if args.files.is_empty() {
            (load_rc_file(&args.file)?, FileOrigin::RcFile(args.file))
        } else {
            (args.files, FileOrigin::Args)
        };

        if files.is_empty() {
            return Err(ConfigError::NoFiles);
        }

        // An empty list counts as not given at all.
        let colors = args.colors.filter(|colors| !colors.is_empty());
        let palette = match &colors {
            Some(colors) => Palette::parse_list(colors)?,
            None => Palette::default(),
        };

        Ok(Config {
            files,
            origin,
            mode: FormatMode::from_flags(args.table, colors.is_some(), args.monochrome),
            palette,
            level: args.level,
            output: args.output,
        })
    }

    /// Whether to emit ANSI escapes. Without an explicit level, only when
    /// writing to a terminal.
    pub fn styled(&self, stdout_is_terminal: bool) -> bool {
        match self.level {
            Some(level) => level > 0,
            None => self.output.is_none() && stdout_is_terminal,
        }
    }
}

/// Reads the list of files out of `path`. A missing file yields an empty
/// list.
pub fn load_rc_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ConfigError::RcRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let rc: RcFile = serde_json::from_slice(&raw).map_err(|source| ConfigError::RcParse {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(rc.files)
}
