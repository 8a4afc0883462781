use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use embedded_hal::digital::{ErrorKind as PinErrorKind, ErrorType, InputPin};

use linewatch::line::LineMonitor;

use crate::error::{Error, ErrorKind, Result};

/// A monitored line given as `<id>=<path>`.
///
/// `path` is a value file holding `0` or `1`, as the files exported by the
/// Linux `sysfs` GPIO interface do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSpec {
    /// Line identifier.
    pub id: u8,
    /// Path of the value file.
    pub path: PathBuf,
}

impl FromStr for LineSpec {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let Some((id, path)) = value.split_once('=') else {
            return Err(Error::new(
                ErrorKind::Line,
                format!("`{value}` is not in the `<id>=<path>` form"),
            ));
        };

        let id = id.trim().parse::<u8>().map_err(|e| {
            Error::new(
                ErrorKind::Line,
                format!("Invalid line identifier in `{value}`: {e}"),
            )
        })?;

        let path = path.trim();
        if path.is_empty() {
            return Err(Error::new(
                ErrorKind::Line,
                format!("No value file given for line {id}"),
            ));
        }

        Ok(Self {
            id,
            path: path.into(),
        })
    }
}

/// Errors raised while reading a [`FilePin`].
#[derive(Debug)]
pub enum FilePinError {
    /// The value file cannot be read.
    Io(std::io::Error),
    /// The value file holds something other than a level.
    Invalid(String),
}

impl std::fmt::Display for FilePinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{e}"),
            Self::Invalid(content) => write!(f, "invalid level `{content}`"),
        }
    }
}

impl embedded_hal::digital::Error for FilePinError {
    fn kind(&self) -> PinErrorKind {
        PinErrorKind::Other
    }
}

/// An input line read from a value file.
#[derive(Debug, Clone)]
pub struct FilePin {
    path: PathBuf,
}

impl FilePin {
    /// Creates a [`FilePin`] reading `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ErrorType for FilePin {
    type Error = FilePinError;
}

impl InputPin for FilePin {
    fn is_high(&mut self) -> std::result::Result<bool, Self::Error> {
        let content = fs::read_to_string(&self.path).map_err(FilePinError::Io)?;
        match content.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(FilePinError::Invalid(other.into())),
        }
    }

    fn is_low(&mut self) -> std::result::Result<bool, Self::Error> {
        self.is_high().map(|is_high| !is_high)
    }
}

/// Builds a [`LineMonitor`] over the given lines, in order.
///
/// # Errors
///
/// - Too many lines are given
/// - Two lines share an identifier
pub fn monitor<const N: usize, const M: usize>(
    lines: &[LineSpec],
) -> Result<LineMonitor<FilePin, N, M>> {
    lines.iter().try_fold(LineMonitor::new(), |monitor, line| {
        monitor
            .line(line.id, FilePin::new(&line.path))
            .map_err(Error::from)
    })
}
