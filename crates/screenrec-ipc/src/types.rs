//! Common types used across commands and notifications.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A screen rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: i32,

    /// Top edge.
    pub y: i32,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    /// Create a new rectangle.
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns true if the rectangle covers at least one pixel.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Returns the same rectangle moved so its origin is at `(x, y)`.
    pub fn offset_to(self, x: i32, y: i32) -> Self {
        Self { x, y, ..self }
    }

}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}x{}", self.x, self.y, self.width, self.height)
    }
}

/// Error returned when parsing a [`Rect`] from text.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid rectangle '{0}', expected X,Y,WIDTHxHEIGHT")]
pub struct ParseRectError(String);

impl FromStr for Rect {
    type Err = ParseRectError;

    /// Parses `X,Y,WIDTHxHEIGHT`, e.g. `0,0,1280x720`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseRectError(s.to_string());

        let mut parts = s.splitn(3, ',');
        let x = parts.next().ok_or_else(err)?.trim().parse().map_err(|_| err())?;
        let y = parts.next().ok_or_else(err)?.trim().parse().map_err(|_| err())?;
        let (w, h) = parts.next().ok_or_else(err)?.split_once('x').ok_or_else(err)?;
        let width = w.trim().parse().map_err(|_| err())?;
        let height = h.trim().parse().map_err(|_| err())?;

        let rect = Rect::new(x, y, width, height);
        if !rect.is_valid() {
            return Err(err());
        }
        Ok(rect)
    }
}

/// Pixel layout of captured bitmaps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorDepth {
    /// 32-bit BGRA, the native screen layout.
    #[default]
    Bgra32,

    /// 24-bit packed RGB.
    Rgb24,

    /// 16-bit RGB565.
    Rgb16,

    /// 8-bit greyscale.
    Gray8,
}

impl ColorDepth {
    /// Bytes used by one pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgra32 => 4,
            Self::Rgb24 => 3,
            Self::Rgb16 => 2,
            Self::Gray8 => 1,
        }
    }

    /// Stable identifier used on disk and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bgra32 => "bgra32",
            Self::Rgb24 => "rgb24",
            Self::Rgb16 => "rgb16",
            Self::Gray8 => "gray8",
        }
    }

    /// Compact tag for binary serialization.
    pub fn tag(self) -> u8 {
        match self {
            Self::Bgra32 => 0,
            Self::Rgb24 => 1,
            Self::Rgb16 => 2,
            Self::Gray8 => 3,
        }
    }

    /// Inverse of [`ColorDepth::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Bgra32),
            1 => Some(Self::Rgb24),
            2 => Some(Self::Rgb16),
            3 => Some(Self::Gray8),
            _ => None,
        }
    }
}

/// Error returned when parsing a [`ColorDepth`] from text.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown color depth '{0}'")]
pub struct ParseDepthError(String);

impl FromStr for ColorDepth {
    type Err = ParseDepthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bgra32" | "32" => Ok(Self::Bgra32),
            "rgb24" | "24" => Ok(Self::Rgb24),
            "rgb16" | "16" => Ok(Self::Rgb16),
            "gray8" | "8" => Ok(Self::Gray8),
            _ => Err(ParseDepthError(s.to_string())),
        }
    }
}

/// Outcome of a capture or encode, reported in notifications.
///
/// Values map onto OS-style status codes through [`Status::raw`] so that
/// callers can branch on a small documented set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Completed successfully.
    Ok,

    /// Aborted on request.
    Cancelled,

    /// An I/O operation failed.
    Io,

    /// Memory for another frame could not be allocated.
    NoMemory,

    /// A recording ended without any frame to encode.
    NoFrames,

    /// A unique temporary path could not be created.
    TempFile,

    /// The codec backend or a sink failed.
    Encoder,

    /// The screen sampler failed with a raw status code.
    Sampling { code: i32 },
}

impl Status {
    /// Returns true for [`Status::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Raw status code. Zero means success, negative values are errno-style.
    pub fn raw(&self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Cancelled => -125, // ECANCELED
            Self::Io => -5,          // EIO
            Self::NoMemory => -12,   // ENOMEM
            Self::NoFrames => -61,   // ENODATA
            Self::TempFile => -17,   // EEXIST
            Self::Encoder => -71,    // EPROTO
            Self::Sampling { code } => *code,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Io => write!(f, "I/O error"),
            Self::NoMemory => write!(f, "out of memory"),
            Self::NoFrames => write!(f, "no frames captured"),
            Self::TempFile => write!(f, "temporary file could not be created"),
            Self::Encoder => write!(f, "encoder failure"),
            Self::Sampling { code } => write!(f, "screen sampling failed ({code})"),
        }
    }
}

/// Broad grouping of output file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatFamily {
    /// Formats with no real container (discard output).
    Misc,

    /// Still-image based output (GIF, image sequences).
    Image,

    /// Raw, uncompressed video streams.
    Raw,

    /// QuickTime / MP4 style containers.
    QuickTime,

    /// Matroska / WebM containers.
    Matroska,

    /// AVI containers.
    Avi,
}

/// An output file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFormat {
    /// Short identifier (e.g. "y4m").
    pub short_name: String,

    /// Display name for the UI.
    pub pretty_name: String,

    /// File extension without the dot (empty for file-less formats).
    pub extension: String,

    /// Family this format belongs to.
    pub family: FormatFamily,
}

impl FileFormat {
    /// Create a new file format description.
    pub fn new(
        short_name: impl Into<String>,
        pretty_name: impl Into<String>,
        extension: impl Into<String>,
        family: FormatFamily,
    ) -> Self {
        Self {
            short_name: short_name.into(),
            pretty_name: pretty_name.into(),
            extension: extension.into(),
            family,
        }
    }

    /// Returns true if `name` matches either the short or the pretty name.
    pub fn matches(&self, name: &str) -> bool {
        self.short_name.eq_ignore_ascii_case(name) || self.pretty_name.eq_ignore_ascii_case(name)
    }
}

/// A video codec offered by a codec backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecInfo {
    /// Short identifier (e.g. "raw-i420").
    pub short_name: String,

    /// Display name for the UI.
    pub pretty_name: String,
}

impl CodecInfo {
    /// Create a new codec description.
    pub fn new(short_name: impl Into<String>, pretty_name: impl Into<String>) -> Self {
        Self {
            short_name: short_name.into(),
            pretty_name: pretty_name.into(),
        }
    }

    /// Returns true if `name` matches either the short or the pretty name.
    pub fn matches(&self, name: &str) -> bool {
        self.short_name.eq_ignore_ascii_case(name) || self.pretty_name.eq_ignore_ascii_case(name)
    }
}

/// Live recording progress, reported periodically while capturing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingProgress {
    /// Frames captured so far.
    pub frames: u64,

    /// Recorded time in milliseconds, excluding pauses.
    pub elapsed_ms: u64,

    /// Average capture rate since the session started.
    pub average_fps: f32,

    /// Target capture rate.
    pub target_fps: u32,
}
