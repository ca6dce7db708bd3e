//! Output format selection.

use screenrec_ipc::{CodecInfo, ColorDepth, FileFormat, FormatFamily};

use crate::error::EncoderError;
use crate::EncoderResult;

/// Short name of the format that discards its input.
pub const NULL_FORMAT: &str = "null";

/// Short name of the animated GIF format.
pub const GIF_FORMAT: &str = "gif";

/// Short name of the PNG image sequence format.
pub const PNG_SEQUENCE_FORMAT: &str = "png-sequence";

/// Geometry and rate of the video being encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Pixel layout of the input bitmaps.
    pub depth: ColorDepth,

    /// Nominal frames per second.
    pub frame_rate: u32,
}

impl VideoFormat {
    /// Nominal duration of one frame in 100ns units.
    pub fn frame_duration_100ns(&self) -> u64 {
        10_000_000 / self.frame_rate.max(1) as u64
    }
}

/// What a sink writes before it is moved into place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Nothing is written.
    None,

    /// A single file.
    File,

    /// A directory of files.
    Directory,
}

/// The closed set of sinks, chosen once when the output format is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkKind {
    /// Discard every frame.
    Null,

    /// Animated GIF.
    Gif,

    /// One PNG file per frame inside a directory.
    ImageSequence,

    /// A container produced by a codec backend.
    Container {
        file_format: FileFormat,
        codec: CodecInfo,
    },
}

impl SinkKind {
    /// Pick the sink for a file format and codec.
    ///
    /// Formats handled in-crate ignore `codec`; container formats require one.
    pub fn select(file_format: &FileFormat, codec: Option<&CodecInfo>) -> EncoderResult<Self> {
        match file_format.short_name.as_str() {
            NULL_FORMAT => Ok(Self::Null),
            GIF_FORMAT => Ok(Self::Gif),
            PNG_SEQUENCE_FORMAT => Ok(Self::ImageSequence),
            _ => {
                let codec = codec.ok_or_else(|| EncoderError::NoCodec {
                    file_format: file_format.short_name.clone(),
                    codec: String::new(),
                })?;
                Ok(Self::Container {
                    file_format: file_format.clone(),
                    codec: codec.clone(),
                })
            }
        }
    }

    /// Returns true for formats that need no codec.
    pub fn bypasses_codecs(&self) -> bool {
        !matches!(self, Self::Container { .. })
    }

    /// Shape of the temporary output.
    pub fn output_kind(&self) -> OutputKind {
        match self {
            Self::Null => OutputKind::None,
            Self::ImageSequence => OutputKind::Directory,
            Self::Gif | Self::Container { .. } => OutputKind::File,
        }
    }

    /// Display name.
    pub fn name(&self) -> String {
        match self {
            Self::Null => "Null".into(),
            Self::Gif => "GIF".into(),
            Self::ImageSequence => "PNG sequence".into(),
            Self::Container { file_format, codec } => {
                format!("{} / {}", file_format.pretty_name, codec.pretty_name)
            }
        }
    }
}

/// File formats written without a codec backend.
pub fn special_file_formats() -> Vec<FileFormat> {
    vec![
        FileFormat::new(NULL_FORMAT, "Null (discard)", "", FormatFamily::Misc),
        FileFormat::new(GIF_FORMAT, "Animated GIF", "gif", FormatFamily::Image),
        FileFormat::new(PNG_SEQUENCE_FORMAT, "PNG image sequence", "", FormatFamily::Image),
    ]
}
