//! Codec backends for container formats.

use std::path::Path;

use screenrec_ipc::{CodecInfo, FileFormat, FormatFamily};

use crate::error::EncoderError;
use crate::format::{special_file_formats, SinkKind, VideoFormat};
use crate::gif_sink::GifSink;
use crate::sequence::ImageSequenceSink;
use crate::sink::{FrameSink, NullSink};
use crate::y4m::Y4mSink;
use crate::EncoderResult;

/// Short name of the built-in raw video container.
pub const Y4M_FORMAT: &str = "y4m";

/// Short name of the built-in raw video codec.
pub const RAW_I420_CODEC: &str = "raw-i420";

/// A provider of container formats and codecs.
pub trait CodecBackend: Send + Sync {
    /// Container formats this backend can write.
    fn file_formats(&self) -> Vec<FileFormat>;

    /// Codecs usable with `file_format` for the given input format.
    fn codecs_for(&self, file_format: &FileFormat, format: &VideoFormat) -> Vec<CodecInfo>;

    /// Open a sink writing `file_format`/`codec` to `path`.
    fn open_sink(
        &self,
        file_format: &FileFormat,
        codec: &CodecInfo,
        format: VideoFormat,
        path: &Path,
    ) -> EncoderResult<Box<dyn FrameSink>>;

    /// Backend name for diagnostics.
    fn name(&self) -> &str;
}

/// The backend shipped with the crate: uncompressed YUV4MPEG2.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinBackend;

impl BuiltinBackend {
    pub fn new() -> Self {
        Self
    }

    fn y4m() -> FileFormat {
        FileFormat::new(Y4M_FORMAT, "YUV4MPEG2 raw video", "y4m", FormatFamily::Raw)
    }

    fn raw_i420() -> CodecInfo {
        CodecInfo::new(RAW_I420_CODEC, "Raw I420 (uncompressed)")
    }
}

impl CodecBackend for BuiltinBackend {
    fn file_formats(&self) -> Vec<FileFormat> {
        vec![Self::y4m()]
    }

    fn codecs_for(&self, file_format: &FileFormat, _format: &VideoFormat) -> Vec<CodecInfo> {
        if file_format.short_name == Y4M_FORMAT {
            vec![Self::raw_i420()]
        } else {
            Vec::new()
        }
    }

    fn open_sink(
        &self,
        file_format: &FileFormat,
        codec: &CodecInfo,
        format: VideoFormat,
        path: &Path,
    ) -> EncoderResult<Box<dyn FrameSink>> {
        if file_format.short_name != Y4M_FORMAT {
            return Err(EncoderError::UnsupportedFormat(file_format.short_name.clone()));
        }
        if codec.short_name != RAW_I420_CODEC {
            return Err(EncoderError::NoCodec {
                file_format: file_format.short_name.clone(),
                codec: codec.short_name.clone(),
            });
        }
        Ok(Box::new(Y4mSink::create(path, format)?))
    }

    fn name(&self) -> &str {
        "builtin"
    }
}

/// Every selectable file format: the in-crate ones followed by the backend's.
pub fn all_file_formats(backend: &dyn CodecBackend) -> Vec<FileFormat> {
    let mut formats = special_file_formats();
    formats.extend(backend.file_formats());
    formats
}

/// Open the sink for `kind`, writing to `output` when the kind has an output.
pub fn open_sink(
    kind: &SinkKind,
    backend: &dyn CodecBackend,
    format: VideoFormat,
    output: Option<&Path>,
) -> EncoderResult<Box<dyn FrameSink>> {
    let require_output = || {
        output.ok_or_else(|| {
            EncoderError::InvalidInput(format!("{} needs an output path", kind.name()))
        })
    };

    match kind {
        SinkKind::Null => Ok(Box::new(NullSink::new())),
        SinkKind::Gif => Ok(Box::new(GifSink::create(require_output()?, format)?)),
        SinkKind::ImageSequence => Ok(Box::new(ImageSequenceSink::new(require_output()?, format))),
        SinkKind::Container { file_format, codec } => {
            backend.open_sink(file_format, codec, format, require_output()?)
        }
    }
}
