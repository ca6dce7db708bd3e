//! Encoding of finished recordings.
//!
//! This crate turns a frozen recording into an output file. Output formats
//! form a closed set of [`SinkKind`]s: the null sink, animated GIF and PNG
//! image sequences are written in-crate, container formats are delegated to
//! a [`CodecBackend`]. [`EncodeHandoff`] runs the encode on its own thread and
//! moves the result to a non-clobbering destination.

mod backend;
mod error;
mod format;
mod gif_sink;
mod handoff;
mod output;
mod sequence;
mod sink;
mod y4m;

pub use backend::{
    all_file_formats, open_sink, BuiltinBackend, CodecBackend, RAW_I420_CODEC, Y4M_FORMAT,
};
pub use error::EncoderError;
pub use format::{
    special_file_formats, OutputKind, SinkKind, VideoFormat, GIF_FORMAT, NULL_FORMAT,
    PNG_SEQUENCE_FORMAT,
};
pub use gif_sink::GifSink;
pub use handoff::{EncodeHandoff, EncodeJob, EncodeReport};
pub use output::{candidate_path, TempOutput, TEMP_PREFIX};
pub use sequence::ImageSequenceSink;
pub use sink::{FrameSink, NullSink};
pub use y4m::{rgba_to_i420, Y4mSink};

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;
