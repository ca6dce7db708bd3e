//! Error types for the encoder module.

use std::io;
use std::path::PathBuf;

use screenrec_capture::CaptureError;
use screenrec_ipc::Status;
use thiserror::Error;

/// Errors that can occur during encoding operations.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// A unique temporary output could not be created.
    #[error("Failed to create temporary output: {0}")]
    TempFile(#[source] io::Error),

    /// Writing encoded data failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// PNG encoding failed.
    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    /// GIF encoding failed.
    #[error("GIF encoding failed: {0}")]
    Gif(#[from] gif::EncodingError),

    /// A frame could not be read back from the store.
    #[error("Failed to read frame: {0}")]
    Frame(#[from] CaptureError),

    /// Invalid input data.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),

    /// The requested file format is not offered by the backend.
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// The requested codec is not offered for the file format.
    #[error("No codec '{codec}' for file format '{file_format}'")]
    NoCodec { file_format: String, codec: String },

    /// Moving the finished output into place failed.
    #[error("Failed to move output to {path:?}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The recording holds no frame.
    #[error("No frames to encode")]
    NoFrames,

    /// The codec backend reported a failure.
    #[error("Codec backend error: {0}")]
    Backend(String),

    /// The encode thread could not be started.
    #[error("Failed to spawn encode thread: {0}")]
    ThreadSpawn(#[source] io::Error),
}

impl EncoderError {
    /// Status code reported to observers.
    pub fn status(&self) -> Status {
        match self {
            Self::TempFile(_) => Status::TempFile,
            Self::Io(_) | Self::Output { .. } => Status::Io,
            Self::Frame(e) => e.status(),
            Self::NoFrames => Status::NoFrames,
            Self::ThreadSpawn(_) => Status::NoMemory,
            Self::Image(_)
            | Self::Gif(_)
            | Self::InvalidInput(_)
            | Self::UnsupportedFormat(_)
            | Self::NoCodec { .. }
            | Self::Backend(_) => Status::Encoder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let temp = EncoderError::TempFile(io::Error::new(io::ErrorKind::AlreadyExists, "taken"));
        assert_eq!(temp.status(), Status::TempFile);
        assert_eq!(EncoderError::NoFrames.status().raw(), Status::NoFrames.raw());
        assert_eq!(
            EncoderError::Frame(CaptureError::OutOfMemory).status(),
            Status::NoMemory
        );
        assert_eq!(
            EncoderError::Backend("boom".into()).status(),
            Status::Encoder
        );
    }
}
