//! Error types for the capture module.

use std::io;
use std::path::PathBuf;

use screenrec_ipc::{Rect, Status};
use thiserror::Error;

/// Errors that can occur while sampling or buffering frames.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The screen sampler failed.
    #[error("Screen sampling failed ({code}): {message}")]
    Sampling { code: i32, message: String },

    /// The capture region is empty or outside the screen.
    #[error("Invalid capture region: {0}")]
    InvalidRegion(Rect),

    /// Bitmap data does not match its declared dimensions.
    #[error("Bitmap size mismatch: expected {expected} bytes, got {actual}")]
    BitmapSize { expected: usize, actual: usize },

    /// The frame store could not grow.
    #[error("Out of memory while storing frame")]
    OutOfMemory,

    /// The scratch directory could not be created.
    #[error("Failed to create scratch directory: {0}")]
    Scratch(#[source] io::Error),

    /// Writing a frame to disk failed.
    #[error("Failed to spill frame to {path:?}: {source}")]
    Spill {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading a spilled frame back failed.
    #[error("Failed to load frame from {path:?}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A spilled frame file is not in the expected format.
    #[error("Corrupt frame file {path:?}: {reason}")]
    CorruptFrame { path: PathBuf, reason: String },

    /// The capture thread could not be started.
    #[error("Failed to spawn capture thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// The capture thread panicked.
    #[error("Capture thread panicked")]
    ThreadPanicked,
}

impl CaptureError {
    /// Build a sampling error from a raw status code.
    pub fn sampling(code: i32, message: impl Into<String>) -> Self {
        Self::Sampling {
            code,
            message: message.into(),
        }
    }

    /// Returns true for failures of the frame store itself.
    ///
    /// A store failure discards everything captured so far.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Self::OutOfMemory | Self::Scratch(_) | Self::Spill { .. }
        )
    }

    /// Status code reported to observers.
    pub fn status(&self) -> Status {
        match self {
            Self::Sampling { code, .. } => Status::Sampling { code: *code },
            Self::InvalidRegion(_) => Status::Sampling { code: -22 }, // EINVAL
            Self::BitmapSize { .. } | Self::CorruptFrame { .. } => Status::Io,
            Self::OutOfMemory => Status::NoMemory,
            Self::Scratch(_) => Status::TempFile,
            Self::Spill { .. } | Self::Load { .. } => Status::Io,
            Self::ThreadSpawn(_) => Status::NoMemory,
            Self::ThreadPanicked => Status::Io,
        }
    }
}
