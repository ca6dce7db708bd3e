//! Notifications sent from the session controller to observers.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::state::{SessionState, StopReason};
use crate::types::{CodecInfo, ColorDepth, FileFormat, Rect, RecordingProgress, Status};

/// Notifications that the controller publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Controller is ready to accept commands.
    Ready,

    /// Session state has changed.
    StateChanged {
        /// Previous state.
        previous: SessionState,

        /// Current state.
        current: SessionState,
    },

    /// Recording has started.
    CaptureStarted,

    /// Recording has ended.
    CaptureStopped {
        /// Why the capture ended.
        reason: StopReason,

        /// Failure status, `Status::Ok` for a clean stop.
        status: Status,
    },

    /// Recording was paused.
    CapturePaused,

    /// Recording was resumed.
    CaptureResumed,

    /// Periodic recording progress.
    RecordingProgress(RecordingProgress),

    /// Encoding has started.
    EncodeStarted {
        /// Number of frames handed to the encoder.
        total_frames: u64,
    },

    /// Encoding progress.
    EncodeProgress {
        /// Frames still to encode.
        remaining: u64,

        /// Frames in the recording.
        total: u64,

        /// Human readable progress line.
        text: String,
    },

    /// Encoding has finished; sent exactly once per encode.
    EncodeFinished {
        /// Outcome of the encode.
        status: Status,

        /// Final output location, if one was written.
        path: Option<PathBuf>,
    },

    /// Capture area changed.
    SourceFrameChanged(Rect),

    /// Output frame changed.
    TargetFrameChanged {
        /// Output rectangle.
        rect: Rect,

        /// Scale from the capture area.
        scale: f32,
    },

    /// Capture frame rate changed.
    FrameRateChanged(u32),

    /// Codecs available for the current file format.
    CodecListUpdated(Vec<CodecInfo>),

    /// Output file format changed.
    MediaFormatChanged {
        /// Display name of the new format.
        name: String,
    },

    /// Output codec changed.
    CodecChanged {
        /// Display name of the new codec.
        name: String,
    },

    /// Capture color depth changed.
    DepthChanged(ColorDepth),

    /// Output path changed.
    OutputPathChanged(PathBuf),

    /// Direct buffer usage changed.
    DirectBufferChanged {
        /// User preference.
        preferred: bool,

        /// Whether a direct buffer is available.
        available: bool,
    },

    /// Requested recording duration changed.
    RecordingDurationChanged(u64),

    /// List of output file formats.
    FileFormats(Vec<FileFormat>),

    /// Settings were restored to defaults.
    SettingsReset,

    /// Shutdown was refused.
    ShutdownRefused {
        /// Why the controller cannot quit.
        reason: String,
    },

    /// Controller has shut down.
    Shutdown,
}
