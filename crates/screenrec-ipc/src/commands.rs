//! Commands sent from a front end to the session controller.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{ColorDepth, FormatFamily, Rect};

/// Commands that a front end can send to the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineCommand {
    /// Start recording when idle, stop and encode when recording.
    ToggleCapture,

    /// Start recording; ignored unless idle.
    StartCapture,

    /// Stop recording and encode; ignored unless recording.
    StopCapture,

    /// Pause or resume the running capture.
    TogglePause,

    /// Abort recording or encoding, discarding partial data.
    Cancel,

    /// Set the screen region to capture.
    SetCaptureArea(Rect),

    /// Set the target capture rate in frames per second.
    SetFrameRate(u32),

    /// Set the pixel layout of captured frames.
    SetColorDepth(ColorDepth),

    /// Select output family, file format and (optionally) codec by name.
    SetMediaFormat {
        family: FormatFamily,
        file_format: String,
        codec: Option<String>,
    },

    /// Set where the finished recording is written.
    SetOutputPath(PathBuf),

    /// Stop automatically after this many milliseconds (0 = unbounded).
    SetRecordingDuration(u64),

    /// Prefer reading from the direct frame buffer when available.
    SetUseDirectBuffer(bool),

    /// Report whether a direct frame buffer is currently available.
    SetDirectBufferAvailable(bool),

    /// Restore default settings.
    ResetSettings,

    /// Request current session state.
    GetState,

    /// Request the list of output file formats.
    GetFileFormats,

    /// Shut the controller down; refused while busy.
    Shutdown,
}
