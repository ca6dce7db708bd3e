//! Session state machine types.

use serde::{Deserialize, Serialize};

/// The current state of a recording session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Nothing is being recorded or encoded.
    #[default]
    Idle,

    /// Frames are being captured.
    Recording,

    /// Capture is suspended; a sub-state of recording.
    Paused,

    /// Captured frames are being encoded.
    Encoding,
}

impl SessionState {
    /// Returns true if the session is idle.
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns a simple string representation of the state.
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Recording => "Recording",
            Self::Paused => "Paused",
            Self::Encoding => "Encoding",
        }
    }
}

/// Reason a capture ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// User requested stop.
    UserRequested,

    /// The requested recording duration elapsed.
    DurationElapsed,

    /// The capture was cancelled and its frames discarded.
    Cancelled,

    /// Sampling or buffering failed.
    CaptureFailed,

    /// The capture thread could not be started.
    StartFailed,
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(self) -> &'static str {
        match self {
            Self::UserRequested => "Recording stopped by user",
            Self::DurationElapsed => "Recording duration elapsed",
            Self::Cancelled => "Recording cancelled",
            Self::CaptureFailed => "Capture failed",
            Self::StartFailed => "Capture could not be started",
        }
    }
}
