//! Typed commands and notifications for the screen recorder.
//!
//! This crate defines the message types exchanged between front ends
//! (CLI, UI) and the session controller, plus the value types they carry.

mod commands;
mod events;
mod state;
mod types;

pub use commands::EngineCommand;
pub use events::EngineEvent;
pub use state::{SessionState, StopReason};
pub use types::{
    CodecInfo, ColorDepth, FileFormat, FormatFamily, ParseDepthError, ParseRectError, Rect,
    RecordingProgress, Status,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (front end → controller).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<EngineCommand>, Receiver<EngineCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates an event channel.
///
/// Notifications are never dropped, so the channel is unbounded; observers
/// are expected to drain it.
pub fn event_channel() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
    crossbeam_channel::unbounded()
}
