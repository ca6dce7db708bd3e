//! Session controller for the screen recorder.
//!
//! This crate ties capture and encoding together: the
//! [`SessionController`] state machine, the [`NotificationHub`] observers
//! subscribe to, persisted [`Settings`] and recorded-time accounting.

mod controller;
mod error;
mod hub;
mod settings;
mod stats;

pub use controller::{SessionController, TICK_INTERVAL};
pub use error::{EngineError, SettingsError};
pub use hub::NotificationHub;
pub use settings::{
    JsonSettingsStore, MemorySettingsStore, Settings, SettingsStore, DEFAULT_MAX_RESIDENT_MIB,
    DEFAULT_OUTPUT_NAME,
};
pub use stats::{average_fps, ProgressTimer, RecordClock, PROGRESS_INTERVAL};

use std::sync::Arc;

use screenrec_capture::ScreenSampler;
use screenrec_encoder::CodecBackend;

/// Result type for controller operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type for settings persistence.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Create a shareable controller.
pub fn create_controller(
    settings_store: Arc<dyn SettingsStore>,
    sampler: Arc<dyn ScreenSampler>,
    backend: Arc<dyn CodecBackend>,
) -> EngineResult<Arc<SessionController>> {
    Ok(Arc::new(SessionController::new(settings_store, sampler, backend)?))
}
