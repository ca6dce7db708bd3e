//! Error types for the session controller.

use std::io;

use screenrec_capture::CaptureError;
use screenrec_encoder::EncoderError;
use screenrec_ipc::Status;
use thiserror::Error;

/// Errors reading or writing persisted settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Settings file I/O failed.
    #[error("Settings I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The settings file is not valid JSON.
    #[error("Invalid settings file: {0}")]
    Json(#[from] serde_json::Error),

    /// The platform has no configuration directory.
    #[error("No configuration directory available")]
    NoConfigDir,
}

/// Errors raised by the session controller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// Neither the configured nor any fallback file format exists.
    #[error("No output file formats available")]
    NoFileFormats,
}

impl EngineError {
    /// Status code reported to observers.
    pub fn status(&self) -> Status {
        match self {
            Self::Capture(e) => e.status(),
            Self::Encoder(e) => e.status(),
            Self::Settings(_) => Status::Io,
            Self::NoFileFormats => Status::Encoder,
        }
    }
}
