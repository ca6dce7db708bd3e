//! Screen sampling and frame buffering.
//!
//! This crate provides the capture side of the recorder: the bitmaps and
//! timestamps captured from the screen, the [`FrameStore`] that buffers them
//! (spilling to disk when asked), and the [`CaptureLoop`] that fills a store
//! at a fixed rate on its own thread.

mod capture_loop;
mod error;
mod frame;
mod sampler;
mod scratch;
mod store;

pub use capture_loop::{
    CaptureConfig, CaptureLoop, CaptureOutcome, DEFAULT_FRAME_RATE, PAUSE_POLL_INTERVAL,
};
pub use error::CaptureError;
pub use frame::{Bitmap, CaptureTimestamp};
pub use sampler::{pattern_color, ScreenSampler, SyntheticSampler, WindowToken, STATUS_BAD_REGION};
pub use scratch::ScratchDir;
pub use store::{Drain, DrainedFrame, Frame, FrameStore, FrozenFrames, StorePolicy};

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;
