//! The frame sink abstraction.

use screenrec_capture::DrainedFrame;
use tracing::debug;

use crate::error::EncoderError;
use crate::format::VideoFormat;
use crate::EncoderResult;

/// Consumer of an ordered sequence of timestamped frames.
///
/// Sinks are driven from the encode thread only. `finish` completes the
/// output; `abort` abandons it and may leave partial data for the caller to
/// discard.
pub trait FrameSink: Send {
    /// Append one frame.
    fn write_frame(&mut self, frame: &DrainedFrame) -> EncoderResult<()>;

    /// Flush and close the output.
    fn finish(self: Box<Self>) -> EncoderResult<()>;

    /// Stop without completing the output.
    fn abort(self: Box<Self>) {}

    /// Sink name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Check that a frame matches the negotiated format.
pub(crate) fn check_geometry(format: &VideoFormat, frame: &DrainedFrame) -> EncoderResult<()> {
    let bitmap = &frame.bitmap;
    if bitmap.width() != format.width || bitmap.height() != format.height {
        return Err(EncoderError::InvalidInput(format!(
            "frame {} is {}x{}, expected {}x{}",
            frame.index,
            bitmap.width(),
            bitmap.height(),
            format.width,
            format.height
        )));
    }
    Ok(())
}

/// Sink that counts frames and discards them.
#[derive(Debug, Default)]
pub struct NullSink {
    frames: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSink for NullSink {
    fn write_frame(&mut self, _frame: &DrainedFrame) -> EncoderResult<()> {
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> EncoderResult<()> {
        debug!(frames = self.frames, "Null sink discarded frames");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}
