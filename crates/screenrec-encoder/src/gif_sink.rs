//! Animated GIF sink.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use gif::{Encoder, Frame, Repeat};
use screenrec_capture::DrainedFrame;
use tracing::{debug, instrument, trace};

use crate::error::EncoderError;
use crate::format::VideoFormat;
use crate::sink::{check_geometry, FrameSink};
use crate::EncoderResult;

/// Quantizer speed passed to the palette builder (1 = best, 30 = fastest).
const QUANTIZE_SPEED: i32 = 10;

/// 100ns units per GIF delay unit (10ms).
const DELAY_UNIT_100NS: u64 = 100_000;

/// Writes frames as an endlessly looping GIF.
///
/// Frame delays come from the gap to the next frame's timestamp, so one
/// frame is held back until its successor arrives.
pub struct GifSink {
    encoder: Encoder<BufWriter<File>>,
    format: VideoFormat,
    width: u16,
    height: u16,
    pending: Option<(Vec<u8>, u64)>,
    frames: u64,
}

impl GifSink {
    /// Create a GIF at `path`, truncating it.
    #[instrument(name = "gif_sink_new", skip_all, fields(path = ?path))]
    pub fn create(path: &Path, format: VideoFormat) -> EncoderResult<Self> {
        let too_large = || {
            EncoderError::InvalidInput(format!(
                "{}x{} exceeds the GIF size limit",
                format.width, format.height
            ))
        };
        let width = u16::try_from(format.width).map_err(|_| too_large())?;
        let height = u16::try_from(format.height).map_err(|_| too_large())?;

        let writer = BufWriter::new(File::create(path)?);
        let mut encoder = Encoder::new(writer, width, height, &[])?;
        encoder.set_repeat(Repeat::Infinite)?;

        debug!(width, height, "GIF sink opened");

        Ok(Self {
            encoder,
            format,
            width,
            height,
            pending: None,
            frames: 0,
        })
    }

    fn emit(&mut self, mut rgba: Vec<u8>, delay_100ns: u64) -> EncoderResult<()> {
        let mut frame = Frame::from_rgba_speed(self.width, self.height, &mut rgba, QUANTIZE_SPEED);
        frame.delay = (delay_100ns / DELAY_UNIT_100NS).clamp(1, u16::MAX as u64) as u16;
        self.encoder.write_frame(&frame)?;
        self.frames += 1;
        trace!(frame = self.frames, delay = frame.delay, "GIF frame written");
        Ok(())
    }
}

impl FrameSink for GifSink {
    fn write_frame(&mut self, frame: &DrainedFrame) -> EncoderResult<()> {
        check_geometry(&self.format, frame)?;

        let pts = frame.timestamp.pts_100ns;
        let rgba = frame.bitmap.to_rgba8();
        if let Some((previous, previous_pts)) = self.pending.replace((rgba, pts)) {
            self.emit(previous, pts.saturating_sub(previous_pts))?;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> EncoderResult<()> {
        if let Some((last, _)) = self.pending.take() {
            let delay = self.format.frame_duration_100ns();
            self.emit(last, delay)?;
        }

        let frames = self.frames;
        let mut writer = self.encoder.into_inner()?;
        writer.flush()?;

        debug!(frames, "GIF sink finished");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "gif"
    }
}
