//! PNG image sequence sink.

use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbaImage};
use screenrec_capture::DrainedFrame;
use tracing::{debug, trace};

use crate::error::EncoderError;
use crate::format::VideoFormat;
use crate::sink::{check_geometry, FrameSink};
use crate::EncoderResult;

/// Writes each frame as `frame_NNNNN.png` inside a directory.
#[derive(Debug)]
pub struct ImageSequenceSink {
    dir: PathBuf,
    format: VideoFormat,
    written: u64,
}

impl ImageSequenceSink {
    /// Write into the existing directory `dir`.
    pub fn new(dir: &Path, format: VideoFormat) -> Self {
        Self {
            dir: dir.to_path_buf(),
            format,
            written: 0,
        }
    }

    /// File name used for the frame at `index`.
    pub fn file_name(index: usize) -> String {
        format!("frame_{index:05}.png")
    }
}

impl FrameSink for ImageSequenceSink {
    fn write_frame(&mut self, frame: &DrainedFrame) -> EncoderResult<()> {
        check_geometry(&self.format, frame)?;

        let bitmap = &frame.bitmap;
        let image = RgbaImage::from_raw(bitmap.width(), bitmap.height(), bitmap.to_rgba8())
            .ok_or_else(|| EncoderError::InvalidInput("bitmap does not fit its size".into()))?;

        let path = self.dir.join(Self::file_name(frame.index));
        image.save_with_format(&path, ImageFormat::Png)?;
        self.written += 1;

        trace!(path = ?path, "PNG frame written");
        Ok(())
    }

    fn finish(self: Box<Self>) -> EncoderResult<()> {
        debug!(frames = self.written, dir = ?self.dir, "Image sequence finished");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "png-sequence"
    }
}
