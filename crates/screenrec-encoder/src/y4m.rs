//! YUV4MPEG2 raw video sink.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use screenrec_capture::DrainedFrame;
use tracing::{debug, instrument, trace};

use crate::format::VideoFormat;
use crate::sink::{check_geometry, FrameSink};
use crate::EncoderResult;

/// Writes planar I420 frames in a YUV4MPEG2 stream.
pub struct Y4mSink {
    writer: BufWriter<File>,
    format: VideoFormat,
    frames: u64,
}

impl Y4mSink {
    /// Create a stream at `path`, truncating it.
    #[instrument(name = "y4m_sink_new", skip_all, fields(path = ?path))]
    pub fn create(path: &Path, format: VideoFormat) -> EncoderResult<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(
            writer,
            "YUV4MPEG2 W{} H{} F{}:1 Ip A1:1 C420jpeg",
            format.width,
            format.height,
            format.frame_rate.max(1)
        )?;

        debug!(
            width = format.width,
            height = format.height,
            fps = format.frame_rate,
            "Y4M sink opened"
        );

        Ok(Self {
            writer,
            format,
            frames: 0,
        })
    }
}

impl FrameSink for Y4mSink {
    fn write_frame(&mut self, frame: &DrainedFrame) -> EncoderResult<()> {
        check_geometry(&self.format, frame)?;

        let rgba = frame.bitmap.to_rgba8();
        let i420 = rgba_to_i420(&rgba, self.format.width as usize, self.format.height as usize);

        self.writer.write_all(b"FRAME\n")?;
        self.writer.write_all(&i420)?;
        self.frames += 1;

        trace!(frame = self.frames, "Y4M frame written");
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> EncoderResult<()> {
        self.writer.flush()?;
        debug!(frames = self.frames, "Y4M sink finished");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "y4m"
    }
}

/// Convert packed RGBA to planar I420 (BT.601, full range).
///
/// Chroma is the average of each 2x2 block; edge blocks of odd-sized
/// frames average the pixels they cover.
pub fn rgba_to_i420(rgba: &[u8], w: usize, h: usize) -> Vec<u8> {
    let cw = w.div_ceil(2);
    let ch = h.div_ceil(2);
    let y_size = w * h;
    let c_size = cw * ch;
    let mut out = vec![0u8; y_size + 2 * c_size];

    // Y plane
    for y in 0..h {
        for x in 0..w {
            let src = (y * w + x) * 4;
            let r = rgba[src] as f32;
            let g = rgba[src + 1] as f32;
            let b = rgba[src + 2] as f32;

            let y_val = (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8;
            out[y * w + x] = y_val;
        }
    }

    // U and V planes (subsampled 2x2)
    let (u_plane, v_plane) = out[y_size..].split_at_mut(c_size);
    for cy in 0..ch {
        for cx in 0..cw {
            let (mut r, mut g, mut b, mut n) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
            for y in (cy * 2)..(cy * 2 + 2).min(h) {
                for x in (cx * 2)..(cx * 2 + 2).min(w) {
                    let src = (y * w + x) * 4;
                    r += rgba[src] as f32;
                    g += rgba[src + 1] as f32;
                    b += rgba[src + 2] as f32;
                    n += 1.0;
                }
            }
            let (r, g, b) = (r / n, g / n, b / n);

            let u = ((-0.169 * r - 0.331 * g + 0.500 * b) + 128.0).round().clamp(0.0, 255.0) as u8;
            let v = ((0.500 * r - 0.419 * g - 0.081 * b) + 128.0).round().clamp(0.0, 255.0) as u8;

            u_plane[cy * cw + cx] = u;
            v_plane[cy * cw + cx] = v;
        }
    }

    out
}
