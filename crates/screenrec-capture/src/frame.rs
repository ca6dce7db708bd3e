//! Bitmap and timestamp types for captured frames.

use std::time::{Duration, Instant};

use bytes::Bytes;
use screenrec_ipc::ColorDepth;

use crate::error::CaptureError;
use crate::CaptureResult;

/// Timestamp for a captured frame.
#[derive(Debug, Clone, Copy)]
pub struct CaptureTimestamp {
    /// Monotonic timestamp when the frame was captured.
    pub capture_time: Instant,

    /// Presentation offset from the start of the recording, in 100ns units.
    ///
    /// Time spent paused is not counted.
    pub pts_100ns: u64,
}

impl CaptureTimestamp {
    /// Create a timestamp from a capture instant and its recorded offset.
    pub fn from_elapsed(capture_time: Instant, elapsed: Duration) -> Self {
        Self {
            capture_time,
            pts_100ns: (elapsed.as_nanos() / 100) as u64,
        }
    }

    /// Get the presentation timestamp in milliseconds.
    pub fn pts_ms(&self) -> u64 {
        self.pts_100ns / 10_000
    }
}

/// An owned, row-packed bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    depth: ColorDepth,
    data: Bytes,
}

impl Bitmap {
    /// Wrap pixel data, validating it against the dimensions.
    pub fn new(
        width: u32,
        height: u32,
        depth: ColorDepth,
        data: impl Into<Bytes>,
    ) -> CaptureResult<Self> {
        let data = data.into();
        let expected = Self::buffer_size(width, height, depth);
        if data.len() != expected {
            return Err(CaptureError::BitmapSize {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            depth,
            data,
        })
    }

    /// A bitmap filled with a single RGB colour.
    pub fn filled(width: u32, height: u32, depth: ColorDepth, rgb: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(Self::buffer_size(width, height, depth));
        for _ in 0..(width as usize * height as usize) {
            encode_pixel(depth, rgb, &mut data);
        }

        Self {
            width,
            height,
            depth,
            data: Bytes::from(data),
        }
    }

    /// Expected buffer size for the given dimensions.
    pub fn buffer_size(width: u32, height: u32, depth: ColorDepth) -> usize {
        width as usize * height as usize * depth.bytes_per_pixel()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> ColorDepth {
        self.depth
    }

    /// Raw pixel bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Bytes of pixel data held by this bitmap.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.depth.bytes_per_pixel()
    }

    /// RGB value of the pixel at `(x, y)`.
    pub fn pixel_rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let bpp = self.depth.bytes_per_pixel();
        let offset = y as usize * self.stride() + x as usize * bpp;
        decode_pixel(self.depth, &self.data[offset..offset + bpp])
    }

    /// Convert to tightly packed RGBA8, the layout image encoders expect.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let bpp = self.depth.bytes_per_pixel();
        let mut rgba = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for pixel in self.data.chunks_exact(bpp) {
            let [r, g, b] = decode_pixel(self.depth, pixel);
            let a = if self.depth == ColorDepth::Bgra32 {
                pixel[3]
            } else {
                0xFF
            };
            rgba.extend_from_slice(&[r, g, b, a]);
        }
        rgba
    }
}

/// Append one pixel in `depth` layout.
pub(crate) fn encode_pixel(depth: ColorDepth, [r, g, b]: [u8; 3], out: &mut Vec<u8>) {
    match depth {
        ColorDepth::Bgra32 => out.extend_from_slice(&[b, g, r, 0xFF]),
        ColorDepth::Rgb24 => out.extend_from_slice(&[r, g, b]),
        ColorDepth::Rgb16 => {
            let value = ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3);
            out.extend_from_slice(&value.to_le_bytes());
        }
        ColorDepth::Gray8 => {
            // BT.601 luma
            let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
            out.push(y.round().clamp(0.0, 255.0) as u8);
        }
    }
}

fn decode_pixel(depth: ColorDepth, pixel: &[u8]) -> [u8; 3] {
    match depth {
        ColorDepth::Bgra32 => [pixel[2], pixel[1], pixel[0]],
        ColorDepth::Rgb24 => [pixel[0], pixel[1], pixel[2]],
        ColorDepth::Rgb16 => {
            let value = u16::from_le_bytes([pixel[0], pixel[1]]);
            let r = ((value >> 11) & 0x1F) as u8;
            let g = ((value >> 5) & 0x3F) as u8;
            let b = (value & 0x1F) as u8;
            [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)]
        }
        ColorDepth::Gray8 => [pixel[0]; 3],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_rejects_wrong_size() {
        let err = Bitmap::new(4, 4, ColorDepth::Bgra32, vec![0u8; 10]).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::BitmapSize {
                expected: 64,
                actual: 10
            }
        ));
    }

    #[test]
    fn test_filled_bitmap_pixels() {
        let bitmap = Bitmap::filled(3, 2, ColorDepth::Bgra32, [10, 20, 30]);
        assert_eq!(bitmap.byte_len(), 24);
        assert_eq!(bitmap.pixel_rgb(2, 1), [10, 20, 30]);
        assert_eq!(&bitmap.data()[..4], &[30, 20, 10, 0xFF]);
    }

    #[test]
    fn test_rgb16_round_trip_is_close() {
        let bitmap = Bitmap::filled(1, 1, ColorDepth::Rgb16, [255, 128, 0]);
        let [r, g, b] = bitmap.pixel_rgb(0, 0);
        assert_eq!(r, 255);
        assert!((g as i32 - 128).abs() <= 4);
        assert_eq!(b, 0);
    }

    #[test]
    fn test_to_rgba8() {
        let bitmap = Bitmap::filled(2, 1, ColorDepth::Gray8, [255, 255, 255]);
        assert_eq!(bitmap.to_rgba8(), vec![255, 255, 255, 255, 255, 255, 255, 255]);
    }

    #[test]
    fn test_timestamp_pts() {
        let start = Instant::now();
        let ts = CaptureTimestamp::from_elapsed(start, Duration::from_millis(1500));
        assert_eq!(ts.pts_100ns, 15_000_000);
        assert_eq!(ts.pts_ms(), 1500);
    }
}
