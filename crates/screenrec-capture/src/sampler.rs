//! Screen sampling capability.
//!
//! The capture loop only knows the screen through [`ScreenSampler`]. A real
//! display backend implements it on top of the platform API; the
//! [`SyntheticSampler`] renders a moving test pattern and is used by the CLI
//! and by tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use screenrec_ipc::{ColorDepth, Rect};
use tracing::debug;

use crate::error::CaptureError;
use crate::frame::{encode_pixel, Bitmap};
use crate::CaptureResult;

/// Raw status used by samplers for a region outside the screen (EINVAL).
pub const STATUS_BAD_REGION: i32 = -22;

/// Opaque handle to an on-screen window being followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowToken(pub u64);

/// Source of screen pixels.
pub trait ScreenSampler: Send + Sync {
    /// Read the pixels inside `region` into a new bitmap of the given depth.
    ///
    /// `direct` asks for the direct frame buffer path when the sampler has one.
    fn read_frame(&self, region: Rect, depth: ColorDepth, direct: bool) -> CaptureResult<Bitmap>;

    /// Returns true if [`ScreenSampler::wait_for_retrace`] actually waits for vsync.
    fn supports_retrace_wait(&self) -> bool {
        false
    }

    /// Wait for the next vertical retrace, at most `timeout`.
    fn wait_for_retrace(&self, timeout: Duration) {
        std::thread::sleep(timeout);
    }

    /// The window whose frame, grown by `edge` pixels, matches `region`.
    fn window_at(&self, _region: Rect, _edge: u32) -> Option<WindowToken> {
        None
    }

    /// Current frame of a tracked window, grown by `edge` pixels.
    fn window_frame(&self, _token: WindowToken, _edge: u32) -> Option<Rect> {
        None
    }

    /// Sampler name for logging.
    fn name(&self) -> &str;
}

/// A test-pattern sampler.
///
/// Each frame is a solid colour derived from the frame number, so frames can
/// be told apart after encoding. Failures can be injected on a given frame.
#[derive(Debug)]
pub struct SyntheticSampler {
    screen: Rect,
    frames_read: AtomicU64,
    fail_on_frame: Option<(u64, i32)>,
    read_delay: Duration,
    windows: Mutex<Vec<(WindowToken, Rect)>>,
}

impl SyntheticSampler {
    /// A sampler for a screen of the given bounds.
    pub fn new(screen: Rect) -> Self {
        Self {
            screen,
            frames_read: AtomicU64::new(0),
            fail_on_frame: None,
            read_delay: Duration::ZERO,
            windows: Mutex::new(Vec::new()),
        }
    }

    /// Fail the `frame`th read (1-based) with the raw status `code`.
    pub fn fail_on_frame(mut self, frame: u64, code: i32) -> Self {
        self.fail_on_frame = Some((frame, code));
        self
    }

    /// Spend `delay` on every read, simulating a slow display.
    pub fn read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Register a window that can be tracked.
    pub fn add_window(&self, frame: Rect) -> WindowToken {
        let mut windows = self.windows.lock();
        let token = WindowToken(windows.len() as u64 + 1);
        windows.push((token, frame));
        token
    }

    /// Move a registered window.
    pub fn move_window(&self, token: WindowToken, x: i32, y: i32) {
        if let Some((_, frame)) = self.windows.lock().iter_mut().find(|(t, _)| *t == token) {
            *frame = frame.offset_to(x, y);
        }
    }

    /// Number of reads so far, including failed ones.
    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::SeqCst)
    }

    fn contains(&self, region: Rect) -> bool {
        let screen = self.screen;
        region.x >= screen.x
            && region.y >= screen.y
            && region.x as i64 + region.width as i64 <= screen.x as i64 + screen.width as i64
            && region.y as i64 + region.height as i64 <= screen.y as i64 + screen.height as i64
    }
}

/// Colour of the `n`th synthetic frame.
pub fn pattern_color(n: u64) -> [u8; 3] {
    [(n * 37 % 256) as u8, (n * 91 % 256) as u8, (n * 13 % 256) as u8]
}

fn grow(rect: Rect, edge: u32) -> Rect {
    Rect::new(
        rect.x - edge as i32,
        rect.y - edge as i32,
        rect.width + 2 * edge,
        rect.height + 2 * edge,
    )
}

impl ScreenSampler for SyntheticSampler {
    fn read_frame(&self, region: Rect, depth: ColorDepth, _direct: bool) -> CaptureResult<Bitmap> {
        let n = self.frames_read.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.read_delay.is_zero() {
            std::thread::sleep(self.read_delay);
        }

        if let Some((frame, code)) = self.fail_on_frame {
            if n == frame {
                debug!(frame = n, code, "Injected sampling failure");
                return Err(CaptureError::sampling(code, "injected failure"));
            }
        }

        if !region.is_valid() {
            return Err(CaptureError::InvalidRegion(region));
        }
        if !self.contains(region) {
            return Err(CaptureError::sampling(
                STATUS_BAD_REGION,
                format!("region {region} is outside screen {}", self.screen),
            ));
        }

        let rgb = pattern_color(n);
        let mut pixel = Vec::with_capacity(4);
        encode_pixel(depth, rgb, &mut pixel);
        let data: Vec<u8> = pixel
            .iter()
            .copied()
            .cycle()
            .take(Bitmap::buffer_size(region.width, region.height, depth))
            .collect();

        Bitmap::new(region.width, region.height, depth, Bytes::from(data))
    }

    fn window_at(&self, region: Rect, edge: u32) -> Option<WindowToken> {
        self.windows
            .lock()
            .iter()
            .find(|(_, frame)| grow(*frame, edge) == region)
            .map(|(token, _)| *token)
    }

    fn window_frame(&self, token: WindowToken, edge: u32) -> Option<Rect> {
        self.windows
            .lock()
            .iter()
            .find(|(t, _)| *t == token)
            .map(|(_, frame)| grow(*frame, edge))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
