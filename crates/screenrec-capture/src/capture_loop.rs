//! The paced frame producer.
//!
//! A [`CaptureLoop`] owns a [`FrameStore`] on a dedicated thread and fills it
//! at the configured rate until cancelled or until sampling fails. Frames are
//! never dropped: a cycle that overruns its budget is followed immediately by
//! the next one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use screenrec_ipc::{ColorDepth, Rect};
use tracing::{debug, info, instrument, trace, warn};

use crate::error::CaptureError;
use crate::frame::CaptureTimestamp;
use crate::sampler::ScreenSampler;
use crate::store::FrameStore;
use crate::CaptureResult;

/// Rate used when the configured frame rate is zero.
pub const DEFAULT_FRAME_RATE: u32 = 10;

/// Upper bound on how long a paused loop waits before re-checking its flags.
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Parameters of one capture session, fixed at start.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Screen region to sample.
    pub region: Rect,

    /// Target frames per second.
    pub frame_rate: u32,

    /// Pixel layout of captured bitmaps.
    pub depth: ColorDepth,

    /// Read through the direct frame buffer.
    pub use_direct_buffer: bool,

    /// Border added around a tracked window's frame.
    pub window_edge: u32,
}

impl CaptureConfig {
    /// Frame rate actually used.
    pub fn effective_frame_rate(&self) -> u32 {
        if self.frame_rate == 0 {
            DEFAULT_FRAME_RATE
        } else {
            self.frame_rate
        }
    }

    /// Time budget for one frame.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.effective_frame_rate()
    }
}

/// State shared between the loop thread and its handle.
#[derive(Debug, Default)]
struct CaptureControl {
    cancel: AtomicBool,
    running: AtomicBool,
    paused: Mutex<bool>,
    wake: Condvar,
    frames: AtomicU64,
}

impl CaptureControl {
    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    /// Block while paused, re-checking at least every [`PAUSE_POLL_INTERVAL`].
    fn wait_while_paused(&self) {
        let mut paused = self.paused.lock();
        while *paused && !self.is_cancelled() {
            self.wake.wait_for(&mut paused, PAUSE_POLL_INTERVAL);
        }
    }

    /// Sleep for `timeout` unless cancelled first.
    fn nap(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut paused = self.paused.lock();
        while !self.is_cancelled() {
            if self.wake.wait_until(&mut paused, deadline).timed_out() {
                break;
            }
        }
    }
}

/// What a finished capture thread hands back.
#[derive(Debug)]
pub struct CaptureOutcome {
    /// The recording, unless it was discarded.
    pub store: Option<FrameStore>,

    /// The failure that ended the loop, if any.
    pub error: Option<CaptureError>,

    /// Frames appended.
    pub frames: u64,

    /// The store held frames but was dropped because storing failed.
    pub discarded: bool,
}

/// Handle to a running capture thread.
pub struct CaptureLoop {
    control: Arc<CaptureControl>,
    handle: Option<JoinHandle<CaptureOutcome>>,
}

impl CaptureLoop {
    /// Start sampling into `store` on a new thread.
    ///
    /// `on_failure` runs on the capture thread, after the loop has stopped,
    /// if sampling or storing a frame fails.
    #[instrument(
        name = "capture_loop_spawn",
        skip_all,
        fields(region = %config.region, fps = config.frame_rate)
    )]
    pub fn spawn<F>(
        config: CaptureConfig,
        store: FrameStore,
        sampler: Arc<dyn ScreenSampler>,
        on_failure: F,
    ) -> CaptureResult<Self>
    where
        F: FnOnce(&CaptureError) + Send + 'static,
    {
        let control = Arc::new(CaptureControl::default());
        control.running.store(true, Ordering::SeqCst);

        let thread_control = Arc::clone(&control);
        let handle = std::thread::Builder::new()
            .name("screenrec-capture".into())
            .spawn(move || run_loop(&thread_control, &config, store, sampler.as_ref(), on_failure))
            .map_err(|e| {
                control.running.store(false, Ordering::SeqCst);
                CaptureError::ThreadSpawn(e)
            })?;

        info!("Capture loop started");

        Ok(Self {
            control,
            handle: Some(handle),
        })
    }

    /// Suspend sampling.
    pub fn pause(&self) {
        *self.control.paused.lock() = true;
        debug!("Capture paused");
    }

    /// Resume sampling.
    pub fn resume(&self) {
        *self.control.paused.lock() = false;
        self.control.wake.notify_all();
        debug!("Capture resumed");
    }

    /// Ask the loop to exit after the current frame.
    pub fn cancel(&self) {
        self.control.cancel.store(true, Ordering::SeqCst);
        let _paused = self.control.paused.lock();
        self.control.wake.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// Returns true until the loop thread has left its loop.
    pub fn is_running(&self) -> bool {
        self.control.running.load(Ordering::SeqCst)
    }

    /// Frames captured so far.
    pub fn frame_count(&self) -> u64 {
        self.control.frames.load(Ordering::SeqCst)
    }

    /// Wait for the thread to exit and take back the recording.
    pub fn join(mut self) -> CaptureResult<CaptureOutcome> {
        self.join_inner()
    }

    /// Cancel and join.
    #[instrument(name = "capture_loop_stop", skip(self))]
    pub fn stop(mut self) -> CaptureResult<CaptureOutcome> {
        self.cancel();
        self.join_inner()
    }

    fn join_inner(&mut self) -> CaptureResult<CaptureOutcome> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| CaptureError::ThreadPanicked),
            None => Err(CaptureError::ThreadPanicked),
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel();
            if self.join_inner().is_err() {
                warn!("Capture thread panicked");
            }
        }
    }
}

fn run_loop<F>(
    control: &CaptureControl,
    config: &CaptureConfig,
    mut store: FrameStore,
    sampler: &dyn ScreenSampler,
    on_failure: F,
) -> CaptureOutcome
where
    F: FnOnce(&CaptureError),
{
    let interval = config.frame_interval();
    let use_retrace = sampler.supports_retrace_wait();
    let mut region = config.region;
    let window = sampler.window_at(region, config.window_edge);

    debug!(
        sampler = sampler.name(),
        interval_ms = interval.as_millis() as u64,
        use_retrace,
        tracking_window = window.is_some(),
        "Capture loop running"
    );

    let start = Instant::now();
    let mut paused_total = Duration::ZERO;
    let mut error = None;

    while !control.is_cancelled() {
        if control.is_paused() {
            let began = Instant::now();
            control.wait_while_paused();
            paused_total += began.elapsed();
            continue;
        }

        let cycle_start = Instant::now();

        if let Some(token) = window {
            if let Some(frame) = sampler.window_frame(token, config.window_edge) {
                if frame.is_valid() {
                    region = region.offset_to(frame.x, frame.y);
                }
            }
        }

        let bitmap = match sampler.read_frame(region, config.depth, config.use_direct_buffer) {
            Ok(bitmap) => bitmap,
            Err(e) => {
                error = Some(e);
                break;
            }
        };

        let recorded = cycle_start.duration_since(start).saturating_sub(paused_total);
        let timestamp = CaptureTimestamp::from_elapsed(cycle_start, recorded);
        if let Err(e) = store.append(bitmap, timestamp) {
            error = Some(e);
            break;
        }

        let count = control.frames.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(frame = count, pts_ms = timestamp.pts_ms(), "Frame captured");

        // An overrun cycle goes straight to the next frame.
        if let Some(remaining) = interval.checked_sub(cycle_start.elapsed()) {
            if !remaining.is_zero() {
                if use_retrace {
                    sampler.wait_for_retrace(remaining);
                } else {
                    control.nap(remaining);
                }
            }
        }
    }

    control.running.store(false, Ordering::SeqCst);
    let frames = control.frames.load(Ordering::SeqCst);

    if let Some(e) = &error {
        warn!(error = %e, frames, "Capture loop failed");
        on_failure(e);
    } else {
        info!(frames, "Capture loop finished");
    }

    let store_failed = error.as_ref().is_some_and(CaptureError::is_store_failure);
    let discarded = store_failed && !store.is_empty();
    if discarded {
        warn!(frames = store.len(), "Store failed, recording discarded");
    }
    CaptureOutcome {
        store: if store_failed || store.is_empty() { None } else { Some(store) },
        error,
        frames,
        discarded,
    }
}
