//! Recorded-time accounting and progress reporting.

use std::time::{Duration, Instant};

use screenrec_ipc::RecordingProgress;

/// Interval between [`RecordingProgress`] reports.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// A stopwatch that can be suspended, measuring recorded time only.
#[derive(Debug, Default, Clone)]
pub struct RecordClock {
    running_since: Option<Instant>,
    accumulated: Duration,
}

impl RecordClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to zero and start running.
    pub fn start(&mut self) {
        self.accumulated = Duration::ZERO;
        self.running_since = Some(Instant::now());
    }

    /// Stop accumulating; keeps the elapsed time.
    pub fn suspend(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    /// Continue accumulating after [`RecordClock::suspend`].
    pub fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Recorded time so far.
    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.running_since.map_or(Duration::ZERO, |since| since.elapsed())
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }
}

/// Frames per second over `elapsed`, 0 before any time has passed.
pub fn average_fps(frames: u64, elapsed: Duration) -> f32 {
    let secs = elapsed.as_secs_f32();
    if secs > 0.0 {
        frames as f32 / secs
    } else {
        0.0
    }
}

/// Decides when the next progress report is due.
#[derive(Debug, Clone)]
pub struct ProgressTimer {
    last_report: Instant,
    interval: Duration,
}

impl ProgressTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_report: Instant::now(),
            interval,
        }
    }

    /// Returns true, and restarts the interval, when a report is due.
    pub fn due(&mut self) -> bool {
        if self.last_report.elapsed() >= self.interval {
            self.mark_reported();
            true
        } else {
            false
        }
    }

    pub fn mark_reported(&mut self) {
        self.last_report = Instant::now();
    }
}

impl Default for ProgressTimer {
    fn default() -> Self {
        Self::new(PROGRESS_INTERVAL)
    }
}

/// Build a progress snapshot.
pub fn progress(frames: u64, elapsed: Duration, target_fps: u32) -> RecordingProgress {
    RecordingProgress {
        frames,
        elapsed_ms: elapsed.as_millis() as u64,
        average_fps: average_fps(frames, elapsed),
        target_fps,
    }
}
