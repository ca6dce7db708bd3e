//! The recording session state machine.
//!
//! [`SessionController`] owns every piece of session state behind one lock.
//! Commands arrive through [`SessionController::run`] or the public methods;
//! the capture and encode threads never take the lock and report back
//! through an internal channel drained by the run loop.

use std::mem;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, trace, warn};

use screenrec_capture::{
    CaptureConfig, CaptureError, CaptureLoop, CaptureOutcome, FrameStore, ScreenSampler,
};
use screenrec_encoder::{
    all_file_formats, CodecBackend, EncodeHandoff, EncodeJob, EncodeReport, SinkKind, VideoFormat,
    Y4M_FORMAT,
};
use screenrec_ipc::{
    CodecInfo, ColorDepth, EngineCommand, EngineEvent, FileFormat, FormatFamily, Rect,
    SessionState, Status, StopReason,
};

use crate::error::EngineError;
use crate::hub::NotificationHub;
use crate::settings::{Settings, SettingsStore};
use crate::stats::{self, ProgressTimer, RecordClock};
use crate::EngineResult;

/// Longest wait for a command before worker reports and timers are checked.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Encode parameters fixed when a recording starts.
#[derive(Debug, Clone)]
struct EncodePlan {
    sink: SinkKind,
    format: VideoFormat,
    destination: PathBuf,
}

struct ActiveCapture {
    session: u64,
    capture: CaptureLoop,
    plan: EncodePlan,
    auto_stop: Option<Duration>,
    paused: bool,
}

impl ActiveCapture {
    fn state(&self) -> SessionState {
        if self.paused {
            SessionState::Paused
        } else {
            SessionState::Recording
        }
    }
}

struct ActiveEncode {
    session: u64,
    handoff: EncodeHandoff,
}

enum Phase {
    Idle,
    Recording(ActiveCapture),
    Encoding(ActiveEncode),
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Self::Idle => SessionState::Idle,
            Self::Recording(active) => active.state(),
            Self::Encoding(_) => SessionState::Encoding,
        }
    }
}

/// Messages from worker threads to the run loop.
#[derive(Debug)]
enum Internal {
    CaptureFailed { session: u64, status: Status },
    Encode { session: u64, report: EncodeReport },
}

struct Inner {
    settings: Settings,
    phase: Phase,
    clock: RecordClock,
    progress: ProgressTimer,
    session: u64,
    /// One-shot auto-stop request in milliseconds, consumed by the next start.
    requested_duration: u64,
    direct_available: bool,
    file_formats: Vec<FileFormat>,
    file_format: FileFormat,
    codecs: Vec<CodecInfo>,
    codec: Option<CodecInfo>,
    sink: Option<SinkKind>,
    recorded_frames: u64,
    /// Cancelled encodes whose final report has not arrived yet.
    orphaned: Vec<u64>,
}

impl Inner {
    fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            region: self.settings.capture_area,
            frame_rate: self.settings.frame_rate,
            depth: self.settings.color_depth,
            use_direct_buffer: self.settings.use_direct_buffer && self.direct_available,
            window_edge: self.settings.window_edge,
        }
    }

    fn video_format(&self) -> VideoFormat {
        let config = self.capture_config();
        VideoFormat {
            width: config.region.width,
            height: config.region.height,
            depth: config.depth,
            frame_rate: config.effective_frame_rate(),
        }
    }
}

/// Coordinates capture and encoding for one recorder.
///
/// Built once by the process entry point and shared by reference. Worker
/// reports (capture failures, encode progress and completion) are only
/// processed while [`SessionController::run`] is driving the controller.
pub struct SessionController {
    inner: Mutex<Inner>,
    hub: NotificationHub,
    settings_store: Arc<dyn SettingsStore>,
    sampler: Arc<dyn ScreenSampler>,
    backend: Arc<dyn CodecBackend>,
    internal_tx: Sender<Internal>,
    internal_rx: Receiver<Internal>,
    temp_root: PathBuf,
}

impl SessionController {
    /// Create a controller from persisted settings.
    ///
    /// An unknown file format in the settings falls back to the raw video
    /// format, then to the first format offered.
    #[instrument(
        name = "controller_new",
        skip_all,
        fields(backend = backend.name(), sampler = sampler.name())
    )]
    pub fn new(
        settings_store: Arc<dyn SettingsStore>,
        sampler: Arc<dyn ScreenSampler>,
        backend: Arc<dyn CodecBackend>,
    ) -> EngineResult<Self> {
        let mut settings = settings_store.load();
        let file_formats = all_file_formats(backend.as_ref());
        let file_format = file_formats
            .iter()
            .find(|f| f.matches(&settings.file_format))
            .or_else(|| file_formats.iter().find(|f| f.short_name == Y4M_FORMAT))
            .or_else(|| file_formats.first())
            .cloned()
            .ok_or(EngineError::NoFileFormats)?;

        if file_format.short_name != settings.file_format {
            warn!(
                requested = %settings.file_format,
                using = %file_format.short_name,
                "Configured file format unavailable"
            );
            settings.file_format = file_format.short_name.clone();
        }

        let (internal_tx, internal_rx) = crossbeam_channel::unbounded();

        let controller = Self {
            inner: Mutex::new(Inner {
                settings,
                phase: Phase::Idle,
                clock: RecordClock::new(),
                progress: ProgressTimer::default(),
                session: 0,
                requested_duration: 0,
                direct_available: true,
                file_formats,
                file_format,
                codecs: Vec::new(),
                codec: None,
                sink: None,
                recorded_frames: 0,
                orphaned: Vec::new(),
            }),
            hub: NotificationHub::new(),
            settings_store,
            sampler,
            backend,
            internal_tx,
            internal_rx,
            temp_root: std::env::temp_dir(),
        };

        {
            let mut inner = controller.inner.lock();
            controller.refresh_codecs(&mut inner, None);
            info!(
                file_format = %inner.file_format.short_name,
                codec = ?inner.codec.as_ref().map(|c| c.short_name.as_str()),
                "Session controller created"
            );
        }

        Ok(controller)
    }

    /// Directory for scratch frames and temporary encode output.
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = root.into();
        self
    }

    /// Register an observer.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.hub.subscribe()
    }

    /// Process commands and worker reports until shutdown (blocking).
    #[instrument(name = "controller_run", skip_all)]
    pub fn run(&self, commands: Receiver<EngineCommand>) {
        info!("Session controller running");
        self.hub.publish(EngineEvent::Ready);

        loop {
            match commands.recv_timeout(TICK_INTERVAL) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    self.cancel();
                    break;
                }
            }

            for message in self.internal_rx.try_iter() {
                self.handle_internal(message);
            }
            self.tick();
        }

        info!("Session controller stopped");
    }

    /// Handle a command. Returns false once the controller has shut down.
    pub fn handle_command(&self, command: EngineCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            EngineCommand::ToggleCapture => self.toggle_capture(),
            EngineCommand::StartCapture => self.start_capture(),
            EngineCommand::StopCapture => self.stop_capture(),
            EngineCommand::TogglePause => self.toggle_pause(),
            EngineCommand::Cancel => self.cancel(),
            EngineCommand::SetCaptureArea(rect) => self.set_capture_area(rect),
            EngineCommand::SetFrameRate(fps) => self.set_frame_rate(fps),
            EngineCommand::SetColorDepth(depth) => self.set_color_depth(depth),
            EngineCommand::SetMediaFormat {
                family,
                file_format,
                codec,
            } => self.set_media_format(family, &file_format, codec.as_deref()),
            EngineCommand::SetOutputPath(path) => self.set_output_path(path),
            EngineCommand::SetRecordingDuration(ms) => self.set_recording_duration(ms),
            EngineCommand::SetUseDirectBuffer(preferred) => self.set_use_direct_buffer(preferred),
            EngineCommand::SetDirectBufferAvailable(available) => {
                self.update_direct_buffer_available(available)
            }
            EngineCommand::ResetSettings => self.reset_settings(),
            EngineCommand::GetState => self.send_state(),
            EngineCommand::GetFileFormats => {
                self.hub.publish(EngineEvent::FileFormats(self.file_formats()));
            }
            EngineCommand::Shutdown => {
                if let Some(reason) = self.busy_reason() {
                    info!(reason, "Shutdown refused");
                    self.hub.publish(EngineEvent::ShutdownRefused {
                        reason: reason.to_string(),
                    });
                } else {
                    self.hub.publish(EngineEvent::Shutdown);
                    return false;
                }
            }
        }

        true
    }

    /// Start when idle, stop when recording, nothing while encoding.
    pub fn toggle_capture(&self) {
        match self.state() {
            SessionState::Idle => self.start_capture(),
            SessionState::Recording | SessionState::Paused => self.stop_capture(),
            SessionState::Encoding => debug!("Encoding, toggle ignored"),
        }
    }

    /// Begin a new recording. Ignored unless idle.
    #[instrument(name = "start_capture", skip(self))]
    pub fn start_capture(&self) {
        let mut inner = self.inner.lock();
        if !matches!(inner.phase, Phase::Idle) {
            debug!(state = inner.phase.state().name(), "Session busy, ignoring start");
            return;
        }

        let Some(sink) = inner.sink.clone() else {
            warn!(
                file_format = %inner.file_format.short_name,
                "No usable codec for the output format"
            );
            self.hub.publish(EngineEvent::CaptureStopped {
                reason: StopReason::StartFailed,
                status: Status::Encoder,
            });
            return;
        };

        let config = inner.capture_config();
        let plan = EncodePlan {
            sink,
            format: inner.video_format(),
            destination: inner.settings.output_path.clone(),
        };
        let session = inner.session + 1;

        let capture = match self.spawn_capture(config, &inner.settings, session) {
            Ok(capture) => capture,
            Err(e) => {
                error!(error = %e, "Capture start failed");
                self.hub.publish(EngineEvent::CaptureStopped {
                    reason: StopReason::StartFailed,
                    status: e.status(),
                });
                return;
            }
        };

        let duration = mem::take(&mut inner.requested_duration);
        if duration > 0 {
            self.hub.publish(EngineEvent::RecordingDurationChanged(0));
        }

        inner.session = session;
        inner.recorded_frames = 0;
        inner.clock.start();
        inner.progress.mark_reported();
        self.set_phase(
            &mut inner,
            Phase::Recording(ActiveCapture {
                session,
                capture,
                plan,
                auto_stop: (duration > 0).then(|| Duration::from_millis(duration)),
                paused: false,
            }),
        );

        info!(session, duration_ms = duration, "Recording started");
        self.hub.publish(EngineEvent::CaptureStarted);
    }

    fn spawn_capture(
        &self,
        config: CaptureConfig,
        settings: &Settings,
        session: u64,
    ) -> EngineResult<CaptureLoop> {
        let store = FrameStore::new(settings.store_policy().scratch_root(&self.temp_root))?;
        let tx = self.internal_tx.clone();
        let on_failure = move |e: &CaptureError| {
            let message = Internal::CaptureFailed {
                session,
                status: e.status(),
            };
            if tx.send(message).is_err() {
                debug!("Controller gone, capture failure dropped");
            }
        };
        let capture = CaptureLoop::spawn(config, store, Arc::clone(&self.sampler), on_failure)?;
        Ok(capture)
    }

    /// Stop recording and encode what was captured.
    pub fn stop_capture(&self) {
        self.stop_with(StopReason::UserRequested);
    }

    #[instrument(name = "stop_capture", skip(self))]
    fn stop_with(&self, reason: StopReason) {
        let mut inner = self.inner.lock();
        let active = match mem::replace(&mut inner.phase, Phase::Idle) {
            Phase::Recording(active) => active,
            other => {
                inner.phase = other;
                debug!("Not recording, ignoring stop");
                return;
            }
        };

        let previous = active.state();
        let ActiveCapture {
            session,
            capture,
            plan,
            ..
        } = active;

        let outcome = capture.stop();
        inner.clock.suspend();

        match outcome {
            Ok(outcome) => {
                let (reason, status) = match &outcome.error {
                    Some(e) => (StopReason::CaptureFailed, e.status()),
                    None => (reason, Status::Ok),
                };
                info!(frames = outcome.frames, ?reason, "Recording stopped");
                inner.recorded_frames = outcome.frames;
                self.hub.publish(EngineEvent::CaptureStopped { reason, status });
                self.begin_encode(&mut inner, previous, session, plan, outcome);
            }
            Err(e) => {
                error!(error = %e, "Capture thread lost");
                self.hub.publish(EngineEvent::CaptureStopped {
                    reason: StopReason::CaptureFailed,
                    status: e.status(),
                });
                self.transition(&mut inner, previous, Phase::Idle);
            }
        }
    }

    /// Hand a finished recording to the encoder, or return to idle.
    ///
    /// A recording dropped by a store failure finishes with that failure's
    /// status; an empty one finishes with [`Status::NoFrames`].
    fn begin_encode(
        &self,
        inner: &mut Inner,
        previous: SessionState,
        session: u64,
        plan: EncodePlan,
        outcome: CaptureOutcome,
    ) {
        let frames = match outcome.store {
            Some(store) if !store.is_empty() => store.freeze(),
            _ => {
                let status = match &outcome.error {
                    Some(e) if outcome.discarded => {
                        warn!(session, error = %e, "Recording discarded, nothing to encode");
                        e.status()
                    }
                    _ => {
                        warn!(session, "No frames to encode");
                        Status::NoFrames
                    }
                };
                self.transition(inner, previous, Phase::Idle);
                self.hub.publish(EngineEvent::EncodeFinished { status, path: None });
                return;
            }
        };

        let job = EncodeJob {
            frames,
            sink: plan.sink,
            format: plan.format,
            destination: plan.destination,
            temp_root: self.temp_root.clone(),
        };

        let tx = self.internal_tx.clone();
        let started = EncodeHandoff::start(job, Arc::clone(&self.backend), move |report| {
            if tx.send(Internal::Encode { session, report }).is_err() {
                debug!("Controller gone, encode report dropped");
            }
        });

        match started {
            Ok(handoff) => {
                let total_frames = handoff.total_frames();
                self.transition(
                    inner,
                    previous,
                    Phase::Encoding(ActiveEncode { session, handoff }),
                );
                self.hub.publish(EngineEvent::EncodeStarted { total_frames });
            }
            Err(e) => {
                error!(error = %e, "Encode could not start");
                self.transition(inner, previous, Phase::Idle);
                self.hub.publish(EngineEvent::EncodeFinished {
                    status: e.status(),
                    path: None,
                });
            }
        }
    }

    /// Pause a running recording, or resume a paused one.
    pub fn toggle_pause(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Phase::Recording(active) = &mut inner.phase else {
            debug!("Not recording, ignoring pause");
            return;
        };

        let (previous, event) = if active.paused {
            active.capture.resume();
            inner.clock.resume();
            active.paused = false;
            (SessionState::Paused, EngineEvent::CaptureResumed)
        } else {
            active.capture.pause();
            inner.clock.suspend();
            active.paused = true;
            (SessionState::Recording, EngineEvent::CapturePaused)
        };

        let current = active.state();
        info!(state = current.name(), "Pause toggled");
        self.hub.publish(EngineEvent::StateChanged { previous, current });
        self.hub.publish(event);
    }

    /// Abort recording or encoding, discarding partial data.
    #[instrument(name = "cancel", skip(self))]
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        match mem::replace(&mut inner.phase, Phase::Idle) {
            Phase::Idle => debug!("Nothing to cancel"),
            Phase::Recording(active) => {
                let previous = active.state();
                match active.capture.stop() {
                    Ok(outcome) => {
                        info!(frames = outcome.frames, "Recording cancelled, frames discarded")
                    }
                    Err(e) => warn!(error = %e, "Cancelled capture did not exit cleanly"),
                }
                inner.clock.suspend();
                self.hub.publish(EngineEvent::CaptureStopped {
                    reason: StopReason::Cancelled,
                    status: Status::Cancelled,
                });
                self.transition(&mut inner, previous, Phase::Idle);
            }
            Phase::Encoding(active) => {
                active.handoff.cancel();
                active.handoff.join();
                info!(session = active.session, "Encode cancelled");
                // The final report is already queued and is published by the run loop.
                inner.orphaned.push(active.session);
                self.transition(&mut inner, SessionState::Encoding, Phase::Idle);
            }
        }
    }

    #[instrument(name = "set_capture_area", skip(self))]
    pub fn set_capture_area(&self, rect: Rect) {
        if !rect.is_valid() {
            warn!(%rect, "Ignoring empty capture area");
            return;
        }

        let mut inner = self.inner.lock();
        inner.settings.capture_area = rect;
        self.save(&inner.settings);
        self.hub.publish(EngineEvent::SourceFrameChanged(rect));
        self.target_frame_changed(&mut inner);
    }

    pub fn set_frame_rate(&self, fps: u32) {
        let mut inner = self.inner.lock();
        inner.settings.frame_rate = fps;
        self.save(&inner.settings);
        debug!(fps, "Frame rate set");
        self.hub.publish(EngineEvent::FrameRateChanged(fps));
    }

    pub fn set_color_depth(&self, depth: ColorDepth) {
        let mut inner = self.inner.lock();
        inner.settings.color_depth = depth;
        self.save(&inner.settings);
        debug!(depth = depth.name(), "Color depth set");
        self.hub.publish(EngineEvent::DepthChanged(depth));
        self.refresh_codecs(&mut inner, None);
    }

    /// Select the output file format and, optionally, a codec by name.
    ///
    /// Unknown formats are ignored. A codec that the format does not offer
    /// falls back to the saved codec, then to the first codec offered.
    #[instrument(name = "set_media_format", skip(self))]
    pub fn set_media_format(&self, family: FormatFamily, file_format: &str, codec: Option<&str>) {
        let mut inner = self.inner.lock();
        let found = inner.file_formats.iter().find(|f| f.matches(file_format));
        let Some(format) = found.cloned() else {
            warn!(file_format, "Unknown file format");
            return;
        };
        if format.family != family {
            debug!(
                requested = ?family,
                actual = ?format.family,
                "Family differs, using the format's own"
            );
        }

        inner.settings.file_format = format.short_name.clone();
        self.hub.publish(EngineEvent::MediaFormatChanged {
            name: format.pretty_name.clone(),
        });
        inner.file_format = format;

        self.refresh_codecs(&mut inner, codec);
        if let Some(codec) = &inner.codec {
            inner.settings.codec = codec.short_name.clone();
        }
        self.save(&inner.settings);
    }

    pub fn set_output_path(&self, path: PathBuf) {
        let mut inner = self.inner.lock();
        inner.settings.output_path = path.clone();
        self.save(&inner.settings);
        self.hub.publish(EngineEvent::OutputPathChanged(path));
    }

    /// Request an auto-stop after `ms` of recorded time for the next session.
    ///
    /// Ignored while recording.
    pub fn set_recording_duration(&self, ms: u64) {
        let mut inner = self.inner.lock();
        if matches!(inner.phase, Phase::Recording(_)) {
            debug!(ms, "Recording, duration change ignored");
            return;
        }
        inner.requested_duration = ms;
        self.hub.publish(EngineEvent::RecordingDurationChanged(ms));
    }

    pub fn set_use_direct_buffer(&self, preferred: bool) {
        let mut inner = self.inner.lock();
        inner.settings.use_direct_buffer = preferred;
        self.save(&inner.settings);
        self.publish_direct_buffer(&inner);
    }

    /// Record whether the display currently offers a direct frame buffer.
    pub fn update_direct_buffer_available(&self, available: bool) {
        let mut inner = self.inner.lock();
        inner.direct_available = available;
        self.publish_direct_buffer(&inner);
    }

    /// Restore defaults and announce every setting again.
    #[instrument(name = "reset_settings", skip(self))]
    pub fn reset_settings(&self) {
        let mut inner = self.inner.lock();
        let defaults = Settings::default();
        let format = inner
            .file_formats
            .iter()
            .find(|f| f.matches(&defaults.file_format))
            .or_else(|| inner.file_formats.first())
            .cloned();

        inner.settings = defaults;
        if let Some(format) = format {
            inner.settings.file_format = format.short_name.clone();
            inner.file_format = format;
        }
        self.save(&inner.settings);
        info!("Settings reset");
        self.hub.publish(EngineEvent::SettingsReset);

        let settings = inner.settings.clone();
        self.hub.publish(EngineEvent::SourceFrameChanged(settings.capture_area));
        self.hub.publish(EngineEvent::FrameRateChanged(settings.frame_rate));
        self.hub.publish(EngineEvent::DepthChanged(settings.color_depth));
        self.hub.publish(EngineEvent::OutputPathChanged(settings.output_path));
        self.hub.publish(EngineEvent::MediaFormatChanged {
            name: inner.file_format.pretty_name.clone(),
        });
        self.publish_direct_buffer(&inner);
        self.target_frame_changed(&mut inner);
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().phase.state()
    }

    /// Frames in the current or last recording.
    pub fn recorded_frames(&self) -> u64 {
        let inner = self.inner.lock();
        match &inner.phase {
            Phase::Recording(active) => active.capture.frame_count(),
            _ => inner.recorded_frames,
        }
    }

    /// Recorded time of the current or last recording, excluding pauses.
    pub fn record_time(&self) -> Duration {
        self.inner.lock().clock.elapsed()
    }

    pub fn average_fps(&self) -> f32 {
        stats::average_fps(self.recorded_frames(), self.record_time())
    }

    /// Why the controller cannot shut down right now, if it cannot.
    pub fn busy_reason(&self) -> Option<&'static str> {
        match self.state() {
            SessionState::Recording | SessionState::Paused => Some("Recording in progress."),
            SessionState::Encoding => Some("Encoding in progress."),
            SessionState::Idle => None,
        }
    }

    pub fn can_quit(&self) -> bool {
        self.busy_reason().is_none()
    }

    /// Codecs offered for the current file format.
    pub fn codecs(&self) -> Vec<CodecInfo> {
        self.inner.lock().codecs.clone()
    }

    pub fn codec(&self) -> Option<CodecInfo> {
        self.inner.lock().codec.clone()
    }

    /// Every selectable output file format.
    pub fn file_formats(&self) -> Vec<FileFormat> {
        self.inner.lock().file_formats.clone()
    }

    pub fn file_format(&self) -> FileFormat {
        self.inner.lock().file_format.clone()
    }

    pub fn settings(&self) -> Settings {
        self.inner.lock().settings.clone()
    }

    fn send_state(&self) {
        let state = self.state();
        self.hub.publish(EngineEvent::StateChanged {
            previous: state,
            current: state,
        });
    }

    fn handle_internal(&self, message: Internal) {
        match message {
            Internal::CaptureFailed { session, status } => self.capture_failed(session, status),
            Internal::Encode { session, report } => self.encode_report(session, report),
        }
    }

    /// The capture thread stopped on its own after a failure.
    #[instrument(name = "capture_failed", skip(self))]
    fn capture_failed(&self, session: u64, status: Status) {
        let mut inner = self.inner.lock();
        let active = match mem::replace(&mut inner.phase, Phase::Idle) {
            Phase::Recording(active) if active.session == session => active,
            other => {
                inner.phase = other;
                debug!("Stale capture failure");
                return;
            }
        };

        let previous = active.state();
        let ActiveCapture { capture, plan, .. } = active;
        inner.clock.suspend();

        match capture.join() {
            Ok(outcome) => {
                warn!(%status, frames = outcome.frames, "Recording ended by capture failure");
                inner.recorded_frames = outcome.frames;
                self.hub.publish(EngineEvent::CaptureStopped {
                    reason: StopReason::CaptureFailed,
                    status,
                });
                self.begin_encode(&mut inner, previous, session, plan, outcome);
            }
            Err(e) => {
                error!(error = %e, "Capture thread lost");
                self.hub.publish(EngineEvent::CaptureStopped {
                    reason: StopReason::CaptureFailed,
                    status: e.status(),
                });
                self.transition(&mut inner, previous, Phase::Idle);
            }
        }
    }

    fn encode_report(&self, session: u64, report: EncodeReport) {
        let mut inner = self.inner.lock();
        let current = matches!(&inner.phase, Phase::Encoding(active) if active.session == session);

        match report {
            EncodeReport::Progress {
                remaining,
                total,
                text,
            } => {
                if current {
                    trace!(remaining, total, "Encode progress");
                    self.hub.publish(EngineEvent::EncodeProgress {
                        remaining,
                        total,
                        text,
                    });
                }
            }
            EncodeReport::Finished { status, path } => {
                if current {
                    if let Phase::Encoding(active) = mem::replace(&mut inner.phase, Phase::Idle) {
                        active.handoff.join();
                    }
                    inner.recorded_frames = 0;
                    self.transition(&mut inner, SessionState::Encoding, Phase::Idle);
                } else if let Some(pos) = inner.orphaned.iter().position(|s| *s == session) {
                    inner.orphaned.swap_remove(pos);
                } else {
                    debug!(session, "Stale encode report");
                    return;
                }

                info!(%status, path = ?path, "Encode finished");
                self.hub.publish(EngineEvent::EncodeFinished { status, path });
            }
        }
    }

    /// Periodic work: auto-stop and recording progress.
    fn tick(&self) {
        let stop_due = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let Phase::Recording(active) = &inner.phase else {
                return;
            };

            let elapsed = inner.clock.elapsed();
            if !active.paused && inner.progress.due() {
                let frames = active.capture.frame_count();
                self.hub.publish(EngineEvent::RecordingProgress(stats::progress(
                    frames,
                    elapsed,
                    active.plan.format.frame_rate,
                )));
            }

            active.auto_stop.is_some_and(|limit| elapsed >= limit)
        };

        if stop_due {
            info!("Recording duration elapsed");
            self.stop_with(StopReason::DurationElapsed);
        }
    }

    /// Recompute codecs for the current file format and reselect the codec.
    fn refresh_codecs(&self, inner: &mut Inner, preferred: Option<&str>) {
        let bypass = SinkKind::select(&inner.file_format, None)
            .is_ok_and(|kind| kind.bypasses_codecs());
        let codecs = if bypass {
            Vec::new()
        } else {
            self.backend.codecs_for(&inner.file_format, &inner.video_format())
        };

        let codec = preferred
            .and_then(|name| codecs.iter().find(|c| c.matches(name)))
            .or_else(|| codecs.iter().find(|c| c.matches(&inner.settings.codec)))
            .or_else(|| codecs.first())
            .cloned();

        let sink = SinkKind::select(&inner.file_format, codec.as_ref());
        if let Err(e) = &sink {
            warn!(error = %e, "Output format unusable");
        }

        let changed = codec != inner.codec;
        inner.codecs = codecs.clone();
        inner.codec = codec;
        inner.sink = sink.ok();

        self.hub.publish(EngineEvent::CodecListUpdated(codecs));
        if changed {
            if let Some(codec) = &inner.codec {
                self.hub.publish(EngineEvent::CodecChanged {
                    name: codec.pretty_name.clone(),
                });
            }
        }
    }

    fn target_frame_changed(&self, inner: &mut Inner) {
        self.refresh_codecs(inner, None);
        self.hub.publish(EngineEvent::TargetFrameChanged {
            rect: inner.settings.capture_area,
            scale: 1.0,
        });
    }

    fn publish_direct_buffer(&self, inner: &Inner) {
        self.hub.publish(EngineEvent::DirectBufferChanged {
            preferred: inner.settings.use_direct_buffer,
            available: inner.direct_available,
        });
    }

    fn save(&self, settings: &Settings) {
        if let Err(e) = self.settings_store.save(settings) {
            warn!(error = %e, "Failed to save settings");
        }
    }

    fn set_phase(&self, inner: &mut Inner, phase: Phase) {
        let previous = inner.phase.state();
        self.transition(inner, previous, phase);
    }

    /// Install `phase` and announce the change from `previous`.
    fn transition(&self, inner: &mut Inner, previous: SessionState, phase: Phase) {
        inner.phase = phase;
        let current = inner.phase.state();
        if previous != current {
            info!(from = previous.name(), to = current.name(), "State transition");
            self.hub.publish(EngineEvent::StateChanged { previous, current });
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if !self.state().is_idle() {
            warn!(state = self.state().name(), "Controller dropped with an active session");
            self.cancel();
        }
    }
}
