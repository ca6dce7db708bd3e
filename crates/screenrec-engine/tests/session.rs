//! End-to-end recording sessions driven through the command channel.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tempfile::TempDir;

use screenrec_capture::{DrainedFrame, SyntheticSampler};
use screenrec_encoder::{BuiltinBackend, CodecBackend, EncoderResult, FrameSink, VideoFormat};
use screenrec_engine::{MemorySettingsStore, SessionController, Settings};
use screenrec_ipc::{
    command_channel, CodecInfo, EngineCommand, EngineEvent, FileFormat, FormatFamily, Rect,
    SessionState, Status, StopReason,
};

const WAIT: Duration = Duration::from_secs(10);

struct Harness {
    controller: Arc<SessionController>,
    commands: Sender<EngineCommand>,
    events: Receiver<EngineEvent>,
    seen: Vec<EngineEvent>,
    runner: Option<JoinHandle<()>>,
    dir: TempDir,
}

impl Harness {
    fn new(sampler: SyntheticSampler) -> Self {
        Self::with_backend(sampler, Arc::new(BuiltinBackend::new()), |_| {})
    }

    fn with_backend(
        sampler: SyntheticSampler,
        backend: Arc<dyn CodecBackend>,
        configure: impl FnOnce(&mut Settings),
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("out")).unwrap();
        fs::create_dir(dir.path().join("tmp")).unwrap();

        let mut settings = Settings::default();
        settings.capture_area = Rect::new(0, 0, 32, 24);
        settings.frame_rate = 10;
        settings.output_path = dir.path().join("out").join("out.y4m");
        configure(&mut settings);

        let store = Arc::new(MemorySettingsStore::new(settings));
        let controller = Arc::new(
            SessionController::new(store, Arc::new(sampler), backend)
                .unwrap()
                .with_temp_root(dir.path().join("tmp")),
        );
        let events = controller.subscribe();

        let (commands, rx) = command_channel();
        let runner = {
            let controller = Arc::clone(&controller);
            thread::spawn(move || controller.run(rx))
        };

        let mut harness = Self {
            controller,
            commands,
            events,
            seen: Vec::new(),
            runner: Some(runner),
            dir,
        };
        harness.wait_for(|e| *e == EngineEvent::Ready);
        harness
    }

    fn send(&self, command: EngineCommand) {
        self.commands.send(command).unwrap();
    }

    /// Wait for the first event matching `pred`, recording everything seen.
    fn wait_for(&mut self, pred: impl Fn(&EngineEvent) -> bool) -> EngineEvent {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = self
                .events
                .recv_timeout(remaining)
                .unwrap_or_else(|_| panic!("timed out; events so far: {:?}", self.seen));
            self.seen.push(event.clone());
            if pred(&event) {
                return event;
            }
        }
    }

    /// Collect events for `period`.
    fn settle(&mut self, period: Duration) {
        let deadline = Instant::now() + period;
        while let Ok(event) = self
            .events
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
        {
            self.seen.push(event);
        }
    }

    fn count(&self, pred: impl Fn(&EngineEvent) -> bool) -> usize {
        self.seen.iter().filter(|e| pred(e)).count()
    }

    fn out_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    fn tmp_dir(&self) -> PathBuf {
        self.dir.path().join("tmp")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.commands.send(EngineCommand::Cancel);
        let _ = self.commands.send(EngineCommand::Shutdown);
        if let Some(runner) = self.runner.take() {
            let _ = runner.join();
        }
    }
}

fn screen() -> SyntheticSampler {
    SyntheticSampler::new(Rect::new(0, 0, 1920, 1080))
}

fn entries(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect()
}

fn is_encode_finished(e: &EngineEvent) -> bool {
    matches!(e, EngineEvent::EncodeFinished { .. })
}

#[test]
fn test_ten_fps_for_two_seconds() {
    let mut h = Harness::new(screen());

    h.send(EngineCommand::StartCapture);
    h.wait_for(|e| *e == EngineEvent::CaptureStarted);
    thread::sleep(Duration::from_millis(2000));
    h.send(EngineCommand::StopCapture);

    h.wait_for(|e| {
        *e == EngineEvent::CaptureStopped {
            reason: StopReason::UserRequested,
            status: Status::Ok,
        }
    });
    let EngineEvent::EncodeStarted { total_frames } =
        h.wait_for(|e| matches!(e, EngineEvent::EncodeStarted { .. }))
    else {
        unreachable!()
    };
    assert!(
        (18..=22).contains(&total_frames),
        "captured {total_frames} frames"
    );

    let finished = h.wait_for(is_encode_finished);
    let expected = h.out_dir().join("out.y4m");
    assert_eq!(
        finished,
        EngineEvent::EncodeFinished {
            status: Status::Ok,
            path: Some(expected.clone()),
        }
    );

    // Header plus one FRAME record per captured frame.
    let data = fs::read(&expected).unwrap();
    let frame_len = "FRAME\n".len() + 32 * 24 * 3 / 2;
    let header_len = data.iter().position(|b| *b == b'\n').unwrap() + 1;
    assert_eq!(data.len(), header_len + total_frames as usize * frame_len);

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(entries(&h.tmp_dir()).is_empty());
}

#[test]
fn test_sampling_failure_keeps_earlier_frames() {
    let mut h = Harness::new(screen().fail_on_frame(5, -5));

    h.send(EngineCommand::StartCapture);
    h.wait_for(|e| {
        *e == EngineEvent::CaptureStopped {
            reason: StopReason::CaptureFailed,
            status: Status::Sampling { code: -5 },
        }
    });
    let started = h.wait_for(|e| matches!(e, EngineEvent::EncodeStarted { .. }));
    assert_eq!(started, EngineEvent::EncodeStarted { total_frames: 4 });

    let finished = h.wait_for(is_encode_finished);
    assert!(matches!(
        finished,
        EngineEvent::EncodeFinished {
            status: Status::Ok,
            path: Some(_)
        }
    ));
}

#[test]
fn test_existing_output_is_not_overwritten() {
    let mut h = Harness::new(screen());
    let original = h.out_dir().join("out.y4m");
    fs::write(&original, b"keep me").unwrap();

    h.send(EngineCommand::ToggleCapture);
    h.wait_for(|e| *e == EngineEvent::CaptureStarted);
    thread::sleep(Duration::from_millis(300));
    h.send(EngineCommand::ToggleCapture);

    let finished = h.wait_for(is_encode_finished);
    assert_eq!(
        finished,
        EngineEvent::EncodeFinished {
            status: Status::Ok,
            path: Some(h.out_dir().join("out_1.y4m")),
        }
    );
    assert_eq!(fs::read(&original).unwrap(), b"keep me");
}

#[test]
fn test_no_frames_reports_failure_without_encoding() {
    let mut h = Harness::new(screen().fail_on_frame(1, -5));

    h.send(EngineCommand::StartCapture);
    let finished = h.wait_for(is_encode_finished);
    assert_eq!(
        finished,
        EngineEvent::EncodeFinished {
            status: Status::NoFrames,
            path: None,
        }
    );

    assert_eq!(h.count(|e| matches!(e, EngineEvent::EncodeStarted { .. })), 0);
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(entries(&h.out_dir()).is_empty());
}

#[test]
fn test_store_failure_reports_its_own_status() {
    let mut h = Harness::with_backend(screen(), Arc::new(BuiltinBackend::new()), |settings| {
        settings.disk_only = true;
    });

    h.send(EngineCommand::StartCapture);
    h.wait_for(|e| *e == EngineEvent::CaptureStarted);
    thread::sleep(Duration::from_millis(350));
    h.send(EngineCommand::TogglePause);
    h.wait_for(|e| *e == EngineEvent::CapturePaused);
    thread::sleep(Duration::from_millis(200));
    assert!(h.controller.recorded_frames() >= 2);

    // Pull the scratch directory out from under the store.
    fs::remove_dir_all(h.tmp_dir()).unwrap();
    h.send(EngineCommand::TogglePause);

    h.wait_for(|e| {
        *e == EngineEvent::CaptureStopped {
            reason: StopReason::CaptureFailed,
            status: Status::Io,
        }
    });
    let finished = h.wait_for(is_encode_finished);
    assert_eq!(
        finished,
        EngineEvent::EncodeFinished {
            status: Status::Io,
            path: None,
        }
    );

    h.settle(Duration::from_millis(300));
    assert_eq!(h.count(is_encode_finished), 1);
    assert_eq!(h.count(|e| matches!(e, EngineEvent::EncodeStarted { .. })), 0);
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(entries(&h.out_dir()).is_empty());
}

#[test]
fn test_temp_file_failure_returns_to_idle() {
    let mut h = Harness::new(screen());

    h.send(EngineCommand::StartCapture);
    h.wait_for(|e| *e == EngineEvent::CaptureStarted);
    thread::sleep(Duration::from_millis(300));

    // In-memory frames never touch the scratch root, so only the encode notices.
    fs::remove_dir_all(h.tmp_dir()).unwrap();
    h.send(EngineCommand::StopCapture);

    h.wait_for(|e| {
        *e == EngineEvent::CaptureStopped {
            reason: StopReason::UserRequested,
            status: Status::Ok,
        }
    });
    let finished = h.wait_for(is_encode_finished);
    assert_eq!(
        finished,
        EngineEvent::EncodeFinished {
            status: Status::TempFile,
            path: None,
        }
    );
    assert!(h.seen.contains(&EngineEvent::StateChanged {
        previous: SessionState::Recording,
        current: SessionState::Idle,
    }));
    assert_eq!(h.count(|e| matches!(e, EngineEvent::EncodeStarted { .. })), 0);
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(entries(&h.out_dir()).is_empty());
}

#[test]
fn test_auto_stop_after_requested_duration() {
    let mut h = Harness::new(screen());

    h.send(EngineCommand::SetRecordingDuration(500));
    h.send(EngineCommand::StartCapture);
    h.wait_for(|e| *e == EngineEvent::CaptureStarted);
    let started = Instant::now();

    h.wait_for(|e| matches!(e, EngineEvent::CaptureStopped { .. }));
    let took = started.elapsed();
    assert_eq!(
        h.seen.last(),
        Some(&EngineEvent::CaptureStopped {
            reason: StopReason::DurationElapsed,
            status: Status::Ok,
        })
    );
    assert!(took >= Duration::from_millis(400), "stopped after {took:?}");
    assert!(took < Duration::from_millis(1500), "stopped after {took:?}");

    h.wait_for(is_encode_finished);

    // The request was one-shot.
    h.send(EngineCommand::StartCapture);
    h.wait_for(|e| *e == EngineEvent::CaptureStarted);
    h.settle(Duration::from_millis(800));
    assert_eq!(h.controller.state(), SessionState::Recording);
}

#[test]
fn test_pause_excludes_paused_time() {
    let mut h = Harness::new(screen());

    h.send(EngineCommand::StartCapture);
    h.wait_for(|e| *e == EngineEvent::CaptureStarted);
    thread::sleep(Duration::from_millis(300));

    h.send(EngineCommand::TogglePause);
    h.wait_for(|e| *e == EngineEvent::CapturePaused);
    assert_eq!(h.controller.state(), SessionState::Paused);
    let frames_at_pause = h.controller.recorded_frames();
    thread::sleep(Duration::from_millis(700));
    assert!(h.controller.recorded_frames() <= frames_at_pause + 1);

    h.send(EngineCommand::TogglePause);
    h.wait_for(|e| *e == EngineEvent::CaptureResumed);
    thread::sleep(Duration::from_millis(300));

    h.send(EngineCommand::StopCapture);
    h.wait_for(|e| matches!(e, EngineEvent::CaptureStopped { .. }));

    let recorded = h.controller.record_time();
    assert!(recorded >= Duration::from_millis(550), "recorded {recorded:?}");
    assert!(recorded < Duration::from_millis(1000), "recorded {recorded:?}");

    h.wait_for(is_encode_finished);
}

#[test]
fn test_start_while_busy_is_ignored() {
    let mut h = Harness::new(screen());

    h.send(EngineCommand::StartCapture);
    h.wait_for(|e| *e == EngineEvent::CaptureStarted);
    h.send(EngineCommand::StartCapture);
    h.send(EngineCommand::GetState);
    h.wait_for(|e| {
        *e == EngineEvent::StateChanged {
            previous: SessionState::Recording,
            current: SessionState::Recording,
        }
    });
    assert_eq!(h.count(|e| *e == EngineEvent::CaptureStarted), 1);

    h.send(EngineCommand::Shutdown);
    let refused = h.wait_for(|e| matches!(e, EngineEvent::ShutdownRefused { .. }));
    assert_eq!(
        refused,
        EngineEvent::ShutdownRefused {
            reason: "Recording in progress.".into()
        }
    );

    h.send(EngineCommand::Cancel);
    h.wait_for(|e| {
        *e == EngineEvent::CaptureStopped {
            reason: StopReason::Cancelled,
            status: Status::Cancelled,
        }
    });
    h.send(EngineCommand::Shutdown);
    h.wait_for(|e| *e == EngineEvent::Shutdown);
    assert_eq!(h.count(is_encode_finished), 0);
    assert!(entries(&h.tmp_dir()).is_empty());
}

/// A backend whose only codec takes a while per frame.
struct SlowBackend;

struct SlowSink {
    path: PathBuf,
    frames: usize,
}

impl FrameSink for SlowSink {
    fn write_frame(&mut self, _frame: &DrainedFrame) -> EncoderResult<()> {
        thread::sleep(Duration::from_millis(100));
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> EncoderResult<()> {
        fs::write(&self.path, self.frames.to_string())?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

impl CodecBackend for SlowBackend {
    fn file_formats(&self) -> Vec<FileFormat> {
        vec![FileFormat::new("slow", "Slow container", "slow", FormatFamily::Raw)]
    }

    fn codecs_for(&self, _file_format: &FileFormat, _format: &VideoFormat) -> Vec<CodecInfo> {
        vec![CodecInfo::new("slow-codec", "Slow codec")]
    }

    fn open_sink(
        &self,
        _file_format: &FileFormat,
        _codec: &CodecInfo,
        _format: VideoFormat,
        path: &Path,
    ) -> EncoderResult<Box<dyn FrameSink>> {
        Ok(Box::new(SlowSink {
            path: path.to_path_buf(),
            frames: 0,
        }))
    }

    fn name(&self) -> &str {
        "slow"
    }
}

#[test]
fn test_cancel_during_encode_reports_once() {
    let mut h = Harness::with_backend(screen(), Arc::new(SlowBackend), |settings| {
        settings.file_format = "slow".into();
        settings.codec = "slow-codec".into();
    });
    assert_eq!(h.controller.file_format().short_name, "slow");

    h.send(EngineCommand::StartCapture);
    h.wait_for(|e| *e == EngineEvent::CaptureStarted);
    thread::sleep(Duration::from_millis(1000));
    h.send(EngineCommand::StopCapture);
    h.wait_for(|e| matches!(e, EngineEvent::EncodeStarted { .. }));

    let cancelled_at = Instant::now();
    h.send(EngineCommand::Cancel);
    let finished = h.wait_for(is_encode_finished);
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    assert_eq!(
        finished,
        EngineEvent::EncodeFinished {
            status: Status::Cancelled,
            path: None,
        }
    );

    h.settle(Duration::from_millis(500));
    assert_eq!(h.count(is_encode_finished), 1);
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(entries(&h.out_dir()).is_empty());
    assert!(entries(&h.tmp_dir()).is_empty());
}
