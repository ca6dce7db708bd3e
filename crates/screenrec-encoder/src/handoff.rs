//! Background encoding of a finished recording.
//!
//! [`EncodeHandoff::start`] takes ownership of a frozen recording, streams it
//! through a sink on its own thread, moves the result into place and reports
//! the outcome exactly once.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use screenrec_capture::FrozenFrames;
use screenrec_ipc::Status;
use tracing::{debug, info, instrument, trace, warn};

use crate::backend::{open_sink, CodecBackend};
use crate::error::EncoderError;
use crate::format::{SinkKind, VideoFormat};
use crate::output::TempOutput;
use crate::sink::FrameSink;
use crate::EncoderResult;

/// Everything needed to encode one recording.
#[derive(Debug)]
pub struct EncodeJob {
    /// The recording; consumed by the encode.
    pub frames: FrozenFrames,

    /// Sink to write with.
    pub sink: SinkKind,

    /// Geometry and rate of the recording.
    pub format: VideoFormat,

    /// Requested final location.
    pub destination: PathBuf,

    /// Directory for the temporary output.
    pub temp_root: PathBuf,
}

/// Reports sent from the encode thread.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeReport {
    /// A frame was encoded.
    Progress {
        /// Frames still to encode.
        remaining: u64,

        /// Frames in the recording.
        total: u64,

        /// Human readable progress line.
        text: String,
    },

    /// The encode is over; sent exactly once.
    Finished {
        /// Outcome.
        status: Status,

        /// Final output location, if one was written.
        path: Option<PathBuf>,
    },
}

/// Sends the final report once, even if the encode thread unwinds.
struct CompletionGuard<R: Fn(EncodeReport)> {
    report: R,
    sent: bool,
}

impl<R: Fn(EncodeReport)> CompletionGuard<R> {
    fn progress(&self, remaining: u64, total: u64) {
        let done = total - remaining;
        (self.report)(EncodeReport::Progress {
            remaining,
            total,
            text: format!("Encoding frame {done} of {total}"),
        });
    }

    fn finish(mut self, status: Status, path: Option<PathBuf>) {
        self.sent = true;
        (self.report)(EncodeReport::Finished { status, path });
    }
}

impl<R: Fn(EncodeReport)> Drop for CompletionGuard<R> {
    fn drop(&mut self) {
        if !self.sent {
            warn!("Encode ended without a result");
            (self.report)(EncodeReport::Finished {
                status: Status::Encoder,
                path: None,
            });
        }
    }
}

/// Why the frame loop stopped early.
enum Interrupted {
    Cancelled,
    Failed(EncoderError),
}

impl From<EncoderError> for Interrupted {
    fn from(e: EncoderError) -> Self {
        Self::Failed(e)
    }
}

/// Handle to a running encode.
pub struct EncodeHandoff {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    total_frames: u64,
}

impl EncodeHandoff {
    /// Start encoding `job` on a new thread.
    ///
    /// The temporary output is created before the thread starts; failing that,
    /// or failing to spawn, returns an error and `report` is never called.
    /// Otherwise `report` receives progress and then exactly one
    /// [`EncodeReport::Finished`].
    #[instrument(
        name = "encode_start",
        skip_all,
        fields(sink = %job.sink.name(), frames = job.frames.len())
    )]
    pub fn start<R>(
        job: EncodeJob,
        backend: Arc<dyn CodecBackend>,
        report: R,
    ) -> EncoderResult<Self>
    where
        R: Fn(EncodeReport) + Send + 'static,
    {
        if job.frames.is_empty() {
            return Err(EncoderError::NoFrames);
        }

        let output = TempOutput::create(job.sink.output_kind(), &job.temp_root)?;
        let total_frames = job.frames.len() as u64;
        let cancel = Arc::new(AtomicBool::new(false));

        let thread_cancel = Arc::clone(&cancel);
        let handle = std::thread::Builder::new()
            .name("screenrec-encode".into())
            .spawn(move || {
                let guard = CompletionGuard {
                    report,
                    sent: false,
                };
                run_encode(job, output, backend.as_ref(), &thread_cancel, guard);
            })
            .map_err(EncoderError::ThreadSpawn)?;

        info!(total_frames, "Encode started");

        Ok(Self {
            cancel,
            handle: Some(handle),
            total_frames,
        })
    }

    /// Frames handed to the encoder.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Ask the encode to stop before its next frame.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Returns true once the encode thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the encode thread to exit.
    pub fn join(mut self) {
        self.join_inner();
    }

    fn join_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Encode thread panicked");
            }
        }
    }
}

impl Drop for EncodeHandoff {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel();
            self.join_inner();
        }
    }
}

fn run_encode<R: Fn(EncodeReport)>(
    job: EncodeJob,
    output: TempOutput,
    backend: &dyn CodecBackend,
    cancel: &AtomicBool,
    guard: CompletionGuard<R>,
) {
    let EncodeJob {
        frames,
        sink,
        format,
        destination,
        ..
    } = job;

    let encoded = open_sink(&sink, backend, format, output.path())
        .map_err(Interrupted::from)
        .and_then(|sink| write_all(sink, frames, cancel, &guard));

    // A cancel that lands while the sink is finishing still discards the output.
    let encoded = match encoded {
        Ok(()) if cancel.load(Ordering::SeqCst) => Err(Interrupted::Cancelled),
        other => other,
    };

    match encoded {
        Ok(()) => match output.persist_to(&destination) {
            Ok(path) => {
                info!(path = ?path, "Encode finished");
                guard.finish(Status::Ok, path);
            }
            Err(e) => {
                warn!(error = %e, "Failed to move encoded output");
                guard.finish(e.status(), None);
            }
        },
        Err(Interrupted::Cancelled) => {
            drop(output);
            info!("Encode cancelled");
            guard.finish(Status::Cancelled, None);
        }
        Err(Interrupted::Failed(e)) => {
            drop(output);
            warn!(error = %e, "Encode failed");
            guard.finish(e.status(), None);
        }
    }
}

fn write_all<R: Fn(EncodeReport)>(
    mut sink: Box<dyn FrameSink>,
    frames: FrozenFrames,
    cancel: &AtomicBool,
    guard: &CompletionGuard<R>,
) -> Result<(), Interrupted> {
    let total = frames.len() as u64;
    debug!(sink = sink.name(), total, "Writing frames");

    for (written, frame) in frames.drain().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            sink.abort();
            return Err(Interrupted::Cancelled);
        }

        let written_ok = frame
            .map_err(EncoderError::from)
            .and_then(|frame| sink.write_frame(&frame));
        if let Err(e) = written_ok {
            sink.abort();
            return Err(e.into());
        }

        let remaining = total - written as u64 - 1;
        trace!(remaining, "Frame encoded");
        guard.progress(remaining, total);
    }

    if cancel.load(Ordering::SeqCst) {
        sink.abort();
        return Err(Interrupted::Cancelled);
    }

    sink.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;
    use screenrec_capture::{Bitmap, CaptureTimestamp, DrainedFrame, FrameStore, StorePolicy};
    use screenrec_ipc::{CodecInfo, ColorDepth, FileFormat, FormatFamily};

    use super::*;
    use crate::backend::BuiltinBackend;

    fn recording(count: usize) -> FrozenFrames {
        let mut store = FrameStore::new(StorePolicy::in_memory()).unwrap();
        let start = Instant::now();
        for i in 0..count {
            let offset = Duration::from_millis(i as u64 * 100);
            store
                .append(
                    Bitmap::filled(4, 4, ColorDepth::Bgra32, [i as u8, 0, 0]),
                    CaptureTimestamp::from_elapsed(start + offset, offset),
                )
                .unwrap();
        }
        store.freeze()
    }

    fn format() -> VideoFormat {
        VideoFormat {
            width: 4,
            height: 4,
            depth: ColorDepth::Bgra32,
            frame_rate: 10,
        }
    }

    fn y4m_kind() -> SinkKind {
        SinkKind::Container {
            file_format: FileFormat::new("y4m", "YUV4MPEG2", "y4m", FormatFamily::Raw),
            codec: CodecInfo::new("raw-i420", "Raw I420"),
        }
    }

    fn collect() -> (Arc<Mutex<Vec<EncodeReport>>>, impl Fn(EncodeReport) + Send + 'static) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        (reports, move |r| sink.lock().push(r))
    }

    fn finished(reports: &[EncodeReport]) -> Vec<&EncodeReport> {
        reports
            .iter()
            .filter(|r| matches!(r, EncodeReport::Finished { .. }))
            .collect()
    }

    #[test]
    fn test_encode_moves_output_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.y4m");
        let (reports, report) = collect();

        let job = EncodeJob {
            frames: recording(3),
            sink: y4m_kind(),
            format: format(),
            destination: destination.clone(),
            temp_root: dir.path().to_path_buf(),
        };
        let handoff = EncodeHandoff::start(job, Arc::new(BuiltinBackend), report).unwrap();
        assert_eq!(handoff.total_frames(), 3);
        handoff.join();

        let reports = reports.lock();
        assert_eq!(
            reports.last(),
            Some(&EncodeReport::Finished {
                status: Status::Ok,
                path: Some(destination.clone()),
            })
        );
        assert_eq!(finished(&reports).len(), 1);
        assert!(matches!(
            reports[0],
            EncodeReport::Progress {
                remaining: 2,
                total: 3,
                ..
            }
        ));
        assert!(destination.is_file());

        // Only the final file is left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_existing_destination_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.gif");
        std::fs::write(&destination, b"keep me").unwrap();
        let (reports, report) = collect();

        let job = EncodeJob {
            frames: recording(2),
            sink: SinkKind::Gif,
            format: format(),
            destination: destination.clone(),
            temp_root: dir.path().to_path_buf(),
        };
        EncodeHandoff::start(job, Arc::new(BuiltinBackend), report)
            .unwrap()
            .join();

        assert_eq!(
            reports.lock().last(),
            Some(&EncodeReport::Finished {
                status: Status::Ok,
                path: Some(dir.path().join("out_1.gif")),
            })
        );
        assert_eq!(std::fs::read(&destination).unwrap(), b"keep me");
    }

    #[test]
    fn test_empty_recording_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (reports, report) = collect();
        let job = EncodeJob {
            frames: recording(0),
            sink: SinkKind::Null,
            format: format(),
            destination: dir.path().join("x"),
            temp_root: dir.path().to_path_buf(),
        };

        let result = EncodeHandoff::start(job, Arc::new(BuiltinBackend), report);
        assert!(matches!(result, Err(EncoderError::NoFrames)));
        assert!(reports.lock().is_empty());
    }

    #[test]
    fn test_temp_failure_before_thread_starts() {
        let dir = tempfile::tempdir().unwrap();
        let (reports, report) = collect();
        let job = EncodeJob {
            frames: recording(1),
            sink: SinkKind::Gif,
            format: format(),
            destination: dir.path().join("x.gif"),
            temp_root: dir.path().join("missing"),
        };

        let result = EncodeHandoff::start(job, Arc::new(BuiltinBackend), report);
        assert!(matches!(result, Err(EncoderError::TempFile(_))));
        assert!(reports.lock().is_empty());
    }

    /// Backend whose sink takes a while per frame and to finish.
    struct SlowBackend {
        frame_delay: Duration,
        finish_delay: Duration,
    }

    impl SlowBackend {
        fn per_frame() -> Self {
            Self {
                frame_delay: Duration::from_millis(50),
                finish_delay: Duration::ZERO,
            }
        }
    }

    struct SlowSink {
        frame_delay: Duration,
        finish_delay: Duration,
    }

    impl FrameSink for SlowSink {
        fn write_frame(&mut self, _frame: &DrainedFrame) -> EncoderResult<()> {
            std::thread::sleep(self.frame_delay);
            Ok(())
        }

        fn finish(self: Box<Self>) -> EncoderResult<()> {
            std::thread::sleep(self.finish_delay);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    impl CodecBackend for SlowBackend {
        fn file_formats(&self) -> Vec<FileFormat> {
            Vec::new()
        }

        fn codecs_for(&self, _: &FileFormat, _: &VideoFormat) -> Vec<CodecInfo> {
            Vec::new()
        }

        fn open_sink(
            &self,
            _: &FileFormat,
            _: &CodecInfo,
            _: VideoFormat,
            _: &Path,
        ) -> EncoderResult<Box<dyn FrameSink>> {
            Ok(Box::new(SlowSink {
                frame_delay: self.frame_delay,
                finish_delay: self.finish_delay,
            }))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[test]
    fn test_cancel_reports_once_and_discards_output() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.y4m");
        let (reports, report) = collect();

        let job = EncodeJob {
            frames: recording(100),
            sink: y4m_kind(),
            format: format(),
            destination: destination.clone(),
            temp_root: dir.path().to_path_buf(),
        };
        let backend = Arc::new(SlowBackend::per_frame());
        let handoff = EncodeHandoff::start(job, backend, report).unwrap();
        std::thread::sleep(Duration::from_millis(120));

        let cancelled_at = Instant::now();
        handoff.cancel();
        handoff.join();
        assert!(cancelled_at.elapsed() < Duration::from_secs(1));

        let reports = reports.lock();
        assert_eq!(
            finished(&reports),
            vec![&EncodeReport::Finished {
                status: Status::Cancelled,
                path: None,
            }]
        );
        assert!(!destination.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cancel_while_finishing_discards_output() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.y4m");
        let (reports, report) = collect();
        let backend = SlowBackend {
            frame_delay: Duration::ZERO,
            finish_delay: Duration::from_millis(300),
        };

        let job = EncodeJob {
            frames: recording(2),
            sink: y4m_kind(),
            format: format(),
            destination: destination.clone(),
            temp_root: dir.path().to_path_buf(),
        };
        let handoff = EncodeHandoff::start(job, Arc::new(backend), report).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while reports.lock().len() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        handoff.cancel();
        handoff.join();

        let reports = reports.lock();
        assert_eq!(reports.len(), 3);
        assert_eq!(
            reports.last(),
            Some(&EncodeReport::Finished {
                status: Status::Cancelled,
                path: None,
            })
        );
        assert!(!destination.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    struct PanickingSink;

    impl FrameSink for PanickingSink {
        fn write_frame(&mut self, _frame: &DrainedFrame) -> EncoderResult<()> {
            panic!("sink exploded");
        }

        fn finish(self: Box<Self>) -> EncoderResult<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    struct PanickingBackend;

    impl CodecBackend for PanickingBackend {
        fn file_formats(&self) -> Vec<FileFormat> {
            Vec::new()
        }

        fn codecs_for(&self, _: &FileFormat, _: &VideoFormat) -> Vec<CodecInfo> {
            Vec::new()
        }

        fn open_sink(
            &self,
            _: &FileFormat,
            _: &CodecInfo,
            _: VideoFormat,
            _: &Path,
        ) -> EncoderResult<Box<dyn FrameSink>> {
            Ok(Box::new(PanickingSink))
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    #[test]
    fn test_panicking_sink_still_reports_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (reports, report) = collect();
        let job = EncodeJob {
            frames: recording(2),
            sink: y4m_kind(),
            format: format(),
            destination: dir.path().join("out.y4m"),
            temp_root: dir.path().to_path_buf(),
        };

        EncodeHandoff::start(job, Arc::new(PanickingBackend), report)
            .unwrap()
            .join();

        let reports = reports.lock();
        assert_eq!(
            finished(&reports),
            vec![&EncodeReport::Finished {
                status: Status::Encoder,
                path: None,
            }]
        );
    }
}
