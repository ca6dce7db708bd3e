//! Ordered frame storage with optional spilling to disk.
//!
//! A [`FrameStore`] is append-only while capturing. Once capture ends it is
//! frozen into [`FrozenFrames`], which can be inspected and finally drained
//! by the encoder. Every frame is held either in memory or in a scratch file,
//! never both.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument, trace};

use crate::error::CaptureError;
use crate::frame::{Bitmap, CaptureTimestamp};
use crate::scratch::{self, ScratchDir};
use crate::CaptureResult;

/// How a frame store keeps its bitmaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorePolicy {
    /// Write every frame to disk as soon as it is appended.
    pub disk_only: bool,

    /// Spill the oldest resident frames once resident bytes exceed this.
    pub max_resident_bytes: Option<u64>,

    /// Parent directory for scratch files; the system temp dir if unset.
    pub scratch_root: Option<PathBuf>,
}

impl StorePolicy {
    /// Keep every frame in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Keep no frame in memory past `append`.
    pub fn disk_only() -> Self {
        Self {
            disk_only: true,
            ..Self::default()
        }
    }

    /// Keep frames in memory up to `bytes`, spilling the oldest beyond that.
    pub fn with_budget(bytes: u64) -> Self {
        Self {
            max_resident_bytes: Some(bytes),
            ..Self::default()
        }
    }

    /// Place scratch files under `root`.
    pub fn scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }
}

#[derive(Debug)]
enum Backing {
    Memory(Bitmap),
    Disk(PathBuf),
}

/// A stored frame.
#[derive(Debug)]
pub struct Frame {
    timestamp: CaptureTimestamp,
    backing: Backing,
}

impl Frame {
    /// When the frame was captured.
    pub fn timestamp(&self) -> CaptureTimestamp {
        self.timestamp
    }

    /// Returns true if the bitmap lives in a scratch file.
    pub fn is_spilled(&self) -> bool {
        matches!(self.backing, Backing::Disk(_))
    }

    /// Scratch file holding the bitmap, if spilled.
    pub fn spill_path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Disk(path) => Some(path),
            Backing::Memory(_) => None,
        }
    }

    /// Get the bitmap, reading it back from disk if spilled.
    pub fn load(&self) -> CaptureResult<Bitmap> {
        match &self.backing {
            Backing::Memory(bitmap) => Ok(bitmap.clone()),
            Backing::Disk(path) => scratch::read_frame(path).map(|(bitmap, _)| bitmap),
        }
    }
}

/// Append-only frame collection used during capture.
#[derive(Debug)]
pub struct FrameStore {
    frames: Vec<Frame>,
    policy: StorePolicy,
    scratch: Option<ScratchDir>,
    resident_bytes: u64,
    resident_frames: usize,
    peak_resident_frames: usize,

    /// Index of the oldest frame that may still be resident.
    spill_cursor: usize,
}

impl FrameStore {
    /// Create an empty store.
    ///
    /// Disk-only stores create their scratch directory up front so that a
    /// missing temp dir fails the session before capture starts.
    #[instrument(name = "frame_store_new")]
    pub fn new(policy: StorePolicy) -> CaptureResult<Self> {
        let scratch = if policy.disk_only {
            Some(Self::create_scratch(&policy)?)
        } else {
            None
        };

        debug!("Created frame store");

        Ok(Self {
            frames: Vec::new(),
            policy,
            scratch,
            resident_bytes: 0,
            resident_frames: 0,
            peak_resident_frames: 0,
            spill_cursor: 0,
        })
    }

    fn create_scratch(policy: &StorePolicy) -> CaptureResult<ScratchDir> {
        match &policy.scratch_root {
            Some(root) => ScratchDir::create_in(root),
            None => ScratchDir::create(),
        }
    }

    /// Append a frame, taking ownership of its bitmap.
    pub fn append(&mut self, bitmap: Bitmap, timestamp: CaptureTimestamp) -> CaptureResult<()> {
        self.frames
            .try_reserve(1)
            .map_err(|_| CaptureError::OutOfMemory)?;

        // The incoming bitmap is resident until stored.
        self.peak_resident_frames = self.peak_resident_frames.max(self.resident_frames + 1);

        let index = self.frames.len();
        if self.policy.disk_only {
            let path = self.scratch_dir()?.frame_path(index);
            scratch::write_frame(&path, &bitmap, timestamp.pts_100ns)?;
            trace!(index, path = ?path, "Frame written to disk");
            self.frames.push(Frame {
                timestamp,
                backing: Backing::Disk(path),
            });
            return Ok(());
        }

        self.resident_bytes += bitmap.byte_len() as u64;
        self.resident_frames += 1;
        self.frames.push(Frame {
            timestamp,
            backing: Backing::Memory(bitmap),
        });
        trace!(index, resident_bytes = self.resident_bytes, "Frame stored");

        if let Some(budget) = self.policy.max_resident_bytes {
            while self.resident_bytes > budget && self.spill_cursor < self.frames.len() {
                self.spill(self.spill_cursor)?;
                self.spill_cursor += 1;
            }
        }

        Ok(())
    }

    fn scratch_dir(&mut self) -> CaptureResult<&ScratchDir> {
        let scratch = match self.scratch.take() {
            Some(scratch) => scratch,
            None => Self::create_scratch(&self.policy)?,
        };
        Ok(self.scratch.insert(scratch))
    }

    /// Move the frame at `index` to disk. The file is written before the
    /// in-memory bitmap is released.
    fn spill(&mut self, index: usize) -> CaptureResult<()> {
        let path = self.scratch_dir()?.frame_path(index);
        let frame = &mut self.frames[index];
        let Backing::Memory(bitmap) = &frame.backing else {
            return Ok(());
        };

        scratch::write_frame(&path, bitmap, frame.timestamp.pts_100ns)?;
        let released = bitmap.byte_len() as u64;
        frame.backing = Backing::Disk(path);

        self.resident_bytes -= released;
        self.resident_frames -= 1;
        trace!(index, "Frame spilled to disk");
        Ok(())
    }

    /// Number of frames stored.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if no frame has been stored.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames currently held in memory.
    pub fn resident_frames(&self) -> usize {
        self.resident_frames
    }

    /// Highest number of bitmaps held in memory at once, including one being appended.
    pub fn peak_resident_frames(&self) -> usize {
        self.peak_resident_frames
    }

    /// Bytes of bitmap data currently held in memory.
    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes
    }

    /// Scratch directory, once one exists.
    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(ScratchDir::path)
    }

    /// Finish capturing. The returned collection is read-only.
    pub fn freeze(self) -> FrozenFrames {
        debug!(frames = self.frames.len(), "Frame store frozen");
        FrozenFrames {
            frames: self.frames,
            scratch: self.scratch,
        }
    }
}

/// A finished, read-only recording.
#[derive(Debug)]
pub struct FrozenFrames {
    frames: Vec<Frame>,
    scratch: Option<ScratchDir>,
}

impl FrozenFrames {
    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if the recording holds no frame.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame at `index`.
    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// Iterate over frames in capture order without consuming them.
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    /// Consume the recording, yielding frames in capture order.
    ///
    /// Spilled frames are loaded lazily and their files removed as they are
    /// yielded. Files not reached are removed when the iterator is dropped.
    pub fn drain(self) -> Drain {
        Drain {
            frames: self.frames.into_iter(),
            next_index: 0,
            _scratch: self.scratch,
        }
    }
}

/// A frame yielded by [`Drain`].
#[derive(Debug)]
pub struct DrainedFrame {
    /// Position in the recording.
    pub index: usize,

    /// Capture timestamp.
    pub timestamp: CaptureTimestamp,

    /// Pixel data.
    pub bitmap: Bitmap,
}

/// Single-pass iterator over a frozen recording.
#[derive(Debug)]
pub struct Drain {
    frames: std::vec::IntoIter<Frame>,
    next_index: usize,

    // Dropped last so residual files go with the directory.
    _scratch: Option<ScratchDir>,
}

impl Iterator for Drain {
    type Item = CaptureResult<DrainedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.frames.next()?;
        let index = self.next_index;
        self.next_index += 1;

        let bitmap = match frame.backing {
            Backing::Memory(bitmap) => Ok(bitmap),
            Backing::Disk(path) => {
                let loaded = scratch::read_frame(&path).map(|(bitmap, _)| bitmap);
                scratch::remove_frame(&path);
                loaded
            }
        };

        Some(bitmap.map(|bitmap| DrainedFrame {
            index,
            timestamp: frame.timestamp,
            bitmap,
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.frames.size_hint()
    }
}

impl ExactSizeIterator for Drain {}

impl Drop for Drain {
    fn drop(&mut self) {
        let remaining = self.frames.len();
        if remaining > 0 {
            debug!(remaining, "Discarding undrained frames");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use screenrec_ipc::ColorDepth;

    use super::*;

    fn timestamp(start: Instant, ms: u64) -> CaptureTimestamp {
        CaptureTimestamp::from_elapsed(start + Duration::from_millis(ms), Duration::from_millis(ms))
    }

    fn bitmap(shade: u8) -> Bitmap {
        Bitmap::filled(8, 8, ColorDepth::Bgra32, [shade, shade, shade])
    }

    fn fill(store: &mut FrameStore, count: u8) {
        let start = Instant::now();
        for i in 0..count {
            store.append(bitmap(i), timestamp(start, i as u64 * 100)).unwrap();
        }
    }

    fn assert_drains_in_order(frozen: FrozenFrames, count: usize) {
        let drained: Vec<_> = frozen.drain().map(Result::unwrap).collect();
        assert_eq!(drained.len(), count);
        for (i, frame) in drained.iter().enumerate() {
            assert_eq!(frame.index, i);
            assert_eq!(frame.bitmap.pixel_rgb(0, 0), [i as u8; 3]);
            assert_eq!(frame.timestamp.pts_ms(), i as u64 * 100);
        }
    }

    #[test]
    fn test_in_memory_drain_order() {
        let mut store = FrameStore::new(StorePolicy::in_memory()).unwrap();
        fill(&mut store, 12);

        assert_eq!(store.len(), 12);
        assert_eq!(store.resident_frames(), 12);
        assert!(store.scratch_path().is_none());
        assert_drains_in_order(store.freeze(), 12);
    }

    #[test]
    fn test_disk_only_keeps_at_most_one_frame_resident() {
        let root = tempfile::tempdir().unwrap();
        let mut store =
            FrameStore::new(StorePolicy::disk_only().scratch_root(root.path())).unwrap();
        fill(&mut store, 20);

        assert_eq!(store.len(), 20);
        assert_eq!(store.resident_frames(), 0);
        assert_eq!(store.resident_bytes(), 0);
        assert!(store.peak_resident_frames() <= 1);
        assert_drains_in_order(store.freeze(), 20);
    }

    #[test]
    fn test_budget_spills_oldest_frames() {
        let root = tempfile::tempdir().unwrap();
        // Each bitmap is 256 bytes; keep at most three resident.
        let policy = StorePolicy::with_budget(3 * 256).scratch_root(root.path());
        let mut store = FrameStore::new(policy).unwrap();
        fill(&mut store, 10);

        assert_eq!(store.resident_frames(), 3);
        assert_eq!(store.resident_bytes(), 3 * 256);

        let frozen = store.freeze();
        let spilled: Vec<bool> = frozen.iter().map(Frame::is_spilled).collect();
        assert_eq!(&spilled[..7], &[true; 7]);
        assert_eq!(&spilled[7..], &[false; 3]);
        assert_drains_in_order(frozen, 10);
    }

    #[test]
    fn test_frozen_get_loads_spilled_frame() {
        let root = tempfile::tempdir().unwrap();
        let mut store =
            FrameStore::new(StorePolicy::disk_only().scratch_root(root.path())).unwrap();
        fill(&mut store, 3);

        let frozen = store.freeze();
        let frame = frozen.get(2).unwrap();
        assert!(frame.is_spilled());
        assert_eq!(frame.load().unwrap().pixel_rgb(7, 7), [2, 2, 2]);
        assert!(frozen.get(3).is_none());
    }

    #[test]
    fn test_drain_removes_files_as_it_goes() {
        let root = tempfile::tempdir().unwrap();
        let mut store =
            FrameStore::new(StorePolicy::disk_only().scratch_root(root.path())).unwrap();
        fill(&mut store, 4);

        let frozen = store.freeze();
        let paths: Vec<PathBuf> = frozen
            .iter()
            .filter_map(|f| f.spill_path().map(Path::to_path_buf))
            .collect();
        assert_eq!(paths.len(), 4);

        let mut drain = frozen.drain();
        drain.next().unwrap().unwrap();
        assert!(!paths[0].exists());
        assert!(paths[1].exists());
        assert_eq!(drain.len(), 3);
    }

    #[test]
    fn test_dropping_store_removes_scratch_dir() {
        let root = tempfile::tempdir().unwrap();
        let mut store =
            FrameStore::new(StorePolicy::disk_only().scratch_root(root.path())).unwrap();
        fill(&mut store, 2);
        let dir = store.scratch_path().unwrap().to_path_buf();
        assert!(dir.is_dir());

        let mut drain = store.freeze().drain();
        drain.next().unwrap().unwrap();
        drop(drain);
        assert!(!dir.exists());
    }

    #[test]
    fn test_disk_only_fails_without_scratch_root() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("missing");
        let err = FrameStore::new(StorePolicy::disk_only().scratch_root(missing)).unwrap_err();
        assert!(err.is_store_failure());
    }
}
