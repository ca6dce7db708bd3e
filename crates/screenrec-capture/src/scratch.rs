//! On-disk scratch space for spilled frames.
//!
//! Each frame store owns one scratch directory. Spilled frames are written as
//! a fixed 32-byte header followed by the raw pixel rows:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 4 | magic `RFRM` |
//! | 4 | 2 | format version (LE) |
//! | 6 | 1 | color depth tag |
//! | 7 | 1 | reserved |
//! | 8 | 4 | width (LE) |
//! | 12 | 4 | height (LE) |
//! | 16 | 8 | presentation offset, 100ns units (LE) |
//! | 24 | 8 | pixel data length (LE) |

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use screenrec_ipc::ColorDepth;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::CaptureError;
use crate::frame::Bitmap;
use crate::CaptureResult;

const MAGIC: &[u8; 4] = b"RFRM";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 32;

/// A uniquely named directory that is removed when dropped.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
}

impl ScratchDir {
    /// Create a scratch directory under the system temp directory.
    pub fn create() -> CaptureResult<Self> {
        Self::create_in(std::env::temp_dir())
    }

    /// Create a scratch directory under `root`.
    pub fn create_in(root: impl AsRef<Path>) -> CaptureResult<Self> {
        let prefix = format!("screenrec-{}-", std::process::id());
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(root)
            .map_err(CaptureError::Scratch)?;
        debug!(path = ?dir.path(), "Created scratch directory");
        Ok(Self { dir: Some(dir) })
    }

    /// Location of the directory.
    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(dir) => dir.path(),
            None => Path::new(""),
        }
    }

    /// File name used for the frame at `index`.
    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.path().join(format!("frame_{index}.rfr"))
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(path = ?path, error = %e, "Failed to remove scratch directory");
            }
        }
    }
}

/// Write `bitmap` to a new file at `path`. Fails if the file already exists.
pub(crate) fn write_frame(path: &Path, bitmap: &Bitmap, pts_100ns: u64) -> CaptureResult<()> {
    let spill_err = |source| CaptureError::Spill {
        path: path.to_path_buf(),
        source,
    };

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(spill_err)?;

    let mut header = BytesMut::with_capacity(HEADER_LEN);
    header.put_slice(MAGIC);
    header.put_u16_le(VERSION);
    header.put_u8(bitmap.depth().tag());
    header.put_u8(0);
    header.put_u32_le(bitmap.width());
    header.put_u32_le(bitmap.height());
    header.put_u64_le(pts_100ns);
    header.put_u64_le(bitmap.byte_len() as u64);

    let mut writer = BufWriter::new(file);
    writer.write_all(&header).map_err(spill_err)?;
    writer.write_all(bitmap.data()).map_err(spill_err)?;
    writer.flush().map_err(spill_err)?;

    Ok(())
}

/// Read a frame written by [`write_frame`], returning the bitmap and its pts.
pub(crate) fn read_frame(path: &Path) -> CaptureResult<(Bitmap, u64)> {
    let load_err = |source| CaptureError::Load {
        path: path.to_path_buf(),
        source,
    };
    let corrupt = |reason: &str| CaptureError::CorruptFrame {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut reader = BufReader::new(File::open(path).map_err(load_err)?);
    let mut raw = [0u8; HEADER_LEN];
    reader.read_exact(&mut raw).map_err(load_err)?;

    let mut header = &raw[..];
    if &header[..4] != MAGIC {
        return Err(corrupt("bad magic"));
    }
    header.advance(4);
    if header.get_u16_le() != VERSION {
        return Err(corrupt("unsupported version"));
    }
    let depth = ColorDepth::from_tag(header.get_u8()).ok_or_else(|| corrupt("unknown depth"))?;
    header.advance(1);
    let width = header.get_u32_le();
    let height = header.get_u32_le();
    let pts_100ns = header.get_u64_le();
    let len = header.get_u64_le() as usize;

    if len != Bitmap::buffer_size(width, height, depth) {
        return Err(corrupt("length does not match dimensions"));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).map_err(load_err)?;

    Ok((Bitmap::new(width, height, depth, data)?, pts_100ns))
}

/// Remove a spilled frame file, logging on failure.
pub(crate) fn remove_frame(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = ?path, error = %e, "Failed to remove spilled frame");
    }
}
