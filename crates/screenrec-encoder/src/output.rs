//! Temporary encode output and its relocation to the final destination.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, TempPath};
use tracing::{debug, warn};

use crate::error::EncoderError;
use crate::format::OutputKind;
use crate::EncoderResult;

/// Prefix of temporary clips.
pub const TEMP_PREFIX: &str = "screenrec_clip_";

/// Upper bound on `_N` suffixes tried before giving up.
const MAX_DISAMBIGUATION: u32 = 10_000;

/// Where a sink writes while encoding. Removed on drop unless persisted.
#[derive(Debug)]
pub enum TempOutput {
    /// The sink writes nothing.
    None,

    /// A uniquely named file.
    File(TempPath),

    /// A uniquely named directory.
    Directory(TempDir),
}

impl TempOutput {
    /// Create a unique temporary output under `root`.
    pub fn create(kind: OutputKind, root: &Path) -> EncoderResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX);

        let output = match kind {
            OutputKind::None => Self::None,
            OutputKind::File => Self::File(
                builder
                    .tempfile_in(root)
                    .map_err(EncoderError::TempFile)?
                    .into_temp_path(),
            ),
            OutputKind::Directory => {
                Self::Directory(builder.tempdir_in(root).map_err(EncoderError::TempFile)?)
            }
        };

        debug!(path = ?output.path(), "Created temporary output");
        Ok(output)
    }

    /// Location of the temporary output.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::None => None,
            Self::File(path) => Some(&**path),
            Self::Directory(dir) => Some(dir.path()),
        }
    }

    /// Move the output to `destination`, or to a `_N` variant if that exists.
    ///
    /// The chosen name is reserved before anything is moved, so an existing
    /// file is never overwritten. Returns the final path, `None` for
    /// [`TempOutput::None`].
    pub fn persist_to(self, destination: &Path) -> EncoderResult<Option<PathBuf>> {
        match self {
            Self::None => Ok(None),
            Self::File(temp) => {
                let target = reserve(destination, false).map_err(|source| EncoderError::Output {
                    path: destination.to_path_buf(),
                    source,
                })?;
                move_file(temp, &target)?;
                debug!(path = ?target, "Output file in place");
                Ok(Some(target))
            }
            Self::Directory(temp) => {
                let target = reserve(destination, true).map_err(|source| EncoderError::Output {
                    path: destination.to_path_buf(),
                    source,
                })?;
                move_dir(temp, &target)?;
                debug!(path = ?target, "Output directory in place");
                Ok(Some(target))
            }
        }
    }
}

/// The `n`th candidate name for `destination`: `name.ext`, `name_1.ext`, ...
pub fn candidate_path(destination: &Path, n: u32) -> PathBuf {
    if n == 0 {
        return destination.to_path_buf();
    }

    let stem = destination
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match destination.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    };
    destination.with_file_name(name)
}

/// Claim the first free candidate name by creating it.
fn reserve(destination: &Path, dir: bool) -> io::Result<PathBuf> {
    for n in 0..MAX_DISAMBIGUATION {
        let candidate = candidate_path(destination, n);
        let created = if dir {
            fs::create_dir(&candidate)
        } else {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .map(drop)
        };

        match created {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "no free output name",
    ))
}

fn move_file(temp: TempPath, target: &Path) -> EncoderResult<()> {
    let output_err = |source| EncoderError::Output {
        path: target.to_path_buf(),
        source,
    };

    // Replaces the empty placeholder created by `reserve`.
    let temp = match temp.persist(target) {
        Ok(()) => return Ok(()),
        Err(e) => {
            debug!(error = %e.error, "Rename failed, copying output");
            e.path
        }
    };

    // Different filesystem: copy, then let `temp` delete the source.
    if let Err(e) = fs::copy(&temp, target) {
        remove_placeholder(target, false);
        return Err(output_err(e));
    }
    Ok(())
}

fn move_dir(temp: TempDir, target: &Path) -> EncoderResult<()> {
    let output_err = |source| EncoderError::Output {
        path: target.to_path_buf(),
        source,
    };

    if fs::rename(temp.path(), target).is_ok() {
        return Ok(());
    }

    let copied = (|| -> io::Result<()> {
        for entry in fs::read_dir(temp.path())? {
            let entry = entry?;
            fs::copy(entry.path(), target.join(entry.file_name()))?;
        }
        Ok(())
    })();

    if let Err(e) = copied {
        remove_placeholder(target, true);
        return Err(output_err(e));
    }
    Ok(())
}

fn remove_placeholder(path: &Path, dir: bool) {
    let removed = if dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    if let Err(e) = removed {
        warn!(path = ?path, error = %e, "Failed to remove reserved output name");
    }
}
