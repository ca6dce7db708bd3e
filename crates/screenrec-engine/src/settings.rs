//! Persisted recorder preferences.
//!
//! Settings are read once when the controller is built and written back on
//! every setter. A session copies what it needs at start, so edits made
//! while recording only apply to the next session.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use screenrec_capture::StorePolicy;
use screenrec_encoder::{RAW_I420_CODEC, Y4M_FORMAT};
use screenrec_ipc::{ColorDepth, Rect};

use crate::error::SettingsError;
use crate::SettingsResult;

/// File name of the default output.
pub const DEFAULT_OUTPUT_NAME: &str = "screencast.y4m";

/// Default resident frame budget in MiB.
pub const DEFAULT_MAX_RESIDENT_MIB: u64 = 512;

const SETTINGS_DIR: &str = "screenrec";
const SETTINGS_FILE: &str = "settings.json";

/// User preferences that survive restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Screen region to record.
    pub capture_area: Rect,

    /// Target capture rate; 0 falls back to the default rate.
    pub frame_rate: u32,

    /// Pixel layout of captured frames.
    pub color_depth: ColorDepth,

    /// Read from the direct frame buffer when one is available.
    pub use_direct_buffer: bool,

    /// Border size used to recognise a window under the capture area.
    pub window_edge: u32,

    /// Requested location of the finished recording.
    pub output_path: PathBuf,

    /// Short name of the output file format.
    pub file_format: String,

    /// Short name of the output codec.
    pub codec: String,

    /// Spill every frame to disk as soon as it is captured.
    pub disk_only: bool,

    /// Resident frame budget before the oldest frames are spilled; 0 = unlimited.
    pub max_resident_mib: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            capture_area: Rect::new(0, 0, 640, 480),
            frame_rate: 10,
            color_depth: ColorDepth::Bgra32,
            use_direct_buffer: true,
            window_edge: 0,
            output_path: default_output_path(),
            file_format: Y4M_FORMAT.to_string(),
            codec: RAW_I420_CODEC.to_string(),
            disk_only: false,
            max_resident_mib: DEFAULT_MAX_RESIDENT_MIB,
        }
    }
}

impl Settings {
    /// Frame store policy for a new session.
    pub fn store_policy(&self) -> StorePolicy {
        if self.disk_only {
            StorePolicy::disk_only()
        } else if self.max_resident_mib == 0 {
            StorePolicy::in_memory()
        } else {
            StorePolicy::with_budget(self.max_resident_mib.saturating_mul(1024 * 1024))
        }
    }
}

fn default_output_path() -> PathBuf {
    dirs::video_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(DEFAULT_OUTPUT_NAME)
}

/// Where settings are loaded from and saved to.
pub trait SettingsStore: Send + Sync {
    /// Load settings, falling back to defaults.
    fn load(&self) -> Settings;

    /// Persist settings.
    fn save(&self, settings: &Settings) -> SettingsResult<()>;
}

/// Settings kept as pretty-printed JSON in a file.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/screenrec/settings.json`.
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(SETTINGS_DIR).join(SETTINGS_FILE))
            .ok_or(SettingsError::NoConfigDir)
    }

    /// A store at [`JsonSettingsStore::default_path`].
    pub fn open_default() -> SettingsResult<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> SettingsResult<Settings> {
        let file = File::open(&self.path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Settings {
        match self.read() {
            Ok(settings) => {
                debug!(path = ?self.path, "Settings loaded");
                settings
            }
            Err(SettingsError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "No settings file, using defaults");
                Settings::default()
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Unreadable settings, using defaults");
                Settings::default()
            }
        }
    }

    fn save(&self, settings: &Settings) -> SettingsResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        // Written next to the target and renamed over it.
        let mut file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, settings)?;
        file.persist(&self.path).map_err(|e| SettingsError::Io(e.error))?;

        debug!(path = ?self.path, "Settings saved");
        Ok(())
    }
}

/// Settings held in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Settings>,
    saves: AtomicUsize,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
            saves: AtomicUsize::new(0),
        }
    }

    /// The last saved settings.
    pub fn current(&self) -> Settings {
        self.settings.lock().clone()
    }

    /// Number of saves so far.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Settings {
        self.current()
    }

    fn save(&self, settings: &Settings) -> SettingsResult<()> {
        *self.settings.lock() = settings.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
