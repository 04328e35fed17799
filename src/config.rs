use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::composer::{ComposerOptions, DEFAULT_COUNTER_MARGIN};
use crate::identity::DEFAULT_BATCH_STRIDE;
use crate::structure::CustomStructureConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Application configuration loaded from TOML config file.
/// All fields have defaults, the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directories to scan when `scan` has no path arguments.
    pub project_dirs: Vec<PathBuf>,
    /// Device library index (overrides the XDG default).
    pub library_path: Option<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Also validate the sets inside Ableton `Backup` folders.
    pub include_backups: bool,
    pub composer: ComposerConfig,
    /// Extra song structures, merged with the built-in presets.
    #[serde(rename = "structures")]
    pub custom_structures: Vec<CustomStructureConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    pub batch_stride: u64,
    pub counter_margin: u64,
    /// Structure preset used when `compose` gets no `--genre`.
    pub default_genre: String,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            batch_stride: DEFAULT_BATCH_STRIDE,
            counter_margin: DEFAULT_COUNTER_MARGIN,
            default_genre: "uplifting".to_string(),
        }
    }
}

impl ComposerConfig {
    pub fn options(&self) -> ComposerOptions {
        ComposerOptions {
            batch_stride: self.batch_stride,
            counter_margin: self.counter_margin,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/alsdoctor/config.toml`.
    /// A missing file means defaults; a broken one is an error, since
    /// silently dropping custom structures would change what `compose` does.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str::<AppConfig>(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    pub fn library_path(&self) -> PathBuf {
        self.library_path.clone().unwrap_or_else(default_library_path)
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Device library index in the XDG data directory.
pub fn default_library_path() -> PathBuf {
    match ProjectDirs::from("", "", crate::APP_NAME) {
        Some(dirs) => dirs.data_dir().join("devices.json"),
        // Fallback: current directory
        None => PathBuf::from("devices.json"),
    }
}
