//! Application configuration management.
//!
//! Handles loading, saving, and managing application-wide settings:
//! where the key/blob store lives, which services to talk to, and the
//! tunables of the download and playback engines.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result, StorageError};

/// Default length cap for the title part of downloaded file names.
pub const DEFAULT_MAX_FILE_STEM_LEN: usize = 50;

/// Default extension for downloaded audio.
pub const DEFAULT_AUDIO_EXTENSION: &str = "mp3";

/// Past this position, "previous" restarts the current track instead of
/// going back one track.
pub const DEFAULT_RESTART_THRESHOLD_SECS: f64 = 30.0;

/// Default interval between playback position snapshots.
pub const DEFAULT_POSITION_SAVE_INTERVAL_SECS: u64 = 2;

/// Minimum movement before a new position snapshot is written.
pub const DEFAULT_POSITION_SAVE_MIN_DRIFT_SECS: f64 = 1.0;

/// Distance from a seek target at which the device is considered caught up.
pub const DEFAULT_SEEK_SETTLE_TOLERANCE_SECS: f64 = 1.5;

/// How long position updates are suppressed after a manual seek at most.
pub const DEFAULT_SEEK_SETTLE_TIMEOUT_MS: u64 = 1500;

/// Which implementation resolves playable audio URLs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionBackend {
    /// Self-hosted extraction API (`/get-audio-url`).
    #[default]
    Api,
    /// In-process extraction with `rusty_ytdl`.
    Ytdl,
}

impl std::fmt::Display for ExtractionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Api => write!(f, "api"),
            Self::Ytdl => write!(f, "ytdl"),
        }
    }
}

/// External service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ServicesConfig {
    /// Base URL of the audio extraction API.
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// YouTube Data API key used for search.
    #[serde(default)]
    pub youtube_api_key: Option<String>,
    /// Extraction implementation.
    #[serde(default)]
    pub backend: ExtractionBackend,
}

/// Download engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadConfig {
    /// Maximum number of characters kept from the title in file names.
    #[serde(default = "default_max_file_stem_len")]
    pub max_file_stem_len: usize,
    /// Extension appended to downloaded files.
    #[serde(default = "default_audio_extension")]
    pub audio_extension: String,
    /// Delete partially written files when a transfer fails.
    #[serde(default = "default_true")]
    pub cleanup_partial_files: bool,
}

const fn default_max_file_stem_len() -> usize {
    DEFAULT_MAX_FILE_STEM_LEN
}

fn default_audio_extension() -> String {
    DEFAULT_AUDIO_EXTENSION.to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_file_stem_len: DEFAULT_MAX_FILE_STEM_LEN,
            audio_extension: DEFAULT_AUDIO_EXTENSION.to_string(),
            cleanup_partial_files: true,
        }
    }
}

/// Playback engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerConfig {
    /// "Previous" restarts the current track past this position.
    #[serde(default = "default_restart_threshold")]
    pub restart_threshold_secs: f64,
    /// Interval between playback position snapshots.
    #[serde(default = "default_position_save_interval")]
    pub position_save_interval_secs: u64,
    /// Minimum movement before a new snapshot is written.
    #[serde(default = "default_position_save_min_drift")]
    pub position_save_min_drift_secs: f64,
    /// Distance from a seek target at which the device is considered caught up.
    #[serde(default = "default_seek_settle_tolerance")]
    pub seek_settle_tolerance_secs: f64,
    /// Upper bound on how long a seek suppresses position updates.
    #[serde(default = "default_seek_settle_timeout")]
    pub seek_settle_timeout_ms: u64,
}

const fn default_restart_threshold() -> f64 {
    DEFAULT_RESTART_THRESHOLD_SECS
}

const fn default_position_save_interval() -> u64 {
    DEFAULT_POSITION_SAVE_INTERVAL_SECS
}

const fn default_position_save_min_drift() -> f64 {
    DEFAULT_POSITION_SAVE_MIN_DRIFT_SECS
}

const fn default_seek_settle_tolerance() -> f64 {
    DEFAULT_SEEK_SETTLE_TOLERANCE_SECS
}

const fn default_seek_settle_timeout() -> u64 {
    DEFAULT_SEEK_SETTLE_TIMEOUT_MS
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            restart_threshold_secs: DEFAULT_RESTART_THRESHOLD_SECS,
            position_save_interval_secs: DEFAULT_POSITION_SAVE_INTERVAL_SECS,
            position_save_min_drift_secs: DEFAULT_POSITION_SAVE_MIN_DRIFT_SECS,
            seek_settle_tolerance_secs: DEFAULT_SEEK_SETTLE_TOLERANCE_SECS,
            seek_settle_timeout_ms: DEFAULT_SEEK_SETTLE_TIMEOUT_MS,
        }
    }
}

impl PlayerConfig {
    /// Position snapshot interval as a `Duration`.
    #[must_use]
    pub const fn position_save_interval(&self) -> Duration {
        Duration::from_secs(self.position_save_interval_secs)
    }

    /// Seek settle timeout as a `Duration`.
    #[must_use]
    pub const fn seek_settle_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_settle_timeout_ms)
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Root of the key/blob store (audio files, catalog, session state).
    pub data_directory: PathBuf,
    /// External service settings.
    #[serde(default)]
    pub services: ServicesConfig,
    /// Download engine settings.
    #[serde(default)]
    pub download: DownloadConfig,
    /// Playback engine settings.
    #[serde(default)]
    pub player: PlayerConfig,
    /// Theme selection, stored as-is for the UI.
    #[serde(default)]
    pub theme: serde_json::Value,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_directory: default_data_directory(),
            services: ServicesConfig::default(),
            download: DownloadConfig::default(),
            player: PlayerConfig::default(),
            theme: serde_json::Value::Null,
        }
    }
}

impl AppConfig {
    /// Load configuration from a file, writing defaults when it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            debug!("Config file not found, using defaults");
            let config = Self::default();
            if let Err(e) = config.save_to(config_path) {
                warn!("Failed to save default config: {}", e);
            }
            return Ok(config);
        }

        let content = fs::read_to_string(config_path).map_err(|e| {
            Error::Storage(StorageError::ReadFailed {
                key: config_path.display().to_string(),
                reason: format!("Failed to read config file: {e}"),
            })
        })?;

        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;
        config.validate();

        info!("Loaded config from {}", config_path.display());
        debug!("Data directory: {}", config.data_directory.display());

        Ok(config)
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(StorageError::WriteFailed {
                    key: parent.display().to_string(),
                    reason: format!("Failed to create config directory: {e}"),
                })
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, content).map_err(|e| {
            Error::Storage(StorageError::WriteFailed {
                key: config_path.display().to_string(),
                reason: format!("Failed to write config file: {e}"),
            })
        })?;

        info!("Saved config to {}", config_path.display());
        Ok(())
    }

    /// Clamp numeric settings into usable ranges.
    pub fn validate(&mut self) {
        self.download.max_file_stem_len = self.download.max_file_stem_len.clamp(8, 200);
        if self.download.audio_extension.trim().is_empty() {
            self.download.audio_extension = DEFAULT_AUDIO_EXTENSION.to_string();
        }
        let player = &mut self.player;
        if !player.restart_threshold_secs.is_finite() || player.restart_threshold_secs < 0.0 {
            player.restart_threshold_secs = DEFAULT_RESTART_THRESHOLD_SECS;
        }
        player.position_save_interval_secs = player.position_save_interval_secs.clamp(1, 60);
        if !player.position_save_min_drift_secs.is_finite() || player.position_save_min_drift_secs < 0.0 {
            player.position_save_min_drift_secs = DEFAULT_POSITION_SAVE_MIN_DRIFT_SECS;
        }
        if !player.seek_settle_tolerance_secs.is_finite() || player.seek_settle_tolerance_secs <= 0.0 {
            player.seek_settle_tolerance_secs = DEFAULT_SEEK_SETTLE_TOLERANCE_SECS;
        }
        player.seek_settle_timeout_ms = player.seek_settle_timeout_ms.clamp(100, 10_000);
    }

    /// Update the data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory isn't absolute or isn't writable.
    pub fn set_data_directory(&mut self, path: PathBuf) -> Result<()> {
        validate_storage_directory(&path)?;

        self.data_directory = path;
        info!("Updated data directory to: {}", self.data_directory.display());
        Ok(())
    }

    /// Get the path to the config file.
    #[must_use]
    pub fn config_file_path() -> PathBuf {
        config_file_path()
    }
}

/// Get the default data directory.
#[must_use]
pub fn default_data_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pocketune")
}

/// Get the path to the config file.
fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("pocketune")
        .join("config.json")
}

/// Validate that a directory is suitable for the key/blob store.
fn validate_storage_directory(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(Error::Configuration(
            "Data directory must be an absolute path".to_string(),
        ));
    }

    if path.exists() {
        if !path.is_dir() {
            return Err(Error::Configuration(format!(
                "Path exists but is not a directory: {}",
                path.display()
            )));
        }

        let test_file = path.join(".pocketune_write_test");
        match fs::write(&test_file, "test") {
            Ok(()) => {
                let _ = fs::remove_file(&test_file);
            }
            Err(e) => {
                return Err(Error::Configuration(format!(
                    "Directory is not writable: {} ({})",
                    path.display(),
                    e
                )));
            }
        }
    } else {
        fs::create_dir_all(path).map_err(|e| {
            Error::Configuration(format!("Cannot create directory {}: {}", path.display(), e))
        })?;
    }

    Ok(())
}

/// Configuration manager that handles loading and caching config.
pub struct ConfigManager {
    config: AppConfig,
    path: PathBuf,
}

impl ConfigManager {
    /// Create a config manager backed by a specific file.
    pub fn with_path(path: PathBuf) -> Result<Self> {
        let config = AppConfig::load_from(&path)?;
        Ok(Self { config, path })
    }

    /// Get a reference to the current configuration.
    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Update the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be saved.
    pub fn update(&mut self, mut config: AppConfig) -> Result<()> {
        validate_storage_directory(&config.data_directory)?;
        config.validate();

        self.config = config;
        self.config.save_to(&self.path)?;
        Ok(())
    }

    /// Reset to default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be saved.
    pub fn reset(&mut self) -> Result<()> {
        self.config = AppConfig::default();
        self.config.save_to(&self.path)?;
        Ok(())
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
