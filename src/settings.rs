//! Reader tuning settings with JSON persistence.
//!
//! This module provides:
//! - `ReaderSettings` with the timing and policy knobs of the reader link
//! - Persistence to a JSON file
//! - Conversion into the `LinkTiming` and `DuplicatePolicy` the reader uses
//!
//! Every field falls back to its default when missing from the file, so
//! partial files written by hand are fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::reader::config::{
    LinkTiming, BOOT_SETTLE_DELAY, DEFAULT_DUPLICATE_COOLDOWN, DEFAULT_UID_TIMEOUT,
    HEALTHCHECK_ATTEMPTS, HEALTHCHECK_INTERVAL, HEALTHCHECK_LISTEN_WINDOW, READER_BAUD_RATE,
    READ_POLL_SLICE,
};
use crate::reader::error::{ReaderError, ReaderResult};
use crate::reader::watch::DuplicatePolicy;

/// Runtime tuning for the reader link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ReaderSettings {
    pub baud_rate: u32,

    /// Wait after opening a port, while the board reboots.
    pub boot_settle_ms: u64,

    pub healthcheck_attempts: u32,
    pub healthcheck_interval_ms: u64,

    /// How long to wait for `{"status":"online"}` after the last healthcheck.
    pub listen_window_ms: u64,

    pub poll_slice_ms: u64,

    /// Default timeout for a single UID read.
    pub read_timeout_ms: u64,

    /// Repeated reads of the same card within this window are dropped while
    /// watching.
    pub duplicate_cooldown_ms: u64,

    /// Re-run the healthcheck on a reopened port before using it.
    pub verify_on_reconnect: bool,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            baud_rate: READER_BAUD_RATE,
            boot_settle_ms: BOOT_SETTLE_DELAY.as_millis() as u64,
            healthcheck_attempts: HEALTHCHECK_ATTEMPTS,
            healthcheck_interval_ms: HEALTHCHECK_INTERVAL.as_millis() as u64,
            listen_window_ms: HEALTHCHECK_LISTEN_WINDOW.as_millis() as u64,
            poll_slice_ms: READ_POLL_SLICE.as_millis() as u64,
            read_timeout_ms: DEFAULT_UID_TIMEOUT.as_millis() as u64,
            duplicate_cooldown_ms: DEFAULT_DUPLICATE_COOLDOWN.as_millis() as u64,
            verify_on_reconnect: false,
        }
    }
}

impl ReaderSettings {
    /// Reject values the reader cannot work with.
    pub fn validate(&self) -> ReaderResult<()> {
        let problem = if self.baud_rate == 0 {
            Some("baudRate must be positive")
        } else if self.healthcheck_attempts == 0 {
            Some("healthcheckAttempts must be at least 1")
        } else if self.poll_slice_ms == 0 {
            Some("pollSliceMs must be positive")
        } else if self.listen_window_ms == 0 {
            Some("listenWindowMs must be positive")
        } else {
            None
        };

        match problem {
            Some(reason) => Err(ReaderError::Settings {
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn to_timing(&self) -> LinkTiming {
        LinkTiming {
            boot_settle: Duration::from_millis(self.boot_settle_ms),
            healthcheck_attempts: self.healthcheck_attempts,
            healthcheck_interval: Duration::from_millis(self.healthcheck_interval_ms),
            listen_window: Duration::from_millis(self.listen_window_ms),
            poll_slice: Duration::from_millis(self.poll_slice_ms),
        }
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        DuplicatePolicy::new(Duration::from_millis(self.duplicate_cooldown_ms))
    }

    /// Check if these settings differ from defaults.
    /// Useful for logging to show when non-default settings are applied.
    pub fn has_non_default_settings(&self) -> bool {
        *self != Self::default()
    }
}

/// Settings file name used when only a directory is given.
pub const SETTINGS_FILENAME: &str = "reader_settings.json";

/// Manages persistence of reader settings to a JSON file.
pub struct SettingsManager {
    settings_file_path: PathBuf,
}

impl SettingsManager {
    /// Create a settings manager for the given file.
    pub fn new(settings_file: &Path) -> Self {
        Self {
            settings_file_path: settings_file.to_path_buf(),
        }
    }

    /// Create a settings manager for the default file inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(&dir.join(SETTINGS_FILENAME))
    }

    /// Load settings from disk, returning defaults if the file doesn't exist.
    pub fn load(&self) -> ReaderResult<ReaderSettings> {
        if !self.settings_file_path.exists() {
            return Ok(ReaderSettings::default());
        }

        let contents = fs::read_to_string(&self.settings_file_path).map_err(|e| {
            ReaderError::Settings {
                reason: format!("Failed to read settings file: {}", e),
            }
        })?;

        // Handle empty file gracefully
        if contents.trim().is_empty() {
            return Ok(ReaderSettings::default());
        }

        let settings: ReaderSettings =
            serde_json::from_str(&contents).map_err(|e| ReaderError::Settings {
                reason: format!("Failed to parse settings JSON: {}", e),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to disk.
    pub fn save(&self, settings: &ReaderSettings) -> ReaderResult<()> {
        settings.validate()?;

        // Ensure parent directory exists
        if let Some(parent) = self.settings_file_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ReaderError::Settings {
                reason: format!("Failed to create settings directory: {}", e),
            })?;
        }

        let contents = serde_json::to_string_pretty(settings)?;

        fs::write(&self.settings_file_path, contents).map_err(|e| ReaderError::Settings {
            reason: format!("Failed to write settings file: {}", e),
        })?;

        Ok(())
    }

    /// Get the path where settings are stored.
    pub fn settings_path(&self) -> &Path {
        &self.settings_file_path
    }
}
