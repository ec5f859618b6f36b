//! Async commands for reader settings management.
//!
//! Provides load/save/init operations for the reader settings file.

use std::path::PathBuf;

use tracing::info;

use super::reader::describe_error;
use crate::reader::ReaderResult;
use crate::settings::{ReaderSettings, SettingsManager};

/// Get reader settings from `path`.
///
/// Returns default settings if no settings file exists yet.
pub async fn load_reader_settings(path: Option<PathBuf>) -> Result<ReaderSettings, String> {
    let Some(path) = path else {
        return Ok(ReaderSettings::default());
    };

    tokio::task::spawn_blocking(move || SettingsManager::new(&path).load())
        .await
        .map_err(|e| format!("Settings task panicked: {}", e))?
        .map_err(|e| describe_error(&e))
}

/// Save reader settings to `path`.
pub async fn save_reader_settings(path: PathBuf, settings: ReaderSettings) -> Result<(), String> {
    tokio::task::spawn_blocking(move || -> ReaderResult<()> {
        let manager = SettingsManager::new(&path);
        manager.save(&settings)?;

        if settings.has_non_default_settings() {
            info!(path = %manager.settings_path().display(), "Saved non-default reader settings");
        }
        Ok(())
    })
    .await
    .map_err(|e| format!("Settings task panicked: {}", e))?
    .map_err(|e| describe_error(&e))
}

/// Write a settings file with every default spelled out.
pub async fn init_reader_settings(path: PathBuf) -> Result<(), String> {
    save_reader_settings(path, ReaderSettings::default()).await
}
