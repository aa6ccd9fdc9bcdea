use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::file_utils::app_data_dir;

pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub download_dir: String,
    pub last_url: String,
}

impl AppSettings {
    pub fn default_path() -> PathBuf {
        app_data_dir().join(SETTINGS_FILE)
    }

    /// Reads settings from `path`; anything unreadable yields the defaults.
    pub fn load_from(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(Some(settings)) => settings,
            Ok(None) => Self::default(),
            Err(e) => {
                warn!("Ignoring unreadable settings: {:#}", e);
                Self::default()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let settings = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(settings))
    }

    /// Writes settings to `path`. Failures are logged, never returned.
    pub fn save_to(&self, path: &Path) {
        if let Err(e) = self.try_save(path) {
            warn!("Failed to save settings: {:#}", e);
        } else {
            debug!("Settings saved to {}", path.display());
        }
    }

    fn try_save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }
}

/// Settings bound to the file they were loaded from.
pub struct SettingsStore {
    path: PathBuf,
    settings: AppSettings,
}

impl SettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = AppSettings::load_from(&path);
        Self { path, settings }
    }

    pub fn get(&self) -> &AppSettings {
        &self.settings
    }

    /// Applies `change` and flushes to disk if anything differs.
    pub fn update(&mut self, change: impl FnOnce(&mut AppSettings)) {
        let before = self.settings.clone();
        change(&mut self.settings);
        if self.settings != before {
            self.settings.save_to(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        let settings = AppSettings {
            download_dir: "/home/me/Vídeos".to_string(),
            last_url: "https://www.youtube.com/watch?v=abc".to_string(),
        };

        settings.save_to(&path);
        assert_eq!(AppSettings::load_from(&path), settings);
    }

    #[test]
    fn missing_or_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        assert_eq!(AppSettings::load_from(&path), AppSettings::default());

        fs::write(&path, "{ not json").unwrap();
        assert_eq!(AppSettings::load_from(&path), AppSettings::default());
    }

    #[test]
    fn partial_file_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, r#"{"download_dir": "/data"}"#).unwrap();

        let settings = AppSettings::load_from(&path);
        assert_eq!(settings.download_dir, "/data");
        assert_eq!(settings.last_url, "");
    }

    #[test]
    fn store_persists_on_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        let mut store = SettingsStore::open(&path);
        store.update(|s| s.last_url = "https://example.com/v".to_string());

        let reopened = SettingsStore::open(&path);
        assert_eq!(reopened.get().last_url, "https://example.com/v");
    }
}
