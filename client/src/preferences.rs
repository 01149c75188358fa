//! Local key-value state that survives restarts

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

/// Display name used until the player picks one.
pub const DEFAULT_USERNAME: &str = "Tim";

/// Widest viewport still treated as a mobile layout.
pub const MOBILE_MAX_WIDTH: f32 = 1024.0;

#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("failed to access preferences file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode preferences: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Mobile,
    Desktop,
}

impl DeviceClass {
    pub fn from_viewport_width(width: f32) -> Self {
        if width <= MOBILE_MAX_WIDTH {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }
}

/// Which overlay panels the player chose to show. Everything starts hidden.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiVisibility {
    pub player_info: bool,
    pub online_players_list: bool,
    pub controls: bool,
    pub game_info: bool,
    pub minimap: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub username: Option<String>,
    pub ui_visibility: UiVisibility,
    pub ui_visibility_mobile: UiVisibility,
}

/// Preferences backed by a JSON file, or held in memory only.
#[derive(Debug)]
pub struct PreferenceStore {
    path: Option<PathBuf>,
    preferences: Preferences,
}

impl PreferenceStore {
    /// Loads preferences from `path`. A missing or unreadable file yields defaults.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let preferences = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("Ignoring corrupt preferences file {}: {}", path.display(), e);
                Preferences::default()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No preferences file at {}, using defaults", path.display());
                Preferences::default()
            }
            Err(e) => {
                warn!("Failed to read preferences file {}: {}", path.display(), e);
                Preferences::default()
            }
        };

        Self {
            path: Some(path),
            preferences,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            preferences: Preferences::default(),
        }
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn username(&self) -> Option<&str> {
        self.preferences.username.as_deref()
    }

    pub fn set_username(&mut self, username: &str) -> Result<(), PreferencesError> {
        self.preferences.username = Some(username.to_string());
        self.save()
    }

    pub fn ui_visibility(&self, device: DeviceClass) -> UiVisibility {
        match device {
            DeviceClass::Mobile => self.preferences.ui_visibility_mobile,
            DeviceClass::Desktop => self.preferences.ui_visibility,
        }
    }

    pub fn set_ui_visibility(
        &mut self,
        device: DeviceClass,
        visibility: UiVisibility,
    ) -> Result<(), PreferencesError> {
        match device {
            DeviceClass::Mobile => self.preferences.ui_visibility_mobile = visibility,
            DeviceClass::Desktop => self.preferences.ui_visibility = visibility,
        }
        self.save()
    }

    pub fn save(&self) -> Result<(), PreferencesError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = serde_json::to_string_pretty(&self.preferences)?;
        fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn scratch_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "sprite-world-prefs-{}-{}.json",
            name,
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let store = PreferenceStore::load(scratch_path("missing"));
        assert_eq!(store.preferences(), &Preferences::default());
        assert!(store.username().is_none());
    }

    #[test]
    fn test_username_persists_across_loads() {
        let path = scratch_path("username");
        let mut store = PreferenceStore::load(&path);
        assert_ok!(store.set_username("Ada"));

        let reloaded = PreferenceStore::load(&path);
        assert_eq!(reloaded.username(), Some("Ada"));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_visibility_keyed_by_device_class() {
        let path = scratch_path("visibility");
        let mut store = PreferenceStore::load(&path);
        let shown = UiVisibility {
            minimap: true,
            controls: true,
            ..Default::default()
        };
        assert_ok!(store.set_ui_visibility(DeviceClass::Mobile, shown));

        let reloaded = PreferenceStore::load(&path);
        assert_eq!(reloaded.ui_visibility(DeviceClass::Mobile), shown);
        assert_eq!(reloaded.ui_visibility(DeviceClass::Desktop), UiVisibility::default());

        let text = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["ui_visibility_mobile"]["minimap"], true);
        assert_eq!(value["ui_visibility"]["minimap"], false);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let path = scratch_path("corrupt");
        fs::write(&path, "{ definitely not json").unwrap();
        let store = PreferenceStore::load(&path);
        assert_eq!(store.preferences(), &Preferences::default());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_in_memory_never_writes() {
        let mut store = PreferenceStore::in_memory();
        assert_ok!(store.set_username("Ada"));
        assert_eq!(store.username(), Some("Ada"));
    }

    #[test]
    fn test_device_class_threshold() {
        assert_eq!(DeviceClass::from_viewport_width(375.0), DeviceClass::Mobile);
        assert_eq!(DeviceClass::from_viewport_width(1024.0), DeviceClass::Mobile);
        assert_eq!(DeviceClass::from_viewport_width(1025.0), DeviceClass::Desktop);
    }
}
