//! Per-user directories, following the XDG base directory layout on Unix.
//!
//! Lookups return `None` when the environment gives no usable base
//! directory; callers decide whether that is fatal.

use std::env;
use std::path::PathBuf;

use crate::consts::APP_NAME;

/// Project-local directory holding stage manifests and settings.
pub const PROJECT_DIR: &str = ".hover";

pub const SETTINGS_FILE: &str = "settings.toml";

fn var_path(name: &str) -> Option<PathBuf> {
  env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from)
}

#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  var_path("USERPROFILE")
}

#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  var_path("HOME")
}

#[cfg(windows)]
pub fn config_dir() -> Option<PathBuf> {
  var_path("APPDATA").map(|p| p.join(APP_NAME))
}

#[cfg(not(windows))]
pub fn config_dir() -> Option<PathBuf> {
  var_path("XDG_CONFIG_HOME")
    .or_else(|| home_dir().map(|h| h.join(".config")))
    .map(|p| p.join(APP_NAME))
}

#[cfg(windows)]
pub fn data_dir() -> Option<PathBuf> {
  var_path("LOCALAPPDATA").map(|p| p.join(APP_NAME))
}

#[cfg(not(windows))]
pub fn data_dir() -> Option<PathBuf> {
  var_path("XDG_DATA_HOME")
    .or_else(|| home_dir().map(|h| h.join(".local").join("share")))
    .map(|p| p.join(APP_NAME))
}

/// Default settings file of the project rooted at the working directory.
pub fn project_settings() -> PathBuf {
  PathBuf::from(PROJECT_DIR).join(SETTINGS_FILE)
}
