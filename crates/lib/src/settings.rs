//! Engine settings: a TOML file plus `HOVER_*` environment overrides.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fs, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{DEFAULT_POLL_INTERVAL_SECS, DEFAULT_RETENTION_KEEP, LIVE_ALIAS};
use crate::paths;
use crate::reconcile::ReconcileOptions;

const ENV_PREFIX: &str = "HOVER_";

#[derive(Debug, Error)]
pub enum SettingsError {
  #[error("failed to read settings from {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid settings in {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("invalid value {value:?} for {var}")]
  Env { var: String, value: String },

  #[error("no data directory: set HOVER_DATA_DIR, XDG_DATA_HOME or HOME")]
  NoDataDir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
  pub poll_interval_secs: u64,
  /// Unbounded when unset.
  pub max_wait_secs: Option<u64>,
  pub retention_keep: usize,
  pub parallelism: usize,
  pub live_alias: String,
  pub data_dir: Option<PathBuf>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
      max_wait_secs: None,
      retention_keep: DEFAULT_RETENTION_KEEP,
      parallelism: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
      live_alias: LIVE_ALIAS.to_string(),
      data_dir: None,
    }
  }
}

impl Settings {
  /// Load settings from `explicit`, or the first settings file found in the
  /// project and then the user config directory, then apply the environment.
  pub fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
    let file = match explicit {
      Some(path) => Some(path.to_path_buf()),
      None => [Some(paths::project_settings()), paths::config_dir().map(|d| d.join(paths::SETTINGS_FILE))]
        .into_iter()
        .flatten()
        .find(|p| p.is_file()),
    };

    let mut settings = match file {
      Some(path) => {
        debug!(path = %path.display(), "loading settings");
        Self::from_file(&path)?
      }
      None => Self::default(),
    };
    settings.apply_env()?;
    Ok(settings)
  }

  pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
    let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|e| SettingsError::Parse {
      path: path.to_path_buf(),
      message: e.to_string(),
    })
  }

  fn apply_env(&mut self) -> Result<(), SettingsError> {
    if let Some(v) = env_value("POLL_INTERVAL_SECS")? {
      self.poll_interval_secs = v;
    }
    if let Some(v) = env_value("MAX_WAIT_SECS")? {
      self.max_wait_secs = Some(v);
    }
    if let Some(v) = env_value("RETENTION_KEEP")? {
      self.retention_keep = v;
    }
    if let Some(v) = env_value("PARALLELISM")? {
      self.parallelism = v;
    }
    if let Some(v) = env_value::<String>("LIVE_ALIAS")? {
      self.live_alias = v;
    }
    if let Some(v) = env_value::<PathBuf>("DATA_DIR")? {
      self.data_dir = Some(v);
    }
    Ok(())
  }

  pub fn reconcile_options(&self) -> ReconcileOptions {
    ReconcileOptions {
      poll_interval: Duration::from_secs(self.poll_interval_secs),
      max_wait: self.max_wait_secs.map(Duration::from_secs),
    }
  }

  /// Directory holding persisted sandbox state.
  pub fn data_dir(&self) -> Result<PathBuf, SettingsError> {
    self.data_dir.clone().or_else(paths::data_dir).ok_or(SettingsError::NoDataDir)
  }
}

/// Parse `HOVER_<suffix>` when set and non-empty.
fn env_value<T: FromStr>(suffix: &str) -> Result<Option<T>, SettingsError> {
  let var = format!("{}{}", ENV_PREFIX, suffix);
  match env::var(&var) {
    Ok(value) if value.trim().is_empty() => Ok(None),
    Ok(value) => value
      .trim()
      .parse()
      .map(Some)
      .map_err(|_| SettingsError::Env { var, value }),
    Err(_) => Ok(None),
  }
}
