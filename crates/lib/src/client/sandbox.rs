//! On-disk persistence of the in-process control plane.
//!
//! # Storage Layout
//!
//! ```text
//! {data_dir}/
//! └── sandbox.json    # SandboxFile: format version + ControlPlaneState
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::ClientError;
use super::memory::{ControlPlaneState, MemoryControlPlane};

const SANDBOX_FILENAME: &str = "sandbox.json";

/// Current format version of the sandbox file.
pub const SANDBOX_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SandboxError {
  #[error("failed to create sandbox directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to read sandbox state: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write sandbox state: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse sandbox state: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize sandbox state: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported sandbox format version {0}")]
  UnsupportedVersion(u32),

  #[error(transparent)]
  Client(#[from] ClientError),
}

#[derive(Serialize, Deserialize)]
struct SandboxFile {
  version: u32,
  state: ControlPlaneState,
}

/// Loads and saves a [`MemoryControlPlane`] so consecutive commands see the
/// same stages.
#[derive(Debug, Clone)]
pub struct SandboxStore {
  base_path: PathBuf,
}

impl SandboxStore {
  pub fn new(base_path: PathBuf) -> Self {
    Self { base_path }
  }

  pub fn base_path(&self) -> &Path {
    &self.base_path
  }

  fn state_path(&self) -> PathBuf {
    self.base_path.join(SANDBOX_FILENAME)
  }

  /// Load the persisted control plane, or an empty one when nothing was saved.
  pub fn load(&self) -> Result<MemoryControlPlane, SandboxError> {
    let path = self.state_path();
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no sandbox state, starting empty");
        return Ok(MemoryControlPlane::new());
      }
      Err(e) => return Err(SandboxError::Read(e)),
    };

    let file: SandboxFile = serde_json::from_str(&content).map_err(SandboxError::Parse)?;
    if file.version != SANDBOX_VERSION {
      return Err(SandboxError::UnsupportedVersion(file.version));
    }
    Ok(MemoryControlPlane::with_state(file.state))
  }

  /// Persist the control plane's state, atomically replacing the previous file.
  pub fn save(&self, plane: &MemoryControlPlane) -> Result<(), SandboxError> {
    fs::create_dir_all(&self.base_path).map_err(SandboxError::CreateDir)?;

    let file = SandboxFile {
      version: SANDBOX_VERSION,
      state: plane.snapshot()?,
    };
    let content = serde_json::to_string_pretty(&file).map_err(SandboxError::Serialize)?;

    let path = self.state_path();
    let temp_path = self.base_path.join(format!("{}.tmp", SANDBOX_FILENAME));
    fs::write(&temp_path, content).map_err(SandboxError::Write)?;
    fs::rename(&temp_path, &path).map_err(SandboxError::Write)?;

    debug!(path = %path.display(), "saved sandbox state");
    Ok(())
  }
}
