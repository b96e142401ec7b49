//! Stage manifests.
//!
//! A manifest describes one stage: where it runs, how each function is sized,
//! which worker groups consume which queues, and which build is being shipped.
//! It is read-only once loaded.

mod types;

pub use types::*;

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::util::hash::{ContentHash, Fingerprint, HashError};

/// Errors that can occur while loading or checking a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("unable to read the manifest file at `{path}`: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("unable to parse the manifest file at `{path}`: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("invalid manifest: {0}")]
  Invalid(String),

  #[error("manifest has no build details; package the stage before deploying it")]
  MissingBuild,

  #[error("failed to fingerprint manifest: {0}")]
  Hash(#[from] HashError),
}

impl Manifest {
  /// Load a manifest from a YAML (`.yml`/`.yaml`) or JSON file.
  pub fn load(path: &Path) -> Result<Self, ManifestError> {
    let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    let manifest = if is_json {
      Self::from_json(&content)
    } else {
      Self::from_yaml(&content)
    }
    .map_err(|message| ManifestError::Parse {
      path: path.to_path_buf(),
      message,
    })?;

    debug!(path = %path.display(), stage = %manifest.name, "loaded manifest");
    Ok(manifest)
  }

  pub fn from_yaml(content: &str) -> Result<Self, String> {
    serde_yaml::from_str(content).map_err(|e| e.to_string())
  }

  pub fn from_json(content: &str) -> Result<Self, String> {
    serde_json::from_str(content).map_err(|e| e.to_string())
  }

  /// Check the structural rules every stage must satisfy.
  ///
  /// Worker group and queue names end up in logical resource names, so they
  /// are limited to ASCII alphanumerics.
  pub fn validate(&self) -> Result<(), ManifestError> {
    if self.name.is_empty() {
      return Err(ManifestError::Invalid("stage name is empty".into()));
    }
    if !self.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
      return Err(ManifestError::Invalid(format!(
        "stage name `{}` may only contain letters, digits and dashes",
        self.name
      )));
    }

    let mut seen_queues = std::collections::BTreeSet::new();
    for (group, worker) in &self.queue {
      if group.is_empty() || !group.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ManifestError::Invalid(format!(
          "worker group `{}` may only contain letters and digits",
          group
        )));
      }
      if worker.queues.is_empty() {
        return Err(ManifestError::Invalid(format!("worker group `{}` has no queues", group)));
      }
      for queue in &worker.queues {
        if queue.is_empty() || !queue.chars().all(|c| c.is_ascii_alphanumeric()) {
          return Err(ManifestError::Invalid(format!(
            "queue `{}` of worker group `{}` may only contain letters and digits",
            queue, group
          )));
        }
        if !seen_queues.insert(queue.as_str()) {
          return Err(ManifestError::Invalid(format!(
            "queue `{}` is bound to more than one worker group",
            queue
          )));
        }
      }
    }

    if !self.domains().is_empty() && self.http.certificate.trim().is_empty() {
      return Err(ManifestError::Invalid(
        "http.domains requires http.certificate to be set".into(),
      ));
    }

    Ok(())
  }

  /// Validate and additionally require the build details stamped by packaging.
  pub fn validate_for_deploy(&self) -> Result<(), ManifestError> {
    self.validate()?;
    if self.build_details.id.trim().is_empty() {
      return Err(ManifestError::MissingBuild);
    }
    Ok(())
  }

  /// Custom domains declared for the stage, trimmed, in declaration order.
  pub fn domains(&self) -> Vec<String> {
    self
      .http
      .domains
      .split(',')
      .map(str::trim)
      .filter(|d| !d.is_empty())
      .map(str::to_string)
      .collect()
  }

  /// Fingerprint of the manifest content, excluding the build details.
  ///
  /// Two packagings of the same manifest give the same hash even though their
  /// build identifiers differ.
  pub fn content_hash(&self) -> Result<ContentHash, ManifestError> {
    let mut content = self.clone();
    content.build_details = BuildDetails::default();
    Ok(content.fingerprint()?)
  }

  /// The stack signature of this build: the hash stamped at packaging time,
  /// or the content hash when the manifest was never packaged.
  pub fn signature(&self) -> Result<String, ManifestError> {
    let stamped = self.build_details.hash.trim();
    if stamped.is_empty() {
      return Ok(self.content_hash()?.0);
    }
    Ok(stamped.to_string())
  }
}

impl Fingerprint for Manifest {}
