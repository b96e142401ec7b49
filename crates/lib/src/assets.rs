//! Publishing a build's static assets to the stage's storage bucket.

use std::path::{Path, PathBuf};
use std::{fs, io};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::client::{ClientError, ControlPlane};
use crate::naming;

#[derive(Debug, Error)]
pub enum AssetError {
  #[error("asset directory {0} does not exist")]
  MissingDirectory(PathBuf),

  #[error("failed to walk {path}: {message}")]
  Walk { path: PathBuf, message: String },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Client(#[from] ClientError),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssetUpload {
  pub bucket: String,
  pub bucket_created: bool,
  pub keys: Vec<String>,
  pub bytes: u64,
}

/// Storage key of `relative` for `build_id`, with `/` separators.
fn object_key(build_id: &str, relative: &Path) -> String {
  let parts: Vec<String> = relative
    .components()
    .map(|c| c.as_os_str().to_string_lossy().into_owned())
    .collect();
  format!("{}{}", naming::asset_prefix(build_id), parts.join("/"))
}

/// Make sure the stage's asset bucket exists. Returns whether it was created.
pub async fn ensure_bucket(client: &dyn ControlPlane, stage: &str, region: &str) -> Result<bool, AssetError> {
  let bucket = naming::assets_bucket(stage);
  if client.head_bucket(&bucket).await? {
    return Ok(false);
  }
  info!(bucket = %bucket, region = %region, "creating asset bucket");
  client.create_bucket(&bucket, region).await?;
  Ok(true)
}

/// Upload every file under `dir` as `assets/<build_id>/<relative path>`.
pub async fn publish(
  client: &dyn ControlPlane,
  stage: &str,
  region: &str,
  build_id: &str,
  dir: &Path,
) -> Result<AssetUpload, AssetError> {
  if !dir.is_dir() {
    return Err(AssetError::MissingDirectory(dir.to_path_buf()));
  }

  let mut upload = AssetUpload {
    bucket: naming::assets_bucket(stage),
    bucket_created: ensure_bucket(client, stage, region).await?,
    ..AssetUpload::default()
  };

  for entry in WalkDir::new(dir).sort_by_file_name() {
    let entry = entry.map_err(|e| AssetError::Walk {
      path: dir.to_path_buf(),
      message: e.to_string(),
    })?;
    if !entry.file_type().is_file() {
      continue;
    }

    let path = entry.path();
    let relative = path.strip_prefix(dir).unwrap_or(path);
    let key = object_key(build_id, relative);
    let body = fs::read(path).map_err(|source| AssetError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    debug!(key = %key, size = body.len(), "uploading asset");
    upload.bytes += body.len() as u64;
    client.put_object(&upload.bucket, &key, body).await?;
    upload.keys.push(key);
  }

  info!(bucket = %upload.bucket, files = upload.keys.len(), bytes = upload.bytes, "assets published");
  Ok(upload)
}
