//! Retention sweep of a stage's build artifacts and per-build assets.
//!
//! The `keep` most recently pushed artifacts survive, and so does the build
//! the live alias currently runs, however old. Asset objects survive only
//! under the prefix of a surviving build.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::{ArtifactImage, ClientError, ControlPlane};
use crate::consts::{DEFAULT_RETENTION_KEEP, LIVE_ALIAS};
use crate::naming::{self, COMMAND_SUFFIX};

#[derive(Debug, Error)]
pub enum SweepError {
  #[error("failed to look up the live build of {function}: {source}")]
  LiveLookup {
    function: String,
    #[source]
    source: ClientError,
  },

  #[error("live image {image_uri} of {function} carries no build tag")]
  UntaggedLive { function: String, image_uri: String },

  #[error("failed to list artifacts of {repository}: {source}")]
  ListImages {
    repository: String,
    #[source]
    source: ClientError,
  },
}

/// Which artifact tags a sweep keeps and which it deletes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionPlan {
  pub retained: BTreeSet<String>,
  pub expired: BTreeSet<String>,
}

impl RetentionPlan {
  /// Whether a storage object belongs to a retained build.
  pub fn retains_object(&self, key: &str) -> bool {
    self
      .retained
      .iter()
      .any(|build| key.starts_with(&naming::asset_prefix(build)))
  }

  /// Objects among `keys` that belong to no retained build.
  pub fn expired_objects(&self, keys: &[String]) -> Vec<String> {
    keys.iter().filter(|key| !self.retains_object(key)).cloned().collect()
  }
}

/// Split the push history into retained and expired tags.
///
/// Every tag of the `keep` most recently pushed images is retained, plus
/// `live`. A tag is never both retained and expired.
pub fn partition(history: &[ArtifactImage], live: Option<&str>, keep: usize) -> RetentionPlan {
  let mut images: Vec<&ArtifactImage> = history.iter().collect();
  images.sort_by(|a, b| b.pushed_at.cmp(&a.pushed_at));

  let mut plan = RetentionPlan::default();
  if let Some(live) = live {
    plan.retained.insert(live.to_string());
  }

  for (position, image) in images.iter().enumerate() {
    for tag in &image.tags {
      if position < keep {
        plan.retained.insert(tag.clone());
      }
    }
  }
  for image in images.iter().skip(keep) {
    for tag in &image.tags {
      if !plan.retained.contains(tag) {
        plan.expired.insert(tag.clone());
      }
    }
  }
  plan
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
  pub live_build: String,
  pub retained: Vec<String>,
  pub deleted_images: Vec<String>,
  pub deleted_objects: Vec<String>,
  pub dry_run: bool,
  /// Deletions that failed; logged, never fatal.
  pub warnings: Vec<String>,
}

pub struct Sweeper {
  client: Arc<dyn ControlPlane>,
  keep: usize,
  alias: String,
}

impl Sweeper {
  pub fn new(client: Arc<dyn ControlPlane>) -> Self {
    Self {
      client,
      keep: DEFAULT_RETENTION_KEEP,
      alias: LIVE_ALIAS.to_string(),
    }
  }

  pub fn with_keep(mut self, keep: usize) -> Self {
    self.keep = keep;
    self
  }

  pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
    self.alias = alias.into();
    self
  }

  /// Build the command function's live alias is running right now.
  pub async fn live_build(&self, stage: &str) -> Result<String, SweepError> {
    let function = naming::function_name(stage, COMMAND_SUFFIX);
    let config = self
      .client
      .get_function(&function, &self.alias)
      .await
      .map_err(|source| SweepError::LiveLookup {
        function: function.clone(),
        source,
      })?;

    naming::image_tag(&config.image_uri)
      .map(str::to_string)
      .ok_or(SweepError::UntaggedLive {
        function,
        image_uri: config.image_uri,
      })
  }

  pub async fn sweep(&self, stage: &str, dry_run: bool) -> Result<SweepReport, SweepError> {
    let live = self.live_build(stage).await?;
    let repository = naming::repository(stage);
    let history = self
      .client
      .list_images(&repository)
      .await
      .map_err(|source| SweepError::ListImages {
        repository: repository.clone(),
        source,
      })?;

    let plan = partition(&history, Some(&live), self.keep);
    debug!(
      stage = %stage,
      live = %live,
      retained = plan.retained.len(),
      expired = plan.expired.len(),
      "retention plan"
    );

    let bucket = naming::assets_bucket(stage);
    let objects = match self.client.list_objects(&bucket).await {
      Ok(keys) => plan.expired_objects(&keys),
      Err(e) if e.is_not_found() => Vec::new(),
      Err(e) => {
        warn!(bucket = %bucket, error = %e, "failed to list assets, skipping object sweep");
        Vec::new()
      }
    };
    let images: Vec<String> = plan.expired.iter().cloned().collect();

    let mut report = SweepReport {
      live_build: live,
      retained: plan.retained.iter().cloned().collect(),
      dry_run,
      ..SweepReport::default()
    };

    if dry_run {
      report.deleted_images = images;
      report.deleted_objects = objects;
      return Ok(report);
    }

    let (image_result, object_result) = tokio::join!(
      self.delete_images(&repository, &images),
      self.delete_objects(&bucket, &objects)
    );
    match image_result {
      Ok(()) => report.deleted_images = images,
      Err(e) => report.warnings.push(e),
    }
    match object_result {
      Ok(()) => report.deleted_objects = objects,
      Err(e) => report.warnings.push(e),
    }

    info!(
      stage = %stage,
      images = report.deleted_images.len(),
      objects = report.deleted_objects.len(),
      "retention sweep complete"
    );
    Ok(report)
  }

  async fn delete_images(&self, repository: &str, tags: &[String]) -> Result<(), String> {
    if tags.is_empty() {
      return Ok(());
    }
    for tag in tags {
      debug!(repository = %repository, tag = %tag, "purging artifact");
    }
    self.client.batch_delete_images(repository, tags).await.map_err(|e| {
      warn!(repository = %repository, error = %e, "failed to delete artifacts");
      format!("artifacts of {}: {}", repository, e)
    })
  }

  async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), String> {
    if keys.is_empty() {
      return Ok(());
    }
    self.client.delete_objects(bucket, keys).await.map_err(|e| {
      warn!(bucket = %bucket, error = %e, "failed to delete asset objects");
      format!("objects of {}: {}", bucket, e)
    })
  }
}
