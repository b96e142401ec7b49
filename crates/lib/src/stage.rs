//! Stage-level operations: the deploy pipeline, ad-hoc commands and teardown.
//!
//! Each operation takes a [`StageContext`] carrying the injected control-plane
//! client and the engine settings.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::assets::{self, AssetError, AssetUpload};
use crate::client::{ClientError, ControlPlane};
use crate::compile::{CompileError, compile};
use crate::consts::SIGNATURE_OUTPUT;
use crate::manifest::{Manifest, ManifestError};
use crate::naming::{self, COMMAND_SUFFIX};
use crate::reconcile::{ReconcileError, ReconcileOutcome, Reconciler, ResourceFailure};
use crate::release::{CommandError, CommandOutput, ReleaseError, ReleaseOptions, ReleaseReport, Releaser, run_command};
use crate::retention::{SweepError, SweepReport, Sweeper};
use crate::settings::Settings;

#[derive(Debug, Error)]
pub enum StageError {
  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Compile(#[from] CompileError),

  #[error("failed to publish assets: {0}")]
  Assets(#[from] AssetError),

  #[error(transparent)]
  Reconcile(#[from] ReconcileError),

  #[error(transparent)]
  Release(#[from] ReleaseError),

  #[error(transparent)]
  Command(#[from] CommandError),

  #[error(transparent)]
  Sweep(#[from] SweepError),

  #[error(transparent)]
  Client(#[from] ClientError),
}

/// Dependencies shared by every stage operation.
#[derive(Clone)]
pub struct StageContext {
  pub client: Arc<dyn ControlPlane>,
  pub settings: Settings,
}

impl StageContext {
  pub fn new(client: Arc<dyn ControlPlane>, settings: Settings) -> Self {
    Self { client, settings }
  }
}

#[derive(Debug, Clone)]
pub struct DeployRequest {
  /// Packaged image, tagged with the build id.
  pub image_uri: String,
  /// Static assets to publish under the build's prefix.
  pub assets: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
  pub stage: String,
  pub build_id: String,
  pub outcome: ReconcileOutcome,
  /// Why a rolled-back stack update did not apply.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub failures: Vec<ResourceFailure>,
  /// Stack outputs other than the content signature.
  pub outputs: BTreeMap<String, String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assets: Option<AssetUpload>,
  pub release: ReleaseReport,
}

/// Compile, publish assets, reconcile and release one stage.
///
/// A rolled-back stack update is not an error: the functions still run the
/// previous template and are released as they are, with the rollback
/// reasons carried in the report.
pub async fn deploy(ctx: &StageContext, manifest: &Manifest, request: &DeployRequest) -> Result<DeployReport, StageError> {
  manifest.validate_for_deploy()?;
  let stage = manifest.name.as_str();
  let build_id = manifest.build_details.id.as_str();
  info!(stage = %stage, build = %build_id, "deploying stage");

  let graph = compile(manifest, &request.image_uri, &manifest.signature()?)?;

  let uploaded = match &request.assets {
    Some(dir) => Some(assets::publish(ctx.client.as_ref(), stage, &manifest.region, build_id, dir).await?),
    None => None,
  };

  let role = Some(manifest.auth.stack_role.as_str()).filter(|r| !r.is_empty());
  let reconciler = Reconciler::new(ctx.client.clone(), ctx.settings.reconcile_options());
  let reconciliation = reconciler.reconcile(stage, &graph, role).await?;

  let releaser = Releaser::new(
    ctx.client.clone(),
    ReleaseOptions {
      alias: ctx.settings.live_alias.clone(),
      warm: manifest.http.warm,
      deploy_commands: manifest.deploy_commands.clone(),
      parallelism: ctx.settings.parallelism,
    },
  );
  let release = releaser.release(&reconciliation.resources).await?;

  let outputs = reconciliation
    .stack
    .outputs
    .iter()
    .filter(|o| o.key != SIGNATURE_OUTPUT)
    .map(|o| (o.key.clone(), o.value.clone()))
    .collect();

  info!(stage = %stage, outcome = ?reconciliation.outcome, "stage deployed");
  Ok(DeployReport {
    stage: stage.to_string(),
    build_id: build_id.to_string(),
    outcome: reconciliation.outcome,
    failures: reconciliation.failures,
    outputs,
    assets: uploaded,
    release,
  })
}

/// Run one command on the live command function of the stage.
///
/// A non-zero exit status is returned as [`CommandError::Failed`], which
/// carries the command's output.
pub async fn run(ctx: &StageContext, manifest: &Manifest, command: &str) -> Result<CommandOutput, StageError> {
  manifest.validate()?;
  let function = naming::function_name(&manifest.name, COMMAND_SUFFIX);
  let output = run_command(ctx.client.as_ref(), &function, &ctx.settings.live_alias, command).await?;
  Ok(output.into_result()?)
}

/// Delete expired artifacts and assets of the stage.
pub async fn purge(ctx: &StageContext, manifest: &Manifest, dry_run: bool) -> Result<SweepReport, StageError> {
  manifest.validate()?;
  let sweeper = Sweeper::new(ctx.client.clone())
    .with_keep(ctx.settings.retention_keep)
    .with_alias(ctx.settings.live_alias.clone());
  Ok(sweeper.sweep(&manifest.name, dry_run).await?)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TeardownReport {
  pub stack_deleted: bool,
  pub repository_deleted: bool,
  pub bucket_deleted: bool,
  pub objects_deleted: usize,
}

/// Remove the stage's stack, artifact repository and asset bucket.
///
/// Parts that no longer exist are skipped, so an interrupted teardown can be
/// run again.
pub async fn teardown(ctx: &StageContext, manifest: &Manifest) -> Result<TeardownReport, StageError> {
  manifest.validate()?;
  let stage = manifest.name.as_str();
  let client = ctx.client.as_ref();
  let mut report = TeardownReport::default();

  if client.describe_stack(stage).await?.is_some() {
    info!(stage = %stage, "deleting stack");
    client.delete_stack(stage).await?;
    report.stack_deleted = true;
  } else {
    info!(stage = %stage, "stack does not exist, skipping");
  }

  let repository = naming::repository(stage);
  report.repository_deleted = skip_missing(client.delete_repository(&repository).await)?.is_some();

  let bucket = naming::assets_bucket(stage);
  if let Some(keys) = skip_missing(client.list_objects(&bucket).await)? {
    if !keys.is_empty() {
      client.delete_objects(&bucket, &keys).await?;
    }
    report.objects_deleted = keys.len();
    client.delete_bucket(&bucket).await?;
    report.bucket_deleted = true;
  }

  info!(stage = %stage, "stage torn down");
  Ok(report)
}

fn skip_missing<T>(result: Result<T, ClientError>) -> Result<Option<T>, ClientError> {
  match result {
    Ok(value) => Ok(Some(value)),
    Err(e) if e.is_not_found() => Ok(None),
    Err(e) => Err(e),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::client::{MemoryControlPlane, Operation, StackStatus};

  const STAGE: &str = r#"
name: shop
region: eu-west-1
deploy-commands:
  - migrate --force
http:
  memory: 1024
  timeout: 28
  warm: 2
cli:
  memory: 512
  timeout: 600
queue:
  default:
    memory: 512
    timeout: 60
    tries: 3
    queues: [default]
build_details:
  id: b1
  hash: abc
  time: 1700000000
"#;

  fn manifest(build: &str) -> Manifest {
    let mut manifest = Manifest::from_yaml(STAGE).unwrap();
    manifest.build_details.id = build.to_string();
    manifest
  }

  fn context(plane: &Arc<MemoryControlPlane>) -> StageContext {
    let settings = Settings {
      poll_interval_secs: 0,
      max_wait_secs: Some(5),
      parallelism: 2,
      ..Settings::default()
    };
    StageContext::new(plane.clone(), settings)
  }

  fn request(build: &str) -> DeployRequest {
    DeployRequest {
      image_uri: format!("registry/shop:{}", build),
      assets: None,
    }
  }

  #[tokio::test]
  async fn deploy_creates_and_releases() {
    let plane = Arc::new(MemoryControlPlane::new());
    let ctx = context(&plane);

    let report = deploy(&ctx, &manifest("b1"), &request("b1")).await.unwrap();
    assert_eq!(report.outcome, ReconcileOutcome::Created);
    assert!(!report.outputs.contains_key(SIGNATURE_OUTPUT));
    assert!(report.outputs.contains_key("ApiGatewayUri"));
    assert_eq!(report.release.activated.len(), 3);
    assert_eq!(report.release.warmed, 2);
    assert_eq!(report.release.hooks.len(), 1);

    let live = plane.get_function("shop-http", "live").await.unwrap();
    assert_eq!(live.version, "1");
    assert_eq!(live.image_uri, "registry/shop:b1");
  }

  #[tokio::test]
  async fn second_deploy_updates_and_moves_alias() {
    let plane = Arc::new(MemoryControlPlane::new());
    let ctx = context(&plane);
    deploy(&ctx, &manifest("b1"), &request("b1")).await.unwrap();

    let report = deploy(&ctx, &manifest("b2"), &request("b2")).await.unwrap();
    assert_eq!(report.outcome, ReconcileOutcome::Updated);
    let live = plane.get_function("shop-cli", "live").await.unwrap();
    assert_eq!(live.version, "2");
    assert_eq!(live.image_uri, "registry/shop:b2");
  }

  #[tokio::test]
  async fn failed_reconcile_releases_nothing() {
    let plane = Arc::new(MemoryControlPlane::new());
    plane
      .script("shop", [StackStatus::CreateInProgress, StackStatus::RollbackComplete])
      .unwrap();
    let ctx = context(&plane);

    let err = deploy(&ctx, &manifest("b1"), &request("b1")).await.unwrap_err();
    assert!(matches!(err, StageError::Reconcile(_)));
    assert_eq!(plane.call_count(Operation::PublishVersion), 0);
  }

  #[tokio::test]
  async fn deploy_refuses_image_of_another_build() {
    let plane = Arc::new(MemoryControlPlane::new());
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.js"), "x").unwrap();
    let request = DeployRequest {
      image_uri: "registry/shop:x1".to_string(),
      assets: Some(dir.path().to_path_buf()),
    };

    let err = deploy(&context(&plane), &manifest("b1"), &request).await.unwrap_err();
    assert!(matches!(err, StageError::Compile(CompileError::BuildMismatch { .. })));
    assert_eq!(plane.call_count(Operation::PutObject), 0);
    assert_eq!(plane.call_count(Operation::DescribeStack), 0);
  }

  #[tokio::test]
  async fn deploy_signs_stack_with_stamped_hash() {
    let plane = Arc::new(MemoryControlPlane::new());
    deploy(&context(&plane), &manifest("b1"), &request("b1")).await.unwrap();

    let stack = plane.describe_stack("shop").await.unwrap().unwrap();
    let signature = stack.outputs.iter().find(|o| o.key == SIGNATURE_OUTPUT).unwrap();
    assert_eq!(signature.value, "abc");
  }

  #[tokio::test]
  async fn rolled_back_update_still_releases() {
    let plane = Arc::new(MemoryControlPlane::new());
    let ctx = context(&plane);
    deploy(&ctx, &manifest("b1"), &request("b1")).await.unwrap();
    plane
      .script("shop", [StackStatus::UpdateInProgress, StackStatus::UpdateRollbackComplete])
      .unwrap();

    let report = deploy(&ctx, &manifest("b2"), &request("b2")).await.unwrap();
    assert_eq!(report.outcome, ReconcileOutcome::RolledBack);
    assert_eq!(report.release.activated.len(), 3);
    let live = plane.get_function("shop-cli", "live").await.unwrap();
    assert_eq!(live.version, "2");
    assert_eq!(live.image_uri, "registry/shop:b1");
  }

  #[tokio::test]
  async fn deploy_requires_build_id() {
    let plane = Arc::new(MemoryControlPlane::new());
    let err = deploy(&context(&plane), &manifest(""), &request("b1")).await.unwrap_err();
    assert!(matches!(err, StageError::Manifest(ManifestError::MissingBuild)));
    assert_eq!(plane.call_count(Operation::DescribeStack), 0);
  }

  #[tokio::test]
  async fn run_uses_live_alias() {
    let plane = Arc::new(MemoryControlPlane::new());
    let ctx = context(&plane);
    deploy(&ctx, &manifest("b1"), &request("b1")).await.unwrap();

    let output = run(&ctx, &manifest("b1"), "route:list").await.unwrap();
    assert_eq!(output.output, "route:list\n");
    let last = plane.invocations().pop().unwrap();
    assert_eq!(last.qualifier, "live");
  }

  #[tokio::test]
  async fn teardown_is_rerunnable() {
    let plane = Arc::new(MemoryControlPlane::new());
    let ctx = context(&plane);
    plane.push_image("shop", "b1").unwrap();
    let mut with_assets = request("b1");
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.js"), "x").unwrap();
    with_assets.assets = Some(dir.path().to_path_buf());
    deploy(&ctx, &manifest("b1"), &with_assets).await.unwrap();

    let report = teardown(&ctx, &manifest("b1")).await.unwrap();
    assert!(report.stack_deleted && report.repository_deleted && report.bucket_deleted);
    assert_eq!(report.objects_deleted, 1);
    assert!(plane.describe_stack("shop").await.unwrap().is_none());

    let again = teardown(&ctx, &manifest("b1")).await.unwrap();
    assert!(!again.stack_deleted && !again.repository_deleted && !again.bucket_deleted);
  }

  #[tokio::test(start_paused = true)]
  async fn slow_stack_times_out() {
    let plane = Arc::new(MemoryControlPlane::new());
    plane
      .script("shop", std::iter::repeat_n(StackStatus::CreateInProgress, 100))
      .unwrap();
    let mut ctx = context(&plane);
    ctx.settings.poll_interval_secs = 1;
    ctx.settings.max_wait_secs = Some(3);

    let err = deploy(&ctx, &manifest("b1"), &request("b1")).await.unwrap_err();
    assert!(matches!(err, StageError::Reconcile(ReconcileError::Timeout { .. })));
  }
}
