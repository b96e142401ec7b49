//! End-to-end stage lifecycle against the in-process control plane.

use std::sync::Arc;

use base64::Engine;
use hover_lib::client::{
  ControlPlane, Invocation, InvokeHandler, MemoryControlPlane, Operation, SandboxStore, StackStatus,
};
use hover_lib::manifest::Manifest;
use hover_lib::reconcile::{ReconcileError, ReconcileOutcome};
use hover_lib::release::{CommandError, ReleaseError};
use hover_lib::settings::Settings;
use hover_lib::stage::{self, DeployRequest, StageContext, StageError};
use tempfile::TempDir;

const STAGE: &str = r#"
name: shop
region: eu-west-1
deploy-commands:
  - migrate --force
http:
  memory: 1024
  timeout: 28
  warm: 1
cli:
  memory: 512
queue:
  mail:
    timeout: 30
    queues: [emails, notifications]
"#;

fn build(id: &str) -> Manifest {
  let mut manifest = Manifest::from_yaml(STAGE).unwrap();
  manifest.build_details.id = id.to_string();
  manifest
}

fn context(plane: Arc<MemoryControlPlane>) -> StageContext {
  let settings = Settings {
    poll_interval_secs: 0,
    parallelism: 4,
    retention_keep: 2,
    ..Settings::default()
  };
  StageContext::new(plane, settings)
}

async fn deploy(ctx: &StageContext, plane: &MemoryControlPlane, id: &str) -> Result<stage::DeployReport, StageError> {
  plane.push_image("shop", id).unwrap();
  let request = DeployRequest {
    image_uri: format!("registry/shop:{}", id),
    assets: None,
  };
  stage::deploy(ctx, &build(id), &request).await
}

async fn live_image(plane: &MemoryControlPlane, function: &str) -> String {
  plane.get_function(function, "live").await.unwrap().image_uri
}

#[tokio::test]
async fn lifecycle_deploy_redeploy_purge_teardown() {
  let plane = Arc::new(MemoryControlPlane::new());
  let ctx = context(plane.clone());

  for id in ["b1", "b2", "b3", "b4"] {
    let report = deploy(&ctx, &plane, id).await.unwrap();
    assert_eq!(report.release.activated.len(), 3);
  }
  for function in ["shop-http", "shop-cli", "shop-mail-queue"] {
    assert_eq!(live_image(&plane, function).await, "registry/shop:b4");
  }

  let sweep = stage::purge(&ctx, &build(""), false).await.unwrap();
  assert_eq!(sweep.live_build, "b4");
  assert_eq!(sweep.deleted_images, ["b1", "b2"]);
  assert_eq!(plane.list_images("shop").await.unwrap().len(), 2);

  let teardown = stage::teardown(&ctx, &build("")).await.unwrap();
  assert!(teardown.stack_deleted);
  assert!(plane.describe_stack("shop").await.unwrap().is_none());
}

#[tokio::test]
async fn failing_hook_keeps_previous_build_live() {
  let handler: InvokeHandler = Arc::new(|invocation: &Invocation| {
    let body = if invocation.payload.contains("command") && invocation.qualifier == "2" {
      serde_json::json!({"output": base64::engine::general_purpose::STANDARD.encode("SQLSTATE"), "exit_code": 1})
    } else if invocation.payload.contains("command") {
      serde_json::json!({"output": "", "exit_code": 0})
    } else {
      serde_json::json!({})
    };
    Ok(body.to_string().into_bytes())
  });
  let plane = Arc::new(MemoryControlPlane::new().with_handler(handler));
  let ctx = context(plane.clone());

  deploy(&ctx, &plane, "b1").await.unwrap();
  let err = deploy(&ctx, &plane, "b2").await.unwrap_err();
  let StageError::Release(ReleaseError::Hook { source, .. }) = &err else {
    panic!("unexpected error: {err}");
  };
  assert!(matches!(source, CommandError::Failed { output, .. } if output == "SQLSTATE"));

  for function in ["shop-http", "shop-cli", "shop-mail-queue"] {
    assert_eq!(live_image(&plane, function).await, "registry/shop:b1");
  }
}

#[tokio::test]
async fn rolled_back_stack_is_replaced_on_a_later_deploy() {
  let plane = Arc::new(MemoryControlPlane::new());
  plane
    .script("shop", [StackStatus::CreateInProgress, StackStatus::RollbackComplete])
    .unwrap();
  let ctx = context(plane.clone());

  let first = deploy(&ctx, &plane, "b1").await.unwrap_err();
  assert!(matches!(first, StageError::Reconcile(ReconcileError::Failed { .. })));

  let second = deploy(&ctx, &plane, "b1").await.unwrap_err();
  assert!(matches!(second, StageError::Reconcile(ReconcileError::RollbackCompleteDeleted { .. })));
  assert_eq!(plane.call_count(Operation::UpdateStack), 0);

  let third = deploy(&ctx, &plane, "b1").await.unwrap();
  assert_eq!(third.outcome, ReconcileOutcome::Created);
}

#[tokio::test]
async fn sandbox_state_carries_over_between_sessions() {
  let temp = TempDir::new().unwrap();
  let store = SandboxStore::new(temp.path().to_path_buf());

  let plane = Arc::new(store.load().unwrap());
  deploy(&context(plane.clone()), &plane, "b1").await.unwrap();
  store.save(&plane).unwrap();

  let reopened = Arc::new(store.load().unwrap());
  let ctx = context(reopened.clone());
  let output = stage::run(&ctx, &build(""), "about").await.unwrap();
  assert_eq!(output.output, "about\n");

  let report = deploy(&ctx, &reopened, "b2").await.unwrap();
  assert_eq!(report.outcome, ReconcileOutcome::Updated);
  assert_eq!(live_image(&reopened, "shop-cli").await, "registry/shop:b2");
}
