//! Template compiler.
//!
//! `compile` turns a stage manifest plus the locator of its built image into
//! a [`ResourceGraph`]. It is pure: the same inputs always render to the same
//! bytes, which is what lets the reconciler treat "no changes" as success.

mod compute;
mod edge;

use thiserror::Error;
use tracing::debug;

use crate::consts::SIGNATURE_OUTPUT;
use crate::manifest::{Manifest, ManifestError};
use crate::template::{GraphError, ResourceGraph};

/// Logical names shared between the compute and edge halves of the graph.
pub mod names {
  pub const WEB_FUNCTION: &str = "HTTPLambda";
  pub const WEB_ALIAS: &str = "HTTPLambdaLiveAlias";
  pub const COMMAND_FUNCTION: &str = "CliLambda";
  pub const COMMAND_ALIAS: &str = "CliLambdaLiveAlias";
  pub const WARMER_RULE: &str = "WarmerEventRule";
  pub const WARMER_PERMISSION: &str = "WarmerEventInvokePermission";
  pub const SCHEDULER_RULE: &str = "SchedulerEventRule";
  pub const SCHEDULER_PERMISSION: &str = "SchedulerEventRuleInvokePermission";
  pub const API: &str = "ApiGateway";
  pub const API_INTEGRATION: &str = "ApiGatewayLambdaIntegration";
  pub const API_ROUTE: &str = "ApiGatewayRoute";
  pub const API_STAGE: &str = "ApiGatewayStage";
  pub const API_DEPLOYMENT: &str = "ApiGatewayDeployment";
  pub const API_PERMISSION: &str = "ApiGatewayInvokePermission";
  pub const DISTRIBUTION: &str = "CFDistribution";

  pub fn worker_function(group: &str) -> String {
    format!("{}QueueLambda", group)
  }

  pub fn worker_alias(group: &str) -> String {
    format!("{}LambdaLiveAlias", group)
  }

  pub fn queue(queue: &str) -> String {
    format!("{}Queue", queue)
  }

  pub fn queue_mapping(queue: &str) -> String {
    format!("{}QueueSourceMapping", self::queue(queue))
  }

  pub fn log_group(function: &str) -> String {
    format!("{}LogGroup", function)
  }
}

#[derive(Debug, Error)]
pub enum CompileError {
  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("image locator `{0}` has no tag")]
  UntaggedImage(String),

  #[error("image is tagged `{tag}` but the manifest describes build `{build}`")]
  BuildMismatch { tag: String, build: String },
}

/// Check that `manifest` is deployable with `image_uri` and return the
/// image's build tag.
pub fn check_image<'a>(manifest: &Manifest, image_uri: &'a str) -> Result<&'a str, CompileError> {
  manifest.validate_for_deploy()?;
  let Some(tag) = crate::naming::image_tag(image_uri) else {
    return Err(CompileError::UntaggedImage(image_uri.to_string()));
  };
  // Retention finds the live build through the image tag, assets through the
  // build id.
  if tag != manifest.build_details.id {
    return Err(CompileError::BuildMismatch {
      tag: tag.to_string(),
      build: manifest.build_details.id.clone(),
    });
  }
  Ok(tag)
}

/// Compile `manifest` into the resource graph of its stage.
///
/// `content_hash` is embedded verbatim as the `Signature` output.
pub fn compile(manifest: &Manifest, image_uri: &str, content_hash: &str) -> Result<ResourceGraph, CompileError> {
  check_image(manifest, image_uri)?;

  let mut graph = ResourceGraph::new();
  compute::web(&mut graph, manifest, image_uri)?;
  compute::command(&mut graph, manifest, image_uri)?;
  for (group, worker) in &manifest.queue {
    compute::worker_group(&mut graph, manifest, image_uri, group, worker)?;
  }
  edge::api(&mut graph, manifest)?;
  edge::distribution(&mut graph, manifest)?;

  graph.output(SIGNATURE_OUTPUT, None, content_hash);
  edge::outputs(&mut graph);

  graph.validate()?;
  debug!(stage = %manifest.name, resources = graph.len(), "compiled resource graph");
  Ok(graph)
}
