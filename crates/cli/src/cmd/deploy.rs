//! Implementation of the `hover deploy` command.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use hover_lib::compile::check_image;
use hover_lib::naming;
use hover_lib::stage::{DeployReport, DeployRequest, deploy};

use super::{Sandbox, load_manifest, load_settings};
use crate::output::{self, OutputFormat, format_bytes, format_duration};

pub fn cmd_deploy(
  config: Option<&Path>,
  manifest_path: &Path,
  image: &str,
  assets: Option<PathBuf>,
  max_wait: Option<Duration>,
  format: OutputFormat,
) -> Result<()> {
  let start = Instant::now();
  let manifest = load_manifest(manifest_path)?;
  let mut settings = load_settings(config)?;
  if let Some(max_wait) = max_wait {
    settings.max_wait_secs = Some(max_wait.as_secs());
  }

  let tag = check_image(&manifest, image).context("Refusing to deploy")?;

  let sandbox = Sandbox::open(&settings)?;
  // Stands in for the packaging step, which pushes the image.
  sandbox
    .plane
    .push_image(&naming::repository(&manifest.name), tag)
    .context("Failed to record the pushed image")?;

  let ctx = sandbox.context(settings);
  let request = DeployRequest {
    image_uri: image.to_string(),
    assets,
  };
  let report = sandbox.run(async { deploy(&ctx, &manifest, &request).await.map_err(anyhow::Error::from) })?;

  format.report(&report, |report| render(report, start.elapsed()))
}

fn render(report: &DeployReport, elapsed: Duration) {
  output::success(&format!("Stage {} deployed", report.stage));
  output::stat("Build", &report.build_id);
  output::stat("Stack", report.outcome.as_str());
  output::stat("Functions released", report.release.activated.len());
  if let Some(assets) = &report.assets {
    output::stat(
      "Assets uploaded",
      format!("{}, {}", output::count(assets.keys.len(), "file"), format_bytes(assets.bytes)),
    );
  }
  for hook in &report.release.hooks {
    output::info(&format!("Ran `{}`", hook.command));
    if !hook.output.trim().is_empty() {
      print!("{}", hook.output);
    }
  }
  for (key, value) in &report.outputs {
    output::stat(key, value);
  }
  output::stat("Duration", format_duration(elapsed));

  for failure in &report.failures {
    output::warning(&format!("Stack update rolled back: {}", failure));
  }
  if report.release.warm_failures > 0 {
    output::warning(&format!(
      "{} failed",
      output::count(report.release.warm_failures, "warmup invocation")
    ));
  }
  for failure in &report.release.alias_failures {
    output::warning(&format!(
      "{} still serves its previous version, moving it to {} failed: {}",
      failure.function, failure.version, failure.error
    ));
  }
}
