//! Implementation of the `hover teardown` command.

use std::path::Path;

use anyhow::Result;

use hover_lib::stage::teardown;

use super::{Sandbox, load_manifest, load_settings};
use crate::output::{self, OutputFormat, removal};
use crate::prompts::confirm;

pub fn cmd_teardown(config: Option<&Path>, manifest_path: &Path, force: bool, format: OutputFormat) -> Result<()> {
  let manifest = load_manifest(manifest_path)?;
  if !confirm(&format!("Are you sure you want to delete stage `{}`?", manifest.name), force)? {
    output::info("Aborted");
    return Ok(());
  }

  let settings = load_settings(config)?;
  let sandbox = Sandbox::open(&settings)?;
  let ctx = sandbox.context(settings);
  let report = sandbox.run(async { teardown(&ctx, &manifest).await.map_err(anyhow::Error::from) })?;

  format.report(&report, |report| {
    output::success(&format!("Stage {} deleted", manifest.name));
    output::stat("Stack", removal(report.stack_deleted));
    output::stat("Repository", removal(report.repository_deleted));
    if report.bucket_deleted {
      output::stat("Asset bucket", format!("deleted ({})", output::count(report.objects_deleted, "object")));
    } else {
      output::stat("Asset bucket", removal(false));
    }
  })
}
