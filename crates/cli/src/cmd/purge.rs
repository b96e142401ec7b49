//! Implementation of the `hover purge` command.

use std::path::Path;

use anyhow::Result;

use hover_lib::retention::SweepReport;
use hover_lib::stage::purge;

use super::{Sandbox, load_manifest, load_settings};
use crate::output::{self, OutputFormat};

pub fn cmd_purge(config: Option<&Path>, manifest_path: &Path, dry_run: bool, format: OutputFormat) -> Result<()> {
  let manifest = load_manifest(manifest_path)?;
  let settings = load_settings(config)?;
  let sandbox = Sandbox::open(&settings)?;
  let ctx = sandbox.context(settings);

  let report = sandbox.run(async { purge(&ctx, &manifest, dry_run).await.map_err(anyhow::Error::from) })?;
  format.report(&report, render)
}

fn render(report: &SweepReport) {
  if report.dry_run {
    output::info("Dry run - no changes made");
    for tag in &report.deleted_images {
      println!("  would purge image {}", tag);
    }
    for key in &report.deleted_objects {
      println!("  would purge object {}", key);
    }
  } else {
    output::success("Stage purged");
  }
  output::stat("Live build", &report.live_build);
  output::stat("Images retained", report.retained.len());
  output::stat("Images removed", report.deleted_images.len());
  output::stat("Objects removed", report.deleted_objects.len());
  for warning in &report.warnings {
    output::warning(&format!("Failed to delete {}", warning));
  }
}
