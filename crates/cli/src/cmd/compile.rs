//! Implementation of the `hover compile` command.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use hover_lib::compile::compile;

use super::load_manifest;
use crate::output;

/// Compile a build manifest and print or write the rendered template.
pub fn cmd_compile(manifest_path: &Path, image: &str, out: Option<&Path>) -> Result<()> {
  let manifest = load_manifest(manifest_path)?;
  let signature = manifest.signature()?;
  let graph = compile(&manifest, image, &signature).context("Failed to compile stage")?;
  let template = graph.render()?;

  match out {
    Some(path) => {
      fs::write(path, &template).with_context(|| format!("Failed to write template to {}", path.display()))?;
      info!(path = %path.display(), resources = graph.len(), "template written");
      output::success(&format!("Compiled {} to {}", output::count(graph.len(), "resource"), path.display()));
    }
    None => println!("{}", template),
  }
  Ok(())
}
