//! Implementation of the `hover run` command.

use std::path::Path;

use anyhow::Result;

use hover_lib::release::CommandError;
use hover_lib::stage::{self, StageError};

use super::{Sandbox, load_manifest, load_settings};
use crate::output::{self, OutputFormat};

/// Run `command` on the stage's live command function and print its output.
pub fn cmd_run(config: Option<&Path>, stage_path: &Path, command: &str, format: OutputFormat) -> Result<()> {
  let manifest = load_manifest(stage_path)?;
  let settings = load_settings(config)?;
  let sandbox = Sandbox::open(&settings)?;
  let ctx = sandbox.context(settings);

  let result = sandbox.run(async { Ok::<_, anyhow::Error>(stage::run(&ctx, &manifest, command).await) })?;
  match result {
    Ok(outcome) if format.is_json() => format.report(&outcome, |_| {}),
    Ok(outcome) => {
      print!("{}", outcome.output);
      output::success(&format!("Executed command '{}'", outcome.command));
      Ok(())
    }
    Err(StageError::Command(CommandError::Failed { output: text, .. })) if !format.is_json() => {
      print!("{}", text);
      anyhow::bail!("failed to run {}", command)
    }
    Err(e) => Err(e.into()),
  }
}
