mod compile;
mod deploy;
mod purge;
mod run;
mod teardown;

pub use compile::cmd_compile;
pub use deploy::cmd_deploy;
pub use purge::cmd_purge;
pub use run::cmd_run;
pub use teardown::cmd_teardown;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use hover_lib::client::{MemoryControlPlane, SandboxStore};
use hover_lib::manifest::Manifest;
use hover_lib::settings::Settings;
use hover_lib::stage::StageContext;

fn load_manifest(path: &Path) -> Result<Manifest> {
  Manifest::load(path).with_context(|| format!("Failed to load stage manifest {}", path.display()))
}

/// Sandbox control plane shared by consecutive invocations.
struct Sandbox {
  store: SandboxStore,
  plane: Arc<MemoryControlPlane>,
}

impl Sandbox {
  fn open(settings: &Settings) -> Result<Self> {
    let store = SandboxStore::new(settings.data_dir()?);
    debug!(path = %store.base_path().display(), "opening sandbox");
    let plane = store.load().context("Failed to load sandbox state")?;
    Ok(Self {
      store,
      plane: Arc::new(plane),
    })
  }

  fn context(&self, settings: Settings) -> StageContext {
    StageContext::new(self.plane.clone(), settings)
  }

  /// Drive `operation` to completion, then persist the sandbox whether or
  /// not it succeeded.
  fn run<T, F>(&self, operation: F) -> Result<T>
  where
    F: Future<Output = Result<T>>,
  {
    let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
    let result = rt.block_on(operation);
    self.store.save(&self.plane).context("Failed to save sandbox state")?;
    result
  }
}

fn load_settings(config: Option<&Path>) -> Result<Settings> {
  Settings::load(config).context("Failed to load settings")
}
