//! Release orchestration.
//!
//! Given the reconciled stack's resources, a release runs in three phases:
//!
//! 1. publish an immutable version of every function, concurrently; every
//!    publish is attempted and reported even when some fail
//! 2. warm the new web versions while running deploy hooks on the new command
//!    version; a failing hook aborts the release before any alias moves
//! 3. flip every function's live alias to its new version, concurrently;
//!    a failed flip is a warning and leaves that function on its old version

pub mod hooks;

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::client::{ControlPlane, StackResource};
use crate::consts::LIVE_ALIAS;
use crate::naming::{COMMAND_SUFFIX, WEB_SUFFIX, WORKER_SUFFIX};
use crate::template::ResourceKind;

pub use hooks::{CommandError, CommandOutput, run_command};

const WARMUP_PAYLOAD: &[u8] = br#"{"warmer_ping": true}"#;

/// What a function does, derived from its physical name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionRole {
  Web,
  Command,
  Worker,
}

impl FunctionRole {
  pub fn from_function_name(name: &str) -> Option<Self> {
    match name.rsplit('-').next()? {
      WEB_SUFFIX => Some(FunctionRole::Web),
      COMMAND_SUFFIX => Some(FunctionRole::Command),
      WORKER_SUFFIX => Some(FunctionRole::Worker),
      _ => None,
    }
  }
}

/// One function being released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionRelease {
  pub logical_id: String,
  pub function: String,
  pub role: FunctionRole,
  /// Set once publishing succeeded.
  pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishFailure {
  pub function: String,
  pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AliasFailure {
  pub function: String,
  pub version: String,
  pub error: String,
}

#[derive(Debug, Clone)]
pub struct ReleaseOptions {
  pub alias: String,
  /// Concurrent warmup invocations per web function.
  pub warm: u32,
  /// Hooks run in order on the new command version.
  pub deploy_commands: Vec<String>,
  /// Bound on concurrent control-plane calls within a phase.
  pub parallelism: usize,
}

impl Default for ReleaseOptions {
  fn default() -> Self {
    Self {
      alias: LIVE_ALIAS.to_string(),
      warm: 0,
      deploy_commands: Vec::new(),
      parallelism: 8,
    }
  }
}

/// Everything a completed release did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReleaseReport {
  pub functions: Vec<FunctionRelease>,
  pub warmed: usize,
  pub warm_failures: usize,
  pub hooks: Vec<CommandOutput>,
  /// Functions whose alias now points at the new version.
  pub activated: Vec<String>,
  pub alias_failures: Vec<AliasFailure>,
}

fn format_publish_failures(failures: &[PublishFailure]) -> String {
  failures
    .iter()
    .map(|f| format!("\n  {}: {}", f.function, f.error))
    .collect()
}

#[derive(Debug, Error)]
pub enum ReleaseError {
  #[error("the stack has no functions to release")]
  NoFunctions,

  #[error(
    "failed to publish new versions of {} of {} functions{}",
    .failures.len(),
    .failures.len() + .published.len(),
    format_publish_failures(.failures)
  )]
  Publish {
    published: Vec<FunctionRelease>,
    failures: Vec<PublishFailure>,
  },

  #[error("deploy commands are configured but the stack has no command function")]
  NoCommandFunction,

  #[error("deploy command aborted the release: {source}")]
  Hook {
    /// Hooks that ran before the failing one.
    completed: Vec<CommandOutput>,
    #[source]
    source: CommandError,
  },
}

/// Releases the functions of one reconciled stack.
pub struct Releaser {
  client: Arc<dyn ControlPlane>,
  options: ReleaseOptions,
  semaphore: Arc<Semaphore>,
}

impl Releaser {
  pub fn new(client: Arc<dyn ControlPlane>, options: ReleaseOptions) -> Self {
    let semaphore = Arc::new(Semaphore::new(options.parallelism.max(1)));
    Self {
      client,
      options,
      semaphore,
    }
  }

  /// Functions among `resources`, with their roles.
  pub fn functions(resources: &[StackResource]) -> Vec<FunctionRelease> {
    resources
      .iter()
      .filter(|r| r.kind() == Some(ResourceKind::Function))
      .filter_map(|r| match FunctionRole::from_function_name(&r.physical_id) {
        Some(role) => Some(FunctionRelease {
          logical_id: r.logical_id.clone(),
          function: r.physical_id.clone(),
          role,
          version: None,
        }),
        None => {
          warn!(function = %r.physical_id, "function name has no known role suffix, skipping");
          None
        }
      })
      .collect()
  }

  pub async fn release(&self, resources: &[StackResource]) -> Result<ReleaseReport, ReleaseError> {
    let functions = Self::functions(resources);
    if functions.is_empty() {
      return Err(ReleaseError::NoFunctions);
    }

    let functions = self.publish(functions).await?;
    let mut report = ReleaseReport::default();

    let (warm, hooks) = tokio::join!(self.warm(&functions), self.run_hooks(&functions));
    (report.warmed, report.warm_failures) = warm;
    report.hooks = hooks?;

    let (activated, alias_failures) = self.activate(&functions).await;
    report.activated = activated;
    report.alias_failures = alias_failures;
    report.functions = functions;
    Ok(report)
  }

  /// Phase 1.
  async fn publish(&self, functions: Vec<FunctionRelease>) -> Result<Vec<FunctionRelease>, ReleaseError> {
    info!(count = functions.len(), "publishing new versions");
    let names: Vec<String> = functions.iter().map(|f| f.function.clone()).collect();
    let client = self.client.clone();
    let results = run_bounded(self.semaphore.clone(), names, move |name| {
      let client = client.clone();
      async move { client.publish_version(&name).await }
    })
    .await;

    let mut published = Vec::new();
    let mut failures = Vec::new();
    for (mut function, result) in functions.into_iter().zip(results) {
      match result {
        Some(Ok(version)) => {
          info!(function = %function.function, version = %version, "published version");
          function.version = Some(version);
          published.push(function);
        }
        Some(Err(e)) => {
          warn!(function = %function.function, error = %e, "failed to publish version");
          failures.push(PublishFailure {
            function: function.function,
            error: e.to_string(),
          });
        }
        None => failures.push(PublishFailure {
          function: function.function,
          error: "publish task aborted".to_string(),
        }),
      }
    }

    if failures.is_empty() {
      Ok(published)
    } else {
      Err(ReleaseError::Publish { published, failures })
    }
  }

  /// Phase 2, web half. Returns `(succeeded, failed)` warmup counts.
  async fn warm(&self, functions: &[FunctionRelease]) -> (usize, usize) {
    let mut targets = Vec::new();
    for function in functions.iter().filter(|f| f.role == FunctionRole::Web) {
      if let Some(version) = &function.version {
        for _ in 0..self.options.warm {
          targets.push((function.function.clone(), version.clone()));
        }
      }
    }
    if targets.is_empty() {
      return (0, 0);
    }

    info!(invocations = targets.len(), "warming new web versions");
    let client = self.client.clone();
    let results = run_bounded(self.semaphore.clone(), targets, move |(name, version)| {
      let client = client.clone();
      async move { client.invoke(&name, &version, WARMUP_PAYLOAD).await }
    })
    .await;

    let mut warmed = 0;
    let mut failed = 0;
    for result in results {
      match result {
        Some(Ok(_)) => warmed += 1,
        Some(Err(e)) => {
          warn!(error = %e, "warmup invocation failed");
          failed += 1;
        }
        None => failed += 1,
      }
    }
    (warmed, failed)
  }

  /// Phase 2, command half. Hooks run one after another; the first failure
  /// stops the release.
  async fn run_hooks(&self, functions: &[FunctionRelease]) -> Result<Vec<CommandOutput>, ReleaseError> {
    if self.options.deploy_commands.is_empty() {
      return Ok(Vec::new());
    }
    let Some((function, version)) = functions
      .iter()
      .find(|f| f.role == FunctionRole::Command)
      .and_then(|f| f.version.as_deref().map(|v| (f.function.as_str(), v)))
    else {
      return Err(ReleaseError::NoCommandFunction);
    };

    let mut completed = Vec::new();
    for command in &self.options.deploy_commands {
      let result = run_command(self.client.as_ref(), function, version, command)
        .await
        .and_then(CommandOutput::into_result);
      match result {
        Ok(output) => completed.push(output),
        Err(source) => {
          error!(command = %command, error = %source, "deploy command failed");
          return Err(ReleaseError::Hook { completed, source });
        }
      }
    }
    Ok(completed)
  }

  /// Phase 3.
  async fn activate(&self, functions: &[FunctionRelease]) -> (Vec<String>, Vec<AliasFailure>) {
    info!(alias = %self.options.alias, "activating new versions");
    let targets: Vec<(String, String)> = functions
      .iter()
      .filter_map(|f| f.version.clone().map(|v| (f.function.clone(), v)))
      .collect();

    let client = self.client.clone();
    let alias = self.options.alias.clone();
    let results = run_bounded(self.semaphore.clone(), targets.clone(), move |(name, version)| {
      let client = client.clone();
      let alias = alias.clone();
      async move { client.update_alias(&name, &alias, &version).await }
    })
    .await;

    let mut activated = Vec::new();
    let mut failures = Vec::new();
    for ((function, version), result) in targets.into_iter().zip(results) {
      let error = match result {
        Some(Ok(())) => {
          activated.push(function);
          continue;
        }
        Some(Err(e)) => e.to_string(),
        None => "alias task aborted".to_string(),
      };
      warn!(function = %function, version = %version, error = %error, "failed to move alias");
      failures.push(AliasFailure {
        function,
        version,
        error,
      });
    }
    (activated, failures)
  }
}

/// Run `task` over `inputs` concurrently, at most as many at once as the
/// semaphore allows. Slot `i` of the result holds the outcome for input `i`,
/// or `None` if its task panicked.
async fn run_bounded<I, T, F, Fut>(semaphore: Arc<Semaphore>, inputs: Vec<I>, task: F) -> Vec<Option<T>>
where
  I: Send + 'static,
  T: Send + 'static,
  F: Fn(I) -> Fut,
  Fut: Future<Output = T> + Send + 'static,
{
  let mut slots: Vec<Option<T>> = inputs.iter().map(|_| None).collect();
  let mut join_set = JoinSet::new();

  for (index, input) in inputs.into_iter().enumerate() {
    let semaphore = semaphore.clone();
    let work = task(input);
    join_set.spawn(async move {
      // The semaphore is never closed.
      let _permit = semaphore.acquire_owned().await.ok();
      (index, work.await)
    });
  }

  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok((index, value)) => slots[index] = Some(value),
      Err(e) => error!(error = %e, "release task panicked"),
    }
  }
  slots
}
