//! Stack reconciliation.
//!
//! Converges the remote stack of a stage onto a compiled [`ResourceGraph`]:
//!
//! - absent: create, then poll until a terminal status
//! - `ROLLBACK_COMPLETE`: a create that can never be updated; delete it and
//!   ask for a retry
//! - otherwise: update, where "no updates" is an immediate success, then poll
//!
//! On failure the stack's event history is diagnosed into one aggregated
//! error naming every failing resource.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{
  ClientError, ControlPlane, ResourceStatus, STACK_RESOURCE_TYPE, Stack, StackEvent, StackPhase, StackRequest,
  StackResource, StackStatus, StackUpdate,
};
use crate::consts::DEFAULT_POLL_INTERVAL_SECS;
use crate::template::{GraphError, ResourceGraph};

/// Failure reasons that only report the cancellation of sibling work.
const CANCELLATION_REASONS: [&str; 2] = ["Resource update cancelled", "Resource creation cancelled"];

#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
  /// Delay before each status check.
  pub poll_interval: Duration,
  /// Give up polling after this long. `None` waits for a terminal status.
  pub max_wait: Option<Duration>,
}

impl Default for ReconcileOptions {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
      max_wait: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
  Created,
  Updated,
  /// The remote stack already matched the template.
  Unchanged,
  /// The update was rolled back; the stack keeps its previous template.
  RolledBack,
}

impl ReconcileOutcome {
  pub fn as_str(&self) -> &'static str {
    match self {
      ReconcileOutcome::Created => "created",
      ReconcileOutcome::Updated => "updated",
      ReconcileOutcome::Unchanged => "unchanged",
      ReconcileOutcome::RolledBack => "rolled back",
    }
  }
}

/// Terminal state of a successful reconciliation.
#[derive(Debug, Clone)]
pub struct Reconciliation {
  pub stack: Stack,
  pub resources: Vec<StackResource>,
  pub outcome: ReconcileOutcome,
  /// Why a rolled-back update did not apply. Empty otherwise.
  pub failures: Vec<ResourceFailure>,
}

/// A resource-level failure reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ResourceFailure {
  pub logical_id: String,
  pub physical_id: String,
  pub resource_type: String,
  pub status: ResourceStatus,
  pub reason: String,
}

impl std::fmt::Display for ResourceFailure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let id = if self.physical_id.is_empty() {
      &self.logical_id
    } else {
      &self.physical_id
    };
    write!(f, "{}: {}", id, self.reason)
  }
}

fn format_failures(failures: &[ResourceFailure]) -> String {
  failures.iter().map(|failure| format!("\n  {}", failure)).collect()
}

#[derive(Debug, Error)]
pub enum ReconcileError {
  #[error(transparent)]
  Client(#[from] ClientError),

  #[error(transparent)]
  Render(#[from] GraphError),

  #[error("a failed stack `{stack}` is being deleted; try again in a bit")]
  RollbackCompleteDeleted { stack: String },

  #[error("stack `{stack}` provisioning failed ({status}){}", format_failures(.failures))]
  Failed {
    stack: String,
    status: StackStatus,
    failures: Vec<ResourceFailure>,
  },

  #[error("stack `{stack}` still {status} after {waited:?}")]
  Timeout {
    stack: String,
    status: StackStatus,
    waited: Duration,
  },

  #[error("stack `{stack}` disappeared while being reconciled")]
  Vanished { stack: String },
}

/// Drives one stage's stack to match a compiled graph.
pub struct Reconciler {
  client: Arc<dyn ControlPlane>,
  options: ReconcileOptions,
}

impl Reconciler {
  pub fn new(client: Arc<dyn ControlPlane>, options: ReconcileOptions) -> Self {
    Self { client, options }
  }

  /// Reconcile stack `name` against `graph`.
  ///
  /// `role` is the role assumed by the control plane when creating the stack.
  pub async fn reconcile(
    &self,
    name: &str,
    graph: &ResourceGraph,
    role: Option<&str>,
  ) -> Result<Reconciliation, ReconcileError> {
    let request = StackRequest {
      name: name.to_string(),
      template: graph.render()?,
      role: role.filter(|r| !r.is_empty()).map(str::to_string),
    };

    let mut outcome = match self.client.describe_stack(name).await? {
      None => {
        info!(stack = %name, "creating stack");
        self.client.create_stack(&request).await?;
        ReconcileOutcome::Created
      }
      Some(stack) if stack.status == StackStatus::RollbackComplete => {
        warn!(stack = %name, "stack is in ROLLBACK_COMPLETE, deleting it");
        self.client.delete_stack(name).await?;
        return Err(ReconcileError::RollbackCompleteDeleted {
          stack: name.to_string(),
        });
      }
      Some(stack) => {
        info!(stack = %name, status = %stack.status, "updating stack");
        match self.client.update_stack(&request).await? {
          StackUpdate::Unchanged => {
            info!(stack = %name, "no stack changes to perform");
            let resources = self.client.stack_resources(name).await?;
            return Ok(Reconciliation {
              stack,
              resources,
              outcome: ReconcileOutcome::Unchanged,
              failures: Vec::new(),
            });
          }
          StackUpdate::Started => ReconcileOutcome::Updated,
        }
      }
    };

    let stack = self.wait(name).await?;
    let mut failures = Vec::new();
    if stack.status.phase() == StackPhase::RolledBack {
      failures = self.diagnose_stack(name).await;
      for failure in &failures {
        warn!(stack = %name, resource = %failure.logical_id, reason = %failure.reason, "stack update rolled back");
      }
      outcome = ReconcileOutcome::RolledBack;
    }

    let resources = self.client.stack_resources(name).await?;
    info!(stack = %name, status = %stack.status, resources = resources.len(), "stack reconciled");
    Ok(Reconciliation {
      stack,
      resources,
      outcome,
      failures,
    })
  }

  /// Poll until the stack leaves its converging states.
  async fn wait(&self, name: &str) -> Result<Stack, ReconcileError> {
    let started = Instant::now();
    loop {
      tokio::time::sleep(self.options.poll_interval).await;

      let Some(stack) = self.client.describe_stack(name).await? else {
        return Err(ReconcileError::Vanished { stack: name.to_string() });
      };

      match stack.status.phase() {
        StackPhase::Succeeded | StackPhase::RolledBack => return Ok(stack),
        StackPhase::Failed => return Err(self.failure(name, stack.status).await),
        StackPhase::Converging => {
          debug!(stack = %name, status = %stack.status, "stack converging");
          if let Some(max_wait) = self.options.max_wait
            && started.elapsed() >= max_wait
          {
            return Err(ReconcileError::Timeout {
              stack: name.to_string(),
              status: stack.status,
              waited: started.elapsed(),
            });
          }
        }
      }
    }
  }

  async fn failure(&self, name: &str, status: StackStatus) -> ReconcileError {
    ReconcileError::Failed {
      stack: name.to_string(),
      status,
      failures: self.diagnose_stack(name).await,
    }
  }

  async fn diagnose_stack(&self, name: &str) -> Vec<ResourceFailure> {
    match self.client.stack_events(name).await {
      Ok(events) => diagnose(name, &events),
      Err(e) => {
        warn!(stack = %name, error = %e, "failed to read stack events");
        Vec::new()
      }
    }
  }
}

/// Extract the resource failures of the most recent operation on `stack`.
///
/// `events` is newest first. Scanning stops at the stack's own in-progress
/// marker; anything older belongs to a previous operation. Cancellations
/// caused by a sibling's failure are not reported.
pub fn diagnose(stack: &str, events: &[StackEvent]) -> Vec<ResourceFailure> {
  let mut failures = Vec::new();
  for event in events {
    let is_marker = event.resource_type == STACK_RESOURCE_TYPE
      && event.logical_id == stack
      && matches!(
        event.status,
        ResourceStatus::CreateInProgress | ResourceStatus::UpdateInProgress
      );
    if is_marker {
      break;
    }

    if !event.status.is_failure() {
      continue;
    }
    let reason = event.reason.clone().unwrap_or_default();
    if CANCELLATION_REASONS.contains(&reason.as_str()) {
      continue;
    }
    failures.push(ResourceFailure {
      logical_id: event.logical_id.clone(),
      physical_id: event.physical_id.clone(),
      resource_type: event.resource_type.clone(),
      status: event.status,
      reason,
    });
  }
  failures
}
