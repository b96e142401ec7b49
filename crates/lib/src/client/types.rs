//! Records exchanged with the control plane.

use serde::{Deserialize, Serialize};

use crate::template::ResourceKind;

/// Resource type the control plane reports for the stack itself.
pub const STACK_RESOURCE_TYPE: &str = "AWS::CloudFormation::Stack";

/// Status of a remote stack.
///
/// An absent stack is represented by `describe_stack` returning `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
  CreateInProgress,
  CreateComplete,
  CreateFailed,
  UpdateInProgress,
  UpdateCompleteCleanupInProgress,
  UpdateComplete,
  UpdateFailed,
  UpdateRollbackInProgress,
  UpdateRollbackCompleteCleanupInProgress,
  UpdateRollbackComplete,
  UpdateRollbackFailed,
  RollbackInProgress,
  RollbackComplete,
  RollbackFailed,
  DeleteInProgress,
  DeleteComplete,
  DeleteFailed,
}

/// Where a stack status sits in the reconciliation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPhase {
  /// Still converging toward the requested template.
  Converging,
  /// The requested template has been applied.
  Succeeded,
  /// The update was rolled back and the previous template is still applied.
  RolledBack,
  /// The requested operation will not complete.
  Failed,
}

impl StackStatus {
  pub fn phase(&self) -> StackPhase {
    match self {
      StackStatus::CreateInProgress | StackStatus::UpdateInProgress | StackStatus::UpdateCompleteCleanupInProgress => {
        StackPhase::Converging
      }
      StackStatus::CreateComplete | StackStatus::UpdateComplete => StackPhase::Succeeded,
      StackStatus::UpdateRollbackComplete => StackPhase::RolledBack,
      _ => StackPhase::Failed,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      StackStatus::CreateInProgress => "CREATE_IN_PROGRESS",
      StackStatus::CreateComplete => "CREATE_COMPLETE",
      StackStatus::CreateFailed => "CREATE_FAILED",
      StackStatus::UpdateInProgress => "UPDATE_IN_PROGRESS",
      StackStatus::UpdateCompleteCleanupInProgress => "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
      StackStatus::UpdateComplete => "UPDATE_COMPLETE",
      StackStatus::UpdateFailed => "UPDATE_FAILED",
      StackStatus::UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
      StackStatus::UpdateRollbackCompleteCleanupInProgress => "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS",
      StackStatus::UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
      StackStatus::UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
      StackStatus::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
      StackStatus::RollbackComplete => "ROLLBACK_COMPLETE",
      StackStatus::RollbackFailed => "ROLLBACK_FAILED",
      StackStatus::DeleteInProgress => "DELETE_IN_PROGRESS",
      StackStatus::DeleteComplete => "DELETE_COMPLETE",
      StackStatus::DeleteFailed => "DELETE_FAILED",
    }
  }
}

impl std::fmt::Display for StackStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOutput {
  pub key: String,
  pub value: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

/// Snapshot of a remote stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
  pub name: String,
  pub id: String,
  pub status: StackStatus,
  #[serde(default)]
  pub outputs: Vec<StackOutput>,
}

impl Stack {
  pub fn output(&self, key: &str) -> Option<&str> {
    self.outputs.iter().find(|o| o.key == key).map(|o| o.value.as_str())
  }
}

/// Template submission for create and update.
#[derive(Debug, Clone)]
pub struct StackRequest {
  pub name: String,
  pub template: String,
  /// Role the control plane assumes while applying the template.
  pub role: Option<String>,
}

/// Outcome of submitting an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackUpdate {
  Started,
  /// The submitted template matches the applied one.
  Unchanged,
}

/// A resource of a stack with its physical identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackResource {
  pub logical_id: String,
  pub physical_id: String,
  pub resource_type: String,
}

impl StackResource {
  pub fn kind(&self) -> Option<ResourceKind> {
    ResourceKind::from_type_name(&self.resource_type)
  }
}

/// Per-resource status carried by stack events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
  CreateInProgress,
  CreateFailed,
  CreateComplete,
  UpdateInProgress,
  UpdateFailed,
  UpdateComplete,
  DeleteInProgress,
  DeleteFailed,
  DeleteComplete,
  RollbackInProgress,
  RollbackComplete,
  UpdateRollbackInProgress,
  UpdateRollbackComplete,
  #[serde(other)]
  Other,
}

impl ResourceStatus {
  pub fn is_failure(&self) -> bool {
    matches!(
      self,
      ResourceStatus::CreateFailed | ResourceStatus::UpdateFailed | ResourceStatus::DeleteFailed
    )
  }
}

/// One entry of a stack's event history. Histories are newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEvent {
  pub logical_id: String,
  #[serde(default)]
  pub physical_id: String,
  pub resource_type: String,
  pub status: ResourceStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
}

/// A function's configuration at some qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfig {
  pub name: String,
  pub version: String,
  pub image_uri: String,
}

/// A pushed container image and every tag pointing at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactImage {
  pub tags: Vec<String>,
  /// Push time in seconds since the epoch.
  pub pushed_at: u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn phases() {
    assert_eq!(StackStatus::CreateInProgress.phase(), StackPhase::Converging);
    assert_eq!(StackStatus::UpdateCompleteCleanupInProgress.phase(), StackPhase::Converging);
    assert_eq!(StackStatus::CreateComplete.phase(), StackPhase::Succeeded);
    assert_eq!(StackStatus::UpdateComplete.phase(), StackPhase::Succeeded);
    assert_eq!(StackStatus::UpdateRollbackComplete.phase(), StackPhase::RolledBack);
    assert_eq!(StackStatus::UpdateRollbackFailed.phase(), StackPhase::Failed);
    assert_eq!(StackStatus::RollbackComplete.phase(), StackPhase::Failed);
    assert_eq!(StackStatus::UpdateRollbackInProgress.phase(), StackPhase::Failed);
  }

  #[test]
  fn status_wire_names() {
    let encoded = serde_json::to_value(StackStatus::UpdateRollbackCompleteCleanupInProgress).unwrap();
    assert_eq!(encoded, serde_json::json!("UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS"));
    assert_eq!(StackStatus::RollbackComplete.to_string(), "ROLLBACK_COMPLETE");
  }

  #[test]
  fn unknown_resource_status_is_other() {
    let status: ResourceStatus = serde_json::from_str("\"IMPORT_COMPLETE\"").unwrap();
    assert_eq!(status, ResourceStatus::Other);
    assert!(!status.is_failure());
    assert!(ResourceStatus::DeleteFailed.is_failure());
  }
}
