//! Control-plane client.
//!
//! Every component talks to the remote side through an explicitly constructed
//! `Arc<dyn ControlPlane>`. The in-process [`MemoryControlPlane`] implements
//! the trait for tests and for the CLI sandbox; adapters for a real cloud
//! implement the same trait.

mod memory;
mod sandbox;
mod types;

pub use memory::{
  ControlPlaneState, FunctionRecord, Invocation, InvokeHandler, MemoryControlPlane, Operation, ScriptedStatus, StackRecord,
};
pub use sandbox::{SandboxError, SandboxStore};
pub use types::*;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
  #[error("{0} does not exist")]
  NotFound(String),

  #[error("{operation} failed: {message}")]
  Rejected { operation: &'static str, message: String },

  #[error("internal client error: {0}")]
  Internal(String),
}

impl ClientError {
  pub fn rejected(operation: &'static str, message: impl Into<String>) -> Self {
    ClientError::Rejected {
      operation,
      message: message.into(),
    }
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, ClientError::NotFound(_))
  }
}

/// Operations consumed from the remote control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
  /// Current state of a stack, or `None` when it does not exist.
  async fn describe_stack(&self, name: &str) -> Result<Option<Stack>, ClientError>;

  async fn create_stack(&self, request: &StackRequest) -> Result<(), ClientError>;

  /// Submit an update. Returns [`StackUpdate::Unchanged`] when the remote side
  /// has nothing to do.
  async fn update_stack(&self, request: &StackRequest) -> Result<StackUpdate, ClientError>;

  async fn delete_stack(&self, name: &str) -> Result<(), ClientError>;

  async fn stack_resources(&self, name: &str) -> Result<Vec<StackResource>, ClientError>;

  /// Event history of a stack, newest first.
  async fn stack_events(&self, name: &str) -> Result<Vec<StackEvent>, ClientError>;

  /// Publish an immutable version from the function's current head.
  async fn publish_version(&self, function: &str) -> Result<String, ClientError>;

  async fn update_alias(&self, function: &str, alias: &str, version: &str) -> Result<(), ClientError>;

  /// Configuration of `function` at a version or alias.
  async fn get_function(&self, function: &str, qualifier: &str) -> Result<FunctionConfig, ClientError>;

  /// Invoke synchronously and return the response payload.
  async fn invoke(&self, function: &str, qualifier: &str, payload: &[u8]) -> Result<Vec<u8>, ClientError>;

  async fn list_images(&self, repository: &str) -> Result<Vec<ArtifactImage>, ClientError>;

  async fn batch_delete_images(&self, repository: &str, tags: &[String]) -> Result<(), ClientError>;

  async fn delete_repository(&self, repository: &str) -> Result<(), ClientError>;

  /// Whether `bucket` exists and is reachable.
  async fn head_bucket(&self, bucket: &str) -> Result<bool, ClientError>;

  async fn create_bucket(&self, bucket: &str, region: &str) -> Result<(), ClientError>;

  async fn delete_bucket(&self, bucket: &str) -> Result<(), ClientError>;

  /// Every object key in `bucket`.
  async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, ClientError>;

  async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), ClientError>;

  async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), ClientError>;
}
