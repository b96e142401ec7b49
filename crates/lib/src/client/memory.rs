//! In-process control plane.
//!
//! Stacks converge through a scripted sequence of statuses, one step per
//! `describe_stack` call. Applying a template materializes its functions,
//! aliases and outputs so the release and retention paths have something real
//! to act on. All state is serializable, which is what the sandbox store
//! persists between CLI invocations.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

use crate::consts::LATEST_VERSION;
use crate::template::ResourceKind;

use super::types::{
  ArtifactImage, FunctionConfig, ResourceStatus, STACK_RESOURCE_TYPE, Stack, StackEvent, StackOutput, StackPhase,
  StackRequest, StackResource, StackStatus, StackUpdate,
};
use super::{ClientError, ControlPlane};

/// Control-plane operations, used to inject failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
  DescribeStack,
  CreateStack,
  UpdateStack,
  DeleteStack,
  StackResources,
  StackEvents,
  PublishVersion,
  UpdateAlias,
  GetFunction,
  Invoke,
  ListImages,
  BatchDeleteImages,
  DeleteRepository,
  HeadBucket,
  CreateBucket,
  DeleteBucket,
  ListObjects,
  PutObject,
  DeleteObjects,
}

impl Operation {
  pub fn name(&self) -> &'static str {
    match self {
      Operation::DescribeStack => "describe stack",
      Operation::CreateStack => "create stack",
      Operation::UpdateStack => "update stack",
      Operation::DeleteStack => "delete stack",
      Operation::StackResources => "describe stack resources",
      Operation::StackEvents => "describe stack events",
      Operation::PublishVersion => "publish version",
      Operation::UpdateAlias => "update alias",
      Operation::GetFunction => "get function",
      Operation::Invoke => "invoke",
      Operation::ListImages => "list images",
      Operation::BatchDeleteImages => "batch delete images",
      Operation::DeleteRepository => "delete repository",
      Operation::HeadBucket => "head bucket",
      Operation::CreateBucket => "create bucket",
      Operation::DeleteBucket => "delete bucket",
      Operation::ListObjects => "list objects",
      Operation::PutObject => "put object",
      Operation::DeleteObjects => "delete objects",
    }
  }
}

/// A status a stack will report on a future poll, with the events recorded
/// when it is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedStatus {
  pub status: StackStatus,
  #[serde(default)]
  pub events: Vec<StackEvent>,
}

impl From<StackStatus> for ScriptedStatus {
  fn from(status: StackStatus) -> Self {
    Self {
      status,
      events: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackRecord {
  pub stack: Stack,
  #[serde(default)]
  pub role: Option<String>,
  /// Last template that reached a successful terminal status.
  #[serde(default)]
  pub applied_template: Option<String>,
  #[serde(default)]
  pub pending_template: Option<String>,
  #[serde(default)]
  pub resources: Vec<StackResource>,
  /// Newest first.
  #[serde(default)]
  pub events: Vec<StackEvent>,
  #[serde(default)]
  pub script: VecDeque<ScriptedStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
  /// Image of the unpublished head.
  pub image_uri: String,
  /// Image of every published version; version `n` is at index `n - 1`.
  #[serde(default)]
  pub versions: Vec<String>,
  #[serde(default)]
  pub aliases: BTreeMap<String, String>,
}

impl FunctionRecord {
  /// Resolve an alias or version to `(version, image)`.
  fn resolve(&self, qualifier: &str) -> Option<(String, String)> {
    let version = self.aliases.get(qualifier).map(String::as_str).unwrap_or(qualifier);
    if version == LATEST_VERSION {
      return Some((version.to_string(), self.image_uri.clone()));
    }
    let index = version.parse::<usize>().ok()?.checked_sub(1)?;
    self.versions.get(index).map(|image| (version.to_string(), image.clone()))
  }
}

/// Everything the in-process control plane knows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlaneState {
  #[serde(default)]
  pub stacks: BTreeMap<String, StackRecord>,
  #[serde(default)]
  pub functions: BTreeMap<String, FunctionRecord>,
  #[serde(default)]
  pub repositories: BTreeMap<String, Vec<ArtifactImage>>,
  /// Bucket name to object key to object size.
  #[serde(default)]
  pub buckets: BTreeMap<String, BTreeMap<String, u64>>,
  /// Logical clock used as the push time of images.
  #[serde(default)]
  pub clock: u64,
  #[serde(default)]
  pub serial: u64,
}

/// A recorded synchronous invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
  pub function: String,
  pub qualifier: String,
  pub payload: String,
}

pub type InvokeHandler = Arc<dyn Fn(&Invocation) -> Result<Vec<u8>, ClientError> + Send + Sync>;

struct Failure {
  operation: Operation,
  target: Option<String>,
  message: String,
}

pub struct MemoryControlPlane {
  state: Mutex<ControlPlaneState>,
  scripts: Mutex<HashMap<String, Vec<ScriptedStatus>>>,
  failures: Mutex<Vec<Failure>>,
  calls: Mutex<Vec<Operation>>,
  invocations: Mutex<Vec<Invocation>>,
  handler: InvokeHandler,
}

impl Default for MemoryControlPlane {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryControlPlane {
  pub fn new() -> Self {
    Self::with_state(ControlPlaneState::default())
  }

  pub fn with_state(state: ControlPlaneState) -> Self {
    Self {
      state: Mutex::new(state),
      scripts: Mutex::new(HashMap::new()),
      failures: Mutex::new(Vec::new()),
      calls: Mutex::new(Vec::new()),
      invocations: Mutex::new(Vec::new()),
      handler: Arc::new(runtime_handler),
    }
  }

  /// Answer invocations with `handler` instead of the built-in runtime stand-in.
  pub fn with_handler(mut self, handler: InvokeHandler) -> Self {
    self.handler = handler;
    self
  }

  /// Copy of the current state.
  pub fn snapshot(&self) -> Result<ControlPlaneState, ClientError> {
    Ok(lock(&self.state)?.clone())
  }

  /// Statuses the next create or update of `stack` will go through, in
  /// place of a straight path to completion.
  pub fn script<I, S>(&self, stack: &str, steps: I) -> Result<(), ClientError>
  where
    I: IntoIterator<Item = S>,
    S: Into<ScriptedStatus>,
  {
    let steps = steps.into_iter().map(Into::into).collect();
    lock(&self.scripts)?.insert(stack.to_string(), steps);
    Ok(())
  }

  /// Make every call of `operation` fail, optionally only for one target.
  pub fn fail(&self, operation: Operation, target: Option<&str>, message: &str) -> Result<(), ClientError> {
    lock(&self.failures)?.push(Failure {
      operation,
      target: target.map(str::to_string),
      message: message.to_string(),
    });
    Ok(())
  }

  pub fn clear_failures(&self) -> Result<(), ClientError> {
    lock(&self.failures)?.clear();
    Ok(())
  }

  /// Number of calls made to `operation` so far.
  pub fn call_count(&self, operation: Operation) -> usize {
    lock(&self.calls)
      .map(|calls| calls.iter().filter(|c| **c == operation).count())
      .unwrap_or(0)
  }

  pub fn invocations(&self) -> Vec<Invocation> {
    lock(&self.invocations).map(|i| i.clone()).unwrap_or_default()
  }

  /// Record a pushed image, standing in for the packaging step.
  pub fn push_image(&self, repository: &str, tag: &str) -> Result<ArtifactImage, ClientError> {
    let mut state = lock(&self.state)?;
    state.clock += 1;
    let image = ArtifactImage {
      tags: vec![tag.to_string()],
      pushed_at: state.clock,
    };
    state
      .repositories
      .entry(repository.to_string())
      .or_default()
      .push(image.clone());
    Ok(image)
  }

  /// Record a pushed image with an explicit push time.
  pub fn push_image_at(&self, repository: &str, tags: &[&str], pushed_at: u64) -> Result<(), ClientError> {
    let mut state = lock(&self.state)?;
    state.clock = state.clock.max(pushed_at);
    state
      .repositories
      .entry(repository.to_string())
      .or_default()
      .push(ArtifactImage {
        tags: tags.iter().map(|t| t.to_string()).collect(),
        pushed_at,
      });
    Ok(())
  }

  /// Record a call and apply any injected failure.
  fn enter(&self, operation: Operation, target: &str) -> Result<(), ClientError> {
    lock(&self.calls)?.push(operation);
    let failures = lock(&self.failures)?;
    if let Some(failure) = failures
      .iter()
      .find(|f| f.operation == operation && f.target.as_deref().is_none_or(|t| t == target))
    {
      return Err(ClientError::rejected(operation.name(), failure.message.clone()));
    }
    Ok(())
  }

  fn take_script(&self, stack: &str, default: StackStatus) -> Result<VecDeque<ScriptedStatus>, ClientError> {
    let steps = lock(&self.scripts)?
      .remove(stack)
      .unwrap_or_else(|| vec![default.into()]);
    Ok(steps.into())
  }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, ClientError> {
  mutex.lock().map_err(|_| ClientError::Internal("lock poisoned".into()))
}

fn stack_event(stack: &str, status: ResourceStatus) -> StackEvent {
  StackEvent {
    logical_id: stack.to_string(),
    physical_id: stack.to_string(),
    resource_type: STACK_RESOURCE_TYPE.to_string(),
    status,
    reason: None,
  }
}

fn stack_event_status(status: StackStatus) -> ResourceStatus {
  match status {
    StackStatus::CreateInProgress => ResourceStatus::CreateInProgress,
    StackStatus::CreateComplete => ResourceStatus::CreateComplete,
    StackStatus::CreateFailed => ResourceStatus::CreateFailed,
    StackStatus::UpdateInProgress => ResourceStatus::UpdateInProgress,
    StackStatus::UpdateComplete => ResourceStatus::UpdateComplete,
    StackStatus::UpdateFailed => ResourceStatus::UpdateFailed,
    StackStatus::UpdateRollbackInProgress => ResourceStatus::UpdateRollbackInProgress,
    StackStatus::UpdateRollbackComplete => ResourceStatus::UpdateRollbackComplete,
    StackStatus::RollbackInProgress => ResourceStatus::RollbackInProgress,
    StackStatus::RollbackComplete => ResourceStatus::RollbackComplete,
    StackStatus::DeleteInProgress => ResourceStatus::DeleteInProgress,
    StackStatus::DeleteComplete => ResourceStatus::DeleteComplete,
    StackStatus::DeleteFailed => ResourceStatus::DeleteFailed,
    _ => ResourceStatus::Other,
  }
}

/// Built-in stand-in for the packaged application runtime.
///
/// Commands succeed and echo themselves; warmup pings are acknowledged.
fn runtime_handler(invocation: &Invocation) -> Result<Vec<u8>, ClientError> {
  let request: Json = serde_json::from_str(&invocation.payload).unwrap_or(Json::Null);
  let response = match request.get("command").and_then(Json::as_str) {
    Some(command) => serde_json::json!({
      "output": BASE64.encode(format!("{}\n", command.trim())),
      "exit_code": 0,
    }),
    None => serde_json::json!({ "warmed": true }),
  };
  Ok(response.to_string().into_bytes())
}

/// Physical identity of a declared resource.
fn physical_id(stack: &str, logical: &str, kind: Option<ResourceKind>, properties: &Json) -> String {
  let literal = |key: &str| properties.get(key).and_then(Json::as_str).map(str::to_string);
  let named = match kind {
    Some(ResourceKind::Function) => literal("FunctionName"),
    Some(ResourceKind::Queue) => literal("QueueName"),
    Some(ResourceKind::EventRule) | Some(ResourceKind::HttpApi) => literal("Name"),
    _ => None,
  };
  named.unwrap_or_else(|| format!("{}-{}", stack, logical))
}

/// Resolve an output value against the materialized resources.
fn output_value(value: &Json, resources: &[StackResource]) -> String {
  if let Some(s) = value.as_str() {
    return s.to_string();
  }
  if let Some([logical, attribute]) = value
    .get("Fn::GetAtt")
    .and_then(Json::as_array)
    .map(Vec::as_slice)
  {
    let logical = logical.as_str().unwrap_or_default();
    let attribute = attribute.as_str().unwrap_or_default();
    let physical = resources
      .iter()
      .find(|r| r.logical_id == logical)
      .map(|r| r.physical_id.as_str())
      .unwrap_or(logical);
    return format!("https://{}.{}.sandbox", physical, attribute.to_lowercase());
  }
  value.to_string()
}

impl ControlPlaneState {
  /// Apply a submitted template: record its resources and outputs, create or
  /// update its functions and drop functions it no longer declares.
  fn materialize(&mut self, stack: &str, template: &str) -> Result<(), ClientError> {
    let document: Json =
      serde_json::from_str(template).map_err(|e| ClientError::rejected("apply template", e.to_string()))?;
    let empty = serde_json::Map::new();
    let declared = document.get("Resources").and_then(Json::as_object).unwrap_or(&empty);

    let mut resources = Vec::new();
    for (logical, resource) in declared {
      let resource_type = resource.get("Type").and_then(Json::as_str).unwrap_or_default();
      let properties = resource.get("Properties").cloned().unwrap_or(Json::Null);
      let kind = ResourceKind::from_type_name(resource_type);
      resources.push(StackResource {
        logical_id: logical.clone(),
        physical_id: physical_id(stack, logical, kind, &properties),
        resource_type: resource_type.to_string(),
      });
    }

    let Some(record) = self.stacks.get(stack) else {
      return Err(ClientError::NotFound(format!("stack {}", stack)));
    };

    let previous: BTreeSet<String> = function_names(&record.resources);
    let current: BTreeSet<String> = function_names(&resources);
    for removed in previous.difference(&current) {
      self.functions.remove(removed);
    }

    for (logical, resource) in declared {
      let properties = resource.get("Properties").cloned().unwrap_or(Json::Null);
      match resource.get("Type").and_then(Json::as_str).and_then(ResourceKind::from_type_name) {
        Some(ResourceKind::Function) => {
          let name = physical_id(stack, logical, Some(ResourceKind::Function), &properties);
          let image = properties
            .pointer("/Code/ImageUri")
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string();
          self.functions.entry(name).or_default().image_uri = image;
        }
        Some(ResourceKind::Alias) => {
          let target = properties.pointer("/FunctionName/Ref").and_then(Json::as_str);
          let function = target.and_then(|t| resources.iter().find(|r| r.logical_id == t));
          let alias = properties.get("Name").and_then(Json::as_str);
          let version = properties
            .get("FunctionVersion")
            .and_then(Json::as_str)
            .unwrap_or(LATEST_VERSION);
          if let (Some(function), Some(alias)) = (function, alias) {
            self
              .functions
              .entry(function.physical_id.clone())
              .or_default()
              .aliases
              .entry(alias.to_string())
              .or_insert_with(|| version.to_string());
          }
        }
        _ => {}
      }
    }

    let mut outputs = Vec::new();
    if let Some(declared_outputs) = document.get("Outputs").and_then(Json::as_object) {
      for (key, output) in declared_outputs {
        outputs.push(StackOutput {
          key: key.clone(),
          value: output_value(output.get("Value").unwrap_or(&Json::Null), &resources),
          description: output.get("Description").and_then(Json::as_str).map(str::to_string),
        });
      }
    }

    let Some(record) = self.stacks.get_mut(stack) else {
      return Err(ClientError::NotFound(format!("stack {}", stack)));
    };
    record.resources = resources;
    record.stack.outputs = outputs;
    record.applied_template = Some(template.to_string());
    Ok(())
  }
}

fn function_names(resources: &[StackResource]) -> BTreeSet<String> {
  resources
    .iter()
    .filter(|r| r.kind() == Some(ResourceKind::Function))
    .map(|r| r.physical_id.clone())
    .collect()
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
  async fn describe_stack(&self, name: &str) -> Result<Option<Stack>, ClientError> {
    self.enter(Operation::DescribeStack, name)?;
    let mut state = lock(&self.state)?;
    let Some(record) = state.stacks.get_mut(name) else {
      return Ok(None);
    };

    let Some(step) = record.script.pop_front() else {
      return Ok(Some(record.stack.clone()));
    };

    debug!(stack = %name, status = %step.status, "sandbox stack advanced");
    record.stack.status = step.status;
    for event in step.events {
      record.events.insert(0, event);
    }
    record
      .events
      .insert(0, stack_event(name, stack_event_status(step.status)));

    match step.status.phase() {
      StackPhase::Succeeded => {
        if let Some(template) = record.pending_template.take() {
          state.materialize(name, &template)?;
        }
      }
      StackPhase::RolledBack | StackPhase::Failed => {
        record.pending_template = None;
        record.script.clear();
      }
      StackPhase::Converging => {}
    }

    Ok(state.stacks.get(name).map(|r| r.stack.clone()))
  }

  async fn create_stack(&self, request: &StackRequest) -> Result<(), ClientError> {
    self.enter(Operation::CreateStack, &request.name)?;
    let script = self.take_script(&request.name, StackStatus::CreateComplete)?;
    let mut state = lock(&self.state)?;
    if state.stacks.contains_key(&request.name) {
      return Err(ClientError::rejected(
        Operation::CreateStack.name(),
        format!("stack [{}] already exists", request.name),
      ));
    }

    state.serial += 1;
    let record = StackRecord {
      stack: Stack {
        name: request.name.clone(),
        id: format!("sandbox:stack/{}/{}", request.name, state.serial),
        status: StackStatus::CreateInProgress,
        outputs: Vec::new(),
      },
      role: request.role.clone(),
      applied_template: None,
      pending_template: Some(request.template.clone()),
      resources: Vec::new(),
      events: vec![stack_event(&request.name, ResourceStatus::CreateInProgress)],
      script,
    };
    state.stacks.insert(request.name.clone(), record);
    Ok(())
  }

  async fn update_stack(&self, request: &StackRequest) -> Result<StackUpdate, ClientError> {
    self.enter(Operation::UpdateStack, &request.name)?;
    let mut state = lock(&self.state)?;
    let Some(record) = state.stacks.get_mut(&request.name) else {
      return Err(ClientError::NotFound(format!("stack {}", request.name)));
    };

    let status = record.stack.status;
    if status == StackStatus::RollbackComplete || status.phase() == StackPhase::Converging {
      return Err(ClientError::rejected(
        Operation::UpdateStack.name(),
        format!("stack [{}] is in {} state and can not be updated", request.name, status),
      ));
    }
    if record.applied_template.as_deref() == Some(request.template.as_str()) {
      return Ok(StackUpdate::Unchanged);
    }

    drop(state);
    let script = self.take_script(&request.name, StackStatus::UpdateComplete)?;
    let mut state = lock(&self.state)?;
    let Some(record) = state.stacks.get_mut(&request.name) else {
      return Err(ClientError::NotFound(format!("stack {}", request.name)));
    };
    record.stack.status = StackStatus::UpdateInProgress;
    record.pending_template = Some(request.template.clone());
    record.script = script;
    record
      .events
      .insert(0, stack_event(&request.name, ResourceStatus::UpdateInProgress));
    Ok(StackUpdate::Started)
  }

  async fn delete_stack(&self, name: &str) -> Result<(), ClientError> {
    self.enter(Operation::DeleteStack, name)?;
    let mut state = lock(&self.state)?;
    if let Some(record) = state.stacks.remove(name) {
      for function in function_names(&record.resources) {
        state.functions.remove(&function);
      }
    }
    Ok(())
  }

  async fn stack_resources(&self, name: &str) -> Result<Vec<StackResource>, ClientError> {
    self.enter(Operation::StackResources, name)?;
    let state = lock(&self.state)?;
    state
      .stacks
      .get(name)
      .map(|r| r.resources.clone())
      .ok_or_else(|| ClientError::NotFound(format!("stack {}", name)))
  }

  async fn stack_events(&self, name: &str) -> Result<Vec<StackEvent>, ClientError> {
    self.enter(Operation::StackEvents, name)?;
    let state = lock(&self.state)?;
    state
      .stacks
      .get(name)
      .map(|r| r.events.clone())
      .ok_or_else(|| ClientError::NotFound(format!("stack {}", name)))
  }

  async fn publish_version(&self, function: &str) -> Result<String, ClientError> {
    self.enter(Operation::PublishVersion, function)?;
    let mut state = lock(&self.state)?;
    let record = state
      .functions
      .get_mut(function)
      .ok_or_else(|| ClientError::NotFound(format!("function {}", function)))?;
    record.versions.push(record.image_uri.clone());
    Ok(record.versions.len().to_string())
  }

  async fn update_alias(&self, function: &str, alias: &str, version: &str) -> Result<(), ClientError> {
    self.enter(Operation::UpdateAlias, function)?;
    let mut state = lock(&self.state)?;
    let record = state
      .functions
      .get_mut(function)
      .ok_or_else(|| ClientError::NotFound(format!("function {}", function)))?;
    if record.resolve(version).is_none() || record.aliases.contains_key(version) {
      return Err(ClientError::rejected(
        Operation::UpdateAlias.name(),
        format!("version {} of {} does not exist", version, function),
      ));
    }
    if !record.aliases.contains_key(alias) {
      return Err(ClientError::NotFound(format!("alias {}:{}", function, alias)));
    }
    record.aliases.insert(alias.to_string(), version.to_string());
    Ok(())
  }

  async fn get_function(&self, function: &str, qualifier: &str) -> Result<FunctionConfig, ClientError> {
    self.enter(Operation::GetFunction, function)?;
    let state = lock(&self.state)?;
    let (version, image_uri) = state
      .functions
      .get(function)
      .and_then(|record| record.resolve(qualifier))
      .ok_or_else(|| ClientError::NotFound(format!("function {}:{}", function, qualifier)))?;
    Ok(FunctionConfig {
      name: function.to_string(),
      version,
      image_uri,
    })
  }

  async fn invoke(&self, function: &str, qualifier: &str, payload: &[u8]) -> Result<Vec<u8>, ClientError> {
    self.enter(Operation::Invoke, function)?;
    {
      let state = lock(&self.state)?;
      let resolved = state.functions.get(function).and_then(|r| r.resolve(qualifier));
      if resolved.is_none() {
        return Err(ClientError::NotFound(format!("function {}:{}", function, qualifier)));
      }
    }

    let invocation = Invocation {
      function: function.to_string(),
      qualifier: qualifier.to_string(),
      payload: String::from_utf8_lossy(payload).into_owned(),
    };
    lock(&self.invocations)?.push(invocation.clone());
    (self.handler)(&invocation)
  }

  async fn list_images(&self, repository: &str) -> Result<Vec<ArtifactImage>, ClientError> {
    self.enter(Operation::ListImages, repository)?;
    let state = lock(&self.state)?;
    state
      .repositories
      .get(repository)
      .cloned()
      .ok_or_else(|| ClientError::NotFound(format!("repository {}", repository)))
  }

  async fn batch_delete_images(&self, repository: &str, tags: &[String]) -> Result<(), ClientError> {
    self.enter(Operation::BatchDeleteImages, repository)?;
    let mut state = lock(&self.state)?;
    let images = state
      .repositories
      .get_mut(repository)
      .ok_or_else(|| ClientError::NotFound(format!("repository {}", repository)))?;
    for image in images.iter_mut() {
      image.tags.retain(|tag| !tags.contains(tag));
    }
    images.retain(|image| !image.tags.is_empty());
    Ok(())
  }

  async fn delete_repository(&self, repository: &str) -> Result<(), ClientError> {
    self.enter(Operation::DeleteRepository, repository)?;
    let mut state = lock(&self.state)?;
    state
      .repositories
      .remove(repository)
      .map(|_| ())
      .ok_or_else(|| ClientError::NotFound(format!("repository {}", repository)))
  }

  async fn head_bucket(&self, bucket: &str) -> Result<bool, ClientError> {
    self.enter(Operation::HeadBucket, bucket)?;
    Ok(lock(&self.state)?.buckets.contains_key(bucket))
  }

  async fn create_bucket(&self, bucket: &str, _region: &str) -> Result<(), ClientError> {
    self.enter(Operation::CreateBucket, bucket)?;
    let mut state = lock(&self.state)?;
    if state.buckets.contains_key(bucket) {
      return Err(ClientError::rejected(
        Operation::CreateBucket.name(),
        format!("bucket {} already exists", bucket),
      ));
    }
    state.buckets.insert(bucket.to_string(), BTreeMap::new());
    Ok(())
  }

  async fn delete_bucket(&self, bucket: &str) -> Result<(), ClientError> {
    self.enter(Operation::DeleteBucket, bucket)?;
    let mut state = lock(&self.state)?;
    match state.buckets.get(bucket) {
      None => Err(ClientError::NotFound(format!("bucket {}", bucket))),
      Some(objects) if !objects.is_empty() => Err(ClientError::rejected(
        Operation::DeleteBucket.name(),
        format!("bucket {} is not empty", bucket),
      )),
      Some(_) => {
        state.buckets.remove(bucket);
        Ok(())
      }
    }
  }

  async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, ClientError> {
    self.enter(Operation::ListObjects, bucket)?;
    let state = lock(&self.state)?;
    state
      .buckets
      .get(bucket)
      .map(|objects| objects.keys().cloned().collect())
      .ok_or_else(|| ClientError::NotFound(format!("bucket {}", bucket)))
  }

  async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), ClientError> {
    self.enter(Operation::PutObject, bucket)?;
    let mut state = lock(&self.state)?;
    let objects = state
      .buckets
      .get_mut(bucket)
      .ok_or_else(|| ClientError::NotFound(format!("bucket {}", bucket)))?;
    objects.insert(key.to_string(), body.len() as u64);
    Ok(())
  }

  async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), ClientError> {
    self.enter(Operation::DeleteObjects, bucket)?;
    let mut state = lock(&self.state)?;
    let objects = state
      .buckets
      .get_mut(bucket)
      .ok_or_else(|| ClientError::NotFound(format!("bucket {}", bucket)))?;
    for key in keys {
      objects.remove(key);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const TEMPLATE: &str = r#"{
    "Resources": {
      "CliLambda": {
        "Type": "AWS::Lambda::Function",
        "Properties": {"FunctionName": "shop-cli", "Code": {"ImageUri": "repo:b1"}}
      },
      "CliLambdaLiveAlias": {
        "Type": "AWS::Lambda::Alias",
        "Properties": {"FunctionName": {"Ref": "CliLambda"}, "FunctionVersion": "$LATEST", "Name": "live"}
      },
      "ApiGateway": {"Type": "AWS::ApiGatewayV2::Api", "Properties": {"Name": "shop-api"}}
    },
    "Outputs": {
      "Signature": {"Value": "abc"},
      "ApiGatewayUri": {"Description": "Internal Domain", "Value": {"Fn::GetAtt": ["ApiGateway", "ApiEndpoint"]}}
    }
  }"#;

  fn request(template: &str) -> StackRequest {
    StackRequest {
      name: "shop".into(),
      template: template.into(),
      role: None,
    }
  }

  #[tokio::test]
  async fn create_converges_and_materializes() {
    let plane = MemoryControlPlane::new();
    assert!(plane.describe_stack("shop").await.unwrap().is_none());

    plane.create_stack(&request(TEMPLATE)).await.unwrap();
    let stack = plane.describe_stack("shop").await.unwrap().unwrap();
    assert_eq!(stack.status, StackStatus::CreateComplete);
    assert_eq!(stack.output("Signature"), Some("abc"));
    assert_eq!(
      stack.output("ApiGatewayUri"),
      Some("https://shop-api.apiendpoint.sandbox")
    );

    let resources = plane.stack_resources("shop").await.unwrap();
    assert_eq!(resources.len(), 3);
    let function = plane.get_function("shop-cli", "live").await.unwrap();
    assert_eq!(function.version, "$LATEST");
    assert_eq!(function.image_uri, "repo:b1");
  }

  #[tokio::test]
  async fn identical_update_is_unchanged() {
    let plane = MemoryControlPlane::new();
    plane.create_stack(&request(TEMPLATE)).await.unwrap();
    plane.describe_stack("shop").await.unwrap();

    assert_eq!(plane.update_stack(&request(TEMPLATE)).await.unwrap(), StackUpdate::Unchanged);

    let changed = TEMPLATE.replace("repo:b1", "repo:b2");
    assert_eq!(plane.update_stack(&request(&changed)).await.unwrap(), StackUpdate::Started);
    let stack = plane.describe_stack("shop").await.unwrap().unwrap();
    assert_eq!(stack.status, StackStatus::UpdateComplete);
    assert_eq!(plane.get_function("shop-cli", "$LATEST").await.unwrap().image_uri, "repo:b2");
  }

  #[tokio::test]
  async fn scripted_rollback_blocks_updates() {
    let plane = MemoryControlPlane::new();
    plane
      .script("shop", [StackStatus::CreateInProgress, StackStatus::RollbackComplete])
      .unwrap();
    plane.create_stack(&request(TEMPLATE)).await.unwrap();
    assert_eq!(
      plane.describe_stack("shop").await.unwrap().unwrap().status,
      StackStatus::CreateInProgress
    );
    assert_eq!(
      plane.describe_stack("shop").await.unwrap().unwrap().status,
      StackStatus::RollbackComplete
    );

    let err = plane.update_stack(&request(TEMPLATE)).await.unwrap_err();
    assert!(err.to_string().contains("ROLLBACK_COMPLETE"));

    plane.delete_stack("shop").await.unwrap();
    assert!(plane.describe_stack("shop").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn versions_and_aliases() {
    let plane = MemoryControlPlane::new();
    plane.create_stack(&request(TEMPLATE)).await.unwrap();
    plane.describe_stack("shop").await.unwrap();

    assert_eq!(plane.publish_version("shop-cli").await.unwrap(), "1");
    assert!(plane.update_alias("shop-cli", "live", "7").await.is_err());
    plane.update_alias("shop-cli", "live", "1").await.unwrap();
    assert_eq!(plane.get_function("shop-cli", "live").await.unwrap().version, "1");
    assert!(plane.publish_version("shop-http").await.unwrap_err().is_not_found());
  }

  #[tokio::test]
  async fn default_handler_runs_commands() {
    let plane = MemoryControlPlane::new();
    plane.create_stack(&request(TEMPLATE)).await.unwrap();
    plane.describe_stack("shop").await.unwrap();

    let response = plane
      .invoke("shop-cli", "live", br#"{"command":"migrate"}"#)
      .await
      .unwrap();
    let response: Json = serde_json::from_slice(&response).unwrap();
    assert_eq!(response["exit_code"], 0);
    assert_eq!(BASE64.decode(response["output"].as_str().unwrap()).unwrap(), b"migrate\n");
    assert_eq!(plane.invocations()[0].qualifier, "live");
  }

  #[tokio::test]
  async fn injected_failures_target_one_resource() {
    let plane = MemoryControlPlane::new();
    plane.create_bucket("a", "eu-west-1").await.unwrap();
    plane.create_bucket("b", "eu-west-1").await.unwrap();
    plane.fail(Operation::PutObject, Some("a"), "access denied").unwrap();

    assert!(plane.put_object("a", "k", vec![1]).await.is_err());
    plane.put_object("b", "k", vec![1]).await.unwrap();
    assert_eq!(plane.call_count(Operation::PutObject), 2);

    plane.clear_failures().unwrap();
    plane.put_object("a", "k", vec![1]).await.unwrap();
  }

  #[tokio::test]
  async fn buckets_must_be_empty_to_delete() {
    let plane = MemoryControlPlane::new();
    assert!(!plane.head_bucket("assets").await.unwrap());
    plane.create_bucket("assets", "eu-west-1").await.unwrap();
    plane.put_object("assets", "assets/b1/app.js", b"x".to_vec()).await.unwrap();
    assert!(plane.delete_bucket("assets").await.is_err());

    plane.delete_objects("assets", &["assets/b1/app.js".into()]).await.unwrap();
    plane.delete_bucket("assets").await.unwrap();
    assert!(!plane.head_bucket("assets").await.unwrap());
  }

  #[tokio::test]
  async fn image_tags_are_deleted_individually() {
    let plane = MemoryControlPlane::new();
    plane.push_image_at("shop", &["b1", "latest"], 10).unwrap();
    plane.push_image("shop", "b2").unwrap();

    plane.batch_delete_images("shop", &["b1".into()]).await.unwrap();
    let images = plane.list_images("shop").await.unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0].tags, vec!["latest"]);
    assert_eq!(images[1].pushed_at, 11);
  }
}
