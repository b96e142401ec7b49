//! Manifest types.
//!
//! Keys follow the on-disk kebab-case convention (`aws-profile`,
//! `deploy-commands`, `security-groups`). Every section is optional and
//! defaults to empty, and every sizing field defaults to zero, which means
//! "use the platform default".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The complete description of one stage.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
  pub name: String,
  #[serde(rename = "aws-profile", default)]
  pub profile: String,
  #[serde(default)]
  pub region: String,
  /// Hooks run on the command function against each new build before cutover.
  #[serde(rename = "deploy-commands", default)]
  pub deploy_commands: Vec<String>,
  #[serde(default)]
  pub auth: Auth,
  #[serde(default)]
  pub vpc: Vpc,
  #[serde(default)]
  pub http: HttpConfig,
  #[serde(default)]
  pub cli: Sizing,
  /// Worker groups keyed by name. `BTreeMap` keeps compilation order stable.
  #[serde(default)]
  pub queue: BTreeMap<String, WorkerGroup>,
  #[serde(default)]
  pub build_details: BuildDetails,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
  /// Execution role assumed by every function.
  #[serde(rename = "lambda-role", default)]
  pub lambda_role: String,
  /// Role the control plane assumes while creating the stack.
  #[serde(rename = "stack-role", default)]
  pub stack_role: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vpc {
  #[serde(rename = "security-groups", default)]
  pub security_groups: Vec<String>,
  #[serde(default)]
  pub subnets: Vec<String>,
}

/// Memory (MB), timeout (seconds) and reserved concurrency of a function.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sizing {
  #[serde(default)]
  pub memory: u32,
  #[serde(default)]
  pub timeout: u32,
  #[serde(default)]
  pub concurrency: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
  #[serde(flatten)]
  pub sizing: Sizing,
  /// Containers kept warm by the scheduled warmer and pinged during release.
  #[serde(default)]
  pub warm: u32,
  /// Comma-separated custom domains served by the CDN.
  #[serde(default)]
  pub domains: String,
  /// Certificate covering `domains`.
  #[serde(default)]
  pub certificate: String,
}

/// A named group of queue workers sharing one function.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerGroup {
  #[serde(flatten)]
  pub sizing: Sizing,
  /// Attempts per job before the packaged runtime gives up on it.
  #[serde(default)]
  pub tries: u32,
  /// Backoff policy understood by the packaged runtime.
  #[serde(default)]
  pub backoff: String,
  #[serde(default)]
  pub queues: Vec<String>,
}

/// Stamped once per packaging operation.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDetails {
  /// Immutable artifact tag and asset prefix of this build.
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub hash: String,
  #[serde(default)]
  pub time: i64,
}
