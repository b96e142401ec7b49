//! Command invocation protocol of the command function.
//!
//! Request: `{"command": "<text>"}`. Response: `{"output": <base64>,
//! "exit_code": <int>}`, or `{"Error": "<message>"}` when the runtime itself
//! failed.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use serde_json::Value as Json;
use thiserror::Error;
use tracing::{debug, info};

use crate::client::{ClientError, ControlPlane};

#[derive(Debug, Error)]
pub enum CommandError {
  #[error(transparent)]
  Client(#[from] ClientError),

  #[error("invalid response to `{command}`: {message}")]
  InvalidResponse { command: String, message: String },

  #[error("`{command}` failed: {message}")]
  Remote { command: String, message: String },

  #[error("response to `{command}` carries no output")]
  MissingOutput { command: String },

  #[error("`{command}` exited with status {}", display_exit_code(.exit_code))]
  Failed {
    command: String,
    exit_code: Option<i64>,
    output: String,
  },
}

fn display_exit_code(code: &Option<i64>) -> String {
  code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string())
}

/// Result of one command run remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
  pub command: String,
  pub output: String,
  pub exit_code: Option<i64>,
}

impl CommandOutput {
  pub fn succeeded(&self) -> bool {
    self.exit_code == Some(0)
  }

  /// Turn a non-zero or missing exit status into [`CommandError::Failed`].
  pub fn into_result(self) -> Result<CommandOutput, CommandError> {
    if self.succeeded() {
      Ok(self)
    } else {
      Err(CommandError::Failed {
        command: self.command,
        exit_code: self.exit_code,
        output: self.output,
      })
    }
  }
}

/// Run `command` on `function` at `qualifier` and decode the response.
///
/// A non-zero exit status is not an error here; see
/// [`CommandOutput::into_result`].
pub async fn run_command(
  client: &dyn ControlPlane,
  function: &str,
  qualifier: &str,
  command: &str,
) -> Result<CommandOutput, CommandError> {
  let command = command.trim().to_string();
  info!(function = %function, qualifier = %qualifier, command = %command, "running command");

  let payload = serde_json::json!({ "command": command }).to_string();
  let response = client.invoke(function, qualifier, payload.as_bytes()).await?;
  let output = decode_response(&command, &response)?;
  debug!(command = %output.command, exit_code = ?output.exit_code, "command finished");
  Ok(output)
}

fn decode_response(command: &str, response: &[u8]) -> Result<CommandOutput, CommandError> {
  let invalid = |message: String| CommandError::InvalidResponse {
    command: command.to_string(),
    message,
  };

  let body: Json = serde_json::from_slice(response).map_err(|e| invalid(e.to_string()))?;
  let Some(body) = body.as_object() else {
    return Err(invalid("expected a JSON object".to_string()));
  };

  if let Some(error) = body.get("Error").filter(|e| !e.is_null()) {
    let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
    return Err(CommandError::Remote {
      command: command.to_string(),
      message,
    });
  }

  let Some(encoded) = body.get("output").and_then(Json::as_str) else {
    return Err(CommandError::MissingOutput {
      command: command.to_string(),
    });
  };
  let decoded = BASE64.decode(encoded).map_err(|e| invalid(e.to_string()))?;

  let exit_code = match body.get("exit_code") {
    Some(Json::Number(n)) => n.as_i64(),
    Some(Json::String(s)) => s.trim().parse().ok(),
    _ => None,
  };

  Ok(CommandOutput {
    command: command.to_string(),
    output: String::from_utf8_lossy(&decoded).into_owned(),
    exit_code,
  })
}
