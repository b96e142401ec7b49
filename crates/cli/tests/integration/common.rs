//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

/// Isolated test environment.
///
/// Each test gets its own working directory and sandbox data directory, so
/// consecutive commands in one test share a stage and tests never see each
/// other's state.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let env = Self { temp };
    std::fs::write(env.stage_path(), fixture_content("stage.yml")).unwrap();
    env
  }

  pub fn stage_path(&self) -> PathBuf {
    self.temp.path().join("stage.yml")
  }

  pub fn data_path(&self) -> PathBuf {
    self.temp.path().join("data")
  }

  /// Write a build manifest for `build_id` and return its path.
  pub fn build_manifest(&self, build_id: &str) -> PathBuf {
    let path = self.temp.path().join(format!("build-{}.json", build_id));
    let content = fixture_content("build.json").replace("\"b1\"", &format!("\"{}\"", build_id));
    std::fs::write(&path, content).unwrap();
    path
  }

  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  pub fn hover_cmd(&self) -> Command {
    let mut cmd = cargo_bin_cmd!("hover");
    cmd
      .current_dir(self.temp.path())
      .env("HOVER_DATA_DIR", self.data_path())
      .env("HOVER_POLL_INTERVAL_SECS", "0")
      .env("HOVER_PARALLELISM", "2")
      .env("XDG_CONFIG_HOME", self.temp.path().join("config"))
      .env_remove("HOVER_MAX_WAIT_SECS")
      .env_remove("HOVER_RETENTION_KEEP")
      .env_remove("HOVER_LIVE_ALIAS")
      .env_remove("RUST_LOG");
    cmd
  }

  /// Deploy `build_id`, asserting success.
  pub fn deploy(&self, build_id: &str) {
    self
      .hover_cmd()
      .arg("deploy")
      .arg(self.build_manifest(build_id))
      .args(["--image", &format!("registry/shop:{}", build_id)])
      .assert()
      .success();
  }

  pub fn sandbox_state(&self) -> serde_json::Value {
    let content = std::fs::read_to_string(self.data_path().join("sandbox.json")).unwrap();
    serde_json::from_str(&content).unwrap()
  }
}
