use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn run_echoes_command_output() {
  let env = TestEnv::new();
  env.deploy("b1");

  env
    .hover_cmd()
    .args(["run", "route:list", "--stage"])
    .arg(env.stage_path())
    .assert()
    .success()
    .stdout(predicate::str::contains("route:list"))
    .stdout(predicate::str::contains("Executed command 'route:list'"));
}

#[test]
fn run_json_output() {
  let env = TestEnv::new();
  env.deploy("b1");

  env
    .hover_cmd()
    .args(["-o", "json", "run", "about", "--stage"])
    .arg(env.stage_path())
    .assert()
    .success()
    .stdout(predicate::str::contains("\"exit_code\": 0"));
}

#[test]
fn run_without_deployed_stage_fails() {
  let env = TestEnv::new();

  env
    .hover_cmd()
    .args(["run", "about", "--stage"])
    .arg(env.stage_path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("shop-cli"));
}

#[test]
fn run_requires_stage() {
  let env = TestEnv::new();
  env.hover_cmd().args(["run", "about"]).assert().failure();
}
