use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn teardown_removes_stage() {
  let env = TestEnv::new();
  env.deploy("b1");

  env
    .hover_cmd()
    .args(["teardown", "--force"])
    .arg(env.stage_path())
    .assert()
    .success()
    .stdout(predicate::str::contains("Stage shop deleted"))
    .stdout(predicate::str::contains("Stack: deleted"));

  let state = env.sandbox_state();
  assert!(state["state"]["stacks"].get("shop").is_none());
  assert!(state["state"]["repositories"].get("shop").is_none());
}

#[test]
fn teardown_of_missing_stage_succeeds() {
  let env = TestEnv::new();

  env
    .hover_cmd()
    .args(["teardown", "--force"])
    .arg(env.stage_path())
    .assert()
    .success()
    .stdout(predicate::str::contains("Stack: absent"));
}

#[test]
fn teardown_without_force_needs_terminal() {
  let env = TestEnv::new();

  env
    .hover_cmd()
    .arg("teardown")
    .arg(env.stage_path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("--force"));
}
