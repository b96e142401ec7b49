use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn purge_keeps_recent_builds() {
  let env = TestEnv::new();
  for build in ["b1", "b2", "b3"] {
    env.deploy(build);
  }

  env
    .hover_cmd()
    .arg("purge")
    .arg(env.stage_path())
    .env("HOVER_RETENTION_KEEP", "1")
    .assert()
    .success()
    .stdout(predicate::str::contains("Stage purged"))
    .stdout(predicate::str::contains("Live build: b3"))
    .stdout(predicate::str::contains("Images removed: 2"));

  let state = env.sandbox_state();
  let images = state["state"]["repositories"]["shop"].as_array().unwrap();
  assert_eq!(images.len(), 1);
  assert_eq!(images[0]["tags"][0], "b3");
}

#[test]
fn purge_dry_run_changes_nothing() {
  let env = TestEnv::new();
  env.deploy("b1");
  env.deploy("b2");

  env
    .hover_cmd()
    .args(["purge", "--dry-run"])
    .arg(env.stage_path())
    .env("HOVER_RETENTION_KEEP", "1")
    .assert()
    .success()
    .stdout(predicate::str::contains("Dry run"))
    .stdout(predicate::str::contains("would purge image b1"));

  let state = env.sandbox_state();
  assert_eq!(state["state"]["repositories"]["shop"].as_array().unwrap().len(), 2);
}

#[test]
fn purge_json_output_is_valid() {
  let env = TestEnv::new();
  env.deploy("b1");

  env
    .hover_cmd()
    .args(["-o", "json", "purge"])
    .arg(env.stage_path())
    .assert()
    .success()
    .stdout(predicate::str::contains("\"live_build\": \"b1\""))
    .stdout(predicate::str::contains("deleted_images"));
}
