use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn deploy_reports_release() {
  let env = TestEnv::new();

  env
    .hover_cmd()
    .arg("deploy")
    .arg(env.build_manifest("b1"))
    .args(["--image", "registry/shop:b1"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Stage shop deployed"))
    .stdout(predicate::str::contains("Functions released: 3"))
    .stdout(predicate::str::contains("Ran `migrate --force`"))
    .stdout(predicate::str::contains("ApiGatewayUri"));
}

#[test]
fn deploy_persists_sandbox_state() {
  let env = TestEnv::new();
  env.deploy("b1");

  let state = env.sandbox_state();
  assert_eq!(state["version"], 1);
  assert_eq!(state["state"]["functions"]["shop-http"]["aliases"]["live"], "1");
  assert_eq!(state["state"]["stacks"]["shop"]["stack"]["status"], "CREATE_COMPLETE");
}

#[test]
fn redeploy_updates_stack() {
  let env = TestEnv::new();
  env.deploy("b1");

  env
    .hover_cmd()
    .args(["-o", "json", "deploy"])
    .arg(env.build_manifest("b2"))
    .args(["--image", "registry/shop:b2"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"outcome\": \"updated\""));

  let state = env.sandbox_state();
  assert_eq!(state["state"]["functions"]["shop-cli"]["aliases"]["live"], "2");
}

#[test]
fn deploy_publishes_assets() {
  let env = TestEnv::new();
  env.write_file("public/css/app.css", "body{}");

  env
    .hover_cmd()
    .arg("deploy")
    .arg(env.build_manifest("b1"))
    .args(["--image", "registry/shop:b1"])
    .arg("--assets")
    .arg(env.temp.path().join("public"))
    .assert()
    .success()
    .stdout(predicate::str::contains("Assets uploaded: 1 file,"));

  let state = env.sandbox_state();
  assert!(state["state"]["buckets"]["shop-assets"]["assets/b1/css/app.css"].is_number());
}

#[test]
fn deploy_rejects_untagged_image() {
  let env = TestEnv::new();

  env
    .hover_cmd()
    .arg("deploy")
    .arg(env.build_manifest("b1"))
    .args(["--image", "registry/shop"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("has no tag"));
}

#[test]
fn refused_deploy_records_no_image() {
  let env = TestEnv::new();
  env.deploy("b1");

  env
    .hover_cmd()
    .arg("deploy")
    .arg(env.build_manifest("b2"))
    .args(["--image", "registry/shop:x9"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("manifest describes build `b2`"));

  let state = env.sandbox_state();
  let images = state["state"]["repositories"]["shop"].as_array().unwrap();
  assert_eq!(images.len(), 1);
  assert_eq!(images[0]["tags"][0], "b1");
}

#[test]
fn deploy_rejects_malformed_settings() {
  let env = TestEnv::new();
  let settings = env.write_file("settings.toml", "poll_interval_secs = \"soon\"\n");

  env
    .hover_cmd()
    .arg("--config")
    .arg(settings)
    .arg("deploy")
    .arg(env.build_manifest("b1"))
    .args(["--image", "registry/shop:b1"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load settings"));
}
