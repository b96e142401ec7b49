//! Naming scheme for the remote resources that belong to a stage.
//!
//! Every physical name is derived from the stage name, so the retention
//! sweeper and the teardown path can find resources without consulting the
//! stack.

use crate::consts::ASSETS_ROOT;

/// Function name suffix of the web-facing function.
pub const WEB_SUFFIX: &str = "http";

/// Function name suffix of the command-execution function.
pub const COMMAND_SUFFIX: &str = "cli";

/// Function name suffix of a queue-worker function.
pub const WORKER_SUFFIX: &str = "queue";

/// Physical function name for a function of `stage`.
pub fn function_name(stage: &str, function: &str) -> String {
  format!("{}-{}", stage, function)
}

/// Function name segment of a worker group (`<group>-queue`).
pub fn worker_function(group: &str) -> String {
  format!("{}-{}", group, WORKER_SUFFIX)
}

/// Physical queue name for `queue` in `stage`.
pub fn queue_name(stage: &str, queue: &str) -> String {
  format!("{}-{}", queue, stage)
}

pub fn assets_bucket(stage: &str) -> String {
  format!("{}-assets", stage)
}

/// The artifact repository shares the stage's name.
pub fn repository(stage: &str) -> String {
  stage.to_string()
}

/// Asset path of a build, as seen by the application (`assets/<build>`).
pub fn asset_path(build_id: &str) -> String {
  format!("{}/{}", ASSETS_ROOT, build_id)
}

/// Storage key prefix of every object that belongs to a build.
pub fn asset_prefix(build_id: &str) -> String {
  format!("{}/", asset_path(build_id))
}

/// Extract the artifact tag from an image locator (`repo:tag`).
///
/// Returns `None` for locators without a tag. A registry port
/// (`host:5000/repo`) is not mistaken for a tag.
pub fn image_tag(image_uri: &str) -> Option<&str> {
  let (head, tag) = image_uri.rsplit_once(':')?;
  if head.is_empty() || tag.is_empty() || tag.contains('/') {
    return None;
  }
  Some(tag)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn function_names_embed_stage() {
    assert_eq!(function_name("shop-prod", WEB_SUFFIX), "shop-prod-http");
    assert_eq!(function_name("shop-prod", &worker_function("emails")), "shop-prod-emails-queue");
  }

  #[test]
  fn asset_prefix_is_directory_scoped() {
    assert_eq!(asset_path("b1"), "assets/b1");
    assert_eq!(asset_prefix("b1"), "assets/b1/");
  }

  #[test]
  fn image_tag_extraction() {
    assert_eq!(image_tag("123.dkr.ecr/shop:abc123"), Some("abc123"));
    assert_eq!(image_tag("registry:5000/shop:abc"), Some("abc"));
    assert_eq!(image_tag("registry:5000/shop"), None);
    assert_eq!(image_tag("shop"), None);
    assert_eq!(image_tag("shop:"), None);
  }
}
