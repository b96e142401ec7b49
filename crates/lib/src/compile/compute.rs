//! Functions, their aliases and log groups, and everything that invokes them
//! on a schedule or from a queue.

use crate::consts::{
  CONFIG_CACHE_PATH, DEFAULT_QUEUE_VISIBILITY_SECS, EVENTS_CACHE_PATH, LATEST_VERSION, LIVE_ALIAS, LOG_RETENTION_DAYS,
  QUEUE_VISIBILITY_MARGIN_SECS, ROUTES_CACHE_PATH, SCHEDULER_COMMAND, SCHEDULER_SCHEDULE, WARMER_SCHEDULE,
};
use crate::manifest::{Manifest, Sizing, WorkerGroup};
use crate::naming;
use crate::template::{GraphError, PseudoParam, Resource, ResourceGraph, ResourceKind, Value};

use super::names;

pub(super) fn web(graph: &mut ResourceGraph, manifest: &Manifest, image_uri: &str) -> Result<(), GraphError> {
  function(graph, manifest, image_uri, names::WEB_FUNCTION, naming::WEB_SUFFIX, &manifest.http.sizing)?;
  alias(graph, names::WEB_FUNCTION, names::WEB_ALIAS)?;

  let warm = manifest.http.warm;
  if warm > 0 {
    let input = serde_json::json!({ "warmer": true, "containers": warm }).to_string();
    scheduled_invocation(
      graph,
      manifest,
      Schedule {
        rule: names::WARMER_RULE,
        permission: names::WARMER_PERMISSION,
        rule_suffix: "warmer",
        target_id: "hover-warmer",
        expression: WARMER_SCHEDULE,
        input,
      },
      names::WEB_FUNCTION,
      names::WEB_ALIAS,
    )?;
  }
  Ok(())
}

pub(super) fn command(graph: &mut ResourceGraph, manifest: &Manifest, image_uri: &str) -> Result<(), GraphError> {
  function(graph, manifest, image_uri, names::COMMAND_FUNCTION, naming::COMMAND_SUFFIX, &manifest.cli)?;
  alias(graph, names::COMMAND_FUNCTION, names::COMMAND_ALIAS)?;

  let input = serde_json::json!({ "command": SCHEDULER_COMMAND }).to_string();
  scheduled_invocation(
    graph,
    manifest,
    Schedule {
      rule: names::SCHEDULER_RULE,
      permission: names::SCHEDULER_PERMISSION,
      rule_suffix: "scheduler",
      target_id: "hover-scheduler",
      expression: SCHEDULER_SCHEDULE,
      input,
    },
    names::COMMAND_FUNCTION,
    names::COMMAND_ALIAS,
  )
}

pub(super) fn worker_group(
  graph: &mut ResourceGraph,
  manifest: &Manifest,
  image_uri: &str,
  group: &str,
  worker: &WorkerGroup,
) -> Result<(), GraphError> {
  let function_name = names::worker_function(group);
  let alias_name = names::worker_alias(group);
  function(
    graph,
    manifest,
    image_uri,
    &function_name,
    &naming::worker_function(group),
    &worker.sizing,
  )?;
  alias(graph, &function_name, &alias_name)?;

  let visibility = visibility_timeout(worker.sizing.timeout);
  for queue in &worker.queues {
    let queue_resource = names::queue(queue);
    graph.insert(
      &queue_resource,
      Resource::new(ResourceKind::Queue)
        .property("QueueName", naming::queue_name(&manifest.name, queue))
        .property("VisibilityTimeout", visibility),
    )?;
    graph.insert(
      names::queue_mapping(queue),
      Resource::new(ResourceKind::EventSourceMapping)
        .property("BatchSize", 1u32)
        .property("FunctionResponseTypes", Value::strings(["ReportBatchItemFailures"]))
        .property("EventSourceArn", Value::attribute(&queue_resource, "Arn"))
        .property("FunctionName", live_qualified(&function_name))
        .depends_on(&alias_name),
    )?;
  }
  Ok(())
}

/// A queue message must stay invisible for longer than a worker may spend on it.
fn visibility_timeout(timeout: u32) -> u32 {
  if timeout == 0 {
    DEFAULT_QUEUE_VISIBILITY_SECS
  } else {
    timeout.saturating_add(QUEUE_VISIBILITY_MARGIN_SECS)
  }
}

/// `<function>:live`, the qualified name of a function's live alias.
pub(super) fn live_qualified(function: &str) -> Value {
  Value::join(":", vec![Value::reference(function), LIVE_ALIAS.into()])
}

fn live_arn(function: &str) -> Value {
  Value::join(":", vec![Value::attribute(function, "Arn"), LIVE_ALIAS.into()])
}

fn function(
  graph: &mut ResourceGraph,
  manifest: &Manifest,
  image_uri: &str,
  resource: &str,
  suffix: &str,
  sizing: &Sizing,
) -> Result<(), GraphError> {
  let mut function = Resource::new(ResourceKind::Function)
    .property("FunctionName", naming::function_name(&manifest.name, suffix))
    .property("Role", manifest.auth.lambda_role.as_str())
    .property("PackageType", "Image")
    .property("Code", Value::from([("ImageUri", Value::from(image_uri))]))
    .property("Environment", Value::from([("Variables", environment(manifest))]))
    .sizing("MemorySize", sizing.memory)
    .sizing("Timeout", sizing.timeout)
    .sizing("ReservedConcurrentExecutions", sizing.concurrency);

  let vpc = &manifest.vpc;
  if !vpc.security_groups.is_empty() || !vpc.subnets.is_empty() {
    function = function.property(
      "VpcConfig",
      Value::from([
        ("SecurityGroupIds", Value::strings(vpc.security_groups.iter().cloned())),
        ("SubnetIds", Value::strings(vpc.subnets.iter().cloned())),
      ]),
    );
  }

  graph.insert(resource, function)?;
  graph.insert(
    names::log_group(resource),
    Resource::new(ResourceKind::LogGroup)
      .property(
        "LogGroupName",
        Value::join("/", vec!["/aws/lambda".into(), Value::reference(resource)]),
      )
      .property("RetentionInDays", LOG_RETENTION_DAYS),
  )
}

fn alias(graph: &mut ResourceGraph, function: &str, resource: &str) -> Result<(), GraphError> {
  graph.insert(
    resource,
    Resource::new(ResourceKind::Alias)
      .property("FunctionName", Value::reference(function))
      .property("FunctionVersion", LATEST_VERSION)
      .property("Name", LIVE_ALIAS),
  )
}

/// Variables every function receives, whatever its role.
fn environment(manifest: &Manifest) -> Value {
  let sqs_prefix = Value::join(
    "",
    vec![
      "https://sqs.".into(),
      PseudoParam::Region.into(),
      ".".into(),
      PseudoParam::UrlSuffix.into(),
      "/".into(),
      PseudoParam::AccountId.into(),
    ],
  );
  let asset_url = Value::join(
    "/",
    vec![crate::consts::ASSETS_ROOT.into(), manifest.build_details.id.as_str().into()],
  );

  Value::from([
    ("SQS_PREFIX", sqs_prefix),
    ("ASSET_URL", asset_url),
    ("SQS_SUFFIX", format!("-{}", manifest.name).into()),
    ("CACHE_PREFIX", manifest.name.as_str().into()),
    ("CF_DOMAIN", Value::attribute(names::DISTRIBUTION, "DomainName")),
    ("APP_CONFIG_CACHE", CONFIG_CACHE_PATH.into()),
    ("APP_EVENTS_CACHE", EVENTS_CACHE_PATH.into()),
    ("APP_ROUTES_CACHE", ROUTES_CACHE_PATH.into()),
  ])
}

struct Schedule {
  rule: &'static str,
  permission: &'static str,
  rule_suffix: &'static str,
  target_id: &'static str,
  expression: &'static str,
  input: String,
}

/// A periodic rule targeting a function's live alias, plus the permission
/// allowing the rule to invoke it.
fn scheduled_invocation(
  graph: &mut ResourceGraph,
  manifest: &Manifest,
  schedule: Schedule,
  function: &str,
  alias: &str,
) -> Result<(), GraphError> {
  let target = Value::from([
    ("Arn", live_arn(function)),
    ("Id", schedule.target_id.into()),
    ("Input", schedule.input.into()),
  ]);

  graph.insert(
    schedule.rule,
    Resource::new(ResourceKind::EventRule)
      .property("Name", format!("{}-{}", manifest.name, schedule.rule_suffix))
      .property("ScheduleExpression", schedule.expression)
      .property("State", "ENABLED")
      .property("Targets", vec![target])
      .depends_on(alias),
  )?;
  graph.insert(
    schedule.permission,
    Resource::new(ResourceKind::Permission)
      .property("FunctionName", live_qualified(function))
      .property("Action", "lambda:InvokeFunction")
      .property("Principal", "events.amazonaws.com")
      .property("SourceArn", Value::attribute(schedule.rule, "Arn"))
      .depends_on(alias),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn visibility_timeout_adds_margin() {
    assert_eq!(visibility_timeout(0), 3);
    assert_eq!(visibility_timeout(1), 11);
    assert_eq!(visibility_timeout(60), 70);
    assert_eq!(visibility_timeout(u32::MAX - 1), u32::MAX);
  }

  #[test]
  fn vpc_config_only_when_declared() {
    let mut manifest = Manifest::from_yaml("name: shop\nbuild_details:\n  id: b1\n").unwrap();
    let mut graph = ResourceGraph::new();
    command(&mut graph, &manifest, "repo:b1").unwrap();
    assert!(!graph.get(names::COMMAND_FUNCTION).unwrap().properties.contains_key("VpcConfig"));

    manifest.vpc.subnets = vec!["subnet-1".into()];
    let mut graph = ResourceGraph::new();
    command(&mut graph, &manifest, "repo:b1").unwrap();
    let vpc = &graph.get(names::COMMAND_FUNCTION).unwrap().properties["VpcConfig"];
    assert_eq!(
      serde_json::to_value(vpc).unwrap(),
      serde_json::json!({"SecurityGroupIds": [], "SubnetIds": ["subnet-1"]})
    );
  }

  #[test]
  fn scheduler_targets_live_alias() {
    let manifest = Manifest::from_yaml("name: shop\nbuild_details:\n  id: b1\n").unwrap();
    let mut graph = ResourceGraph::new();
    command(&mut graph, &manifest, "repo:b1").unwrap();

    let rule = serde_json::to_value(&graph.get(names::SCHEDULER_RULE).unwrap().properties).unwrap();
    assert_eq!(rule["Name"], "shop-scheduler");
    assert_eq!(rule["ScheduleExpression"], "rate(1 minute)");
    let input: serde_json::Value = serde_json::from_str(rule["Targets"][0]["Input"].as_str().unwrap()).unwrap();
    assert_eq!(input, serde_json::json!({"command": "schedule:run"}));
    assert_eq!(
      rule["Targets"][0]["Arn"],
      serde_json::json!({"Fn::Join": [":", [{"Fn::GetAtt": ["CliLambda", "Arn"]}, "live"]]})
    );
  }
}
