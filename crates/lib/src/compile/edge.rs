//! The HTTP API in front of the web function and the CDN in front of both
//! the API and the assets bucket.

use crate::consts::{ASSETS_ROOT, LIVE_ALIAS};
use crate::manifest::Manifest;
use crate::naming;
use crate::template::{GraphError, PseudoParam, Resource, ResourceGraph, ResourceKind, Value};

use super::compute::live_qualified;
use super::names;

const ASSETS_ORIGIN: &str = "assets-bucket";
const GATEWAY_ORIGIN: &str = "gateway";

// Managed cache and origin request policies of the CDN.
const CACHING_DISABLED_POLICY: &str = "b2884449-e4de-46a7-ac36-70bc7f1ddd6d";
const CACHING_OPTIMIZED_POLICY: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";
const CORS_S3_ORIGIN_POLICY: &str = "88a5eaf4-2fd4-4709-b370-b4c650ea3fcf";

pub(super) fn api(graph: &mut ResourceGraph, manifest: &Manifest) -> Result<(), GraphError> {
  let api_id = || Value::reference(names::API);

  graph.insert(
    names::API,
    Resource::new(ResourceKind::HttpApi)
      .property("Name", format!("{}-api", manifest.name))
      .property("ProtocolType", "HTTP"),
  )?;

  let integration_uri = Value::join(
    "",
    vec![
      "arn:aws:apigateway:".into(),
      PseudoParam::Region.into(),
      ":lambda:path/2015-03-31/functions/".into(),
      Value::attribute(names::WEB_FUNCTION, "Arn"),
      format!(":{}/invocations", LIVE_ALIAS).into(),
    ],
  );
  graph.insert(
    names::API_INTEGRATION,
    Resource::new(ResourceKind::ApiIntegration)
      .property("ApiId", api_id())
      .property("IntegrationType", "AWS_PROXY")
      .property("IntegrationMethod", "POST")
      .property("PayloadFormatVersion", "2.0")
      .property("IntegrationUri", integration_uri)
      .depends_on(names::WEB_ALIAS),
  )?;

  graph.insert(
    names::API_ROUTE,
    Resource::new(ResourceKind::ApiRoute)
      .property("ApiId", api_id())
      .property("RouteKey", "$default")
      .property("AuthorizationType", "NONE")
      .property(
        "Target",
        Value::join("/", vec!["integrations".into(), Value::reference(names::API_INTEGRATION)]),
      ),
  )?;

  graph.insert(
    names::API_STAGE,
    Resource::new(ResourceKind::ApiStage)
      .property("ApiId", api_id())
      .property("StageName", "$default")
      .property("AutoDeploy", true),
  )?;

  graph.insert(
    names::API_DEPLOYMENT,
    Resource::new(ResourceKind::ApiDeployment)
      .property("ApiId", api_id())
      .depends_on(names::API_ROUTE),
  )?;

  let source_arn = Value::join(
    "",
    vec![
      "arn:aws:execute-api:".into(),
      PseudoParam::Region.into(),
      ":".into(),
      PseudoParam::AccountId.into(),
      ":".into(),
      api_id(),
      "/*".into(),
    ],
  );
  graph.insert(
    names::API_PERMISSION,
    Resource::new(ResourceKind::Permission)
      .property("Action", "lambda:InvokeFunction")
      .property("FunctionName", live_qualified(names::WEB_FUNCTION))
      .property("Principal", "apigateway.amazonaws.com")
      .property("SourceArn", source_arn)
      .depends_on(names::WEB_ALIAS),
  )
}

pub(super) fn distribution(graph: &mut ResourceGraph, manifest: &Manifest) -> Result<(), GraphError> {
  let bucket_domain = Value::join(
    "",
    vec![
      format!("{}.s3.", naming::assets_bucket(&manifest.name)).into(),
      PseudoParam::Region.into(),
      ".".into(),
      PseudoParam::UrlSuffix.into(),
    ],
  );
  let assets_origin = Value::from([
    ("Id", ASSETS_ORIGIN.into()),
    ("DomainName", bucket_domain),
    ("S3OriginConfig", Value::from([("OriginAccessIdentity", Value::from(""))])),
  ]);
  let gateway_origin = Value::from([
    ("Id", GATEWAY_ORIGIN.into()),
    (
      "DomainName",
      Value::select_split(1, "//", Value::attribute(names::API, "ApiEndpoint")),
    ),
    (
      "CustomOriginConfig",
      Value::from([
        ("OriginProtocolPolicy", Value::from("https-only")),
        ("OriginSSLProtocols", Value::strings(["TLSv1.2"])),
      ]),
    ),
  ]);

  let default_behavior = Value::from([
    (
      "AllowedMethods",
      Value::strings(["GET", "HEAD", "OPTIONS", "PUT", "PATCH", "POST", "DELETE"]),
    ),
    ("TargetOriginId", GATEWAY_ORIGIN.into()),
    ("CachePolicyId", CACHING_DISABLED_POLICY.into()),
    ("ViewerProtocolPolicy", "redirect-to-https".into()),
  ]);
  let assets_behavior = Value::from([
    ("AllowedMethods", Value::strings(["GET", "HEAD", "OPTIONS"])),
    ("TargetOriginId", ASSETS_ORIGIN.into()),
    ("PathPattern", format!("/{}/*", ASSETS_ROOT).into()),
    ("CachePolicyId", CACHING_OPTIMIZED_POLICY.into()),
    ("OriginRequestPolicyId", CORS_S3_ORIGIN_POLICY.into()),
    ("ViewerProtocolPolicy", "redirect-to-https".into()),
  ]);

  let mut config = std::collections::BTreeMap::from([
    ("HttpVersion".to_string(), Value::from("http2")),
    ("Origins".to_string(), Value::List(vec![assets_origin, gateway_origin])),
    ("Enabled".to_string(), Value::from(true)),
    ("Comment".to_string(), Value::from(naming::assets_bucket(&manifest.name))),
    ("DefaultCacheBehavior".to_string(), default_behavior),
    ("CacheBehaviors".to_string(), Value::List(vec![assets_behavior])),
  ]);

  // Aliases without a certificate are rejected remotely, so both are emitted
  // together or not at all.
  let domains = manifest.domains();
  if !domains.is_empty() {
    config.insert("Aliases".to_string(), Value::strings(domains));
    config.insert(
      "ViewerCertificate".to_string(),
      Value::from([
        ("AcmCertificateArn", Value::from(manifest.http.certificate.trim())),
        ("SslSupportMethod", Value::from("sni-only")),
      ]),
    );
  }

  graph.insert(
    names::DISTRIBUTION,
    Resource::new(ResourceKind::Distribution)
      .property("DistributionConfig", Value::Map(config))
      .depends_on(names::API),
  )
}

pub(super) fn outputs(graph: &mut ResourceGraph) {
  graph.output(
    "ApiGatewayUri",
    Some("Internal Domain"),
    Value::attribute(names::API, "ApiEndpoint"),
  );
  graph.output(
    "AssetsDomain",
    Some("Assets Domain"),
    Value::attribute(names::DISTRIBUTION, "DomainName"),
  );
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn manifest() -> Manifest {
    Manifest::from_yaml("name: shop\nregion: eu-west-1\n").unwrap()
  }

  #[test]
  fn distribution_fronts_api_and_assets() {
    let mut graph = ResourceGraph::new();
    distribution(&mut graph, &manifest()).unwrap();
    let cdn = serde_json::to_value(&graph.get(names::DISTRIBUTION).unwrap().properties).unwrap();
    let config = &cdn["DistributionConfig"];

    assert_eq!(config["Origins"][0]["Id"], "assets-bucket");
    assert_eq!(
      config["Origins"][0]["DomainName"],
      json!({"Fn::Join": ["", ["shop-assets.s3.", {"Ref": "AWS::Region"}, ".", {"Ref": "AWS::URLSuffix"}]]})
    );
    assert_eq!(
      config["Origins"][1]["DomainName"],
      json!({"Fn::Select": ["1", {"Fn::Split": ["//", {"Fn::GetAtt": ["ApiGateway", "ApiEndpoint"]}]}]})
    );
    assert_eq!(config["CacheBehaviors"][0]["PathPattern"], "/assets/*");
    assert_eq!(config["DefaultCacheBehavior"]["TargetOriginId"], "gateway");
  }

  #[test]
  fn api_integration_targets_live_alias() {
    let mut graph = ResourceGraph::new();
    api(&mut graph, &manifest()).unwrap();
    let integration =
      serde_json::to_value(&graph.get(names::API_INTEGRATION).unwrap().properties).unwrap();
    assert_eq!(
      integration["IntegrationUri"],
      json!({"Fn::Join": ["", [
        "arn:aws:apigateway:",
        {"Ref": "AWS::Region"},
        ":lambda:path/2015-03-31/functions/",
        {"Fn::GetAtt": ["HTTPLambda", "Arn"]},
        ":live/invocations"
      ]]})
    );
    assert_eq!(graph.get(names::API_DEPLOYMENT).unwrap().depends_on, vec!["ApiGatewayRoute"]);
  }
}
