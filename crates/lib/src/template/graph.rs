//! The resource graph: logical name to resource declaration, plus outputs.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use super::GraphError;
use super::value::Value;

const FORMAT_VERSION: &str = "2010-09-09";

/// The closed set of resource kinds the compiler emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
  #[serde(rename = "AWS::Lambda::Function")]
  Function,
  #[serde(rename = "AWS::Lambda::Alias")]
  Alias,
  #[serde(rename = "AWS::Lambda::Permission")]
  Permission,
  #[serde(rename = "AWS::Lambda::EventSourceMapping")]
  EventSourceMapping,
  #[serde(rename = "AWS::Logs::LogGroup")]
  LogGroup,
  #[serde(rename = "AWS::Events::Rule")]
  EventRule,
  #[serde(rename = "AWS::SQS::Queue")]
  Queue,
  #[serde(rename = "AWS::ApiGatewayV2::Api")]
  HttpApi,
  #[serde(rename = "AWS::ApiGatewayV2::Integration")]
  ApiIntegration,
  #[serde(rename = "AWS::ApiGatewayV2::Route")]
  ApiRoute,
  #[serde(rename = "AWS::ApiGatewayV2::Stage")]
  ApiStage,
  #[serde(rename = "AWS::ApiGatewayV2::Deployment")]
  ApiDeployment,
  #[serde(rename = "AWS::CloudFront::Distribution")]
  Distribution,
}

impl ResourceKind {
  pub const ALL: [ResourceKind; 13] = [
    ResourceKind::Function,
    ResourceKind::Alias,
    ResourceKind::Permission,
    ResourceKind::EventSourceMapping,
    ResourceKind::LogGroup,
    ResourceKind::EventRule,
    ResourceKind::Queue,
    ResourceKind::HttpApi,
    ResourceKind::ApiIntegration,
    ResourceKind::ApiRoute,
    ResourceKind::ApiStage,
    ResourceKind::ApiDeployment,
    ResourceKind::Distribution,
  ];

  /// The control plane's type name for this kind.
  pub fn type_name(&self) -> &'static str {
    match self {
      ResourceKind::Function => "AWS::Lambda::Function",
      ResourceKind::Alias => "AWS::Lambda::Alias",
      ResourceKind::Permission => "AWS::Lambda::Permission",
      ResourceKind::EventSourceMapping => "AWS::Lambda::EventSourceMapping",
      ResourceKind::LogGroup => "AWS::Logs::LogGroup",
      ResourceKind::EventRule => "AWS::Events::Rule",
      ResourceKind::Queue => "AWS::SQS::Queue",
      ResourceKind::HttpApi => "AWS::ApiGatewayV2::Api",
      ResourceKind::ApiIntegration => "AWS::ApiGatewayV2::Integration",
      ResourceKind::ApiRoute => "AWS::ApiGatewayV2::Route",
      ResourceKind::ApiStage => "AWS::ApiGatewayV2::Stage",
      ResourceKind::ApiDeployment => "AWS::ApiGatewayV2::Deployment",
      ResourceKind::Distribution => "AWS::CloudFront::Distribution",
    }
  }

  pub fn from_type_name(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|kind| kind.type_name() == name)
  }
}

impl std::fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.type_name())
  }
}

/// One resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
  #[serde(rename = "Type")]
  pub kind: ResourceKind,
  #[serde(rename = "Properties")]
  pub properties: BTreeMap<String, Value>,
  /// Explicit ordering constraints beyond those implied by references.
  #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,
}

impl Resource {
  pub fn new(kind: ResourceKind) -> Self {
    Self {
      kind,
      properties: BTreeMap::new(),
      depends_on: Vec::new(),
    }
  }

  pub fn property(mut self, key: &str, value: impl Into<Value>) -> Self {
    self.properties.insert(key.to_string(), value.into());
    self
  }

  /// Set `key` only when `value` is non-zero. Zero means "platform default".
  pub fn sizing(mut self, key: &str, value: u32) -> Self {
    if value != 0 {
      self.properties.insert(key.to_string(), value.into());
    }
    self
  }

  pub fn depends_on(mut self, name: &str) -> Self {
    self.depends_on.push(name.to_string());
    self
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Output {
  #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(rename = "Value")]
  pub value: Value,
}

#[derive(Serialize)]
struct Document<'a> {
  #[serde(rename = "AWSTemplateFormatVersion")]
  format_version: &'static str,
  #[serde(rename = "Resources")]
  resources: &'a BTreeMap<String, Resource>,
  #[serde(rename = "Outputs")]
  outputs: &'a BTreeMap<String, Output>,
}

/// A complete set of resource declarations for one stage.
///
/// Both maps are ordered by logical name, which makes rendering
/// deterministic regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceGraph {
  resources: BTreeMap<String, Resource>,
  outputs: BTreeMap<String, Output>,
}

impl ResourceGraph {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, name: impl Into<String>, resource: Resource) -> Result<(), GraphError> {
    let name = name.into();
    if self.resources.contains_key(&name) {
      return Err(GraphError::Duplicate(name));
    }
    self.resources.insert(name, resource);
    Ok(())
  }

  pub fn output(&mut self, name: impl Into<String>, description: Option<&str>, value: impl Into<Value>) {
    self.outputs.insert(
      name.into(),
      Output {
        description: description.map(str::to_string),
        value: value.into(),
      },
    );
  }

  pub fn get(&self, name: &str) -> Option<&Resource> {
    self.resources.get(name)
  }

  pub fn resources(&self) -> impl Iterator<Item = (&str, &Resource)> {
    self.resources.iter().map(|(name, resource)| (name.as_str(), resource))
  }

  pub fn outputs(&self) -> impl Iterator<Item = (&str, &Output)> {
    self.outputs.iter().map(|(name, output)| (name.as_str(), output))
  }

  pub fn len(&self) -> usize {
    self.resources.len()
  }

  pub fn is_empty(&self) -> bool {
    self.resources.is_empty()
  }

  /// Logical names of every resource of `kind`.
  pub fn names_of(&self, kind: ResourceKind) -> Vec<&str> {
    self
      .resources()
      .filter(|(_, resource)| resource.kind == kind)
      .map(|(name, _)| name)
      .collect()
  }

  /// Check that every reference and dependency resolves inside the graph and
  /// that the dependency relation is acyclic.
  pub fn validate(&self) -> Result<(), GraphError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let nodes: HashMap<&str, NodeIndex> = self
      .resources
      .keys()
      .map(|name| (name.as_str(), graph.add_node(name.as_str())))
      .collect();

    for (name, resource) in &self.resources {
      let dependent = nodes[name.as_str()];

      for dep in &resource.depends_on {
        let Some(&dep_idx) = nodes.get(dep.as_str()) else {
          return Err(GraphError::UnknownDependency {
            resource: name.clone(),
            dependency: dep.clone(),
          });
        };
        graph.add_edge(dep_idx, dependent, ());
      }

      for value in resource.properties.values() {
        for target in value.references() {
          let Some(&target_idx) = nodes.get(target) else {
            return Err(GraphError::Dangling {
              owner: name.clone(),
              target: target.to_string(),
            });
          };
          if target_idx == dependent {
            return Err(GraphError::Cycle(name.clone()));
          }
          graph.add_edge(target_idx, dependent, ());
        }
      }
    }

    for (name, output) in &self.outputs {
      for target in output.value.references() {
        if !nodes.contains_key(target) {
          return Err(GraphError::Dangling {
            owner: format!("output {}", name),
            target: target.to_string(),
          });
        }
      }
    }

    toposort(&graph, None).map_err(|cycle| GraphError::Cycle(graph[cycle.node_id()].to_string()))?;
    Ok(())
  }

  /// Render the submitted document. Identical graphs render byte-identical.
  pub fn render(&self) -> Result<String, GraphError> {
    let document = Document {
      format_version: FORMAT_VERSION,
      resources: &self.resources,
      outputs: &self.outputs,
    };
    Ok(serde_json::to_string_pretty(&document)?)
  }
}
