//! Resource graph model.
//!
//! The compiler produces a [`ResourceGraph`]; the reconciler submits its
//! rendered form verbatim. References inside property values must resolve to
//! logical names in the same graph, which [`ResourceGraph::validate`] checks.

mod graph;
mod value;

pub use graph::{Output, Resource, ResourceGraph, ResourceKind};
pub use value::{PseudoParam, Value};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("resource `{0}` is declared twice")]
  Duplicate(String),

  #[error("{owner} references `{target}`, which is not declared")]
  Dangling { owner: String, target: String },

  #[error("resource `{resource}` depends on `{dependency}`, which is not declared")]
  UnknownDependency { resource: String, dependency: String },

  #[error("dependency cycle through `{0}`")]
  Cycle(String),

  #[error("failed to render template: {0}")]
  Render(#[from] serde_json::Error),
}
