//! Property values of a resource declaration.
//!
//! A [`Value`] is either a literal or one of the intrinsic forms the control
//! plane resolves at reconciliation time. Serialization produces the wire
//! encoding directly (`{"Ref": ..}`, `{"Fn::GetAtt": [..]}` and so on), so a
//! graph can be rendered without an intermediate untyped tree.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Parameters supplied by the control plane itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PseudoParam {
  Region,
  AccountId,
  UrlSuffix,
}

impl PseudoParam {
  pub fn name(&self) -> &'static str {
    match self {
      PseudoParam::Region => "AWS::Region",
      PseudoParam::AccountId => "AWS::AccountId",
      PseudoParam::UrlSuffix => "AWS::URLSuffix",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  String(String),
  Number(i64),
  Bool(bool),
  List(Vec<Value>),
  Map(BTreeMap<String, Value>),
  /// Identifier of another resource in the same graph.
  Ref(String),
  /// Attribute of another resource in the same graph.
  GetAtt(String, String),
  /// Fragments concatenated with a delimiter.
  Join(String, Vec<Value>),
  /// The `index`th piece of `source` split on `delimiter`.
  SelectSplit {
    index: usize,
    delimiter: String,
    source: Box<Value>,
  },
  Pseudo(PseudoParam),
}

impl Value {
  pub fn reference(name: impl Into<String>) -> Self {
    Value::Ref(name.into())
  }

  pub fn attribute(name: impl Into<String>, attribute: impl Into<String>) -> Self {
    Value::GetAtt(name.into(), attribute.into())
  }

  pub fn join(delimiter: impl Into<String>, parts: Vec<Value>) -> Self {
    Value::Join(delimiter.into(), parts)
  }

  pub fn select_split(index: usize, delimiter: impl Into<String>, source: Value) -> Self {
    Value::SelectSplit {
      index,
      delimiter: delimiter.into(),
      source: Box::new(source),
    }
  }

  pub fn strings<I, S>(items: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Value::List(items.into_iter().map(|s| Value::String(s.into())).collect())
  }

  /// Logical names this value points at, in traversal order.
  ///
  /// Pseudo-parameters are not included; they are always resolvable.
  pub fn references(&self) -> Vec<&str> {
    let mut out = Vec::new();
    self.collect_references(&mut out);
    out
  }

  fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
    match self {
      Value::Ref(name) | Value::GetAtt(name, _) => out.push(name),
      Value::List(items) | Value::Join(_, items) => {
        for item in items {
          item.collect_references(out);
        }
      }
      Value::Map(entries) => {
        for value in entries.values() {
          value.collect_references(out);
        }
      }
      Value::SelectSplit { source, .. } => source.collect_references(out),
      Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Pseudo(_) => {}
    }
  }
}

impl From<&str> for Value {
  fn from(value: &str) -> Self {
    Value::String(value.to_string())
  }
}

impl From<String> for Value {
  fn from(value: String) -> Self {
    Value::String(value)
  }
}

impl From<u32> for Value {
  fn from(value: u32) -> Self {
    Value::Number(i64::from(value))
  }
}

impl From<bool> for Value {
  fn from(value: bool) -> Self {
    Value::Bool(value)
  }
}

impl From<PseudoParam> for Value {
  fn from(value: PseudoParam) -> Self {
    Value::Pseudo(value)
  }
}

impl From<Vec<Value>> for Value {
  fn from(value: Vec<Value>) -> Self {
    Value::List(value)
  }
}

impl<K: Into<String>, const N: usize> From<[(K, Value); N]> for Value {
  fn from(entries: [(K, Value); N]) -> Self {
    Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
  }
}

/// One-entry map `{key: value}`, the shape of every intrinsic.
fn serialize_intrinsic<S, T>(serializer: S, key: &str, value: &T) -> Result<S::Ok, S::Error>
where
  S: Serializer,
  T: Serialize + ?Sized,
{
  let mut map = serializer.serialize_map(Some(1))?;
  map.serialize_entry(key, value)?;
  map.end()
}

struct Intrinsic<'a, T: ?Sized>(&'a str, &'a T);

impl<T: Serialize + ?Sized> Serialize for Intrinsic<'_, T> {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serialize_intrinsic(serializer, self.0, self.1)
  }
}

impl Serialize for Value {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      Value::String(s) => serializer.serialize_str(s),
      Value::Number(n) => serializer.serialize_i64(*n),
      Value::Bool(b) => serializer.serialize_bool(*b),
      Value::List(items) => items.serialize(serializer),
      Value::Map(entries) => entries.serialize(serializer),
      Value::Ref(name) => serialize_intrinsic(serializer, "Ref", name),
      Value::GetAtt(name, attribute) => serialize_intrinsic(serializer, "Fn::GetAtt", &[name, attribute]),
      Value::Join(delimiter, parts) => serialize_intrinsic(serializer, "Fn::Join", &(delimiter, parts)),
      Value::SelectSplit {
        index,
        delimiter,
        source,
      } => {
        let split_args = (delimiter, source);
        let split = Intrinsic("Fn::Split", &split_args);
        serialize_intrinsic(serializer, "Fn::Select", &(index.to_string(), split))
      }
      Value::Pseudo(param) => serialize_intrinsic(serializer, "Ref", param.name()),
    }
  }
}
