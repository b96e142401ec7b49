//! Content fingerprints.
//!
//! A fingerprint is the full SHA-256 of a value's canonical JSON form. It is
//! used only to detect "nothing changed" between two deployments of a stage,
//! never as the identity of a remote resource.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type HashError = serde_json::Error;

/// A 64-character lowercase hexadecimal SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl AsRef<str> for ContentHash {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

/// Values whose serialized form can be fingerprinted.
///
/// Serialization goes through `serde_json::Value`, whose maps are sorted, so
/// the digest does not depend on field or map insertion order.
pub trait Fingerprint: Serialize {
  fn fingerprint(&self) -> Result<ContentHash, HashError> {
    let canonical = serde_json::to_value(self)?;
    let serialized = serde_json::to_string(&canonical)?;
    Ok(hash_bytes(serialized.as_bytes()))
  }
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  #[derive(Serialize)]
  struct Sample {
    name: String,
    tags: HashMap<String, u32>,
  }

  impl Fingerprint for Sample {}

  #[test]
  fn hash_bytes_is_full_sha256() {
    let hash = hash_bytes(b"hello world");
    assert_eq!(hash.0, "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9");
  }

  #[test]
  fn fingerprint_ignores_map_insertion_order() {
    let mut a = HashMap::new();
    a.insert("x".to_string(), 1);
    a.insert("y".to_string(), 2);
    let mut b = HashMap::new();
    b.insert("y".to_string(), 2);
    b.insert("x".to_string(), 1);

    let first = Sample { name: "s".into(), tags: a }.fingerprint().unwrap();
    let second = Sample { name: "s".into(), tags: b }.fingerprint().unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn fingerprint_changes_with_content() {
    let first = Sample { name: "a".into(), tags: HashMap::new() }.fingerprint().unwrap();
    let second = Sample { name: "b".into(), tags: HashMap::new() }.fingerprint().unwrap();
    assert_ne!(first, second);
  }
}
