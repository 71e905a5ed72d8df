//! Content fingerprints for compiled-validator caching

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA256 checksum of a schema document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum from JSON value (canonicalized)
    pub fn from_json(value: &serde_json::Value) -> Self {
        Self::from_bytes(canonical_string(value).as_bytes())
    }

    /// Fingerprint of a document compiled under a given engine generation
    pub fn for_compilation(generation: u64, value: &serde_json::Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(generation.to_be_bytes());
        hasher.update(canonical_string(value).as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that JSON value matches this checksum
    pub fn verify_json(&self, value: &serde_json::Value) -> bool {
        Self::from_json(value) == *self
    }
}

/// Serialize with object keys in sorted order
fn canonical_string(value: &serde_json::Value) -> String {
    serde_json::to_string(&canonicalize(value)).unwrap_or_default()
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let sorted: serde_json::Map<String, serde_json::Value> = keys
                .into_iter()
                .map(|k| (k.clone(), canonicalize(&map[k])))
                .collect();
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
