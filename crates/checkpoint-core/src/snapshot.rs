//! Canonical snapshot construction
//!
//! `CheckpointBuilder` turns a `RegistrySnapshot` into a canonical byte form
//! and its SHA-256 digest. The canonical form is JSON with:
//!
//! - object keys in lexicographic byte order at every depth
//! - no insignificant whitespace
//! - node records ordered by `node_id`
//! - integers only (floating point numbers are rejected)
//!
//! Nothing time-dependent is hashed except `version` and `schema_version`.
//! Validation runs to completion before any bytes are hashed, so a rejected
//! snapshot never yields a partial digest.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::error::{CheckpointError, Result};
use crate::types::RegistrySnapshot;

/// A snapshot in canonical form together with its digest
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalSnapshot {
    snapshot: RegistrySnapshot,
    bytes: Vec<u8>,
    hash: [u8; 32],
}

impl CanonicalSnapshot {
    /// The normalized snapshot (nodes sorted by `node_id`)
    pub fn snapshot(&self) -> &RegistrySnapshot {
        &self.snapshot
    }

    /// Canonical bytes that were hashed
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// SHA-256 over the canonical bytes
    pub fn hash(&self) -> [u8; 32] {
        self.hash
    }

    /// Registry version
    pub fn version(&self) -> u64 {
        self.snapshot.version
    }

    /// Node record schema version
    pub fn schema_version(&self) -> u32 {
        self.snapshot.schema_version
    }
}

/// Builds canonical snapshots and their hashes
pub struct CheckpointBuilder;

impl CheckpointBuilder {
    /// Canonicalize a snapshot and compute its hash
    pub fn build(snapshot: &RegistrySnapshot) -> Result<CanonicalSnapshot> {
        let normalized = Self::normalize(snapshot)?;
        let bytes = Self::encode(&normalized)?;
        let hash = sha256(&bytes);

        Ok(CanonicalSnapshot {
            snapshot: normalized,
            bytes,
            hash,
        })
    }

    /// Canonical bytes for a snapshot
    pub fn canonical_bytes(snapshot: &RegistrySnapshot) -> Result<Vec<u8>> {
        let normalized = Self::normalize(snapshot)?;
        Self::encode(&normalized)
    }

    /// SHA-256 over the canonical bytes of a snapshot
    pub fn compute_hash(snapshot: &RegistrySnapshot) -> Result<[u8; 32]> {
        Ok(Self::build(snapshot)?.hash)
    }

    fn normalize(snapshot: &RegistrySnapshot) -> Result<RegistrySnapshot> {
        let mut seen = HashSet::with_capacity(snapshot.nodes.len());
        for node in &snapshot.nodes {
            if node.node_id.is_empty() {
                return Err(CheckpointError::SerializationError(
                    "node record with empty node_id".into(),
                ));
            }
            if !seen.insert(node.node_id.as_str()) {
                return Err(CheckpointError::SerializationError(format!(
                    "duplicate node_id '{}'",
                    node.node_id
                )));
            }
        }

        let mut normalized = snapshot.clone();
        normalized
            .nodes
            .sort_by(|a, b| a.node_id.as_bytes().cmp(b.node_id.as_bytes()));
        Ok(normalized)
    }

    fn encode(snapshot: &RegistrySnapshot) -> Result<Vec<u8>> {
        let value = serde_json::to_value(snapshot)?;
        let mut out = Vec::with_capacity(256);
        write_canonical(&value, "$", &mut out)?;
        Ok(out)
    }
}

/// SHA-256 helper
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

fn write_canonical(value: &Value, path: &str, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => {
            if n.is_f64() {
                return Err(CheckpointError::SerializationError(format!(
                    "non-integer number at {}",
                    path
                )));
            }
            out.extend_from_slice(n.to_string().as_bytes());
        }
        Value::String(s) => serde_json::to_writer(&mut *out, s)?,
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, &format!("{}[{}]", path, i), out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));

            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(&map[key], &format!("{}.{}", path, key), out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}
