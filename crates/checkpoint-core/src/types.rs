//! Common types used across the checkpoint framework

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Signature algorithm tag
///
/// The tag is stored next to every signature and trust anchor, so a checkpoint
/// signed under an older default algorithm stays verifiable after migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// HMAC-SHA256 with a shared secret
    HmacSha256,
    /// Ed25519 (RFC 8032)
    Ed25519,
    /// CRYSTALS-Dilithium, security level 2
    Dilithium2,
}

impl Algorithm {
    /// All supported algorithms
    pub const ALL: &'static [Algorithm] = &[
        Algorithm::HmacSha256,
        Algorithm::Ed25519,
        Algorithm::Dilithium2,
    ];

    /// Whether verification material is the signing secret itself
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Algorithm::HmacSha256)
    }

    /// Whether this is a post-quantum algorithm
    pub fn is_post_quantum(&self) -> bool {
        matches!(self, Algorithm::Dilithium2)
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::HmacSha256 => write!(f, "hmac-sha256"),
            Algorithm::Ed25519 => write!(f, "ed25519"),
            Algorithm::Dilithium2 => write!(f, "dilithium2"),
        }
    }
}

impl std::str::FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hmac-sha256" | "hmac" | "hs256" => Ok(Algorithm::HmacSha256),
            "ed25519" | "eddsa" => Ok(Algorithm::Ed25519),
            "dilithium2" | "dilithium" => Ok(Algorithm::Dilithium2),
            _ => Err(format!("Unknown algorithm: {}", s)),
        }
    }
}

/// A single node record as validated by the registry
///
/// Schema validation of individual records happens upstream; this crate only
/// needs a stable shape to canonicalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Unique node identifier
    pub node_id: String,

    /// Network endpoint of the node
    pub endpoint: String,

    /// Free-form attributes (region, capabilities, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl NodeRecord {
    /// Create a new node record
    pub fn new(node_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            endpoint: endpoint.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Add an attribute (builder pattern)
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Registry state handed to the checkpoint builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Registry version this snapshot represents
    pub version: u64,

    /// Version of the node record schema
    pub schema_version: u32,

    /// Node records
    pub nodes: Vec<NodeRecord>,
}

impl RegistrySnapshot {
    /// Create an empty snapshot
    pub fn new(version: u64, schema_version: u32) -> Self {
        Self {
            version,
            schema_version,
            nodes: Vec::new(),
        }
    }

    /// Add a node record (builder pattern)
    pub fn with_node(mut self, node: NodeRecord) -> Self {
        self.nodes.push(node);
        self
    }
}

/// Base64 serialization for byte fields
pub(crate) mod serde_bytes_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Hex serialization for 32-byte digests
pub(crate) mod serde_digest_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(digest: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(digest))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("digest must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_tags() {
        assert_eq!(
            serde_json::to_string(&Algorithm::HmacSha256).unwrap(),
            "\"hmac-sha256\""
        );
        assert_eq!(
            serde_json::to_string(&Algorithm::Dilithium2).unwrap(),
            "\"dilithium2\""
        );
        assert_eq!("HMAC".parse::<Algorithm>().unwrap(), Algorithm::HmacSha256);
        assert!("rsa".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_algorithm_display_matches_serde() {
        for alg in Algorithm::ALL {
            let json = serde_json::to_string(alg).unwrap();
            assert_eq!(json, format!("\"{}\"", alg));
        }
    }

    #[test]
    fn test_snapshot_builder() {
        let snapshot = RegistrySnapshot::new(3, 1)
            .with_node(NodeRecord::new("node-a", "10.0.0.1:7000"))
            .with_node(
                NodeRecord::new("node-b", "10.0.0.2:7000")
                    .with_attribute("region", serde_json::json!("eu-west")),
            );

        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(
            snapshot.nodes[1].attributes.get("region"),
            Some(&serde_json::json!("eu-west"))
        );
    }
}
