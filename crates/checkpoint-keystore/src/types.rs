//! Key reference types

use serde::{Deserialize, Serialize};

use crate::error::KeyStoreError;

/// Backend family named by a key reference prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyScheme {
    /// Process memory (tests, demo)
    Mem,
    /// Base64 secret files under a key directory
    File,
    /// HSM slot; private bytes never leave the device
    Hsm,
}

impl std::fmt::Display for KeyScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyScheme::Mem => write!(f, "mem"),
            KeyScheme::File => write!(f, "file"),
            KeyScheme::Hsm => write!(f, "hsm"),
        }
    }
}

impl std::str::FromStr for KeyScheme {
    type Err = KeyStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mem" | "memory" => Ok(KeyScheme::Mem),
            "file" => Ok(KeyScheme::File),
            "hsm" | "pkcs11" => Ok(KeyScheme::Hsm),
            _ => Err(KeyStoreError::UnsupportedScheme(s.to_string())),
        }
    }
}

/// Parsed `scheme:locator` key reference
///
/// Examples: `mem:k1`, `file:k1.key`, `hsm:slot-4`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyRef {
    /// Backend family
    pub scheme: KeyScheme,
    /// Backend-specific locator
    pub locator: String,
}

impl KeyRef {
    /// Create a key reference
    pub fn new(scheme: KeyScheme, locator: impl Into<String>) -> Self {
        Self {
            scheme,
            locator: locator.into(),
        }
    }

    /// Parse a `scheme:locator` string
    pub fn parse(key_ref: &str) -> Result<Self, KeyStoreError> {
        let (scheme, locator) = key_ref
            .split_once(':')
            .ok_or_else(|| KeyStoreError::InvalidKeyRef(format!("missing scheme in '{}'", key_ref)))?;

        if locator.is_empty() {
            return Err(KeyStoreError::InvalidKeyRef(format!(
                "empty locator in '{}'",
                key_ref
            )));
        }

        Ok(Self::new(scheme.parse()?, locator))
    }
}

impl std::fmt::Display for KeyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.scheme, self.locator)
    }
}

impl std::str::FromStr for KeyRef {
    type Err = KeyStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_ref() {
        let key_ref = KeyRef::parse("hsm:slot-4").unwrap();
        assert_eq!(key_ref.scheme, KeyScheme::Hsm);
        assert_eq!(key_ref.locator, "slot-4");
        assert_eq!(key_ref.to_string(), "hsm:slot-4");

        // Only the first colon separates scheme from locator
        let key_ref: KeyRef = "file:keys:2026.key".parse().unwrap();
        assert_eq!(key_ref.locator, "keys:2026.key");
    }

    #[test]
    fn test_invalid_key_refs() {
        assert!(matches!(KeyRef::parse("k1"), Err(KeyStoreError::InvalidKeyRef(_))));
        assert!(matches!(KeyRef::parse("mem:"), Err(KeyStoreError::InvalidKeyRef(_))));
        assert!(matches!(KeyRef::parse("vault:k1"), Err(KeyStoreError::UnsupportedScheme(_))));
    }
}
