//! Registry state source
//!
//! The node registry itself (registration API, record validation, gossip)
//! lives outside this crate; checkpoints only need its current state.

use async_trait::async_trait;
use checkpoint_core::{NodeRecord, RegistrySnapshot};
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::storage::StorageError;

/// Read access to the current registry state
#[async_trait]
pub trait RegistryStore: Send + Sync + std::fmt::Debug {
    /// Snapshot of all node records
    ///
    /// The `version` field is the registry's own mutation counter; the
    /// checkpoint service replaces it with the next checkpoint version.
    async fn get_current_state(&self) -> Result<RegistrySnapshot, StorageError>;
}

#[derive(Debug)]
struct RegistryState {
    revision: u64,
    schema_version: u32,
    nodes: BTreeMap<String, NodeRecord>,
}

/// In-memory registry for tests and the demo binary
#[derive(Debug)]
pub struct InMemoryRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryRegistry {
    /// Create an empty registry with the given node schema version
    pub fn new(schema_version: u32) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                revision: 0,
                schema_version,
                nodes: BTreeMap::new(),
            }),
        }
    }

    /// Insert or replace a node record
    pub fn upsert(&self, node: NodeRecord) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StorageError::Lock("registry lock poisoned".into()))?;
        state.revision += 1;
        state.nodes.insert(node.node_id.clone(), node);
        Ok(())
    }

    /// Remove a node record
    pub fn remove(&self, node_id: &str) -> Result<bool, StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StorageError::Lock("registry lock poisoned".into()))?;
        let removed = state.nodes.remove(node_id).is_some();
        if removed {
            state.revision += 1;
        }
        Ok(removed)
    }

    /// Number of node records
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.nodes.len()).unwrap_or(0)
    }

    /// Whether the registry has no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistry {
    async fn get_current_state(&self) -> Result<RegistrySnapshot, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| StorageError::Lock("registry lock poisoned".into()))?;

        Ok(RegistrySnapshot {
            version: state.revision,
            schema_version: state.schema_version,
            nodes: state.nodes.values().cloned().collect(),
        })
    }
}
