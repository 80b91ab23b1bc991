/**
 * NODE REGISTRY - In-memory store of the latest descriptor per node
 *
 * ROLE: single source of truth for "who has ever announced itself".
 * Every heartbeat is a full snapshot that replaces the stored one.
 *
 * RULES:
 * - entries are created on first heartbeat and never evicted
 * - liveness (stale or not) is decided by callers, see liveness.rs
 * - a heartbeat carrying a sequence lower than the stored one is dropped
 */

use crate::models::{NodeDescriptor, NodesMap};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("node identity must not be empty")]
    EmptyIdentity,
    #[error("node {0} has never sent a heartbeat")]
    NotFound(String),
}

/// What ingesting a heartbeat did to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Created,
    Updated,
    /// Older than what is stored, the entry was left untouched
    Stale { stored: u64, received: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeListing {
    pub nodes: Vec<String>,
    pub count: usize,
}

pub struct NodeRegistry {
    nodes: RwLock<NodesMap>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the entry for the descriptor's identity wholesale
    pub fn ingest_heartbeat(&self, descriptor: NodeDescriptor) -> Result<IngestOutcome, RegistryError> {
        if descriptor.identity.trim().is_empty() {
            return Err(RegistryError::EmptyIdentity);
        }

        let mut nodes = self.nodes.write();
        let outcome = match nodes.get(&descriptor.identity) {
            None => IngestOutcome::Created,
            Some(current) => match (current.sequence, descriptor.sequence) {
                (Some(stored), Some(received)) if received < stored => {
                    warn!(
                        node = %descriptor.identity,
                        stored, received, "dropping out-of-order heartbeat"
                    );
                    return Ok(IngestOutcome::Stale { stored, received });
                }
                _ => IngestOutcome::Updated,
            },
        };

        match outcome {
            IngestOutcome::Created => info!(node = %descriptor.identity, "node registered"),
            _ => debug!(node = %descriptor.identity, "heartbeat stored"),
        }
        nodes.insert(descriptor.identity.clone(), descriptor);
        Ok(outcome)
    }

    /// Most recent descriptor, whatever its age
    pub fn lookup(&self, identity: &str) -> Result<NodeDescriptor, RegistryError> {
        self.nodes
            .read()
            .get(identity)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(identity.to_string()))
    }

    /// Registered identities, sorted
    pub fn list_nodes(&self) -> NodeListing {
        let mut nodes: Vec<String> = self.nodes.read().keys().cloned().collect();
        nodes.sort();
        let count = nodes.len();
        NodeListing { nodes, count }
    }

    pub fn count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Copy of the whole map for status reporting
    pub fn snapshot(&self) -> NodesMap {
        self.nodes.read().clone()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedNodeRegistry = Arc<NodeRegistry>;
