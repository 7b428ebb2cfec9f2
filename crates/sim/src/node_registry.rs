use serde::{Deserialize, Serialize};
use shardworld_spatial::CellKey;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A peer node reachable over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub address: String,
    pub port: u16,
}

impl NodeInfo {
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
        }
    }

    /// Endpoint that accepts `POST` handover requests on this node.
    pub fn handover_url(&self) -> String {
        format!("http://{}:{}/handover", self.address, self.port)
    }
}

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<String, NodeInfo>,
    cell_owners: HashMap<CellKey, String>,
}

/// Which node owns which cell. Unassigned cells belong to the local node.
///
/// Has its own lock so lookups never wait on the world state.
#[derive(Debug)]
pub struct NodeRegistry {
    local_node_id: String,
    inner: RwLock<Inner>,
}

impl NodeRegistry {
    pub fn new(local_node_id: impl Into<String>) -> Self {
        Self {
            local_node_id: local_node_id.into(),
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    /// Add or replace a peer.
    pub fn register_node(&self, info: NodeInfo) {
        tracing::info!(node = %info.id, address = %info.address, port = info.port, "registered node");
        self.write().nodes.insert(info.id.clone(), info);
    }

    /// Forget a peer and release every cell assigned to it. Returns the
    /// number of cells that reverted to the local node.
    pub fn unregister_node(&self, node_id: &str) -> Option<usize> {
        let mut inner = self.write();
        inner.nodes.remove(node_id)?;
        let before = inner.cell_owners.len();
        inner.cell_owners.retain(|_, owner| owner != node_id);
        let released = before - inner.cell_owners.len();
        tracing::info!(node = node_id, released, "unregistered node");
        Some(released)
    }

    /// Assign `cell` to `node_id`. Assigning to the local node clears any
    /// remote assignment.
    pub fn assign_cell(&self, cell: CellKey, node_id: impl Into<String>) {
        let node_id = node_id.into();
        tracing::debug!(%cell, node = %node_id, "assigned cell");
        let mut inner = self.write();
        if node_id == self.local_node_id {
            inner.cell_owners.remove(&cell);
        } else {
            inner.cell_owners.insert(cell, node_id);
        }
    }

    pub fn cell_owner(&self, cell: CellKey) -> String {
        self.read()
            .cell_owners
            .get(&cell)
            .cloned()
            .unwrap_or_else(|| self.local_node_id.clone())
    }

    pub fn is_local_cell(&self, cell: CellKey) -> bool {
        self.read()
            .cell_owners
            .get(&cell)
            .is_none_or(|owner| *owner == self.local_node_id)
    }

    pub fn node_info(&self, node_id: &str) -> Option<NodeInfo> {
        self.read().nodes.get(node_id).cloned()
    }

    /// Registered peers ordered by id.
    pub fn list_nodes(&self) -> Vec<NodeInfo> {
        self.read().nodes.values().cloned().collect()
    }

    /// Remote cell assignments ordered by cell.
    pub fn assignments(&self) -> BTreeMap<CellKey, String> {
        self.read()
            .cell_owners
            .iter()
            .map(|(cell, owner)| (*cell, owner.clone()))
            .collect()
    }
}
