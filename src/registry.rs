use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{FsError, Result};
use crate::layout::descriptor::NodeId;

// ids handed out to users by `create`/`mkdir` and accepted by `fstat`
pub type DescriptorId = usize;

/// Index from descriptor ids to descriptors.
///
/// The registry does not decide whether a descriptor exists; the directory tree and the open file
/// table do. An entry is dropped only when its descriptor is reclaimed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorRegistry {
    entries: BTreeMap<DescriptorId, NodeId>,
}

impl DescriptorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers `node` under the lowest unused id.
    pub fn register(&mut self, node: NodeId, capacity: usize) -> Result<DescriptorId> {
        if self.entries.len() >= capacity {
            return Err(FsError::CapacityExceeded(capacity));
        }

        let id = (0..)
            .find(|id| !self.entries.contains_key(id))
            .expect("a map with fewer than `capacity` entries has a free id");
        self.entries.insert(id, node);

        Ok(id)
    }

    /// Removes the entry for `node`, returning its id.
    pub fn unregister(&mut self, node: NodeId) -> Option<DescriptorId> {
        let id = self.id_of(node)?;
        self.entries.remove(&id);

        Some(id)
    }

    #[must_use]
    pub fn get(&self, id: DescriptorId) -> Option<NodeId> {
        self.entries.get(&id).copied()
    }

    #[must_use]
    pub fn id_of(&self, node: NodeId) -> Option<DescriptorId> {
        self.entries
            .iter()
            .find(|(_, &entry_node)| entry_node == node)
            .map(|(&id, _)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (DescriptorId, NodeId)> + '_ {
        self.entries.iter().map(|(&id, &node)| (id, node))
    }
}
