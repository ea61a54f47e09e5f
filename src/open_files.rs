use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::layout::descriptor::NodeId;

pub type Fd = usize;

/// Maps file descriptors to open descriptors. Several fds may refer to the same descriptor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFileTable {
    entries: BTreeMap<Fd, NodeId>,
}

impl OpenFileTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `node` under the lowest unused fd.
    pub fn open(&mut self, node: NodeId) -> Fd {
        let fd = (0..)
            .find(|fd| !self.entries.contains_key(fd))
            .expect("fds are unbounded");
        self.entries.insert(fd, node);

        fd
    }

    /// Closes `fd`, returning the descriptor it referred to.
    pub fn close(&mut self, fd: Fd) -> Option<NodeId> {
        self.entries.remove(&fd)
    }

    #[must_use]
    pub fn get(&self, fd: Fd) -> Option<NodeId> {
        self.entries.get(&fd).copied()
    }

    /// The number of fds referring to `node`.
    #[must_use]
    pub fn handles_to(&self, node: NodeId) -> usize {
        self.entries.values().filter(|&&open| open == node).count()
    }

    #[must_use]
    pub fn is_open(&self, node: NodeId) -> bool {
        self.entries.values().any(|&open| open == node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Fd, NodeId)> + '_ {
        self.entries.iter().map(|(&fd, &node)| (fd, node))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
