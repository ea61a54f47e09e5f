use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::block::{allocated_size, BlockNumber, BLOCK_SIZE};
use super::name::EntryName;

// descriptors live in an arena owned by the directory tree; a `NodeId` is a slot in that arena
pub type NodeId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum DescriptorKind {
    /// This descriptor describes a regular data file.
    File = 1,
    /// This descriptor describes a directory.
    Directory = 2,
    /// This descriptor describes a symbolic link.
    Symlink = 3,
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            DescriptorKind::File => "file",
            DescriptorKind::Directory => "directory",
            DescriptorKind::Symlink => "symlink",
        };

        write!(f, "{kind}")
    }
}

/// What a descriptor holds, depending on its kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Contents {
    /// Block numbers of the file data, in order.
    File { blocks: Vec<BlockNumber> },
    /// Entries of the directory. The map owns the edges to the children.
    Directory {
        children: BTreeMap<EntryName, NodeId>,
    },
    /// The path the link points to, relative to the directory containing the link.
    Symlink { target: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub contents: Contents,
    /// allocated size in units, always a multiple of the block size
    size: usize,
    /// directory holding this descriptor's names; `None` for the root and for nameless files
    pub parent: Option<NodeId>,
    /// number of directory entries pointing to this descriptor
    pub nlink: u16,
}

impl Descriptor {
    /// A file backed by `blocks`, sized to fill them.
    #[must_use]
    pub fn file(blocks: Vec<BlockNumber>, parent: NodeId) -> Self {
        let size = blocks.len() * BLOCK_SIZE;

        Self {
            contents: Contents::File { blocks },
            size,
            parent: Some(parent),
            nlink: 0,
        }
    }

    #[must_use]
    pub fn directory(parent: Option<NodeId>) -> Self {
        Self {
            contents: Contents::Directory {
                children: BTreeMap::new(),
            },
            size: 0,
            parent,
            nlink: 0,
        }
    }

    #[must_use]
    pub fn symlink(target: &str, parent: NodeId) -> Self {
        Self {
            contents: Contents::Symlink {
                target: target.to_owned(),
            },
            size: 0,
            parent: Some(parent),
            nlink: 0,
        }
    }

    #[must_use]
    pub fn kind(&self) -> DescriptorKind {
        match self.contents {
            Contents::File { .. } => DescriptorKind::File,
            Contents::Directory { .. } => DescriptorKind::Directory,
            Contents::Symlink { .. } => DescriptorKind::Symlink,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Sets the size, rounded up to a whole number of blocks.
    pub fn set_size(&mut self, size: usize) {
        self.size = allocated_size(size);
    }

    /// The file's block numbers. Empty for directories and symlinks.
    #[must_use]
    pub fn blocks(&self) -> &[BlockNumber] {
        match &self.contents {
            Contents::File { blocks } => blocks,
            _ => &[],
        }
    }

    pub fn blocks_mut(&mut self) -> Option<&mut Vec<BlockNumber>> {
        match &mut self.contents {
            Contents::File { blocks } => Some(blocks),
            _ => None,
        }
    }

    #[must_use]
    pub fn children(&self) -> Option<&BTreeMap<EntryName, NodeId>> {
        match &self.contents {
            Contents::Directory { children } => Some(children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut BTreeMap<EntryName, NodeId>> {
        match &mut self.contents {
            Contents::Directory { children } => Some(children),
            _ => None,
        }
    }

    #[must_use]
    pub fn symlink_target(&self) -> Option<&str> {
        match &self.contents {
            Contents::Symlink { target } => Some(target),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.kind() == DescriptorKind::Directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_size_matches_blocks() {
        let descriptor = Descriptor::file(vec![0], 0);
        assert_eq!(descriptor.kind(), DescriptorKind::File);
        assert_eq!(descriptor.size(), BLOCK_SIZE);
        assert_eq!(descriptor.blocks(), &[0]);
    }

    #[test]
    fn test_set_size_rounds_up() {
        let mut descriptor = Descriptor::file(vec![0], 0);
        descriptor.set_size(BLOCK_SIZE * 5 - 13);
        assert_eq!(descriptor.size(), BLOCK_SIZE * 4);
    }

    #[test]
    fn test_directory_has_no_blocks() {
        let descriptor = Descriptor::directory(None);
        assert!(descriptor.is_directory());
        assert!(descriptor.blocks().is_empty());
        assert!(descriptor.children().unwrap().is_empty());
        assert_eq!(descriptor.size(), 0);
    }

    #[test]
    fn test_symlink_target() {
        let descriptor = Descriptor::symlink("a/b", 0);
        assert_eq!(descriptor.kind(), DescriptorKind::Symlink);
        assert_eq!(descriptor.symlink_target(), Some("a/b"));
        assert!(descriptor.children().is_none());
        assert!(descriptor.blocks().is_empty());
    }
}
