use std::collections::{HashMap, HashSet};
use std::fmt;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::Limits;
use crate::error::{FsError, Result};
use crate::layout::block::{blocks_for, BlockNumber, BLOCK_SIZE, WRITTEN_UNIT};
use crate::layout::descriptor::{Descriptor, DescriptorKind, NodeId};
use crate::layout::name::{EntryName, SEPARATOR};
use crate::open_files::{Fd, OpenFileTable};
use crate::registry::{DescriptorId, DescriptorRegistry};
use crate::storage::BlockPool;
use crate::tree::{DirectoryTree, Step, ROOT_NODE};

/// Return early with a [`FsError::Corrupt`] error.
macro_rules! corrupt {
    ($($arg:tt)*) => {
        return Err(FsError::Corrupt(format!($($arg)*)))
    };
}

/// The whole state of a simulated file system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimFs {
    limits: Limits,
    pool: BlockPool,
    tree: DirectoryTree,
    registry: DescriptorRegistry,
    open_files: OpenFileTable,
}

/// Attributes of a registered descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stat {
    pub id: DescriptorId,
    pub kind: DescriptorKind,
    pub size: usize,
    pub blocks: usize,
    pub nlink: u16,
    pub open_handles: usize,
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "descriptor {}: {} size={} blocks={} links={} open={}",
            self.id, self.kind, self.size, self.blocks, self.nlink, self.open_handles
        )
    }
}

/// An entry of the current directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub id: DescriptorId,
    pub kind: DescriptorKind,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {} ({})", self.name, self.id, self.kind)
    }
}

/// Free and total counts of blocks and descriptors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Usage {
    pub total_blocks: usize,
    pub free_blocks: usize,
    pub total_descriptors: usize,
    pub free_descriptors: usize,
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "blocks: {}/{} free ({} units each); descriptors: {}/{} free",
            self.free_blocks,
            self.total_blocks,
            BLOCK_SIZE,
            self.free_descriptors,
            self.total_descriptors
        )
    }
}

impl Default for SimFs {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

impl SimFs {
    /// A freshly formatted file system: an empty root directory and a pool of free blocks.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        info!(
            "formatting: {} blocks of {BLOCK_SIZE} units, {} descriptors",
            limits.num_blocks, limits.max_descriptors
        );

        Self {
            pool: BlockPool::new(limits.num_blocks),
            tree: DirectoryTree::new(),
            registry: DescriptorRegistry::new(),
            open_files: OpenFileTable::new(),
            limits,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Discards every file, directory and open handle. The limits are kept.
    pub fn format(&mut self) {
        *self = Self::new(self.limits.clone());
    }

    pub fn create_file(&mut self, path: &str) -> Result<DescriptorId> {
        let (parent, leaf) = self.tree.resolve_parent(path, self.limits.max_symlink_hops)?;

        let (_, id) = self.create_entry(parent, leaf, |pool, parent| {
            Ok(Descriptor::file(vec![pool.allocate_one()?], parent))
        })?;

        Ok(id)
    }

    /// Creates the directory at `path` along with any missing directories leading to it.
    pub fn create_directory(&mut self, path: &str) -> Result<DescriptorId> {
        let mut walk = self.tree.walk(path, false)?;
        let mut created: Vec<(NodeId, String, NodeId)> = vec![];

        let result = loop {
            match self.tree.advance(&mut walk, self.limits.max_symlink_hops) {
                Ok(Step::Resolved(node)) if created.iter().any(|&(.., new)| new == node) => {
                    break Ok(node);
                }
                Ok(Step::Resolved(_)) => break Err(FsError::AlreadyExists(path.to_owned())),
                Ok(Step::Missing {
                    directory, name, ..
                }) => {
                    let made = self.create_entry(directory, &name, |_, parent| {
                        Ok(Descriptor::directory(Some(parent)))
                    });

                    match made {
                        Ok((node, _)) => {
                            created.push((directory, name, node));
                            walk.enter(node);
                        }
                        Err(err) => break Err(err),
                    }
                }
                Err(err) => break Err(err),
            }
        };

        match result {
            Ok(node) => self
                .registry
                .id_of(node)
                .ok_or_else(|| FsError::Corrupt(format!("new directory #{node} is unregistered"))),
            Err(err) => {
                for (directory, name, node) in created.into_iter().rev() {
                    self.tree.detach(directory, &name)?;
                    self.registry.unregister(node);
                    self.tree.remove(node);
                }

                Err(err)
            }
        }
    }

    /// Removes an empty directory.
    pub fn remove_directory(&mut self, path: &str) -> Result<()> {
        let (parent, leaf) = self.tree.resolve_parent(path, self.limits.max_symlink_hops)?;
        let node = self
            .tree
            .lookup(parent, leaf)?
            .ok_or_else(|| FsError::NotFound(path.to_owned()))?;

        let descriptor = self.tree.get(node)?;
        let Some(children) = descriptor.children() else {
            return Err(FsError::WrongKind(format!("{path} is not a directory")));
        };

        if descriptor.nlink != 1 {
            return Err(FsError::InvalidArgument(format!(
                "{path} has {} names",
                descriptor.nlink
            )));
        }

        if !children.is_empty() {
            return Err(FsError::NotEmpty(path.to_owned()));
        }

        if node == self.tree.current() {
            return Err(FsError::InvalidArgument(format!(
                "{path} is the current directory"
            )));
        }

        self.tree.detach(parent, leaf)?;
        self.registry.unregister(node);
        self.tree.remove(node);

        info!("removed directory {path}");

        Ok(())
    }

    /// Creates a symlink at `path` pointing to `target`.
    ///
    /// The target is not resolved until the link is followed, so it may dangle.
    pub fn create_symlink(&mut self, target: &str, path: &str) -> Result<DescriptorId> {
        if target.is_empty() || target.starts_with(SEPARATOR) {
            return Err(FsError::InvalidPath(target.to_owned()));
        }

        let (parent, leaf) = self.tree.resolve_parent(path, self.limits.max_symlink_hops)?;

        let (_, id) = self.create_entry(parent, leaf, |_, parent| {
            Ok(Descriptor::symlink(target, parent))
        })?;

        Ok(id)
    }

    pub fn open(&mut self, path: &str) -> Result<Fd> {
        let node = self.resolve(path)?;

        let kind = self.tree.get(node)?.kind();
        if kind != DescriptorKind::File {
            return Err(FsError::WrongKind(format!("{path} is a {kind}")));
        }

        let fd = self.open_files.open(node);
        info!("{path} opened with fd {fd}");

        Ok(fd)
    }

    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let node = self
            .open_files
            .close(fd)
            .ok_or_else(|| FsError::NotFound(format!("fd {fd}")))?;

        info!("fd {fd} closed");
        self.release_if_unreferenced(node)?;

        Ok(())
    }

    /// Reads `size` units starting at `offset` from the file open as `fd`.
    pub fn read(&self, fd: Fd, offset: usize, size: usize) -> Result<Vec<u8>> {
        let node = self.open_node(fd)?;
        debug!("[fd {fd}] reading (offset = {offset}; size = {size})");

        let mut data = Vec::with_capacity(self.tree.get(node)?.size());
        for &block_number in self.tree.get(node)?.blocks() {
            data.extend_from_slice(&self.pool.read(block_number)?);
        }

        check_range(offset, size, data.len())?;

        Ok(data[offset..offset + size].to_vec())
    }

    /// Marks `size` units starting at `offset` in the file open as `fd` as written.
    pub fn write(&mut self, fd: Fd, offset: usize, size: usize) -> Result<()> {
        let node = self.open_node(fd)?;
        debug!("[fd {fd}] writing (offset = {offset}; size = {size})");

        let blocks = self.tree.get(node)?.blocks().to_vec();
        check_range(offset, size, blocks.len() * BLOCK_SIZE)?;

        let end = offset + size;
        let mut position = offset;
        while position < end {
            let block_index = position / BLOCK_SIZE;
            let block_start = block_index * BLOCK_SIZE;
            let end_position = (block_start + BLOCK_SIZE).min(end);

            let block_number = blocks[block_index];
            let mut block = self.pool.read(block_number)?;
            block[position - block_start..end_position - block_start].fill(WRITTEN_UNIT);
            self.pool.write(block_number, block)?;

            position = end_position;
        }

        Ok(())
    }

    /// Grows or shrinks the file at `path` to `new_size` units, rounded up to whole blocks.
    ///
    /// Growing allocates every new block or none of them.
    pub fn truncate(&mut self, path: &str, new_size: usize) -> Result<()> {
        let (parent, leaf) = self.tree.resolve_parent(path, self.limits.max_symlink_hops)?;
        let node = self
            .tree
            .lookup(parent, leaf)?
            .ok_or_else(|| FsError::NotFound(path.to_owned()))?;

        let descriptor = self.tree.get_mut(node)?;
        let current_size = descriptor.size();
        let kind = descriptor.kind();
        let Some(blocks) = descriptor.blocks_mut() else {
            return Err(FsError::WrongKind(format!("{path} is a {kind}")));
        };

        if new_size > current_size {
            let new_blocks = self.pool.allocate_many(blocks_for(new_size - current_size))?;
            blocks.extend(new_blocks);
        } else {
            let mut shrink = current_size - new_size;
            while shrink >= BLOCK_SIZE {
                let Some(block_number) = blocks.pop() else {
                    break;
                };

                self.pool.release(block_number)?;
                shrink -= BLOCK_SIZE;
            }
        }

        descriptor.set_size(new_size);
        info!("truncated {path} to {} units", descriptor.size());

        Ok(())
    }

    /// Adds the name `new_name` for the file at `path`, in the same directory.
    pub fn link(&mut self, path: &str, new_name: &str) -> Result<()> {
        let (parent, leaf) = self.tree.resolve_parent(path, self.limits.max_symlink_hops)?;
        let node = self
            .tree
            .lookup(parent, leaf)?
            .ok_or_else(|| FsError::NotFound(path.to_owned()))?;

        let descriptor = self.tree.get(node)?;
        let kind = descriptor.kind();
        if kind != DescriptorKind::File {
            return Err(FsError::WrongKind(format!(
                "can create hard links to regular files only, {path} is a {kind}"
            )));
        }

        if descriptor.nlink >= self.limits.max_links {
            return Err(FsError::CapacityExceeded(usize::from(self.limits.max_links)));
        }

        let name = EntryName::new(new_name, self.limits.max_name_len)?;
        self.tree.attach(parent, name, node)?;

        info!("linked {path} as {new_name}");

        Ok(())
    }

    /// Removes the name at `path`. The file itself goes away once it has no names and no open
    /// handles.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let (parent, leaf) = self.tree.resolve_parent(path, self.limits.max_symlink_hops)?;
        let node = self
            .tree
            .lookup(parent, leaf)?
            .ok_or_else(|| FsError::NotFound(path.to_owned()))?;

        if self.tree.get(node)?.is_directory() {
            return Err(FsError::WrongKind(format!(
                "{path} is a directory, use rmdir"
            )));
        }

        self.tree.detach(parent, leaf)?;
        info!("unlinked {path}");

        self.release_if_unreferenced(node)?;

        Ok(())
    }

    pub fn change_directory(&mut self, path: &str) -> Result<()> {
        let node = self.resolve(path)?;
        self.tree.set_current(node)
    }

    /// The absolute path of the current directory.
    #[must_use]
    pub fn current_path(&self) -> String {
        self.tree.path_of(self.tree.current())
    }

    /// The entries of the current directory, sorted by name.
    pub fn list_links(&self) -> Result<Vec<Link>> {
        let current = self.tree.current();
        let children = self
            .tree
            .get(current)?
            .children()
            .ok_or_else(|| FsError::Corrupt("current directory is not a directory".to_owned()))?;

        children
            .iter()
            .map(|(name, &node)| -> Result<Link> {
                let id = self.registry.id_of(node).ok_or_else(|| {
                    FsError::Corrupt(format!("entry {name} points to an unregistered descriptor"))
                })?;

                Ok(Link {
                    name: name.to_string(),
                    id,
                    kind: self.tree.get(node)?.kind(),
                })
            })
            .collect()
    }

    pub fn stat(&self, id: DescriptorId) -> Result<Stat> {
        let node = self
            .registry
            .get(id)
            .ok_or_else(|| FsError::NotFound(format!("descriptor {id}")))?;
        let descriptor = self.tree.get(node)?;

        Ok(Stat {
            id,
            kind: descriptor.kind(),
            size: descriptor.size(),
            blocks: descriptor.blocks().len(),
            nlink: descriptor.nlink,
            open_handles: self.open_files.handles_to(node),
        })
    }

    /// Resolves `path`, following symlinks.
    pub fn resolve(&self, path: &str) -> Result<NodeId> {
        self.tree
            .resolve(path, true, self.limits.max_symlink_hops)
    }

    #[must_use]
    pub fn usage(&self) -> Usage {
        Usage {
            total_blocks: self.pool.len(),
            free_blocks: self.pool.num_free(),
            total_descriptors: self.limits.max_descriptors,
            free_descriptors: self
                .limits
                .max_descriptors
                .saturating_sub(self.registry.len()),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|err| FsError::Corrupt(format!("unable to serialize state: {err}")))
    }

    /// Restores a file system from [`Self::to_bytes`] output and checks it for consistency.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let fs: SimFs = bincode::deserialize(bytes)
            .map_err(|err| FsError::Corrupt(format!("unable to parse image: {err}")))?;

        fs.check()?;

        Ok(fs)
    }

    /// Checks the file system for consistency. Performs a depth-first traversal of the directory
    /// tree, then checks every descriptor, block, registry entry and open handle.
    pub fn check(&self) -> Result<()> {
        self.pool.check()?;

        if self.pool.len() != self.limits.num_blocks {
            corrupt!(
                "pool holds {} blocks, formatted with {}",
                self.pool.len(),
                self.limits.num_blocks
            );
        }

        if self.registry.len() > self.limits.max_descriptors {
            corrupt!("registry holds more than {} descriptors", self.limits.max_descriptors);
        }

        let Ok(root) = self.tree.get(ROOT_NODE) else {
            corrupt!("no root descriptor");
        };
        if !root.is_directory() {
            corrupt!("root descriptor does not represent a directory");
        }
        if root.parent.is_some() {
            corrupt!("root descriptor has a parent");
        }

        if !self
            .tree
            .get(self.tree.current())
            .is_ok_and(Descriptor::is_directory)
        {
            corrupt!("current directory is not a live directory");
        }

        let mut queue = vec![ROOT_NODE];
        let mut seen_directories = HashSet::<NodeId>::new();
        let mut name_counts = HashMap::<NodeId, u16>::new();

        while let Some(node) = queue.pop() {
            if !seen_directories.insert(node) {
                corrupt!("directory tree includes loop");
            }

            let children = self
                .tree
                .get(node)?
                .children()
                .expect("only directories are queued");

            for (name, &child) in children {
                let Ok(child_descriptor) = self.tree.get(child) else {
                    corrupt!("entry {name} points to a free descriptor");
                };

                if child_descriptor.parent != Some(node) {
                    corrupt!("entry {name} doesn't point back to its directory");
                }

                *name_counts.entry(child).or_default() += 1;

                if child_descriptor.is_directory() {
                    queue.push(child);
                }
            }
        }

        let mut block_owners = HashMap::<BlockNumber, NodeId>::new();

        for (node, descriptor) in self.tree.nodes() {
            if node == ROOT_NODE {
                continue;
            }

            let names = name_counts.get(&node).copied().unwrap_or(0);
            if names != descriptor.nlink {
                corrupt!(
                    "descriptor #{node} has {names} names but a link count of {}",
                    descriptor.nlink
                );
            }

            if descriptor.is_directory() && names != 1 {
                corrupt!("directory #{node} has {names} names");
            }

            if names == 0 && !self.open_files.is_open(node) {
                corrupt!("descriptor #{node} has neither names nor open handles");
            }

            if self.registry.id_of(node).is_none() {
                corrupt!("descriptor #{node} is not registered");
            }

            if descriptor.size() != descriptor.blocks().len() * BLOCK_SIZE {
                corrupt!(
                    "descriptor #{node} has size {} but {} blocks",
                    descriptor.size(),
                    descriptor.blocks().len()
                );
            }

            for &block_number in descriptor.blocks() {
                if !self.pool.is_allocated(block_number) {
                    corrupt!("descriptor #{node} uses unallocated block {block_number}");
                }

                if block_owners.insert(block_number, node).is_some() {
                    corrupt!("block number {block_number} is used twice");
                }
            }
        }

        if let Some(block_number) = self
            .pool
            .allocated()
            .find(|block_number| !block_owners.contains_key(block_number))
        {
            corrupt!("block number {block_number} is allocated but unused");
        }

        for (id, node) in self.registry.iter() {
            if node == ROOT_NODE || self.tree.get(node).is_err() {
                corrupt!("registry entry {id} points to an invalid descriptor");
            }
        }

        for (fd, node) in self.open_files.iter() {
            if !self
                .tree
                .get(node)
                .is_ok_and(|descriptor| descriptor.kind() == DescriptorKind::File)
            {
                corrupt!("fd {fd} does not refer to a file");
            }
        }

        Ok(())
    }

    /// Places a new descriptor named `leaf` in `parent` and registers it.
    ///
    /// `make` builds the descriptor once every other precondition holds, so a failure inside it
    /// leaves the file system untouched.
    fn create_entry<F>(&mut self, parent: NodeId, leaf: &str, make: F) -> Result<(NodeId, DescriptorId)>
    where
        F: FnOnce(&mut BlockPool, NodeId) -> Result<Descriptor>,
    {
        let name = EntryName::new(leaf, self.limits.max_name_len)?;

        if self.tree.lookup(parent, leaf)?.is_some() {
            return Err(FsError::AlreadyExists(leaf.to_owned()));
        }

        if self.registry.len() >= self.limits.max_descriptors {
            return Err(FsError::CapacityExceeded(self.limits.max_descriptors));
        }

        let descriptor = make(&mut self.pool, parent)?;
        let kind = descriptor.kind();

        let node = self.tree.insert(descriptor);
        self.tree.attach(parent, name, node)?;
        let id = self.registry.register(node, self.limits.max_descriptors)?;

        info!("[descriptor #{id}] created {kind} {leaf}");

        Ok((node, id))
    }

    /// Reclaims a file or symlink that has no names and no open handles left: its blocks go
    /// back to the pool and its registry entry is dropped.
    fn release_if_unreferenced(&mut self, node: NodeId) -> Result<bool> {
        let descriptor = self.tree.get(node)?;

        if descriptor.is_directory() || descriptor.nlink > 0 || self.open_files.is_open(node) {
            return Ok(false);
        }

        let blocks = descriptor.blocks().to_vec();
        for &block_number in &blocks {
            self.pool.release(block_number)?;
        }

        let id = self.registry.unregister(node);
        self.tree.remove(node);

        if let Some(id) = id {
            info!("[descriptor #{id}] reclaimed, {} blocks released", blocks.len());
        }

        Ok(true)
    }

    fn open_node(&self, fd: Fd) -> Result<NodeId> {
        self.open_files
            .get(fd)
            .ok_or_else(|| FsError::NotFound(format!("fd {fd}")))
    }
}

/// Checks that `[offset, offset + size)` is a non-empty range inside `len` units.
fn check_range(offset: usize, size: usize, len: usize) -> Result<()> {
    if size == 0 {
        return Err(FsError::InvalidArgument("size must be positive".to_owned()));
    }

    match offset.checked_add(size) {
        Some(end) if end <= len => Ok(()),
        _ => Err(FsError::InvalidArgument(format!(
            "range {offset}+{size} exceeds file size {len}"
        ))),
    }
}
