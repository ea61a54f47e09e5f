//! The descriptor graph and path resolution.
//!
//! Descriptors live in an arena indexed by [`NodeId`]. Directory entries are the owning edges;
//! `parent` pointers are plain indices used for `..` and never keep anything alive.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{FsError, Result};
use crate::layout::descriptor::{Descriptor, DescriptorKind, NodeId};
use crate::layout::name::{EntryName, SEPARATOR};

/// The arena slot of the root directory.
pub const ROOT_NODE: NodeId = 0;

const HOME: &str = "~";
const CURRENT: &str = ".";
const PARENT: &str = "..";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryTree {
    nodes: Vec<Option<Descriptor>>,
    current: NodeId,
}

/// A path being resolved, one token at a time.
#[derive(Debug)]
pub struct PathWalk {
    path: String,
    tokens: VecDeque<String>,
    current: NodeId,
    hops: usize,
    follow_last: bool,
}

impl PathWalk {
    /// Continues the walk from `node`, typically a directory the caller just created for a
    /// [`Step::Missing`] entry.
    pub fn enter(&mut self, node: NodeId) {
        self.current = node;
    }
}

/// Where a walk stopped.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    /// Every token was consumed.
    Resolved(NodeId),
    /// `name` does not exist in `directory`. `last` is set if it was the final token.
    Missing {
        directory: NodeId,
        name: String,
        last: bool,
    },
}

impl Default for DirectoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryTree {
    /// A tree holding only an empty root directory, which is also the current directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Descriptor::directory(None))],
            current: ROOT_NODE,
        }
    }

    #[must_use]
    pub fn current(&self) -> NodeId {
        self.current
    }

    pub fn set_current(&mut self, node: NodeId) -> Result<()> {
        if !self.get(node)?.is_directory() {
            return Err(FsError::WrongKind(format!(
                "{} is not a directory",
                self.path_of(node)
            )));
        }

        self.current = node;

        Ok(())
    }

    pub fn get(&self, node: NodeId) -> Result<&Descriptor> {
        self.nodes
            .get(node)
            .and_then(Option::as_ref)
            .ok_or_else(|| FsError::NotFound(format!("descriptor #{node}")))
    }

    pub fn get_mut(&mut self, node: NodeId) -> Result<&mut Descriptor> {
        self.nodes
            .get_mut(node)
            .and_then(Option::as_mut)
            .ok_or_else(|| FsError::NotFound(format!("descriptor #{node}")))
    }

    /// Puts `descriptor` in the lowest vacant slot. The descriptor has no names yet.
    pub fn insert(&mut self, descriptor: Descriptor) -> NodeId {
        match self.nodes.iter().position(Option::is_none) {
            Some(node) => {
                self.nodes[node] = Some(descriptor);
                node
            }
            None => {
                self.nodes.push(Some(descriptor));
                self.nodes.len() - 1
            }
        }
    }

    /// Vacates the slot of `node`. The caller is responsible for its names and blocks.
    pub fn remove(&mut self, node: NodeId) -> Option<Descriptor> {
        if node == ROOT_NODE {
            return None;
        }

        let removed = self.nodes.get_mut(node)?.take();

        while matches!(self.nodes.last(), Some(None)) {
            self.nodes.pop();
        }

        removed
    }

    /// Every live descriptor, root included.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Descriptor)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(node, descriptor)| descriptor.as_ref().map(|d| (node, d)))
    }

    /// Looks up `name` among the entries of `directory`, without following symlinks.
    pub fn lookup(&self, directory: NodeId, name: &str) -> Result<Option<NodeId>> {
        let children = self.get(directory)?.children().ok_or_else(|| {
            FsError::WrongKind(format!("{} is not a directory", self.path_of(directory)))
        })?;

        Ok(children.get(name).copied())
    }

    /// Adds an entry `name` in `directory` pointing at `node`.
    pub fn attach(&mut self, directory: NodeId, name: EntryName, node: NodeId) -> Result<()> {
        if self.lookup(directory, name.as_str())?.is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }

        // checked before touching the directory
        let nlink = self
            .get(node)?
            .nlink
            .checked_add(1)
            .ok_or(FsError::CapacityExceeded(usize::from(u16::MAX)))?;

        self.get_mut(directory)?
            .children_mut()
            .expect("`lookup` checked that this is a directory")
            .insert(name, node);

        let descriptor = self.get_mut(node)?;
        descriptor.nlink = nlink;
        descriptor.parent = Some(directory);

        Ok(())
    }

    /// Removes the entry `name` from `directory`, returning the node it pointed at.
    ///
    /// A descriptor that loses its last name also loses its parent.
    pub fn detach(&mut self, directory: NodeId, name: &str) -> Result<NodeId> {
        let node = self
            .get_mut(directory)?
            .children_mut()
            .ok_or_else(|| FsError::WrongKind(format!("descriptor #{directory} is not a directory")))?
            .remove(name)
            .ok_or_else(|| FsError::NotFound(name.to_owned()))?;

        let descriptor = self.get_mut(node)?;
        descriptor.nlink = descriptor.nlink.saturating_sub(1);
        if descriptor.nlink == 0 {
            descriptor.parent = None;
        }

        Ok(node)
    }

    /// The absolute path of `node` built from its parents, such as `~/a/b`.
    ///
    /// Nameless descriptors are shown as `#<node>`.
    #[must_use]
    pub fn path_of(&self, node: NodeId) -> String {
        let mut names = vec![];
        let mut current = node;

        while current != ROOT_NODE {
            let Some(parent) = self.get(current).ok().and_then(|d| d.parent) else {
                return format!("#{node}");
            };

            let name = self
                .get(parent)
                .ok()
                .and_then(Descriptor::children)
                .and_then(|children| {
                    children
                        .iter()
                        .find(|(_, &child)| child == current)
                        .map(|(name, _)| name.to_string())
                });

            let Some(name) = name else {
                return format!("#{node}");
            };

            names.push(name);
            current = parent;
        }

        names.push(HOME.to_owned());
        names.reverse();
        names.join("/")
    }

    /// Starts resolving `path` from the current directory.
    ///
    /// With `follow_last` unset, a symlink in the final position is returned as is.
    pub fn walk(&self, path: &str, follow_last: bool) -> Result<PathWalk> {
        if path.starts_with(SEPARATOR) {
            return Err(FsError::InvalidPath(path.to_owned()));
        }

        Ok(PathWalk {
            path: path.to_owned(),
            tokens: tokenize(path),
            current: self.current,
            hops: 0,
            follow_last,
        })
    }

    /// Consumes tokens until the path is resolved or an entry is missing.
    pub fn advance(&self, walk: &mut PathWalk, max_hops: usize) -> Result<Step> {
        while let Some(token) = walk.tokens.pop_front() {
            let last = walk.tokens.is_empty();

            match token.as_str() {
                CURRENT => {}
                PARENT => {
                    if let Some(parent) = self.get(walk.current)?.parent {
                        walk.current = parent;
                    }
                }
                HOME => walk.current = ROOT_NODE,
                name => {
                    let Some(child) = self.lookup(walk.current, name)? else {
                        return Ok(Step::Missing {
                            directory: walk.current,
                            name: name.to_owned(),
                            last,
                        });
                    };

                    let descriptor = self.get(child)?;
                    match descriptor.kind() {
                        DescriptorKind::Symlink if !last || walk.follow_last => {
                            walk.hops += 1;
                            if walk.hops > max_hops {
                                return Err(FsError::TooManyRedirections(walk.path.clone()));
                            }

                            let target = descriptor.symlink_target().unwrap_or_default();
                            if target.starts_with(SEPARATOR) {
                                return Err(FsError::InvalidPath(target.to_owned()));
                            }

                            // the target replaces the link, relative to the link's directory
                            for target_token in tokenize(target).into_iter().rev() {
                                walk.tokens.push_front(target_token);
                            }
                        }
                        DescriptorKind::Directory => walk.current = child,
                        _ if last => walk.current = child,
                        _ => {
                            return Err(FsError::WrongKind(format!(
                                "{name} is not a directory (in {})",
                                walk.path
                            )))
                        }
                    }
                }
            }
        }

        Ok(Step::Resolved(walk.current))
    }

    /// Resolves `path` to an existing descriptor.
    pub fn resolve(&self, path: &str, follow_last: bool, max_hops: usize) -> Result<NodeId> {
        let mut walk = self.walk(path, follow_last)?;

        match self.advance(&mut walk, max_hops)? {
            Step::Resolved(node) => Ok(node),
            Step::Missing { .. } => Err(FsError::NotFound(path.to_owned())),
        }
    }

    /// Resolves the directory part of `path` and returns it with the final name.
    pub fn resolve_parent<'p>(&self, path: &'p str, max_hops: usize) -> Result<(NodeId, &'p str)> {
        let (parent_path, leaf) = split_path(path)?;
        let parent = self.resolve(parent_path, true, max_hops)?;

        if !self.get(parent)?.is_directory() {
            return Err(FsError::WrongKind(format!("{parent_path} is not a directory")));
        }

        Ok((parent, leaf))
    }
}

/// Splits `path` into the part before the last separator and the part after it.
pub fn split_path(path: &str) -> Result<(&str, &str)> {
    if path.starts_with(SEPARATOR) {
        return Err(FsError::InvalidPath(path.to_owned()));
    }

    Ok(path.rsplit_once(SEPARATOR).unwrap_or(("", path)))
}

// empty tokens, from doubled or trailing separators, are ignored
fn tokenize(path: &str) -> VecDeque<String> {
    path.split(SEPARATOR)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOPS: usize = 8;

    fn name(name: &str) -> EntryName {
        EntryName::new(name, 10).unwrap()
    }

    fn add(tree: &mut DirectoryTree, parent: NodeId, entry: &str, descriptor: Descriptor) -> NodeId {
        let node = tree.insert(descriptor);
        tree.attach(parent, self::name(entry), node).unwrap();
        node
    }

    /// ~/a/f, ~/a/b/, ~/s -> a
    fn sample_tree() -> (DirectoryTree, NodeId, NodeId, NodeId) {
        let mut tree = DirectoryTree::new();
        let a = add(&mut tree, ROOT_NODE, "a", Descriptor::directory(None));
        let f = add(&mut tree, a, "f", Descriptor::file(vec![0], a));
        let b = add(&mut tree, a, "b", Descriptor::directory(None));
        add(&mut tree, ROOT_NODE, "s", Descriptor::symlink("a", ROOT_NODE));

        (tree, a, f, b)
    }

    mod resolve {
        use super::*;

        #[test]
        fn test_relative_path() {
            let (tree, a, f, b) = sample_tree();

            assert_eq!(tree.resolve("a", true, HOPS).unwrap(), a);
            assert_eq!(tree.resolve("a/f", true, HOPS).unwrap(), f);
            assert_eq!(tree.resolve("a/b", true, HOPS).unwrap(), b);
        }

        #[test]
        fn test_empty_path_is_current_directory() {
            let (tree, ..) = sample_tree();
            assert_eq!(tree.resolve("", true, HOPS).unwrap(), ROOT_NODE);
        }

        #[test]
        fn test_dot_and_dot_dot() {
            let (tree, a, f, _) = sample_tree();

            assert_eq!(tree.resolve("./a/./f", true, HOPS).unwrap(), f);
            assert_eq!(tree.resolve("a/b/..", true, HOPS).unwrap(), a);
            assert_eq!(tree.resolve("a/b/../../a/f", true, HOPS).unwrap(), f);
        }

        #[test]
        fn test_dot_dot_at_root_stays() {
            let (tree, a, ..) = sample_tree();
            assert_eq!(tree.resolve("../../a", true, HOPS).unwrap(), a);
        }

        #[test]
        fn test_home_prefix() {
            let (mut tree, a, f, b) = sample_tree();
            tree.set_current(b).unwrap();

            assert_eq!(tree.resolve("~/a/f", true, HOPS).unwrap(), f);
            assert_eq!(tree.resolve("~", true, HOPS).unwrap(), ROOT_NODE);
            assert_eq!(tree.resolve("..", true, HOPS).unwrap(), a);
            assert_eq!(tree.resolve("../f", true, HOPS).unwrap(), f);
        }

        #[test]
        fn test_home_mid_path() {
            let (tree, _, f, _) = sample_tree();
            assert_eq!(tree.resolve("a/b/~/a/f", true, HOPS).unwrap(), f);
        }

        #[test]
        fn test_bare_slash_rejected() {
            let (tree, ..) = sample_tree();
            assert!(matches!(
                tree.resolve("/a", true, HOPS),
                Err(FsError::InvalidPath(_))
            ));
        }

        #[test]
        fn test_doubled_and_trailing_separators() {
            let (tree, a, f, _) = sample_tree();

            assert_eq!(tree.resolve("a//f", true, HOPS).unwrap(), f);
            assert_eq!(tree.resolve("a/", true, HOPS).unwrap(), a);
        }

        #[test]
        fn test_missing_entry() {
            let (tree, ..) = sample_tree();

            assert!(matches!(
                tree.resolve("a/nope", true, HOPS),
                Err(FsError::NotFound(_))
            ));
            assert!(matches!(
                tree.resolve("nope/f", true, HOPS),
                Err(FsError::NotFound(_))
            ));
        }

        #[test]
        fn test_file_in_the_middle() {
            let (tree, ..) = sample_tree();
            assert!(matches!(
                tree.resolve("a/f/x", true, HOPS),
                Err(FsError::WrongKind(_))
            ));
        }
    }

    mod symlinks {
        use super::*;

        #[test]
        fn test_symlink_in_the_middle() {
            let (tree, _, f, _) = sample_tree();
            assert_eq!(
                tree.resolve("s/f", true, HOPS).unwrap(),
                tree.resolve("a/f", true, HOPS).unwrap()
            );
            assert_eq!(tree.resolve("s/f", false, HOPS).unwrap(), f);
        }

        #[test]
        fn test_symlink_last_followed() {
            let (tree, a, ..) = sample_tree();
            assert_eq!(tree.resolve("s", true, HOPS).unwrap(), a);
        }

        #[test]
        fn test_symlink_last_not_followed() {
            let (tree, ..) = sample_tree();
            let link = tree.resolve("s", false, HOPS).unwrap();

            assert_eq!(tree.get(link).unwrap().kind(), DescriptorKind::Symlink);
        }

        #[test]
        fn test_target_relative_to_link_directory() {
            let (mut tree, a, _, b) = sample_tree();
            // ~/a/b/up -> ..
            add(&mut tree, b, "up", Descriptor::symlink("..", b));

            assert_eq!(tree.resolve("a/b/up", true, HOPS).unwrap(), a);
        }

        #[test]
        fn test_target_with_home() {
            let (mut tree, _, f, b) = sample_tree();
            add(&mut tree, b, "abs", Descriptor::symlink("~/a/f", b));

            assert_eq!(tree.resolve("a/b/abs", true, HOPS).unwrap(), f);
        }

        #[test]
        fn test_chain_of_symlinks() {
            let (mut tree, _, f, _) = sample_tree();
            add(&mut tree, ROOT_NODE, "t", Descriptor::symlink("s", ROOT_NODE));

            assert_eq!(tree.resolve("t/f", true, HOPS).unwrap(), f);
        }

        #[test]
        fn test_cycle() {
            let (mut tree, ..) = sample_tree();
            add(&mut tree, ROOT_NODE, "x", Descriptor::symlink("y", ROOT_NODE));
            add(&mut tree, ROOT_NODE, "y", Descriptor::symlink("x", ROOT_NODE));

            assert!(matches!(
                tree.resolve("x", true, HOPS),
                Err(FsError::TooManyRedirections(_))
            ));
            assert!(matches!(
                tree.resolve("x/f", true, HOPS),
                Err(FsError::TooManyRedirections(_))
            ));
        }

        #[test]
        fn test_dangling_symlink() {
            let (mut tree, ..) = sample_tree();
            add(&mut tree, ROOT_NODE, "d", Descriptor::symlink("gone", ROOT_NODE));

            assert!(matches!(
                tree.resolve("d", true, HOPS),
                Err(FsError::NotFound(_))
            ));
        }
    }

    mod walk {
        use super::*;

        #[test]
        fn test_missing_steps() {
            let (tree, a, ..) = sample_tree();
            let mut walk = tree.walk("a/x/y", false).unwrap();

            assert_eq!(
                tree.advance(&mut walk, HOPS).unwrap(),
                Step::Missing {
                    directory: a,
                    name: "x".to_owned(),
                    last: false
                }
            );
        }

        #[test]
        fn test_enter_continues() {
            let (mut tree, a, ..) = sample_tree();
            let mut walk = tree.walk("a/x", false).unwrap();

            let Step::Missing { name, last, .. } = tree.advance(&mut walk, HOPS).unwrap() else {
                panic!("x does not exist yet");
            };
            assert!(last);

            let x = add(&mut tree, a, &name, Descriptor::directory(None));
            walk.enter(x);
            assert_eq!(tree.advance(&mut walk, HOPS).unwrap(), Step::Resolved(x));
        }
    }

    mod entries {
        use super::*;

        #[test]
        fn test_attach_counts_links() {
            let (mut tree, a, f, _) = sample_tree();
            tree.attach(a, name("g"), f).unwrap();

            assert_eq!(tree.get(f).unwrap().nlink, 2);
            assert_eq!(tree.resolve("a/g", true, HOPS).unwrap(), f);
        }

        #[test]
        fn test_attach_link_count_overflow() {
            let (mut tree, a, f, _) = sample_tree();
            tree.get_mut(f).unwrap().nlink = u16::MAX;

            assert!(matches!(
                tree.attach(a, name("g"), f),
                Err(FsError::CapacityExceeded(_))
            ));
            assert_eq!(tree.get(f).unwrap().nlink, u16::MAX);
            assert_eq!(tree.lookup(a, "g").unwrap(), None);
        }

        #[test]
        fn test_attach_duplicate() {
            let (mut tree, a, f, _) = sample_tree();

            assert!(matches!(
                tree.attach(a, name("f"), f),
                Err(FsError::AlreadyExists(_))
            ));
            assert_eq!(tree.get(f).unwrap().nlink, 1);
        }

        #[test]
        fn test_detach_last_link_clears_parent() {
            let (mut tree, a, f, _) = sample_tree();

            assert_eq!(tree.detach(a, "f").unwrap(), f);
            let descriptor = tree.get(f).unwrap();
            assert_eq!(descriptor.nlink, 0);
            assert_eq!(descriptor.parent, None);
        }

        #[test]
        fn test_detach_missing() {
            let (mut tree, a, ..) = sample_tree();
            assert!(matches!(tree.detach(a, "zzz"), Err(FsError::NotFound(_))));
        }

        #[test]
        fn test_insert_reuses_slots() {
            let (mut tree, a, f, _) = sample_tree();
            tree.detach(a, "f").unwrap();
            tree.remove(f);

            let g = tree.insert(Descriptor::file(vec![], a));
            assert_eq!(g, f);
        }

        #[test]
        fn test_root_is_not_removable() {
            let mut tree = DirectoryTree::new();
            assert!(tree.remove(ROOT_NODE).is_none());
            assert!(tree.get(ROOT_NODE).is_ok());
        }

        #[test]
        fn test_path_of() {
            let (tree, a, f, b) = sample_tree();

            assert_eq!(tree.path_of(ROOT_NODE), "~");
            assert_eq!(tree.path_of(a), "~/a");
            assert_eq!(tree.path_of(f), "~/a/f");
            assert_eq!(tree.path_of(b), "~/a/b");
        }

        #[test]
        fn test_split_path() {
            assert_eq!(split_path("a/b/c").unwrap(), ("a/b", "c"));
            assert_eq!(split_path("c").unwrap(), ("", "c"));
            assert_eq!(split_path("~/c").unwrap(), ("~", "c"));
            assert!(split_path("/c").is_err());
        }

        #[test]
        fn test_set_current_requires_directory() {
            let (mut tree, _, f, _) = sample_tree();
            assert!(matches!(tree.set_current(f), Err(FsError::WrongKind(_))));
            assert_eq!(tree.current(), ROOT_NODE);
        }
    }
}
