use serde::{Deserialize, Serialize};

/// The number of blocks in a freshly formatted pool.
pub const DEFAULT_NUM_BLOCKS: usize = 10;

/// The number of descriptors the registry holds, not counting the root directory.
pub const DEFAULT_MAX_DESCRIPTORS: usize = 5;

/// The maximum length of an entry name, in characters.
pub const DEFAULT_MAX_NAME_LEN: usize = 10;

/// The number of names a single file may have.
pub const DEFAULT_MAX_LINKS: u16 = 3;

/// The number of symlink substitutions allowed while resolving a single path.
pub const DEFAULT_MAX_SYMLINK_HOPS: usize = 8;

/// Limits a file system is formatted with. They are stored in the image and survive remounts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub num_blocks: usize,
    pub max_descriptors: usize,
    pub max_name_len: usize,
    pub max_links: u16,
    pub max_symlink_hops: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            num_blocks: DEFAULT_NUM_BLOCKS,
            max_descriptors: DEFAULT_MAX_DESCRIPTORS,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            max_links: DEFAULT_MAX_LINKS,
            max_symlink_hops: DEFAULT_MAX_SYMLINK_HOPS,
        }
    }
}
