/// capacity of a block in storage units
pub const BLOCK_SIZE: usize = 8;

/// The value of a unit that has never been written since its block was allocated.
pub const ZERO_UNIT: u8 = b'0';

/// The value stored in every unit touched by a write.
pub const WRITTEN_UNIT: u8 = b'1';

const_assert!(ZERO_UNIT != WRITTEN_UNIT);
const_assert!(BLOCK_SIZE > 0);

pub type Block = [u8; BLOCK_SIZE];

/// A block with every unit zero-valued.
pub const EMPTY_BLOCK: Block = [ZERO_UNIT; BLOCK_SIZE];

// blocks are addressed by their position in the pool
pub type BlockNumber = usize;

/// Rounds `size` up to the next multiple of [`BLOCK_SIZE`].
#[must_use]
pub const fn allocated_size(size: usize) -> usize {
    size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// The number of blocks needed to hold `size` units.
#[must_use]
pub const fn blocks_for(size: usize) -> usize {
    size.div_ceil(BLOCK_SIZE)
}
