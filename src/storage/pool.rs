use bitvec::vec::BitVec;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{FsError, Result};
use crate::layout::block::{Block, BlockNumber, EMPTY_BLOCK};

/// A fixed number of blocks, each either free or allocated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPool {
    /// Tracks the allocation status of blocks.
    /// A value of `true` represents "occupied".
    bitmap: BitVec,
    blocks: Vec<Block>,
}

impl BlockPool {
    /// A pool of `num_blocks` free, zero-valued blocks.
    #[must_use]
    pub fn new(num_blocks: usize) -> Self {
        let mut bitmap = BitVec::new();
        bitmap.resize(num_blocks, false);

        Self {
            bitmap,
            blocks: vec![EMPTY_BLOCK; num_blocks],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn num_free(&self) -> usize {
        self.bitmap.count_zeros()
    }

    #[must_use]
    pub fn is_allocated(&self, block_number: BlockNumber) -> bool {
        self.bitmap
            .get(block_number)
            .map(|bit| *bit)
            .unwrap_or(false)
    }

    /// Block numbers of every allocated block, in ascending order.
    pub fn allocated(&self) -> impl Iterator<Item = BlockNumber> + '_ {
        self.bitmap.iter_ones()
    }

    /// Allocates the free block with the lowest number.
    pub fn allocate_one(&mut self) -> Result<BlockNumber> {
        let block_number = self.bitmap.first_zero().ok_or(FsError::Exhausted {
            requested: 1,
            available: 0,
        })?;

        self.bitmap.set(block_number, true);
        debug!("allocated block {block_number}");

        Ok(block_number)
    }

    /// Allocates `count` blocks, or none at all.
    pub fn allocate_many(&mut self, count: usize) -> Result<Vec<BlockNumber>> {
        let available = self.num_free();
        if count > available {
            return Err(FsError::Exhausted {
                requested: count,
                available,
            });
        }

        let mut allocated = Vec::with_capacity(count);
        for _ in 0..count {
            match self.allocate_one() {
                Ok(block_number) => allocated.push(block_number),
                Err(_) => {
                    for block_number in allocated {
                        self.release(block_number)?;
                    }

                    return Err(FsError::Exhausted {
                        requested: count,
                        available,
                    });
                }
            }
        }

        Ok(allocated)
    }

    /// Marks the block as free and zeroes its contents.
    pub fn release(&mut self, block_number: BlockNumber) -> Result<()> {
        self.check_bounds(block_number)?;

        self.bitmap.set(block_number, false);
        self.blocks[block_number] = EMPTY_BLOCK;
        debug!("released block {block_number}");

        Ok(())
    }

    pub fn read(&self, block_number: BlockNumber) -> Result<Block> {
        self.check_bounds(block_number)?;

        Ok(self.blocks[block_number])
    }

    pub fn write(&mut self, block_number: BlockNumber, block: Block) -> Result<()> {
        self.check_bounds(block_number)?;

        self.blocks[block_number] = block;

        Ok(())
    }

    /// Checks that the bitmap covers every block and that free blocks are zero-valued.
    pub fn check(&self) -> Result<()> {
        if self.bitmap.len() != self.blocks.len() {
            return Err(FsError::Corrupt(format!(
                "block bitmap covers {} blocks, pool holds {}",
                self.bitmap.len(),
                self.blocks.len()
            )));
        }

        if let Some(block_number) = self
            .bitmap
            .iter_zeros()
            .find(|&block_number| self.blocks[block_number] != EMPTY_BLOCK)
        {
            return Err(FsError::Corrupt(format!(
                "free block {block_number} holds data"
            )));
        }

        Ok(())
    }

    fn check_bounds(&self, block_number: BlockNumber) -> Result<()> {
        if block_number >= self.blocks.len() {
            return Err(FsError::Corrupt(format!(
                "block number out of bounds: {block_number}"
            )));
        }

        Ok(())
    }
}
