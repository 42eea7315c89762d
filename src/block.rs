/// A contiguous byte range of the input, with no regard for record boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub index: usize,
    pub offset: u64,
    pub len: usize,
}

/// Splits `len` bytes into `ceil(len / block_size)` fixed-size blocks.
#[derive(Debug, Clone, Copy)]
pub struct BlockPlan {
    len: u64,
    block_size: usize,
}

impl BlockPlan {
    pub fn new(len: u64, block_size: usize) -> Self {
        assert!(block_size > 0, "block size must be positive");
        Self { len, block_size }
    }

    pub fn block_count(&self) -> usize {
        self.len.div_ceil(self.block_size as u64) as usize
    }

    pub fn block(&self, index: usize) -> Option<BlockRange> {
        let offset = index as u64 * self.block_size as u64;
        if offset >= self.len {
            return None;
        }
        let len = (self.len - offset).min(self.block_size as u64) as usize;
        Some(BlockRange { index, offset, len })
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockRange> + '_ {
        (0..self.block_count()).filter_map(|index| self.block(index))
    }
}
