//! Image layout derived from the format options.
//!
//! ```text
//! | sb | inode map | block map | csum table | inode table | data ... | jhdr | jpayload x N |
//! ```
//!
//! Every region is block-aligned. Only `total_blocks` and `inode_count` are
//! free parameters; everything else follows from them.

use serde::{Deserialize, Serialize};
use tfs_types::{
    BITS_PER_BLOCK, BLOCK_SIZE, BlockNumber, CSUM_SIZE, CSUMS_PER_BLOCK, INODE_SIZE,
    INODES_PER_BLOCK, InodeNumber, JOURNAL_CAPACITY, ParseError,
};

/// Tunables for `make`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    pub total_blocks: u32,
    pub inode_count: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            total_blocks: 256,
            inode_count: 64,
        }
    }
}

impl FormatOptions {
    /// Image size in bytes for these options.
    #[must_use]
    pub fn image_len(&self) -> u64 {
        u64::from(self.total_blocks) * u64::from(BLOCK_SIZE)
    }

    /// Compute and validate the layout.
    pub fn geometry(&self) -> Result<Geometry, ParseError> {
        Geometry::compute(self.total_blocks, self.inode_count)
    }
}

/// A contiguous run of blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub start: u32,
    pub blocks: u32,
}

impl Region {
    #[must_use]
    pub fn end(self) -> u32 {
        self.start + self.blocks
    }

    #[must_use]
    pub fn contains(self, block: BlockNumber) -> bool {
        block.0 >= u64::from(self.start) && block.0 < u64::from(self.end())
    }

    pub fn iter(self) -> impl Iterator<Item = BlockNumber> {
        (self.start..self.end()).map(|b| BlockNumber(u64::from(b)))
    }
}

/// Block layout of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub total_blocks: u32,
    pub inode_count: u32,
    pub inode_map: Region,
    pub block_map: Region,
    pub csum_table: Region,
    pub inode_table: Region,
    pub data: Region,
    /// Header block followed by `JOURNAL_CAPACITY` payload blocks.
    pub journal: Region,
}

impl Geometry {
    pub fn compute(total_blocks: u32, inode_count: u32) -> Result<Self, ParseError> {
        if inode_count == 0 {
            return Err(ParseError::InvalidField {
                field: "inode_count",
                reason: "must be at least 1",
            });
        }
        if inode_count > BITS_PER_BLOCK {
            return Err(ParseError::InvalidField {
                field: "inode_count",
                reason: "exceeds one free-map block",
            });
        }
        if total_blocks > BITS_PER_BLOCK {
            return Err(ParseError::InvalidField {
                field: "total_blocks",
                reason: "exceeds one free-map block",
            });
        }

        let inode_map = Region { start: 1, blocks: 1 };
        let block_map = Region {
            start: inode_map.end(),
            blocks: 1,
        };
        let csum_table = Region {
            start: block_map.end(),
            blocks: total_blocks.div_ceil(CSUMS_PER_BLOCK),
        };
        let inode_table = Region {
            start: csum_table.end(),
            blocks: inode_count.div_ceil(INODES_PER_BLOCK),
        };
        let journal_blocks = JOURNAL_CAPACITY + 1;
        let reserved = inode_table.end() + journal_blocks;
        if total_blocks <= reserved {
            return Err(ParseError::InvalidField {
                field: "total_blocks",
                reason: "no room for a data block",
            });
        }
        let data = Region {
            start: inode_table.end(),
            blocks: total_blocks - reserved,
        };
        let journal = Region {
            start: data.end(),
            blocks: journal_blocks,
        };

        Ok(Self {
            total_blocks,
            inode_count,
            inode_map,
            block_map,
            csum_table,
            inode_table,
            data,
            journal,
        })
    }

    /// Absolute block number of data slot `index`.
    #[must_use]
    pub fn data_block(&self, index: u32) -> BlockNumber {
        BlockNumber(u64::from(self.data.start) + u64::from(index))
    }

    /// Data slot of an absolute block, if it is inside the data region.
    #[must_use]
    pub fn data_index(&self, block: BlockNumber) -> Option<u32> {
        if self.data.contains(block) {
            u32::try_from(block.0 - u64::from(self.data.start)).ok()
        } else {
            None
        }
    }

    /// Inode-table block and byte offset holding `ino`.
    #[must_use]
    pub fn inode_location(&self, ino: InodeNumber) -> (BlockNumber, usize) {
        let block = self.inode_table.start + ino.0 / INODES_PER_BLOCK;
        let offset = (ino.0 % INODES_PER_BLOCK) as usize * INODE_SIZE;
        (BlockNumber(u64::from(block)), offset)
    }

    /// Checksum-table block and byte offset holding the digest of `block`.
    #[must_use]
    pub fn csum_location(&self, block: BlockNumber) -> (BlockNumber, usize) {
        let table_block = u64::from(self.csum_table.start) + block.0 / u64::from(CSUMS_PER_BLOCK);
        let offset = usize::try_from(block.0 % u64::from(CSUMS_PER_BLOCK)).unwrap_or(0) * CSUM_SIZE;
        (BlockNumber(table_block), offset)
    }

    /// Metadata blocks whose checksums are always maintained.
    pub fn protected_metadata(&self) -> impl Iterator<Item = BlockNumber> {
        self.inode_map
            .iter()
            .chain(self.block_map.iter())
            .chain(self.inode_table.iter())
    }

    #[must_use]
    pub fn is_protected_metadata(&self, block: BlockNumber) -> bool {
        self.inode_map.contains(block)
            || self.block_map.contains(block)
            || self.inode_table.contains(block)
    }

    #[must_use]
    pub fn journal_header(&self) -> BlockNumber {
        BlockNumber(u64::from(self.journal.start))
    }

    #[must_use]
    pub fn journal_payload(&self, slot: u32) -> BlockNumber {
        BlockNumber(u64::from(self.journal.start) + 1 + u64::from(slot))
    }

    #[must_use]
    pub fn journal_capacity(&self) -> u32 {
        self.journal.blocks - 1
    }
}
