use crate::geometry::{Geometry, Region};
use serde::{Deserialize, Serialize};
use tfs_types::{
    BLOCK_SIZE, BLOCK_SIZE_BYTES, ParseError, TFS_MAGIC, TFS_VERSION, read_le_u32, write_le_u32,
};

const OFF_MAGIC: usize = 0x00;
const OFF_VERSION: usize = 0x04;
const OFF_BLOCK_SIZE: usize = 0x08;
const OFF_TOTAL_BLOCKS: usize = 0x0C;
const OFF_INODE_COUNT: usize = 0x10;
/// Six `(start, blocks)` pairs in layout order.
const OFF_REGIONS: usize = 0x14;
const OFF_CHECKSUM: usize = OFF_REGIONS + 6 * 8;

/// Block 0. Written once by `make` and never modified afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub version: u32,
    pub block_size: u32,
    pub geometry: Geometry,
}

impl Superblock {
    #[must_use]
    pub fn new(geometry: Geometry) -> Self {
        Self {
            version: TFS_VERSION,
            block_size: BLOCK_SIZE,
            geometry,
        }
    }

    fn regions(geometry: &Geometry) -> [Region; 6] {
        [
            geometry.inode_map,
            geometry.block_map,
            geometry.csum_table,
            geometry.inode_table,
            geometry.data,
            geometry.journal,
        ]
    }

    /// Serialize to a full block; the CRC32C covers every byte before it.
    pub fn to_block(&self) -> Result<Vec<u8>, ParseError> {
        let mut block = vec![0_u8; BLOCK_SIZE_BYTES];
        write_le_u32(&mut block, OFF_MAGIC, TFS_MAGIC)?;
        write_le_u32(&mut block, OFF_VERSION, self.version)?;
        write_le_u32(&mut block, OFF_BLOCK_SIZE, self.block_size)?;
        write_le_u32(&mut block, OFF_TOTAL_BLOCKS, self.geometry.total_blocks)?;
        write_le_u32(&mut block, OFF_INODE_COUNT, self.geometry.inode_count)?;
        for (i, region) in Self::regions(&self.geometry).iter().enumerate() {
            write_le_u32(&mut block, OFF_REGIONS + i * 8, region.start)?;
            write_le_u32(&mut block, OFF_REGIONS + i * 8 + 4, region.blocks)?;
        }
        let crc = crc32c::crc32c(&block[..OFF_CHECKSUM]);
        write_le_u32(&mut block, OFF_CHECKSUM, crc)?;
        Ok(block)
    }

    /// Parse and validate block 0.
    ///
    /// The stored regions must be exactly those computed from the stored
    /// `total_blocks` and `inode_count`; anything else is a layout this
    /// version does not write.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u32(bytes, OFF_MAGIC)?;
        if magic != TFS_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(TFS_MAGIC),
                actual: u64::from(magic),
            });
        }

        let stored = read_le_u32(bytes, OFF_CHECKSUM)?;
        let computed = crc32c::crc32c(&bytes[..OFF_CHECKSUM]);
        if stored != computed {
            return Err(ParseError::ChecksumMismatch {
                field: "superblock",
                expected: stored,
                actual: computed,
            });
        }

        let version = read_le_u32(bytes, OFF_VERSION)?;
        if version != TFS_VERSION {
            return Err(ParseError::InvalidField {
                field: "version",
                reason: "unsupported version",
            });
        }
        let block_size = read_le_u32(bytes, OFF_BLOCK_SIZE)?;
        if block_size != BLOCK_SIZE {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "unsupported block size",
            });
        }

        let geometry = Geometry::compute(
            read_le_u32(bytes, OFF_TOTAL_BLOCKS)?,
            read_le_u32(bytes, OFF_INODE_COUNT)?,
        )?;
        for (i, expected) in Self::regions(&geometry).iter().enumerate() {
            let start = read_le_u32(bytes, OFF_REGIONS + i * 8)?;
            let blocks = read_le_u32(bytes, OFF_REGIONS + i * 8 + 4)?;
            if start != expected.start || blocks != expected.blocks {
                return Err(ParseError::InvalidField {
                    field: "region",
                    reason: "layout does not match geometry",
                });
            }
        }

        Ok(Self {
            version,
            block_size,
            geometry,
        })
    }
}
