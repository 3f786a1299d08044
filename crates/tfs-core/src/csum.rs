//! Per-block checksum table.
//!
//! One little-endian CRC32C per absolute block number. Protected blocks are
//! the two free maps, the inode table and every data block a live inode
//! references. The table's own blocks, the superblock and the journal region
//! are not covered here.

use tfs_block::BlockDevice;
use tfs_error::Result;
use tfs_journal::Transaction;
use tfs_ondisk::Geometry;
use tfs_types::{BlockNumber, read_le_u32, write_le_u32};

use crate::parse_to_tfs_error;

#[must_use]
pub fn digest(content: &[u8]) -> u32 {
    crc32c::crc32c(content)
}

/// The digest currently recorded for `block`.
pub fn stored(dev: &dyn BlockDevice, geo: &Geometry, block: BlockNumber) -> Result<u32> {
    let (table_block, offset) = geo.csum_location(block);
    let buf = dev.read_block(table_block)?;
    read_le_u32(buf.as_slice(), offset).map_err(|e| parse_to_tfs_error(table_block, &e))
}

/// Record the digest of `content` as the checksum of `block`.
pub fn set(dev: &dyn BlockDevice, geo: &Geometry, block: BlockNumber, content: &[u8]) -> Result<()> {
    let (table_block, offset) = geo.csum_location(block);
    let mut buf = dev.read_block(table_block)?;
    write_le_u32(buf.as_mut_slice(), offset, digest(content))
        .map_err(|e| parse_to_tfs_error(table_block, &e))?;
    dev.write_block(table_block, buf.as_slice())
}

pub fn verify(dev: &dyn BlockDevice, geo: &Geometry, block: BlockNumber, content: &[u8]) -> Result<bool> {
    Ok(stored(dev, geo, block)? == digest(content))
}

/// Stamp checksums for every protected metadata block the transaction
/// touched. Data blocks are stamped as they are written.
pub fn seal(txn: &Transaction<'_>, geo: &Geometry) -> Result<()> {
    for block in txn.touched() {
        if geo.is_protected_metadata(block) {
            let content = txn.read_block(block)?;
            set(txn, geo, block, content.as_slice())?;
        }
    }
    Ok(())
}
