//! Data-region block allocation and checksummed block I/O.

use tfs_alloc::FreeMap;
use tfs_block::{BlockBuf, BlockDevice};
use tfs_error::{Result, TfsError};
use tfs_ondisk::Geometry;
use tfs_types::BlockNumber;

use crate::csum;

/// Claim the lowest free data block, or `None` when the region is full.
pub fn allocate_block(dev: &dyn BlockDevice, geo: &Geometry) -> Result<Option<BlockNumber>> {
    Ok(FreeMap::blocks(geo)
        .allocate(dev)?
        .map(|slot| geo.data_block(slot)))
}

/// Return a data block to the free pool. Its content is left as is.
pub fn free_block(dev: &dyn BlockDevice, geo: &Geometry, block: BlockNumber) -> Result<()> {
    let slot = data_slot(geo, block)?;
    FreeMap::blocks(geo).release(dev, slot)
}

fn data_slot(geo: &Geometry, block: BlockNumber) -> Result<u32> {
    geo.data_index(block).ok_or_else(|| TfsError::Corruption {
        block: block.0,
        detail: "pointer outside the data region".to_owned(),
    })
}

/// Read a data block and check it against its checksum entry.
pub fn read_data_block_verified(
    dev: &dyn BlockDevice,
    geo: &Geometry,
    block: BlockNumber,
) -> Result<BlockBuf> {
    data_slot(geo, block)?;
    let buf = dev.read_block(block)?;
    if !csum::verify(dev, geo, block, buf.as_slice())? {
        return Err(TfsError::ChecksumMismatch { block: block.0 });
    }
    Ok(buf)
}

/// Write a data block together with its checksum entry.
pub fn write_data_block(
    dev: &dyn BlockDevice,
    geo: &Geometry,
    block: BlockNumber,
    content: &[u8],
) -> Result<()> {
    data_slot(geo, block)?;
    dev.write_block(block, content)?;
    csum::set(dev, geo, block, content)
}
