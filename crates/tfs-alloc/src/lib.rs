#![forbid(unsafe_code)]
//! Inode and block allocation.
//!
//! ## Design
//!
//! The allocator is layered:
//!
//! 1. **Bitmap**: raw bit manipulation on free-map byte slices.
//! 2. **FreeMap**: one on-disk bitmap region with a slot count, read and
//!    written through any [`BlockDevice`].
//!
//! Allocation is deterministic: the lowest clear bit wins. A `1` bit means
//! the slot is in use; bits at or beyond the slot count stay `0`.

use tfs_block::{BlockBuf, BlockDevice};
use tfs_error::{Result, TfsError};
use tfs_ondisk::{Geometry, Region};
use tfs_types::{BITS_PER_BLOCK, BLOCK_SIZE_BYTES, BlockNumber};

// ── Bitmap operations ───────────────────────────────────────────────────────

/// Get bit `idx` from a bitmap byte slice.
#[must_use]
pub fn bitmap_get(bitmap: &[u8], idx: u32) -> bool {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx >= bitmap.len() {
        return false;
    }
    (bitmap[byte_idx] >> bit_idx) & 1 == 1
}

/// Set bit `idx` in a bitmap byte slice.
pub fn bitmap_set(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] |= 1 << bit_idx;
    }
}

/// Clear bit `idx` in a bitmap byte slice.
pub fn bitmap_clear(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] &= !(1 << bit_idx);
    }
}

/// Count free (zero) bits in the first `count` bits of `bitmap`.
#[must_use]
pub fn bitmap_count_free(bitmap: &[u8], count: u32) -> u32 {
    let full_bytes = (count / 8) as usize;
    let remainder = count % 8;

    let mut free: u32 = bitmap.iter().take(full_bytes).map(|b| b.count_zeros()).sum();
    if remainder > 0 && full_bytes < bitmap.len() {
        let mask = (1_u8 << remainder) - 1;
        free += (!bitmap[full_bytes] & mask).count_ones();
    }
    free
}

/// Find the first free (zero) bit in the first `count` bits of `bitmap`,
/// starting from `start`. Fully used bytes are skipped whole.
#[must_use]
pub fn bitmap_find_free(bitmap: &[u8], count: u32, start: u32) -> Option<u32> {
    let mut idx = start;
    while idx < count {
        let byte_idx = (idx / 8) as usize;
        if idx % 8 == 0 && bitmap.get(byte_idx) == Some(&0xFF) {
            idx += 8;
            continue;
        }
        if !bitmap_get(bitmap, idx) {
            return Some(idx);
        }
        idx += 1;
    }
    None
}

/// True when no bit at or beyond `count` is set.
#[must_use]
pub fn bitmap_padding_clear(bitmap: &[u8], count: u32) -> bool {
    let total = u32::try_from(bitmap.len().saturating_mul(8)).unwrap_or(u32::MAX);
    (count..total).all(|idx| !bitmap_get(bitmap, idx))
}

// ── On-disk free maps ───────────────────────────────────────────────────────

/// One free-map region: `slots` bits packed into `region.blocks` blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeMap {
    region: Region,
    slots: u32,
    what: &'static str,
}

impl FreeMap {
    #[must_use]
    pub fn new(region: Region, slots: u32, what: &'static str) -> Self {
        Self {
            region,
            slots,
            what,
        }
    }

    /// The inode free map; bit `i` is inode `i`.
    #[must_use]
    pub fn inodes(geo: &Geometry) -> Self {
        Self::new(geo.inode_map, geo.inode_count, "inode")
    }

    /// The block free map; bit `i` is data block `data.start + i`.
    #[must_use]
    pub fn blocks(geo: &Geometry) -> Self {
        Self::new(geo.block_map, geo.data.blocks, "block")
    }

    #[must_use]
    pub fn slots(&self) -> u32 {
        self.slots
    }

    #[must_use]
    pub fn region(&self) -> Region {
        self.region
    }

    /// Map block and bit offset within that block for `slot`.
    fn locate(&self, slot: u32) -> Result<(BlockNumber, u32)> {
        if slot >= self.slots {
            return Err(TfsError::Corruption {
                block: u64::from(self.region.start),
                detail: format!("{} slot {slot} beyond {} slots", self.what, self.slots),
            });
        }
        let block = u64::from(self.region.start) + u64::from(slot / BITS_PER_BLOCK);
        Ok((BlockNumber(block), slot % BITS_PER_BLOCK))
    }

    /// Write an all-free map.
    pub fn reset(&self, dev: &dyn BlockDevice) -> Result<()> {
        let zero = [0_u8; BLOCK_SIZE_BYTES];
        for block in self.region.iter() {
            dev.write_block(block, &zero)?;
        }
        Ok(())
    }

    /// Concatenated bytes of every map block.
    pub fn load(&self, dev: &dyn BlockDevice) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.region.blocks as usize * BLOCK_SIZE_BYTES);
        for block in self.region.iter() {
            out.extend_from_slice(dev.read_block(block)?.as_slice());
        }
        Ok(out)
    }

    pub fn is_set(&self, dev: &dyn BlockDevice, slot: u32) -> Result<bool> {
        let (block, bit) = self.locate(slot)?;
        Ok(bitmap_get(dev.read_block(block)?.as_slice(), bit))
    }

    #[must_use]
    pub fn count_in_use(&self, bitmap: &[u8]) -> u32 {
        self.slots - bitmap_count_free(bitmap, self.slots)
    }

    /// Claim the lowest free slot, or `None` if the map is full.
    pub fn allocate(&self, dev: &dyn BlockDevice) -> Result<Option<u32>> {
        let bitmap = self.load(dev)?;
        let Some(slot) = bitmap_find_free(&bitmap, self.slots, 0) else {
            return Ok(None);
        };
        self.update(dev, slot, true)?;
        Ok(Some(slot))
    }

    /// Mark a specific slot in use. The slot must currently be free.
    pub fn claim(&self, dev: &dyn BlockDevice, slot: u32) -> Result<()> {
        self.update(dev, slot, true)
    }

    /// Return a slot to the free pool. The slot must currently be in use.
    pub fn release(&self, dev: &dyn BlockDevice, slot: u32) -> Result<()> {
        self.update(dev, slot, false)
    }

    fn update(&self, dev: &dyn BlockDevice, slot: u32, in_use: bool) -> Result<()> {
        let (block, bit) = self.locate(slot)?;
        let mut buf: BlockBuf = dev.read_block(block)?;
        if bitmap_get(buf.as_slice(), bit) == in_use {
            return Err(TfsError::Corruption {
                block: block.0,
                detail: format!(
                    "{} slot {slot} already {}",
                    self.what,
                    if in_use { "in use" } else { "free" }
                ),
            });
        }
        if in_use {
            bitmap_set(buf.as_mut_slice(), bit);
        } else {
            bitmap_clear(buf.as_mut_slice(), bit);
        }
        dev.write_block(block, buf.as_slice())
    }
}
