use parking_lot::Mutex;
use std::collections::BTreeMap;
use tfs_block::{BlockBuf, BlockDevice};
use tfs_error::{Result, TfsError};
use tfs_types::BlockNumber;

/// Read-your-writes overlay over a base device.
///
/// Writes are held in memory, keyed by block, last write wins. Reads return
/// the staged image if there is one and fall through to the base otherwise.
/// Nothing reaches the base until the staged set is handed to
/// [`crate::Journal::commit`]; dropping the transaction discards it.
pub struct Transaction<'a> {
    base: &'a dyn BlockDevice,
    staged: Mutex<BTreeMap<BlockNumber, Vec<u8>>>,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("staged", &self.staged.lock().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<'a> Transaction<'a> {
    #[must_use]
    pub fn new(base: &'a dyn BlockDevice) -> Self {
        Self {
            base,
            staged: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged.lock().is_empty()
    }

    /// Staged block numbers in ascending order.
    #[must_use]
    pub fn touched(&self) -> Vec<BlockNumber> {
        self.staged.lock().keys().copied().collect()
    }

    /// Consume the transaction, yielding its images in block order.
    #[must_use]
    pub fn into_writes(self) -> Vec<(BlockNumber, Vec<u8>)> {
        self.staged.into_inner().into_iter().collect()
    }
}

impl BlockDevice for Transaction<'_> {
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        if let Some(bytes) = self.staged.lock().get(&block) {
            return Ok(BlockBuf::new(bytes.clone()));
        }
        self.base.read_block(block)
    }

    fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()> {
        let expected = self.base.block_size() as usize;
        if data.len() != expected {
            return Err(TfsError::Format(format!(
                "write_block data size mismatch: got={} expected={expected}",
                data.len()
            )));
        }
        if block.0 >= self.base.block_count() {
            return Err(TfsError::Format(format!(
                "block out of range: block={} block_count={}",
                block.0,
                self.base.block_count()
            )));
        }
        self.staged.lock().insert(block, data.to_vec());
        Ok(())
    }

    fn block_size(&self) -> u32 {
        self.base.block_size()
    }

    fn block_count(&self) -> u64 {
        self.base.block_count()
    }

    /// Staged data has nowhere to go until commit.
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
