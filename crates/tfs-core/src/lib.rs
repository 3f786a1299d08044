#![forbid(unsafe_code)]
//! The TestFS engine.
//!
//! A [`Filesystem`] owns a block device and the geometry parsed from its
//! superblock, and nothing else: every operation reads the metadata it needs
//! from the device, so a handle opened on the same bytes sees exactly what is
//! on storage.
//!
//! # Lifecycle
//!
//! | Step | Call | Writes |
//! |------|------|--------|
//! | 1 | [`Filesystem::make`] | superblock, clear journal header |
//! | 2 | [`Filesystem::build_inode_freemap`] | inode free map |
//! | 3 | [`Filesystem::build_block_freemap`] | block free map |
//! | 4 | [`Filesystem::build_checksum_table`] | checksum table |
//! | 5 | [`Filesystem::build_inode_table`] | inode table and its checksums |
//! | 6 | [`Filesystem::make_root_directory`] | inode 0, journaled |
//!
//! [`Filesystem::format`] runs all six. [`Filesystem::open`] validates the
//! superblock and replays or discards the journal.
//!
//! # Atomicity
//!
//! Every mutating operation runs against a [`Transaction`]; checksum slots of
//! the metadata it touched are added, then the image set is committed through
//! the redo journal. An operation that fails leaves storage untouched.

pub mod check;
pub mod csum;
pub mod data;
mod ops;

pub use check::CheckReport;
pub use ops::{Stat, TreeEntry};
pub use tfs_journal::RecoveryOutcome;
pub use tfs_ondisk::{DirEntry, FormatOptions, Geometry, Superblock};

use parking_lot::Mutex;
use tfs_alloc::FreeMap;
use tfs_block::BlockDevice;
use tfs_error::{Result, TfsError};
use tfs_inode::InodeStore;
use tfs_journal::{Journal, Transaction};
use tfs_types::{BLOCK_SIZE, BLOCK_SIZE_BYTES, BlockNumber, FileKind, InodeNumber, ParseError};
use tracing::{debug, info};

/// Convert a `ParseError` met during a live operation.
pub(crate) fn parse_to_tfs_error(block: BlockNumber, e: &ParseError) -> TfsError {
    TfsError::Corruption {
        block: block.0,
        detail: e.to_string(),
    }
}

/// Convert an open-time `ParseError` from the superblock.
fn parse_error_to_mount(e: &ParseError) -> TfsError {
    TfsError::CorruptSuperblock(e.to_string())
}

/// An open TestFS image.
pub struct Filesystem {
    dev: Box<dyn BlockDevice>,
    sb: Superblock,
    geo: Geometry,
    inodes: InodeStore,
    journal: Mutex<Journal>,
}

impl std::fmt::Debug for Filesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filesystem")
            .field("geometry", &self.geo)
            .finish_non_exhaustive()
    }
}

impl Filesystem {
    fn from_parts(dev: Box<dyn BlockDevice>, sb: Superblock) -> Self {
        let geo = sb.geometry;
        Self {
            dev,
            sb,
            geo,
            inodes: InodeStore::new(&geo),
            journal: Mutex::new(Journal::new(&geo)),
        }
    }

    fn check_device(dev: &dyn BlockDevice, geo: &Geometry) -> std::result::Result<(), String> {
        if dev.block_size() != BLOCK_SIZE {
            return Err(format!(
                "device block size {} is not {BLOCK_SIZE}",
                dev.block_size()
            ));
        }
        if dev.block_count() < u64::from(geo.total_blocks) {
            return Err(format!(
                "device holds {} blocks, layout needs {}",
                dev.block_count(),
                geo.total_blocks
            ));
        }
        Ok(())
    }

    /// Validate the layout against the device and write the superblock.
    ///
    /// The remaining regions are initialized by the `build_*` phases.
    pub fn make(dev: Box<dyn BlockDevice>, opts: &FormatOptions) -> Result<Self> {
        let geo = opts
            .geometry()
            .map_err(|e| TfsError::Format(e.to_string()))?;
        Self::check_device(dev.as_ref(), &geo).map_err(TfsError::Format)?;

        let sb = Superblock::new(geo);
        let block = sb
            .to_block()
            .map_err(|e| TfsError::Format(e.to_string()))?;
        dev.write_block(BlockNumber(0), &block)?;
        let fs = Self::from_parts(dev, sb);
        fs.journal.lock().clear(fs.dev.as_ref())?;

        info!(
            target: "tfs::core",
            total_blocks = geo.total_blocks,
            inode_count = geo.inode_count,
            data_blocks = geo.data.blocks,
            "make_superblock"
        );
        Ok(fs)
    }

    pub fn build_inode_freemap(&self) -> Result<()> {
        self.inodes.free_map().reset(self.dev.as_ref())?;
        info!(target: "tfs::core", "build_inode_freemap");
        Ok(())
    }

    pub fn build_block_freemap(&self) -> Result<()> {
        FreeMap::blocks(&self.geo).reset(self.dev.as_ref())?;
        info!(target: "tfs::core", "build_block_freemap");
        Ok(())
    }

    /// Write the checksum table: zero everywhere except the free-map blocks,
    /// which get the digest of their current content.
    pub fn build_checksum_table(&self) -> Result<()> {
        let dev = self.dev.as_ref();
        let zero = [0_u8; BLOCK_SIZE_BYTES];
        for block in self.geo.csum_table.iter() {
            dev.write_block(block, &zero)?;
        }
        for block in self.geo.inode_map.iter().chain(self.geo.block_map.iter()) {
            let content = dev.read_block(block)?;
            csum::set(dev, &self.geo, block, content.as_slice())?;
        }
        info!(target: "tfs::core", "build_checksum_table");
        Ok(())
    }

    /// Zero the inode table and record the checksums of its blocks.
    pub fn build_inode_table(&self) -> Result<()> {
        let dev = self.dev.as_ref();
        self.inodes.reset(dev)?;
        let zero = [0_u8; BLOCK_SIZE_BYTES];
        for block in self.geo.inode_table.iter() {
            csum::set(dev, &self.geo, block, &zero)?;
        }
        info!(target: "tfs::core", "build_inode_table");
        Ok(())
    }

    /// Allocate inode 0 as an empty directory.
    pub fn make_root_directory(&self) -> Result<()> {
        self.transact("make_root_directory", |txn| {
            self.inodes
                .allocate_at(txn, InodeNumber::ROOT, FileKind::Directory)
        })?;
        info!(target: "tfs::core", "make_root_directory");
        Ok(())
    }

    /// Run every format phase in order.
    pub fn format(dev: Box<dyn BlockDevice>, opts: &FormatOptions) -> Result<Self> {
        let fs = Self::make(dev, opts)?;
        fs.build_inode_freemap()?;
        fs.build_block_freemap()?;
        fs.build_checksum_table()?;
        fs.build_inode_table()?;
        fs.make_root_directory()?;
        Ok(fs)
    }

    /// Open an existing image, recovering any committed transaction.
    pub fn open(dev: Box<dyn BlockDevice>) -> Result<Self> {
        let raw = dev.read_block(BlockNumber(0))?;
        let sb = Superblock::parse_from_bytes(raw.as_slice()).map_err(|e| parse_error_to_mount(&e))?;
        Self::check_device(dev.as_ref(), &sb.geometry).map_err(TfsError::CorruptSuperblock)?;

        let fs = Self::from_parts(dev, sb);
        let outcome = fs.journal.lock().recover(fs.dev.as_ref())?;
        info!(
            target: "tfs::core",
            total_blocks = fs.geo.total_blocks,
            inode_count = fs.geo.inode_count,
            recovery = ?outcome,
            "open"
        );
        Ok(fs)
    }

    /// Release the handle. Every operation is already durable when it
    /// returns, so there is nothing to flush.
    pub fn close(self) {
        info!(target: "tfs::core", "close");
    }

    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    /// Run `body` against a fresh transaction and commit what it staged.
    ///
    /// On error nothing is committed.
    fn transact<T>(&self, op: &'static str, body: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let dev = self.dev.as_ref();
        let txn = Transaction::new(dev);
        let value = body(&txn)?;
        csum::seal(&txn, &self.geo)?;
        let writes = txn.into_writes();
        self.journal.lock().commit(dev, &writes)?;
        debug!(
            target: "tfs::core",
            op,
            blocks = writes.len(),
            "transaction_committed"
        );
        Ok(value)
    }
}
