#![forbid(unsafe_code)]
//! Inode management.
//!
//! Read, write, allocate and release inode records in the inode table.
//! Allocation pairs the inode free map with the table: a slot is claimed in
//! the map and its record written in the same call, so both land in the same
//! transaction.

use tfs_alloc::FreeMap;
use tfs_block::BlockDevice;
use tfs_error::{Result, TfsError};
use tfs_ondisk::{Geometry, InodeRecord};
use tfs_types::{BLOCK_SIZE_BYTES, BlockNumber, FileKind, INODE_SIZE, InodeNumber, ParseError};

fn parse_to_tfs_error(block: BlockNumber, e: &ParseError) -> TfsError {
    TfsError::Corruption {
        block: block.0,
        detail: e.to_string(),
    }
}

/// Typed access to the inode table of one image.
#[derive(Debug, Clone, Copy)]
pub struct InodeStore {
    geo: Geometry,
    map: FreeMap,
}

impl InodeStore {
    #[must_use]
    pub fn new(geo: &Geometry) -> Self {
        Self {
            geo: *geo,
            map: FreeMap::inodes(geo),
        }
    }

    #[must_use]
    pub fn free_map(&self) -> &FreeMap {
        &self.map
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.geo.inode_count
    }

    fn check_range(&self, ino: InodeNumber) -> Result<()> {
        if ino.0 >= self.geo.inode_count {
            return Err(TfsError::Corruption {
                block: u64::from(self.geo.inode_table.start),
                detail: format!(
                    "inode {ino} beyond table of {} inodes",
                    self.geo.inode_count
                ),
            });
        }
        Ok(())
    }

    pub fn read(&self, dev: &dyn BlockDevice, ino: InodeNumber) -> Result<InodeRecord> {
        self.check_range(ino)?;
        let (block, offset) = self.geo.inode_location(ino);
        let buf = dev.read_block(block)?;
        InodeRecord::parse_from_bytes(&buf.as_slice()[offset..offset + INODE_SIZE])
            .map_err(|e| parse_to_tfs_error(block, &e))
    }

    pub fn write(&self, dev: &dyn BlockDevice, ino: InodeNumber, record: &InodeRecord) -> Result<()> {
        self.check_range(ino)?;
        let (block, offset) = self.geo.inode_location(ino);
        let mut buf = dev.read_block(block)?;
        record
            .write_to(&mut buf.as_mut_slice()[offset..])
            .map_err(|e| parse_to_tfs_error(block, &e))?;
        dev.write_block(block, buf.as_slice())
    }

    /// Claim the lowest free inode and initialize it as an empty `kind`.
    pub fn allocate(&self, dev: &dyn BlockDevice, kind: FileKind) -> Result<InodeNumber> {
        let slot = self
            .map
            .allocate(dev)?
            .ok_or(TfsError::AllocationExhausted("inode"))?;
        let ino = InodeNumber(slot);
        self.write(dev, ino, &InodeRecord::empty(kind))?;
        Ok(ino)
    }

    /// Claim one specific inode. Fails with `AllocationExhausted` when it is
    /// taken or outside the table.
    pub fn allocate_at(
        &self,
        dev: &dyn BlockDevice,
        ino: InodeNumber,
        kind: FileKind,
    ) -> Result<()> {
        if ino.0 >= self.geo.inode_count || self.map.is_set(dev, ino.0)? {
            return Err(TfsError::AllocationExhausted("inode"));
        }
        self.map.claim(dev, ino.0)?;
        self.write(dev, ino, &InodeRecord::empty(kind))
    }

    /// Zero the record and free its map bit. Data blocks are the caller's.
    pub fn release(&self, dev: &dyn BlockDevice, ino: InodeNumber) -> Result<()> {
        self.write(dev, ino, &InodeRecord::FREE)?;
        self.map.release(dev, ino.0)
    }

    /// Write an all-free inode table.
    pub fn reset(&self, dev: &dyn BlockDevice) -> Result<()> {
        let zero = [0_u8; BLOCK_SIZE_BYTES];
        for block in self.geo.inode_table.iter() {
            dev.write_block(block, &zero)?;
        }
        Ok(())
    }

    /// Every slot in table order. Stops at the first record that fails to
    /// decode.
    pub fn scan(&self, dev: &dyn BlockDevice) -> Result<Vec<(InodeNumber, InodeRecord)>> {
        let mut out = Vec::with_capacity(self.geo.inode_count as usize);
        for block in self.geo.inode_table.iter() {
            let buf = dev.read_block(block)?;
            for chunk in buf.as_slice().chunks_exact(INODE_SIZE) {
                let ino = InodeNumber(u32::try_from(out.len()).unwrap_or(u32::MAX));
                if ino.0 >= self.geo.inode_count {
                    break;
                }
                let record = InodeRecord::parse_from_bytes(chunk)
                    .map_err(|e| parse_to_tfs_error(block, &e))?;
                out.push((ino, record));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfs_block::{ByteBlockDevice, MemoryByteDevice};
    use tfs_ondisk::FormatOptions;

    fn setup() -> (ByteBlockDevice<MemoryByteDevice>, InodeStore) {
        let opts = FormatOptions::default();
        let geo = opts.geometry().expect("geometry");
        let mem = MemoryByteDevice::new(usize::try_from(opts.image_len()).expect("len"));
        let dev = ByteBlockDevice::new(mem, 512).expect("device");
        let store = InodeStore::new(&geo);
        store.free_map().reset(&dev).expect("reset map");
        store.reset(&dev).expect("reset table");
        (dev, store)
    }

    #[test]
    fn allocate_writes_record_and_bit() {
        let (dev, store) = setup();
        let root = store.allocate(&dev, FileKind::Directory).expect("alloc");
        assert_eq!(root, InodeNumber::ROOT);
        let file = store.allocate(&dev, FileKind::File).expect("alloc");
        assert_eq!(file, InodeNumber(1));

        assert_eq!(
            store.read(&dev, file).expect("read"),
            InodeRecord::empty(FileKind::File)
        );
        assert!(store.free_map().is_set(&dev, 1).expect("bit"));
    }

    #[test]
    fn release_frees_slot_for_reuse() {
        let (dev, store) = setup();
        for _ in 0..3 {
            store.allocate(&dev, FileKind::File).expect("alloc");
        }
        store.release(&dev, InodeNumber(1)).expect("release");
        assert!(store.read(&dev, InodeNumber(1)).expect("read").is_free());
        assert_eq!(
            store.allocate(&dev, FileKind::Directory).expect("alloc"),
            InodeNumber(1)
        );
    }

    #[test]
    fn exhaustion_reports_allocation_error() {
        let (dev, store) = setup();
        for _ in 0..store.capacity() {
            store.allocate(&dev, FileKind::File).expect("alloc");
        }
        assert!(matches!(
            store.allocate(&dev, FileKind::File),
            Err(TfsError::AllocationExhausted("inode"))
        ));
    }

    #[test]
    fn allocate_at_refuses_taken_slot() {
        let (dev, store) = setup();
        store
            .allocate_at(&dev, InodeNumber::ROOT, FileKind::Directory)
            .expect("root");
        assert!(matches!(
            store.allocate_at(&dev, InodeNumber::ROOT, FileKind::Directory),
            Err(TfsError::AllocationExhausted(_))
        ));
        assert!(store.allocate_at(&dev, InodeNumber(64), FileKind::File).is_err());
    }

    #[test]
    fn neighbours_in_a_block_are_untouched() {
        let (dev, store) = setup();
        let record = InodeRecord {
            kind: FileKind::File,
            size: 10,
            direct: [20, 0, 0, 0, 0, 0, 0, 0],
        };
        store.write(&dev, InodeNumber(3), &record).expect("write");
        store
            .write(&dev, InodeNumber(4), &InodeRecord::empty(FileKind::Directory))
            .expect("write");
        assert_eq!(store.read(&dev, InodeNumber(3)).expect("read"), record);

        let scanned = store.scan(&dev).expect("scan");
        assert_eq!(scanned.len(), 64);
        assert_eq!(scanned[3].1, record);
        assert_eq!(scanned[4].1.kind, FileKind::Directory);
    }

    #[test]
    fn corrupt_record_surfaces_block() {
        let (dev, store) = setup();
        let mut buf = dev.read_block(BlockNumber(5)).expect("read");
        buf.as_mut_slice()[64] = 9;
        dev.write_block(BlockNumber(5), buf.as_slice()).expect("write");
        assert!(matches!(
            store.read(&dev, InodeNumber(1)),
            Err(TfsError::Corruption { block: 5, .. })
        ));
        assert!(store.read(&dev, InodeNumber(99)).is_err());
    }
}
