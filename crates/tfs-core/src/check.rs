//! Offline consistency checker.
//!
//! `checkfs` reads the whole image through the engine's device and runs its
//! passes in a fixed order, stopping at the first violation:
//!
//! 1. journal header is clear
//! 2. inode table decodes; inode map agrees with inode kinds; root is a live
//!    directory
//! 3. block pointers are dense, in range, sized right and never shared;
//!    block map equals the set of referenced blocks
//! 4. protected metadata and every referenced data block match their
//!    checksums
//! 5. directory contents decode, name live inodes, and reach every live
//!    inode exactly once from the root

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tfs_alloc::{FreeMap, bitmap_get, bitmap_padding_clear};
use tfs_block::BlockDevice;
use tfs_dir::{entries_in_block, parse_dir_block};
use tfs_error::{Result, TfsError};
use tfs_ondisk::InodeRecord;
use tfs_types::{
    BLOCK_SIZE_BYTES, BlockNumber, DIR_ENTRY_SIZE, FileKind, InodeNumber, MAX_DIR_ENTRIES,
    MAX_FILE_SIZE, blocks_for_bytes,
};
use tracing::{debug, error};

use crate::{Filesystem, csum};

/// Counts gathered while checking a consistent image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub inodes_in_use: u32,
    pub blocks_in_use: u32,
    pub directories: u32,
    pub files: u32,
}

type Verdict<T> = std::result::Result<T, String>;

impl Filesystem {
    /// Verify every structural invariant of the image.
    ///
    /// Violations come back as [`TfsError::InvariantViolation`]; device
    /// errors are passed through unchanged.
    pub fn checkfs(&self) -> Result<CheckReport> {
        match self.run_checks() {
            Ok(Ok(report)) => {
                debug!(
                    target: "tfs::check",
                    inodes = report.inodes_in_use,
                    blocks = report.blocks_in_use,
                    "checkfs_pass"
                );
                Ok(report)
            }
            Ok(Err(detail)) => {
                error!(target: "tfs::check", detail = %detail, "checkfs_violation");
                Err(TfsError::InvariantViolation(detail))
            }
            Err(e) => Err(e),
        }
    }

    fn run_checks(&self) -> Result<Verdict<CheckReport>> {
        let dev = self.dev.as_ref();

        if !self.journal.lock().is_clean(dev)? {
            return Ok(Err("journal header is not clear".to_owned()));
        }

        let table = match self.inodes.scan(dev) {
            Ok(table) => table,
            Err(TfsError::Corruption { block, detail }) => {
                return Ok(Err(format!("inode table block {block}: {detail}")));
            }
            Err(e) => return Err(e),
        };
        let mut report = CheckReport::default();
        if let Err(detail) = self.check_inode_map(dev, &table, &mut report)? {
            return Ok(Err(detail));
        }
        let owners = match self.check_block_map(dev, &table, &mut report)? {
            Ok(owners) => owners,
            Err(detail) => return Ok(Err(detail)),
        };
        if let Err(detail) = self.check_checksums(dev, &owners)? {
            return Ok(Err(detail));
        }
        if let Err(detail) = self.check_tree(dev, &table)? {
            return Ok(Err(detail));
        }
        Ok(Ok(report))
    }

    fn check_inode_map(
        &self,
        dev: &dyn BlockDevice,
        table: &[(InodeNumber, InodeRecord)],
        report: &mut CheckReport,
    ) -> Result<Verdict<()>> {
        let map = self.inodes.free_map();
        let bitmap = map.load(dev)?;
        if !bitmap_padding_clear(&bitmap, map.slots()) {
            return Ok(Err("inode map has bits set past the inode count".to_owned()));
        }
        for (ino, record) in table {
            let in_use = bitmap_get(&bitmap, ino.0);
            if in_use != record.kind.is_live() {
                return Ok(Err(format!(
                    "inode {ino} is {} but its map bit is {}",
                    record.kind,
                    u8::from(in_use)
                )));
            }
            match record.kind {
                FileKind::Directory => report.directories += 1,
                FileKind::File => report.files += 1,
                FileKind::Free => {}
            }
        }
        match table.first() {
            Some((_, root)) if root.kind == FileKind::Directory => {}
            _ => return Ok(Err("root inode is not a directory".to_owned())),
        }
        report.inodes_in_use = map.count_in_use(&bitmap);
        Ok(Ok(()))
    }

    /// Validate block pointers and return the owner of every referenced
    /// block.
    fn check_block_map(
        &self,
        dev: &dyn BlockDevice,
        table: &[(InodeNumber, InodeRecord)],
        report: &mut CheckReport,
    ) -> Result<Verdict<BTreeMap<BlockNumber, InodeNumber>>> {
        let mut owners = BTreeMap::new();
        for (ino, record) in table {
            if record.is_free() {
                if *record != InodeRecord::FREE {
                    return Ok(Err(format!("free inode {ino} carries size or pointers")));
                }
                continue;
            }
            if let Err(detail) = check_size(*ino, record) {
                return Ok(Err(detail));
            }
            if !record.pointers_are_dense() {
                return Ok(Err(format!("inode {ino} has a gap in its block pointers")));
            }
            let expected = blocks_for_bytes(record.size as usize);
            if record.block_count() != expected {
                return Ok(Err(format!(
                    "inode {ino} holds {} blocks for {} bytes",
                    record.block_count(),
                    record.size
                )));
            }
            for ptr in record.blocks() {
                let block = BlockNumber(u64::from(ptr));
                if self.geo.data_index(block).is_none() {
                    return Ok(Err(format!(
                        "inode {ino} points at block {block} outside the data region"
                    )));
                }
                if let Some(other) = owners.insert(block, *ino) {
                    return Ok(Err(format!(
                        "block {block} is referenced by inodes {other} and {ino}"
                    )));
                }
            }
            if record.kind == FileKind::File && record.size as usize % BLOCK_SIZE_BYTES != 0 {
                let last = BlockNumber(u64::from(record.direct[expected - 1]));
                let buf = dev.read_block(last)?;
                let used = record.size as usize % BLOCK_SIZE_BYTES;
                if buf.as_slice()[used..].iter().any(|b| *b != 0) {
                    return Ok(Err(format!("inode {ino} has bytes past its size in block {last}")));
                }
            }
        }

        let map = FreeMap::blocks(&self.geo);
        let bitmap = map.load(dev)?;
        if !bitmap_padding_clear(&bitmap, map.slots()) {
            return Ok(Err("block map has bits set past the data region".to_owned()));
        }
        for slot in 0..map.slots() {
            let block = self.geo.data_block(slot);
            let in_use = bitmap_get(&bitmap, slot);
            if in_use != owners.contains_key(&block) {
                return Ok(Err(format!(
                    "block {block} map bit is {} but it is {}referenced",
                    u8::from(in_use),
                    if in_use { "not " } else { "" }
                )));
            }
        }
        report.blocks_in_use = map.count_in_use(&bitmap);
        Ok(Ok(owners))
    }

    fn check_checksums(
        &self,
        dev: &dyn BlockDevice,
        owners: &BTreeMap<BlockNumber, InodeNumber>,
    ) -> Result<Verdict<()>> {
        for block in self.geo.protected_metadata().chain(owners.keys().copied()) {
            let buf = dev.read_block(block)?;
            if !csum::verify(dev, &self.geo, block, buf.as_slice())? {
                return Ok(Err(format!("block {block} does not match its checksum")));
            }
        }
        Ok(Ok(()))
    }

    fn check_tree(
        &self,
        dev: &dyn BlockDevice,
        table: &[(InodeNumber, InodeRecord)],
    ) -> Result<Verdict<()>> {
        let mut reached = HashSet::from([InodeNumber::ROOT]);
        let mut pending = vec![InodeNumber::ROOT];
        while let Some(dir) = pending.pop() {
            let record = table[dir.index()].1;
            let total = record.size as usize / DIR_ENTRY_SIZE;
            let mut names = HashSet::new();
            for idx in 0..record.block_count() {
                let block = BlockNumber(u64::from(record.direct[idx]));
                let buf = dev.read_block(block)?;
                let entries = match parse_dir_block(buf.as_slice(), entries_in_block(total, idx)) {
                    Ok(entries) => entries,
                    Err(e) => {
                        return Ok(Err(format!("directory {dir} block {block}: {e}")));
                    }
                };
                for entry in entries {
                    if !names.insert(entry.name.clone()) {
                        return Ok(Err(format!("directory {dir} lists {:?} twice", entry.name)));
                    }
                    let target = table.get(entry.inode.index()).map(|(_, r)| r.kind);
                    if !target.is_some_and(FileKind::is_live) {
                        return Ok(Err(format!(
                            "directory {dir} entry {:?} names unused inode {}",
                            entry.name, entry.inode
                        )));
                    }
                    if !reached.insert(entry.inode) {
                        return Ok(Err(format!("inode {} is reachable twice", entry.inode)));
                    }
                    if target == Some(FileKind::Directory) {
                        pending.push(entry.inode);
                    }
                }
            }
        }

        if let Some((ino, _)) = table
            .iter()
            .find(|(ino, record)| record.kind.is_live() && !reached.contains(ino))
        {
            return Ok(Err(format!("inode {ino} is not reachable from the root")));
        }
        Ok(Ok(()))
    }
}

fn check_size(ino: InodeNumber, record: &InodeRecord) -> Verdict<()> {
    let size = record.size as usize;
    match record.kind {
        FileKind::File if size > MAX_FILE_SIZE => {
            Err(format!("file inode {ino} is {size} bytes"))
        }
        FileKind::Directory
            if size % DIR_ENTRY_SIZE != 0 || size > MAX_DIR_ENTRIES * DIR_ENTRY_SIZE =>
        {
            Err(format!("directory inode {ino} has size {size}"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FormatOptions;
    use tfs_block::{ByteBlockDevice, MemoryByteDevice};
    use tfs_types::write_le_u32;

    fn populated() -> (MemoryByteDevice, Filesystem) {
        let opts = FormatOptions::default();
        let mem = MemoryByteDevice::new(usize::try_from(opts.image_len()).expect("len"));
        let dev = ByteBlockDevice::new(mem.clone(), 512).expect("device");
        let fs = Filesystem::format(Box::new(dev), &opts).expect("format");
        fs.mkdir("a").unwrap();
        fs.create("a/f").unwrap();
        fs.write("a/f", b"hello").unwrap();
        (mem, fs)
    }

    fn raw(mem: &MemoryByteDevice) -> ByteBlockDevice<MemoryByteDevice> {
        ByteBlockDevice::new(mem.clone(), 512).expect("device")
    }

    /// Apply `edit` to `block` and refresh its checksum, so only the
    /// structural passes can object.
    fn patch(fs: &Filesystem, mem: &MemoryByteDevice, block: BlockNumber, edit: impl FnOnce(&mut [u8])) {
        let dev = raw(mem);
        let mut buf = dev.read_block(block).unwrap();
        edit(buf.as_mut_slice());
        dev.write_block(block, buf.as_slice()).unwrap();
        csum::set(&dev, fs.geometry(), block, buf.as_slice()).unwrap();
    }

    fn violation(fs: &Filesystem) -> String {
        match fs.checkfs() {
            Err(TfsError::InvariantViolation(detail)) => detail,
            other => panic!("expected a violation, got {other:?}"),
        }
    }

    #[test]
    fn populated_image_passes() {
        let (_mem, fs) = populated();
        let report = fs.checkfs().expect("clean");
        assert_eq!(
            report,
            CheckReport {
                inodes_in_use: 3,
                blocks_in_use: 3,
                directories: 2,
                files: 1,
            }
        );
    }

    #[test]
    fn dirty_journal_header() {
        let (mem, fs) = populated();
        let header = fs.geometry().journal_header();
        raw(&mem).write_block(header, &[1_u8; 512]).unwrap();
        assert!(violation(&fs).contains("journal"));
    }

    #[test]
    fn stray_inode_map_bit() {
        let (mem, fs) = populated();
        patch(&fs, &mem, BlockNumber(1), |b| b[0] |= 0x80);
        assert!(violation(&fs).contains("inode 7"));
    }

    #[test]
    fn leaked_block() {
        let (mem, fs) = populated();
        patch(&fs, &mem, BlockNumber(2), |b| b[5] |= 0x01);
        assert!(violation(&fs).contains("not referenced"));
    }

    #[test]
    fn shared_block() {
        let (mem, fs) = populated();
        // Point the file's first block at the directory's block.
        let geo = *fs.geometry();
        let (block, offset) = geo.inode_location(InodeNumber(2));
        let dir_block = u32::try_from(geo.data_block(1).0).unwrap();
        patch(&fs, &mem, block, |b| {
            write_le_u32(b, offset + 8, dir_block).unwrap();
        });
        assert!(violation(&fs).contains("referenced by inodes"));
    }

    #[test]
    fn wrong_size_for_blocks() {
        let (mem, fs) = populated();
        let (block, offset) = fs.geometry().inode_location(InodeNumber(2));
        patch(&fs, &mem, block, |b| {
            write_le_u32(b, offset + 4, 600).unwrap();
        });
        assert!(violation(&fs).contains("blocks for 600 bytes"));
    }

    #[test]
    fn bytes_past_end_of_file() {
        let (mem, fs) = populated();
        let file_block = fs.geometry().data_block(2);
        let dev = raw(&mem);
        let mut buf = dev.read_block(file_block).unwrap();
        buf.as_mut_slice()[100] = 1;
        dev.write_block(file_block, buf.as_slice()).unwrap();
        csum::set(&dev, fs.geometry(), file_block, buf.as_slice()).unwrap();
        assert!(violation(&fs).contains("past its size"));
    }

    #[test]
    fn checksum_damage() {
        let (mem, fs) = populated();
        let file_block = fs.geometry().data_block(2);
        let dev = raw(&mem);
        let mut buf = dev.read_block(file_block).unwrap();
        buf.as_mut_slice()[0] = b'j';
        dev.write_block(file_block, buf.as_slice()).unwrap();
        assert!(violation(&fs).contains("checksum"));
    }

    #[test]
    fn orphaned_inode() {
        let (mem, fs) = populated();
        let geo = *fs.geometry();
        // Drop the only entry of "a" without freeing "a/f".
        let (block, offset) = geo.inode_location(InodeNumber(1));
        patch(&fs, &mem, block, |b| {
            write_le_u32(b, offset + 4, 0).unwrap();
            write_le_u32(b, offset + 8, 0).unwrap();
        });
        patch(&fs, &mem, geo.block_map.iter().next().unwrap(), |b| b[0] &= !0x02);
        let detail = violation(&fs);
        assert!(detail.contains("not reachable"), "{detail}");
    }

    #[test]
    fn duplicate_names() {
        let (mem, fs) = populated();
        fs.create("b").unwrap();
        let root_block = fs.geometry().data_block(0);
        patch(&fs, &mem, root_block, |b| {
            b[32 + 5] = b'a';
        });
        assert!(violation(&fs).contains("twice"));
    }
}
