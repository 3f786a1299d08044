//! Path-based operations.
//!
//! Resolution walks from the root one component at a time, keeping the chain
//! of ancestors so `..` can step back; the root is its own parent. Every
//! component before the last must name a directory.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tfs_block::BlockDevice;
use tfs_dir::{PathComponent, entries_in_block, ensure_room, find_entry, parse_path, plan_removal};
use tfs_error::{ExpectedKind, Result, TfsError};
use tfs_ondisk::{DirEntry, InodeRecord};
use tfs_types::{
    BLOCK_SIZE_BYTES, BlockNumber, DIR_ENTRY_SIZE, FileKind, InodeNumber, MAX_FILE_SIZE,
    blocks_for_bytes, usize_to_u32,
};
use tracing::debug;

use crate::{Filesystem, data, parse_to_tfs_error};

/// Metadata of one inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub inode: InodeNumber,
    pub kind: FileKind,
    pub size: u32,
    pub blocks: u32,
}

impl Stat {
    fn of(inode: InodeNumber, record: &InodeRecord) -> Self {
        Self {
            inode,
            kind: record.kind,
            size: record.size,
            blocks: u32::try_from(record.block_count()).unwrap_or(u32::MAX),
        }
    }
}

/// One line of a recursive listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub stat: Stat,
}

/// A resolved inode together with its record.
#[derive(Debug, Clone, Copy)]
struct Node {
    ino: InodeNumber,
    record: InodeRecord,
}

fn display_path(components: &[PathComponent<'_>]) -> String {
    let mut out = String::new();
    for component in components {
        out.push('/');
        out.push_str(match component {
            PathComponent::Current => ".",
            PathComponent::Parent => "..",
            PathComponent::Name(name) => name,
        });
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

fn pointer(record: &InodeRecord, idx: usize) -> BlockNumber {
    BlockNumber(u64::from(record.direct[idx]))
}

impl Filesystem {
    fn read_node(&self, dev: &dyn BlockDevice, ino: InodeNumber) -> Result<Node> {
        let record = self.inodes.read(dev, ino)?;
        if record.is_free() {
            return Err(TfsError::Corruption {
                block: self.geo.inode_location(ino).0.0,
                detail: format!("directory entry points at free inode {ino}"),
            });
        }
        Ok(Node { ino, record })
    }

    /// Entries of a directory, in stored order.
    fn read_entries(&self, dev: &dyn BlockDevice, dir: &Node) -> Result<Vec<DirEntry>> {
        let total = dir.record.size as usize / DIR_ENTRY_SIZE;
        let mut entries = Vec::with_capacity(total);
        for idx in 0..blocks_for_bytes(dir.record.size as usize) {
            let block = pointer(&dir.record, idx);
            let buf = data::read_data_block_verified(dev, &self.geo, block)?;
            let chunk = tfs_dir::parse_dir_block(buf.as_slice(), entries_in_block(total, idx))
                .map_err(|e| parse_to_tfs_error(block, &e))?;
            entries.extend(chunk);
        }
        Ok(entries)
    }

    /// Walk `components` from the root.
    fn resolve(&self, dev: &dyn BlockDevice, components: &[PathComponent<'_>]) -> Result<Node> {
        let mut chain = vec![self.read_node(dev, InodeNumber::ROOT)?];
        for (depth, component) in components.iter().enumerate() {
            let current = chain[chain.len() - 1];
            if current.record.kind != FileKind::Directory {
                return Err(TfsError::WrongType {
                    path: display_path(&components[..depth]),
                    expected: ExpectedKind::Directory,
                });
            }
            match component {
                PathComponent::Current => {}
                PathComponent::Parent => {
                    if chain.len() > 1 {
                        chain.pop();
                    }
                }
                PathComponent::Name(name) => {
                    let entries = self.read_entries(dev, &current)?;
                    let idx = find_entry(&entries, name).ok_or_else(|| {
                        TfsError::NotFound(display_path(&components[..=depth]))
                    })?;
                    chain.push(self.read_node(dev, entries[idx].inode)?);
                }
            }
        }
        Ok(chain[chain.len() - 1])
    }

    /// Resolve everything but the last component, which must be a directory.
    fn resolve_parent<'p>(
        &self,
        dev: &dyn BlockDevice,
        components: &'p [PathComponent<'p>],
    ) -> Result<(Node, PathComponent<'p>)> {
        let Some((last, parents)) = components.split_last() else {
            return Err(TfsError::InvalidPath("/".to_owned()));
        };
        let parent = self.resolve(dev, parents)?;
        if parent.record.kind != FileKind::Directory {
            return Err(TfsError::WrongType {
                path: display_path(parents),
                expected: ExpectedKind::Directory,
            });
        }
        Ok((parent, *last))
    }

    /// Append an entry, allocating a new content block when the last one is
    /// full.
    fn add_entry(&self, dev: &dyn BlockDevice, parent: &mut Node, entry: &DirEntry) -> Result<()> {
        let total = parent.record.size as usize / DIR_ENTRY_SIZE;
        let (block_idx, offset) = tfs_dir::slot_location(total);
        let slot = offset / DIR_ENTRY_SIZE;

        let (block, mut buf) = if block_idx < parent.record.block_count() {
            let block = pointer(&parent.record, block_idx);
            (block, data::read_data_block_verified(dev, &self.geo, block)?.into_inner())
        } else {
            let block = data::allocate_block(dev, &self.geo)?
                .ok_or(TfsError::AllocationExhausted("block"))?;
            parent.record.direct[block_idx] = block.to_u32().map_err(|e| parse_to_tfs_error(block, &e))?;
            (block, vec![0_u8; BLOCK_SIZE_BYTES])
        };
        tfs_dir::write_entry(&mut buf, slot, entry)?;
        data::write_data_block(dev, &self.geo, block, &buf)?;

        parent.record.size += usize_to_u32(DIR_ENTRY_SIZE, "dir_size").map_err(|e| parse_to_tfs_error(block, &e))?;
        self.inodes.write(dev, parent.ino, &parent.record)
    }

    /// Remove entry `victim`, moving the last entry into its slot.
    fn remove_entry(&self, dev: &dyn BlockDevice, parent: &mut Node, entries: &[DirEntry], victim: usize) -> Result<()> {
        let total = entries.len();
        let last = total - 1;
        let (moved_from, block_freed) = plan_removal(victim, total);

        if let Some(from) = moved_from {
            let (block_idx, offset) = tfs_dir::slot_location(victim);
            let block = pointer(&parent.record, block_idx);
            let mut buf = data::read_data_block_verified(dev, &self.geo, block)?.into_inner();
            tfs_dir::write_entry(&mut buf, offset / DIR_ENTRY_SIZE, &entries[from])?;
            data::write_data_block(dev, &self.geo, block, &buf)?;
        }

        let (last_idx, last_offset) = tfs_dir::slot_location(last);
        let last_block = pointer(&parent.record, last_idx);
        if block_freed {
            data::free_block(dev, &self.geo, last_block)?;
            parent.record.direct[last_idx] = 0;
        } else {
            let mut buf = data::read_data_block_verified(dev, &self.geo, last_block)?.into_inner();
            tfs_dir::clear_entry(&mut buf, last_offset / DIR_ENTRY_SIZE);
            data::write_data_block(dev, &self.geo, last_block, &buf)?;
        }

        parent.record.size -= usize_to_u32(DIR_ENTRY_SIZE, "dir_size").map_err(|e| parse_to_tfs_error(last_block, &e))?;
        self.inodes.write(dev, parent.ino, &parent.record)
    }

    /// Shared body of `mkdir` and `create`.
    fn make_node(&self, op: &'static str, path: &str, kind: FileKind) -> Result<InodeNumber> {
        let components = parse_path(path)?;
        let result = self.transact(op, |txn| {
            if components.is_empty() {
                return Err(TfsError::AlreadyExists("/".to_owned()));
            }
            let (mut parent, last) = self.resolve_parent(txn, &components)?;
            let PathComponent::Name(name) = last else {
                return Err(TfsError::AlreadyExists(display_path(&components)));
            };
            let entries = self.read_entries(txn, &parent)?;
            if find_entry(&entries, name).is_some() {
                return Err(TfsError::AlreadyExists(display_path(&components)));
            }
            ensure_room(&display_path(&components), entries.len())?;

            let ino = self.inodes.allocate(txn, kind)?;
            self.add_entry(txn, &mut parent, &DirEntry::new(ino, name))?;
            Ok(ino)
        });
        debug!(target: "tfs::core", op, path, ok = result.is_ok(), "operation");
        result
    }

    /// Create an empty directory.
    pub fn mkdir(&self, path: &str) -> Result<InodeNumber> {
        self.make_node("mkdir", path, FileKind::Directory)
    }

    /// Create an empty file.
    pub fn create(&self, path: &str) -> Result<InodeNumber> {
        self.make_node("create", path, FileKind::File)
    }

    /// Remove an empty directory.
    pub fn rmdir(&self, path: &str) -> Result<()> {
        let components = parse_path(path)?;
        let result = self.transact("rmdir", |txn| {
            if components.is_empty() {
                return Err(TfsError::Busy("/".to_owned()));
            }
            let (mut parent, last) = self.resolve_parent(txn, &components)?;
            let PathComponent::Name(name) = last else {
                return Err(TfsError::InvalidPath(display_path(&components)));
            };
            let entries = self.read_entries(txn, &parent)?;
            let victim = find_entry(&entries, name)
                .ok_or_else(|| TfsError::NotFound(display_path(&components)))?;
            let target = self.read_node(txn, entries[victim].inode)?;
            if target.record.kind != FileKind::Directory {
                return Err(TfsError::WrongType {
                    path: display_path(&components),
                    expected: ExpectedKind::Directory,
                });
            }
            if target.record.size != 0 {
                return Err(TfsError::NotEmpty(display_path(&components)));
            }

            self.remove_entry(txn, &mut parent, &entries, victim)?;
            for block in target.record.blocks() {
                data::free_block(txn, &self.geo, BlockNumber(u64::from(block)))?;
            }
            self.inodes.release(txn, target.ino)
        });
        debug!(target: "tfs::core", op = "rmdir", path, ok = result.is_ok(), "operation");
        result
    }

    /// Replace the whole content of a file.
    pub fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        if content.len() > MAX_FILE_SIZE {
            return Err(TfsError::DataTooLong {
                len: content.len(),
                max: MAX_FILE_SIZE,
            });
        }
        let components = parse_path(path)?;
        let result = self.transact("write", |txn| {
            let mut node = self.resolve(txn, &components)?;
            if node.record.kind != FileKind::File {
                return Err(TfsError::WrongType {
                    path: display_path(&components),
                    expected: ExpectedKind::File,
                });
            }

            let have = node.record.block_count();
            let need = blocks_for_bytes(content.len());
            for (idx, chunk) in content.chunks(BLOCK_SIZE_BYTES).enumerate() {
                let block = if idx < have {
                    pointer(&node.record, idx)
                } else {
                    let block = data::allocate_block(txn, &self.geo)?
                        .ok_or(TfsError::AllocationExhausted("block"))?;
                    node.record.direct[idx] =
                        block.to_u32().map_err(|e| parse_to_tfs_error(block, &e))?;
                    block
                };
                let mut buf = vec![0_u8; BLOCK_SIZE_BYTES];
                buf[..chunk.len()].copy_from_slice(chunk);
                data::write_data_block(txn, &self.geo, block, &buf)?;
            }
            for idx in need..have {
                data::free_block(txn, &self.geo, pointer(&node.record, idx))?;
                node.record.direct[idx] = 0;
            }

            node.record.size = usize_to_u32(content.len(), "file_size")
                .map_err(|e| parse_to_tfs_error(BlockNumber(0), &e))?;
            self.inodes.write(txn, node.ino, &node.record)
        });
        debug!(
            target: "tfs::core",
            op = "write",
            path,
            len = content.len(),
            ok = result.is_ok(),
            "operation"
        );
        result
    }

    pub fn stat(&self, path: &str) -> Result<Stat> {
        let components = parse_path(path)?;
        let node = self.resolve(self.dev.as_ref(), &components)?;
        Ok(Stat::of(node.ino, &node.record))
    }

    /// Whole content of a file, every block checked against its checksum.
    pub fn cat(&self, path: &str) -> Result<Vec<u8>> {
        let components = parse_path(path)?;
        let dev = self.dev.as_ref();
        let node = self.resolve(dev, &components)?;
        if node.record.kind != FileKind::File {
            return Err(TfsError::WrongType {
                path: display_path(&components),
                expected: ExpectedKind::File,
            });
        }
        let mut out = Vec::with_capacity(node.record.size as usize);
        for idx in 0..blocks_for_bytes(node.record.size as usize) {
            let buf = data::read_data_block_verified(dev, &self.geo, pointer(&node.record, idx))?;
            out.extend_from_slice(buf.as_slice());
        }
        out.truncate(node.record.size as usize);
        Ok(out)
    }

    /// Entries of the root directory.
    pub fn ls(&self) -> Result<Vec<DirEntry>> {
        self.ls_path("")
    }

    /// Entries of the directory at `path`, in stored order.
    pub fn ls_path(&self, path: &str) -> Result<Vec<DirEntry>> {
        let components = parse_path(path)?;
        let dev = self.dev.as_ref();
        let node = self.resolve(dev, &components)?;
        if node.record.kind != FileKind::Directory {
            return Err(TfsError::WrongType {
                path: display_path(&components),
                expected: ExpectedKind::Directory,
            });
        }
        self.read_entries(dev, &node)
    }

    /// Pre-order listing of the whole tree, root first.
    pub fn lsr(&self) -> Result<Vec<TreeEntry>> {
        let dev = self.dev.as_ref();
        let root = self.read_node(dev, InodeNumber::ROOT)?;
        let mut out = vec![TreeEntry {
            path: "/".to_owned(),
            stat: Stat::of(root.ino, &root.record),
        }];
        let mut seen = HashSet::from([root.ino]);
        self.walk(dev, &root, "", &mut seen, &mut out)?;
        Ok(out)
    }

    fn walk(
        &self,
        dev: &dyn BlockDevice,
        dir: &Node,
        prefix: &str,
        seen: &mut HashSet<InodeNumber>,
        out: &mut Vec<TreeEntry>,
    ) -> Result<()> {
        for entry in self.read_entries(dev, dir)? {
            if !seen.insert(entry.inode) {
                return Err(TfsError::Corruption {
                    block: self.geo.inode_location(entry.inode).0.0,
                    detail: format!("inode {} reachable twice", entry.inode),
                });
            }
            let child = self.read_node(dev, entry.inode)?;
            let path = format!("{prefix}/{}", entry.name);
            out.push(TreeEntry {
                path: path.clone(),
                stat: Stat::of(child.ino, &child.record),
            });
            if child.record.kind == FileKind::Directory {
                self.walk(dev, &child, &path, seen, out)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FormatOptions;
    use tfs_block::{ByteBlockDevice, MemoryByteDevice};
    use tfs_types::{MAX_DIR_ENTRIES, NAME_MAX};

    fn fresh() -> (MemoryByteDevice, Filesystem) {
        fresh_with(FormatOptions::default())
    }

    fn fresh_with(opts: FormatOptions) -> (MemoryByteDevice, Filesystem) {
        let mem = MemoryByteDevice::new(usize::try_from(opts.image_len()).expect("len"));
        let dev = ByteBlockDevice::new(mem.clone(), 512).expect("device");
        (mem, Filesystem::format(Box::new(dev), &opts).expect("format"))
    }

    #[test]
    fn mkdir_create_and_list() {
        let (_mem, fs) = fresh();
        assert_eq!(fs.mkdir("a").unwrap(), InodeNumber(1));
        assert_eq!(fs.create("a/f").unwrap(), InodeNumber(2));
        assert_eq!(fs.create("/g").unwrap(), InodeNumber(3));

        let names: Vec<String> = fs.ls().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a", "g"]);
        assert_eq!(fs.ls_path("a").unwrap()[0].name, "f");

        let stat = fs.stat("a").unwrap();
        assert_eq!(stat.kind, FileKind::Directory);
        assert_eq!(stat.size, 32);
        assert_eq!(stat.blocks, 1);
        fs.checkfs().expect("consistent");
    }

    #[test]
    fn dot_and_dotdot_resolve() {
        let (_mem, fs) = fresh();
        fs.mkdir("a").unwrap();
        fs.mkdir("a/b").unwrap();
        fs.create("a/b/../f").unwrap();
        assert_eq!(fs.stat("a/./f").unwrap().kind, FileKind::File);
        assert_eq!(fs.stat("a/b/..").unwrap().inode, InodeNumber(1));
        assert_eq!(fs.stat("..").unwrap().inode, InodeNumber::ROOT);
        assert_eq!(fs.stat("/../a/b/../../.").unwrap().inode, InodeNumber::ROOT);
        assert_eq!(fs.stat("//a//b/").unwrap().inode, InodeNumber(2));
    }

    #[test]
    fn mkdir_error_precedence() {
        let (_mem, fs) = fresh();
        fs.mkdir("a").unwrap();
        fs.create("f").unwrap();
        assert!(matches!(fs.mkdir(""), Err(TfsError::AlreadyExists(_))));
        assert!(matches!(fs.mkdir("/"), Err(TfsError::AlreadyExists(_))));
        assert!(matches!(fs.mkdir("a/."), Err(TfsError::AlreadyExists(_))));
        assert!(matches!(fs.mkdir("a/.."), Err(TfsError::AlreadyExists(_))));
        assert!(matches!(fs.mkdir("a"), Err(TfsError::AlreadyExists(_))));
        assert!(matches!(fs.create("a"), Err(TfsError::AlreadyExists(_))));
        assert!(matches!(fs.mkdir("x/y"), Err(TfsError::NotFound(_))));
        assert!(matches!(
            fs.mkdir("f/y"),
            Err(TfsError::WrongType {
                expected: ExpectedKind::Directory,
                ..
            })
        ));
        assert!(matches!(
            fs.mkdir(&"n".repeat(NAME_MAX + 1)),
            Err(TfsError::NameTooLong)
        ));
        // Nothing above consumed an inode.
        assert_eq!(fs.mkdir("b").unwrap(), InodeNumber(3));
    }

    #[test]
    fn rmdir_error_precedence() {
        let (_mem, fs) = fresh();
        fs.mkdir("a").unwrap();
        fs.mkdir("a/b").unwrap();
        fs.create("f").unwrap();
        assert!(matches!(fs.rmdir(""), Err(TfsError::Busy(_))));
        assert!(matches!(fs.rmdir("a/."), Err(TfsError::InvalidPath(_))));
        assert!(matches!(fs.rmdir("a/.."), Err(TfsError::InvalidPath(_))));
        assert!(matches!(fs.rmdir("zz"), Err(TfsError::NotFound(_))));
        assert!(matches!(
            fs.rmdir("f"),
            Err(TfsError::WrongType {
                expected: ExpectedKind::Directory,
                ..
            })
        ));
        assert!(matches!(fs.rmdir("a"), Err(TfsError::NotEmpty(_))));
        fs.rmdir("a/b").unwrap();
        fs.rmdir("a").unwrap();
        assert_eq!(fs.ls().unwrap().len(), 1);
        fs.checkfs().expect("consistent");
    }

    #[test]
    fn rmdir_swaps_last_entry_and_frees_block() {
        let (_mem, fs) = fresh();
        for i in 0..17 {
            fs.mkdir(&format!("d{i}")).unwrap();
        }
        assert_eq!(fs.stat("").unwrap().blocks, 2);
        fs.rmdir("d3").unwrap();
        let names: Vec<String> = fs.ls().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names[3], "d16");
        assert_eq!(names.len(), 16);
        assert_eq!(fs.stat("").unwrap().blocks, 1);
        fs.checkfs().expect("consistent");

        for i in (0..17).filter(|i| *i != 3) {
            fs.rmdir(&format!("d{i}")).unwrap();
        }
        let root = fs.stat("/").unwrap();
        assert_eq!((root.size, root.blocks), (0, 0));
        let report = fs.checkfs().expect("consistent");
        assert_eq!(report.blocks_in_use, 0);
        assert_eq!(report.inodes_in_use, 1);
    }

    #[test]
    fn write_replaces_and_cat_reads_back() {
        let (_mem, fs) = fresh();
        fs.create("f").unwrap();
        fs.write("f", b"xy").unwrap();
        assert_eq!(fs.cat("f").unwrap(), b"xy");

        let big: Vec<u8> = (0..1300_u32).map(|i| (i % 251) as u8).collect();
        fs.write("f", &big).unwrap();
        assert_eq!(fs.cat("f").unwrap(), big);
        assert_eq!(fs.stat("f").unwrap().blocks, 3);

        fs.write("f", b"x").unwrap();
        assert_eq!(fs.cat("f").unwrap(), b"x");
        let stat = fs.stat("f").unwrap();
        assert_eq!((stat.size, stat.blocks), (1, 1));

        fs.write("f", b"").unwrap();
        assert!(fs.cat("f").unwrap().is_empty());
        let stat = fs.stat("f").unwrap();
        assert_eq!((stat.size, stat.blocks), (0, 0));
        // only the root directory's entry block remains
        let report = fs.checkfs().expect("consistent");
        assert_eq!(report.blocks_in_use, 1);
    }

    #[test]
    fn write_rejections() {
        let (_mem, fs) = fresh();
        fs.mkdir("d").unwrap();
        fs.create("f").unwrap();
        assert!(matches!(
            fs.write("f", &vec![0_u8; MAX_FILE_SIZE + 1]),
            Err(TfsError::DataTooLong { .. })
        ));
        assert!(matches!(
            fs.write("d", b"x"),
            Err(TfsError::WrongType {
                expected: ExpectedKind::File,
                ..
            })
        ));
        assert!(matches!(fs.write("", b"x"), Err(TfsError::WrongType { .. })));
        assert!(matches!(fs.write("nope", b"x"), Err(TfsError::NotFound(_))));
        assert!(matches!(fs.cat("d"), Err(TfsError::WrongType { .. })));
        assert!(matches!(fs.ls_path("f"), Err(TfsError::WrongType { .. })));
        fs.write("f", &vec![7_u8; MAX_FILE_SIZE]).unwrap();
        assert_eq!(fs.stat("f").unwrap().blocks, 8);
    }

    #[test]
    fn directory_slot_limit() {
        let (_mem, fs) = fresh_with(FormatOptions {
            total_blocks: 512,
            inode_count: 256,
        });
        for i in 0..MAX_DIR_ENTRIES {
            fs.create(&format!("f{i}")).unwrap();
        }
        assert!(matches!(fs.create("extra"), Err(TfsError::StorageFull(_))));
        assert!(matches!(fs.mkdir("extra"), Err(TfsError::StorageFull(_))));
        fs.checkfs().expect("consistent");
    }

    #[test]
    fn exhaustion_leaves_storage_untouched() {
        let (mem, fs) = fresh_with(FormatOptions {
            total_blocks: 60,
            inode_count: 8,
        });
        // 60 - (5 metadata + 49 journal) = 6 data blocks, 8 inodes.
        fs.create("f").unwrap();
        let before = mem.snapshot();
        assert!(matches!(
            fs.write("f", &[1_u8; 7 * 512]),
            Err(TfsError::AllocationExhausted("block"))
        ));
        assert_eq!(mem.snapshot(), before);

        for i in 0..6 {
            fs.create(&format!("g{i}")).unwrap();
        }
        assert!(matches!(
            fs.create("h"),
            Err(TfsError::AllocationExhausted("inode"))
        ));
        fs.checkfs().expect("consistent");
    }

    #[test]
    fn cat_reports_damaged_block() {
        let (mem, fs) = fresh();
        fs.create("f").unwrap();
        fs.write("f", b"hello").unwrap();
        let block = fs.geometry().data_block(0);
        let raw = ByteBlockDevice::new(mem, 512).expect("device");
        let mut buf = raw.read_block(block).unwrap();
        buf.as_mut_slice()[0] = b'j';
        raw.write_block(block, buf.as_slice()).unwrap();
        assert!(matches!(
            fs.cat("f"),
            Err(TfsError::ChecksumMismatch { block: b }) if b == block.0
        ));
    }

    #[test]
    fn lsr_is_preorder() {
        let (_mem, fs) = fresh();
        fs.mkdir("a").unwrap();
        fs.mkdir("a/b").unwrap();
        fs.create("a/b/f").unwrap();
        fs.create("c").unwrap();
        let paths: Vec<String> = fs.lsr().unwrap().into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec!["/", "/a", "/a/b", "/a/b/f", "/c"]);
    }
}
