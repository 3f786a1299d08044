#![forbid(unsafe_code)]

use proptest::prelude::*;
use std::collections::BTreeSet;
use tfs_block::{ByteBlockDevice, MemoryByteDevice};
use tfs_core::{CheckReport, Filesystem, FormatOptions};
use tfs_types::{BLOCK_SIZE, FileKind, MAX_FILE_SIZE};

fn fresh() -> Filesystem {
    let opts = FormatOptions::default();
    let mem = MemoryByteDevice::new(usize::try_from(opts.image_len()).expect("len"));
    let dev = ByteBlockDevice::new(mem, BLOCK_SIZE).expect("device");
    Filesystem::format(Box::new(dev), &opts).expect("format")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// The last content written to each file is what `cat` returns.
    #[test]
    fn write_then_cat_round_trips(
        writes in proptest::collection::vec(
            (0_usize..4, proptest::collection::vec(any::<u8>(), 0..=MAX_FILE_SIZE)),
            1..12,
        ),
    ) {
        let fs = fresh();
        let names = ["f0", "f1", "f2", "f3"];
        for name in names {
            fs.create(name).expect("create");
        }
        let mut expected = vec![Vec::new(); names.len()];
        for (target, content) in writes {
            fs.write(names[target], &content).expect("write");
            expected[target] = content;
        }
        for (name, content) in names.iter().zip(&expected) {
            prop_assert_eq!(&fs.cat(name).expect("cat"), content);
        }
        fs.checkfs().expect("check");
    }

    /// Distinct live nodes never share an inode or a data block.
    #[test]
    fn live_nodes_do_not_alias(
        sizes in proptest::collection::vec(1_usize..=MAX_FILE_SIZE, 1..10),
        dirs in 1_usize..6,
    ) {
        let fs = fresh();
        for d in 0..dirs {
            fs.mkdir(&format!("d{d}")).expect("mkdir");
        }
        for (i, size) in sizes.iter().enumerate() {
            let path = format!("d{}/f{i}", i % dirs);
            fs.create(&path).expect("create");
            fs.write(&path, &vec![b'z'; *size]).expect("write");
        }

        let tree = fs.lsr().expect("lsr");
        let inodes: BTreeSet<_> = tree.iter().map(|entry| entry.stat.inode).collect();
        prop_assert_eq!(inodes.len(), tree.len());

        let report = fs.checkfs().expect("check");
        let file_blocks: u32 = tree
            .iter()
            .filter(|entry| entry.stat.kind == FileKind::File)
            .map(|entry| entry.stat.blocks)
            .sum();
        let dir_blocks: u32 = tree
            .iter()
            .filter(|entry| entry.stat.kind == FileKind::Directory)
            .map(|entry| entry.stat.blocks)
            .sum();
        prop_assert_eq!(report.blocks_in_use, file_blocks + dir_blocks);
        prop_assert_eq!(report.files, u32::try_from(sizes.len()).expect("count"));
    }
}

#[test]
fn check_report_serializes() {
    let fs = fresh();
    fs.mkdir("a").expect("mkdir");
    let report = fs.checkfs().expect("check");
    let text = serde_json::to_string(&report).expect("to json");
    let back: CheckReport = serde_json::from_str(&text).expect("from json");
    assert_eq!(back, report);
    assert_eq!(back.directories, 2);
}
