#![forbid(unsafe_code)]
//! Directory operations.
//!
//! Path splitting and component validation, plus the packing of fixed-size
//! entries inside directory blocks. A directory with `n` entries stores them
//! densely in slots `0..n`; slot `i` lives in content block `i / 16` at byte
//! `(i % 16) * 32`.

use tfs_error::{Result, TfsError};
use tfs_ondisk::DirEntry;
use tfs_types::{DIR_ENTRIES_PER_BLOCK, DIR_ENTRY_SIZE, MAX_DIR_ENTRIES, NAME_MAX, ParseError};

/// One `/`-separated piece of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathComponent<'a> {
    /// `.`
    Current,
    /// `..`; the root is its own parent.
    Parent,
    Name(&'a str),
}

/// Split `path` into components, ignoring empty ones.
///
/// Every component is validated up front: a NUL byte is `InvalidPath`, more
/// than `NAME_MAX` bytes is `NameTooLong`. An empty result names the root.
pub fn parse_path(path: &str) -> Result<Vec<PathComponent<'_>>> {
    if path.contains('\0') {
        return Err(TfsError::InvalidPath(format!("{path:?} contains NUL")));
    }
    path.split('/')
        .filter(|part| !part.is_empty())
        .map(|part| match part {
            "." => Ok(PathComponent::Current),
            ".." => Ok(PathComponent::Parent),
            name if name.len() > NAME_MAX => Err(TfsError::NameTooLong),
            name => Ok(PathComponent::Name(name)),
        })
        .collect()
}

/// Content block index and byte offset of entry slot `slot`.
#[must_use]
pub fn slot_location(slot: usize) -> (usize, usize) {
    (
        slot / DIR_ENTRIES_PER_BLOCK,
        (slot % DIR_ENTRIES_PER_BLOCK) * DIR_ENTRY_SIZE,
    )
}

/// Number of entries held by content block `block_idx` of a directory with
/// `total` entries.
#[must_use]
pub fn entries_in_block(total: usize, block_idx: usize) -> usize {
    total
        .saturating_sub(block_idx * DIR_ENTRIES_PER_BLOCK)
        .min(DIR_ENTRIES_PER_BLOCK)
}

/// Decode the first `count` entries of one directory block. Slots past
/// `count` must be zero.
pub fn parse_dir_block(block: &[u8], count: usize) -> std::result::Result<Vec<DirEntry>, ParseError> {
    if count > DIR_ENTRIES_PER_BLOCK {
        return Err(ParseError::InvalidField {
            field: "dir_entries",
            reason: "more entries than fit in a block",
        });
    }
    let entries = block
        .chunks_exact(DIR_ENTRY_SIZE)
        .take(count)
        .map(DirEntry::parse_from_bytes)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let tail = block.get(count * DIR_ENTRY_SIZE..).unwrap_or_default();
    if tail.iter().any(|b| *b != 0) {
        return Err(ParseError::InvalidField {
            field: "dir_entries",
            reason: "unused slots are not zero",
        });
    }
    Ok(entries)
}

/// Store `entry` in slot `slot_in_block` of `block`.
pub fn write_entry(block: &mut [u8], slot_in_block: usize, entry: &DirEntry) -> Result<()> {
    let offset = slot_in_block * DIR_ENTRY_SIZE;
    let dst = block
        .get_mut(offset..offset + DIR_ENTRY_SIZE)
        .ok_or_else(|| TfsError::Corruption {
            block: 0,
            detail: format!("directory slot {slot_in_block} out of bounds"),
        })?;
    entry.write_to(dst).map_err(|e| match e {
        ParseError::InvalidField { field: "name", .. } => TfsError::InvalidPath(entry.name.clone()),
        other => TfsError::Corruption {
            block: 0,
            detail: other.to_string(),
        },
    })
}

/// Zero slot `slot_in_block` of `block`.
pub fn clear_entry(block: &mut [u8], slot_in_block: usize) {
    let offset = slot_in_block * DIR_ENTRY_SIZE;
    if let Some(dst) = block.get_mut(offset..offset + DIR_ENTRY_SIZE) {
        dst.fill(0);
    }
}

/// Position of `name` in `entries`.
#[must_use]
pub fn find_entry(entries: &[DirEntry], name: &str) -> Option<usize> {
    entries.iter().position(|entry| entry.name == name)
}

/// Fail with `StorageFull` when a directory already holds the maximum.
pub fn ensure_room(path: &str, count: usize) -> Result<()> {
    if count >= MAX_DIR_ENTRIES {
        return Err(TfsError::StorageFull(format!(
            "{path}: directory holds {MAX_DIR_ENTRIES} entries"
        )));
    }
    Ok(())
}

/// Removal plan for slot `victim` of a directory with `total` entries: the
/// last entry moves into the vacated slot and the last slot is cleared.
///
/// Returns `(moved_from, block_freed)`: the slot whose entry must move into
/// `victim` (`None` when the victim is last), and whether the trailing
/// content block becomes empty.
#[must_use]
pub fn plan_removal(victim: usize, total: usize) -> (Option<usize>, bool) {
    let last = total - 1;
    let moved_from = (victim != last).then_some(last);
    let block_freed = last % DIR_ENTRIES_PER_BLOCK == 0;
    (moved_from, block_freed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfs_types::{BLOCK_SIZE_BYTES, InodeNumber};

    #[test]
    fn parse_path_ignores_empty_components() {
        assert_eq!(
            parse_path("/a//b/").expect("parse"),
            vec![PathComponent::Name("a"), PathComponent::Name("b")]
        );
        assert!(parse_path("").expect("root").is_empty());
        assert!(parse_path("///").expect("root").is_empty());
        assert_eq!(
            parse_path("./a/../.").expect("parse"),
            vec![
                PathComponent::Current,
                PathComponent::Name("a"),
                PathComponent::Parent,
                PathComponent::Current
            ]
        );
        assert_eq!(
            parse_path("...").expect("parse"),
            vec![PathComponent::Name("...")]
        );
    }

    #[test]
    fn parse_path_rejects_long_and_nul() {
        let long = format!("a/{}", "b".repeat(NAME_MAX + 1));
        assert!(matches!(parse_path(&long), Err(TfsError::NameTooLong)));
        assert!(parse_path(&"b".repeat(NAME_MAX)).is_ok());
        assert!(matches!(parse_path("a\0b"), Err(TfsError::InvalidPath(_))));
    }

    #[test]
    fn slot_math() {
        assert_eq!(slot_location(0), (0, 0));
        assert_eq!(slot_location(15), (0, 480));
        assert_eq!(slot_location(16), (1, 0));
        assert_eq!(entries_in_block(20, 0), 16);
        assert_eq!(entries_in_block(20, 1), 4);
        assert_eq!(entries_in_block(20, 2), 0);
    }

    #[test]
    fn write_then_parse_block() {
        let mut block = vec![0_u8; BLOCK_SIZE_BYTES];
        write_entry(&mut block, 0, &DirEntry::new(InodeNumber(1), "a")).expect("write");
        write_entry(&mut block, 1, &DirEntry::new(InodeNumber(2), "B")).expect("write");
        let entries = parse_dir_block(&block, 2).expect("parse");
        assert_eq!(entries.len(), 2);
        assert_eq!(find_entry(&entries, "B"), Some(1));
        assert_eq!(find_entry(&entries, "b"), None);

        // A stale entry past the count is corruption.
        assert!(parse_dir_block(&block, 1).is_err());
        clear_entry(&mut block, 1);
        assert_eq!(parse_dir_block(&block, 1).expect("parse").len(), 1);
    }

    #[test]
    fn write_entry_rejects_reserved_names() {
        let mut block = vec![0_u8; BLOCK_SIZE_BYTES];
        assert!(matches!(
            write_entry(&mut block, 0, &DirEntry::new(InodeNumber(1), "..")),
            Err(TfsError::InvalidPath(_))
        ));
        assert!(write_entry(&mut block, 16, &DirEntry::new(InodeNumber(1), "a")).is_err());
    }

    #[test]
    fn room_limit() {
        assert!(ensure_room("d", MAX_DIR_ENTRIES - 1).is_ok());
        assert!(matches!(
            ensure_room("d", MAX_DIR_ENTRIES),
            Err(TfsError::StorageFull(_))
        ));
    }

    #[test]
    fn removal_plans() {
        assert_eq!(plan_removal(0, 1), (None, true));
        assert_eq!(plan_removal(2, 5), (Some(4), false));
        assert_eq!(plan_removal(16, 17), (None, true));
        assert_eq!(plan_removal(3, 17), (Some(16), true));
        assert_eq!(plan_removal(3, 16), (Some(15), false));
    }
}
