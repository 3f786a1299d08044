#![forbid(unsafe_code)]
//! On-disk format for TestFS.
//!
//! Pure encode/decode crate with no I/O. Turns byte slices into typed
//! structures (superblock, inode records, directory entries, the journal
//! header) and back, and derives the block layout from the format options.
//! Decoding failures are reported as [`tfs_types::ParseError`].

pub mod dirent;
pub mod geometry;
pub mod inode;
pub mod journal;
pub mod superblock;

pub use dirent::{DirEntry, validate_name};
pub use geometry::{FormatOptions, Geometry, Region};
pub use inode::InodeRecord;
pub use journal::{JournalEntry, JournalHeader};
pub use superblock::Superblock;
