#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Size of every block on a TestFS image.
pub const BLOCK_SIZE: u32 = 512;
/// `BLOCK_SIZE` as a `usize`, for slicing.
pub const BLOCK_SIZE_BYTES: usize = 512;

pub const TFS_MAGIC: u32 = 0x5446_5331;
pub const TFS_VERSION: u32 = 1;
pub const JOURNAL_MAGIC: u32 = 0x4A52_4E4C;

/// On-disk inode record size.
pub const INODE_SIZE: usize = 64;
pub const INODES_PER_BLOCK: u32 = 8;
/// Direct block pointers per inode.
pub const DIRECT_BLOCKS: usize = 8;
pub const MAX_FILE_SIZE: usize = DIRECT_BLOCKS * BLOCK_SIZE_BYTES;

/// On-disk directory entry size.
pub const DIR_ENTRY_SIZE: usize = 32;
pub const DIR_ENTRIES_PER_BLOCK: usize = BLOCK_SIZE_BYTES / DIR_ENTRY_SIZE;
pub const MAX_DIR_ENTRIES: usize = DIRECT_BLOCKS * DIR_ENTRIES_PER_BLOCK;
/// Longest name a directory entry can hold.
pub const NAME_MAX: usize = 27;

/// Checksum-table entry size (one CRC32C per block).
pub const CSUM_SIZE: usize = 4;
pub const CSUMS_PER_BLOCK: u32 = 128;

/// Payload slots in the redo journal (the header block is extra).
pub const JOURNAL_CAPACITY: u32 = 48;

/// Bits per free-map block.
pub const BITS_PER_BLOCK: u32 = BLOCK_SIZE * 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u32);

/// Byte offset on a `ByteDevice` (pread/pwrite semantics).
///
/// This is a unit-carrying wrapper to prevent mixing bytes and blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl ByteOffset {
    pub const ZERO: Self = Self(0);

    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }

    /// Narrow to `usize`, returning `ParseError::IntegerConversion` on overflow.
    pub fn to_usize(self) -> Result<usize, ParseError> {
        usize::try_from(self.0).map_err(|_| ParseError::IntegerConversion {
            field: "byte_offset",
        })
    }
}

impl BlockNumber {
    /// Add a block count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u64) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }

    /// Byte offset of this block, `None` on overflow.
    #[must_use]
    pub fn to_byte_offset(self) -> Option<ByteOffset> {
        self.0.checked_mul(u64::from(BLOCK_SIZE)).map(ByteOffset)
    }

    /// Narrow to `u32`, the width used by on-disk block pointers.
    pub fn to_u32(self) -> Result<u32, ParseError> {
        u64_to_u32(self.0, "block_number")
    }
}

impl InodeNumber {
    /// The root directory. Never freed.
    pub const ROOT: Self = Self(0);

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inode type as stored in the first byte of an inode record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Free,
    Directory,
    File,
}

impl FileKind {
    #[must_use]
    pub fn to_raw(self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Directory => 1,
            Self::File => 2,
        }
    }

    pub fn from_raw(raw: u8) -> Result<Self, ParseError> {
        match raw {
            0 => Ok(Self::Free),
            1 => Ok(Self::Directory),
            2 => Ok(Self::File),
            _ => Err(ParseError::InvalidField {
                field: "inode_kind",
                reason: "unknown inode type",
            }),
        }
    }

    #[must_use]
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Free)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Directory => write!(f, "dir"),
            Self::File => write!(f, "file"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("checksum mismatch: {field} expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        field: &'static str,
        expected: u32,
        actual: u32,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

/// Write `value` little-endian at `offset`. Out-of-range writes are an error.
#[inline]
pub fn write_le_u32(data: &mut [u8], offset: usize, value: u32) -> Result<(), ParseError> {
    let len = data.len();
    let dst = data
        .get_mut(offset..offset.saturating_add(4))
        .ok_or(ParseError::InsufficientData {
            needed: 4,
            offset,
            actual: len.saturating_sub(offset),
        })?;
    dst.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub fn write_le_u64(data: &mut [u8], offset: usize, value: u64) -> Result<(), ParseError> {
    let len = data.len();
    let dst = data
        .get_mut(offset..offset.saturating_add(8))
        .ok_or(ParseError::InsufficientData {
            needed: 8,
            offset,
            actual: len.saturating_sub(offset),
        })?;
    dst.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Number of blocks needed to hold `bytes` bytes.
#[must_use]
pub fn blocks_for_bytes(bytes: usize) -> usize {
    bytes.div_ceil(BLOCK_SIZE_BYTES)
}

/// Narrow a `u64` to `u32` with an explicit error path.
pub fn u64_to_u32(value: u64, field: &'static str) -> Result<u32, ParseError> {
    u32::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

/// Narrow a `usize` to `u32` with an explicit error path.
pub fn usize_to_u32(value: usize, field: &'static str) -> Result<u32, ParseError> {
    u32::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}
