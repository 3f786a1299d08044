use serde::{Deserialize, Serialize};
use tfs_types::{
    DIRECT_BLOCKS, FileKind, INODE_SIZE, ParseError, ensure_slice, read_le_u32, write_le_u32,
};

const OFF_KIND: usize = 0x00;
const OFF_PAD: usize = 0x01;
const OFF_SIZE: usize = 0x04;
const OFF_DIRECT: usize = 0x08;
const OFF_TAIL: usize = OFF_DIRECT + DIRECT_BLOCKS * 4;

/// One 64-byte inode record.
///
/// | offset | field |
/// |--------|-------|
/// | 0x00 | kind (0 free, 1 dir, 2 file) |
/// | 0x01 | 3 zero bytes |
/// | 0x04 | size, bytes |
/// | 0x08 | 8 direct block pointers, 0 = none |
/// | 0x28 | zero padding |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeRecord {
    pub kind: FileKind,
    pub size: u32,
    pub direct: [u32; DIRECT_BLOCKS],
}

impl InodeRecord {
    pub const FREE: Self = Self {
        kind: FileKind::Free,
        size: 0,
        direct: [0; DIRECT_BLOCKS],
    };

    #[must_use]
    pub fn empty(kind: FileKind) -> Self {
        Self {
            kind,
            ..Self::FREE
        }
    }

    #[must_use]
    pub fn is_free(&self) -> bool {
        self.kind == FileKind::Free
    }

    /// Non-zero pointers, in slot order.
    pub fn blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.direct.iter().copied().filter(|ptr| *ptr != 0)
    }

    /// Length of the leading run of set pointers.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.direct.iter().take_while(|ptr| **ptr != 0).count()
    }

    /// True when every set pointer precedes every unset one.
    #[must_use]
    pub fn pointers_are_dense(&self) -> bool {
        self.direct[self.block_count()..].iter().all(|ptr| *ptr == 0)
    }

    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < INODE_SIZE {
            return Err(ParseError::InsufficientData {
                needed: INODE_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let kind = FileKind::from_raw(ensure_slice(bytes, OFF_KIND, 1)?[0])?;
        if ensure_slice(bytes, OFF_PAD, 3)?.iter().any(|b| *b != 0)
            || ensure_slice(bytes, OFF_TAIL, INODE_SIZE - OFF_TAIL)?
                .iter()
                .any(|b| *b != 0)
        {
            return Err(ParseError::InvalidField {
                field: "inode_padding",
                reason: "reserved bytes are not zero",
            });
        }

        let mut direct = [0_u32; DIRECT_BLOCKS];
        for (i, ptr) in direct.iter_mut().enumerate() {
            *ptr = read_le_u32(bytes, OFF_DIRECT + i * 4)?;
        }

        Ok(Self {
            kind,
            size: read_le_u32(bytes, OFF_SIZE)?,
            direct,
        })
    }

    /// Serialize into the first `INODE_SIZE` bytes of `out`.
    pub fn write_to(&self, out: &mut [u8]) -> Result<(), ParseError> {
        let actual = out.len();
        let slot = out
            .get_mut(..INODE_SIZE)
            .ok_or(ParseError::InsufficientData {
                needed: INODE_SIZE,
                offset: 0,
                actual,
            })?;
        slot.fill(0);
        slot[OFF_KIND] = self.kind.to_raw();
        write_le_u32(slot, OFF_SIZE, self.size)?;
        for (i, ptr) in self.direct.iter().enumerate() {
            write_le_u32(slot, OFF_DIRECT + i * 4, *ptr)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_record_is_all_zero() {
        let mut bytes = [0xFF_u8; INODE_SIZE];
        InodeRecord::FREE.write_to(&mut bytes).expect("encode");
        assert_eq!(bytes, [0_u8; INODE_SIZE]);
        assert_eq!(
            InodeRecord::parse_from_bytes(&bytes).expect("parse"),
            InodeRecord::FREE
        );
    }

    #[test]
    fn file_record_layout() {
        let record = InodeRecord {
            kind: FileKind::File,
            size: 600,
            direct: [13, 14, 0, 0, 0, 0, 0, 0],
        };
        let mut bytes = [0_u8; INODE_SIZE];
        record.write_to(&mut bytes).expect("encode");
        assert_eq!(bytes[0], 2);
        assert_eq!(read_le_u32(&bytes, OFF_SIZE).unwrap(), 600);
        assert_eq!(read_le_u32(&bytes, OFF_DIRECT + 4).unwrap(), 14);
        assert_eq!(InodeRecord::parse_from_bytes(&bytes).unwrap(), record);
        assert_eq!(record.block_count(), 2);
        assert!(record.pointers_are_dense());
    }

    #[test]
    fn detects_holes() {
        let record = InodeRecord {
            kind: FileKind::File,
            size: 1024,
            direct: [13, 0, 15, 0, 0, 0, 0, 0],
        };
        assert_eq!(record.block_count(), 1);
        assert!(!record.pointers_are_dense());
        assert_eq!(record.blocks().collect::<Vec<_>>(), vec![13, 15]);
    }

    #[test]
    fn rejects_bad_kind_and_padding() {
        let mut bytes = [0_u8; INODE_SIZE];
        bytes[0] = 7;
        assert!(matches!(
            InodeRecord::parse_from_bytes(&bytes),
            Err(ParseError::InvalidField {
                field: "inode_kind",
                ..
            })
        ));

        let mut bytes = [0_u8; INODE_SIZE];
        bytes[2] = 1;
        assert!(matches!(
            InodeRecord::parse_from_bytes(&bytes),
            Err(ParseError::InvalidField {
                field: "inode_padding",
                ..
            })
        ));

        let mut bytes = [0_u8; INODE_SIZE];
        bytes[INODE_SIZE - 1] = 1;
        assert!(InodeRecord::parse_from_bytes(&bytes).is_err());
        assert!(InodeRecord::parse_from_bytes(&bytes[..10]).is_err());
    }
}
