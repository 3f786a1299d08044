use serde::{Deserialize, Serialize};
use tfs_types::{
    DIR_ENTRY_SIZE, InodeNumber, NAME_MAX, ParseError, ensure_slice, read_le_u32, write_le_u32,
};

const OFF_INODE: usize = 0x00;
const OFF_NAME_LEN: usize = 0x04;
const OFF_NAME: usize = 0x05;

/// One 32-byte directory entry: `inode: u32`, `name_len: u8`, `name: [u8; 27]`.
///
/// Names are non-empty, at most `NAME_MAX` bytes, contain neither `/` nor
/// NUL, and are never `.` or `..`. Bytes past `name_len` are zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirEntry {
    pub inode: InodeNumber,
    pub name: String,
}

/// Whether `name` may be stored in a directory entry.
pub fn validate_name(name: &[u8]) -> Result<(), ParseError> {
    if name.is_empty() {
        return Err(ParseError::InvalidField {
            field: "name",
            reason: "empty",
        });
    }
    if name.len() > NAME_MAX {
        return Err(ParseError::InvalidField {
            field: "name",
            reason: "too long",
        });
    }
    if name.iter().any(|b| *b == b'/' || *b == 0) {
        return Err(ParseError::InvalidField {
            field: "name",
            reason: "contains '/' or NUL",
        });
    }
    if name == b"." || name == b".." {
        return Err(ParseError::InvalidField {
            field: "name",
            reason: "reserved",
        });
    }
    Ok(())
}

impl DirEntry {
    #[must_use]
    pub fn new(inode: InodeNumber, name: impl Into<String>) -> Self {
        Self {
            inode,
            name: name.into(),
        }
    }

    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let raw = ensure_slice(bytes, 0, DIR_ENTRY_SIZE)?;
        let inode = InodeNumber(read_le_u32(raw, OFF_INODE)?);
        let name_len = usize::from(raw[OFF_NAME_LEN]);
        if name_len > NAME_MAX {
            return Err(ParseError::InvalidField {
                field: "name_len",
                reason: "exceeds NAME_MAX",
            });
        }
        let name = &raw[OFF_NAME..OFF_NAME + name_len];
        validate_name(name)?;
        if raw[OFF_NAME + name_len..].iter().any(|b| *b != 0) {
            return Err(ParseError::InvalidField {
                field: "name",
                reason: "trailing bytes are not zero",
            });
        }
        let name = std::str::from_utf8(name).map_err(|_| ParseError::InvalidField {
            field: "name",
            reason: "not UTF-8",
        })?;
        Ok(Self::new(inode, name))
    }

    /// Serialize into the first `DIR_ENTRY_SIZE` bytes of `out`.
    pub fn write_to(&self, out: &mut [u8]) -> Result<(), ParseError> {
        validate_name(self.name.as_bytes())?;
        let actual = out.len();
        let slot = out
            .get_mut(..DIR_ENTRY_SIZE)
            .ok_or(ParseError::InsufficientData {
                needed: DIR_ENTRY_SIZE,
                offset: 0,
                actual,
            })?;
        slot.fill(0);
        write_le_u32(slot, OFF_INODE, self.inode.0)?;
        let name = self.name.as_bytes();
        slot[OFF_NAME_LEN] = u8::try_from(name.len())
            .map_err(|_| ParseError::IntegerConversion { field: "name_len" })?;
        slot[OFF_NAME..OFF_NAME + name.len()].copy_from_slice(name);
        Ok(())
    }
}
