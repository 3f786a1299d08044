use serde::{Deserialize, Serialize};
use tfs_types::{
    BLOCK_SIZE_BYTES, BlockNumber, JOURNAL_CAPACITY, JOURNAL_MAGIC, ParseError, read_le_u32,
    read_le_u64, write_le_u32, write_le_u64,
};

const OFF_MAGIC: usize = 0x00;
const OFF_COUNT: usize = 0x04;
const OFF_SEQUENCE: usize = 0x08;
const OFF_CHECKSUM: usize = 0x10;
const OFF_ENTRIES: usize = 0x18;
const ENTRY_SIZE: usize = 8;

/// Home location and payload digest of one journaled block image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub target: BlockNumber,
    pub payload_crc: u32,
}

/// The commit record of the redo journal.
///
/// A header block that is all zero means no transaction is pending. The
/// header CRC32C is computed over the whole block with the checksum field
/// zeroed; entry `i` describes payload slot `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalHeader {
    pub sequence: u64,
    pub entries: Vec<JournalEntry>,
}

impl JournalHeader {
    pub fn to_block(&self) -> Result<Vec<u8>, ParseError> {
        if self.entries.len() > JOURNAL_CAPACITY as usize {
            return Err(ParseError::InvalidField {
                field: "journal_count",
                reason: "exceeds journal capacity",
            });
        }
        let mut block = vec![0_u8; BLOCK_SIZE_BYTES];
        write_le_u32(&mut block, OFF_MAGIC, JOURNAL_MAGIC)?;
        write_le_u32(
            &mut block,
            OFF_COUNT,
            u32::try_from(self.entries.len())
                .map_err(|_| ParseError::IntegerConversion { field: "journal_count" })?,
        )?;
        write_le_u64(&mut block, OFF_SEQUENCE, self.sequence)?;
        for (i, entry) in self.entries.iter().enumerate() {
            let off = OFF_ENTRIES + i * ENTRY_SIZE;
            write_le_u32(&mut block, off, entry.target.to_u32()?)?;
            write_le_u32(&mut block, off + 4, entry.payload_crc)?;
        }
        let crc = crc32c::crc32c(&block);
        write_le_u32(&mut block, OFF_CHECKSUM, crc)?;
        Ok(block)
    }

    /// `Ok(None)` for a clear header, `Ok(Some(_))` for a sealed one.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Option<Self>, ParseError> {
        if bytes.iter().all(|b| *b == 0) {
            return Ok(None);
        }
        let magic = read_le_u32(bytes, OFF_MAGIC)?;
        if magic != JOURNAL_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(JOURNAL_MAGIC),
                actual: u64::from(magic),
            });
        }
        if bytes.len() != BLOCK_SIZE_BYTES {
            return Err(ParseError::InsufficientData {
                needed: BLOCK_SIZE_BYTES,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let stored = read_le_u32(bytes, OFF_CHECKSUM)?;
        let mut unsealed = bytes.to_vec();
        write_le_u32(&mut unsealed, OFF_CHECKSUM, 0)?;
        let computed = crc32c::crc32c(&unsealed);
        if stored != computed {
            return Err(ParseError::ChecksumMismatch {
                field: "journal_header",
                expected: stored,
                actual: computed,
            });
        }

        let count = read_le_u32(bytes, OFF_COUNT)?;
        if count > JOURNAL_CAPACITY {
            return Err(ParseError::InvalidField {
                field: "journal_count",
                reason: "exceeds journal capacity",
            });
        }
        let entries = (0..count as usize)
            .map(|i| {
                let off = OFF_ENTRIES + i * ENTRY_SIZE;
                Ok(JournalEntry {
                    target: BlockNumber(u64::from(read_le_u32(bytes, off)?)),
                    payload_crc: read_le_u32(bytes, off + 4)?,
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        Ok(Some(Self {
            sequence: read_le_u64(bytes, OFF_SEQUENCE)?,
            entries,
        }))
    }
}
