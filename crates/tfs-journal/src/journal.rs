use serde::{Deserialize, Serialize};
use tfs_block::BlockDevice;
use tfs_error::{Result, TfsError};
use tfs_ondisk::{Geometry, JournalEntry, JournalHeader};
use tfs_types::{BLOCK_SIZE_BYTES, BlockNumber, ParseError};
use tracing::{debug, info};

/// What `recover` found in the journal header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryOutcome {
    /// Header was clear; nothing was pending.
    Clean,
    /// Header was not a sealed commit record and was cleared.
    Discarded,
    /// A committed transaction of this many blocks was re-applied.
    Replayed(usize),
}

/// Single-slot redo journal.
///
/// Commit protocol, one block write at a time:
///
/// 1. every image goes to its payload slot;
/// 2. the sealed header goes to the header block (the commit point);
/// 3. every image goes to its home block;
/// 4. the header block is zeroed.
///
/// Truncating the write stream anywhere before step 2 leaves home blocks
/// untouched. Truncating at or after it leaves a sealed header that
/// [`Journal::recover`] replays.
#[derive(Debug, Clone)]
pub struct Journal {
    header: BlockNumber,
    capacity: u32,
    sequence: u64,
}

fn parse_to_tfs_error(block: BlockNumber, e: &ParseError) -> TfsError {
    TfsError::Corruption {
        block: block.0,
        detail: e.to_string(),
    }
}

impl Journal {
    #[must_use]
    pub fn new(geo: &Geometry) -> Self {
        Self {
            header: geo.journal_header(),
            capacity: geo.journal_capacity(),
            sequence: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn payload_block(&self, slot: usize) -> BlockNumber {
        BlockNumber(self.header.0 + 1 + slot as u64)
    }

    /// Zero the header block.
    pub fn clear(&self, dev: &dyn BlockDevice) -> Result<()> {
        dev.write_block(self.header, &[0_u8; BLOCK_SIZE_BYTES])
    }

    /// True when no committed transaction is waiting to be checkpointed.
    pub fn is_clean(&self, dev: &dyn BlockDevice) -> Result<bool> {
        Ok(dev
            .read_block(self.header)?
            .as_slice()
            .iter()
            .all(|b| *b == 0))
    }

    /// Make `writes` durable as one atomic unit.
    pub fn commit(&mut self, dev: &dyn BlockDevice, writes: &[(BlockNumber, Vec<u8>)]) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        if writes.len() > self.capacity as usize {
            return Err(TfsError::StorageFull(format!(
                "transaction of {} blocks exceeds journal capacity {}",
                writes.len(),
                self.capacity
            )));
        }

        self.sequence = self.sequence.wrapping_add(1);
        let mut entries = Vec::with_capacity(writes.len());
        for (slot, (target, image)) in writes.iter().enumerate() {
            dev.write_block(self.payload_block(slot), image)?;
            entries.push(JournalEntry {
                target: *target,
                payload_crc: crc32c::crc32c(image),
            });
        }

        let header = JournalHeader {
            sequence: self.sequence,
            entries,
        };
        let sealed = header
            .to_block()
            .map_err(|e| parse_to_tfs_error(self.header, &e))?;
        dev.write_block(self.header, &sealed)?;

        for (target, image) in writes {
            dev.write_block(*target, image)?;
        }
        self.clear(dev)?;

        debug!(
            target: "tfs::journal",
            sequence = self.sequence,
            blocks = writes.len(),
            "journal_commit"
        );
        Ok(())
    }

    /// Bring home blocks in line with the journal after an interruption.
    pub fn recover(&mut self, dev: &dyn BlockDevice) -> Result<RecoveryOutcome> {
        let raw = dev.read_block(self.header)?;
        let header = match JournalHeader::parse_from_bytes(raw.as_slice()) {
            Ok(None) => return Ok(RecoveryOutcome::Clean),
            Ok(Some(header)) => header,
            Err(err) => {
                info!(
                    target: "tfs::journal",
                    error = %err,
                    "journal_discard"
                );
                self.clear(dev)?;
                return Ok(RecoveryOutcome::Discarded);
            }
        };

        let mut images = Vec::with_capacity(header.entries.len());
        for (slot, entry) in header.entries.iter().enumerate() {
            let payload = self.payload_block(slot);
            let image = dev.read_block(payload)?.into_inner();
            let actual = crc32c::crc32c(&image);
            if actual != entry.payload_crc {
                return Err(TfsError::Corruption {
                    block: payload.0,
                    detail: format!(
                        "journal payload crc {actual:#010x} does not match header {:#010x}",
                        entry.payload_crc
                    ),
                });
            }
            if entry.target.0 >= dev.block_count() || entry.target.0 >= self.header.0 {
                return Err(TfsError::Corruption {
                    block: self.header.0,
                    detail: format!("journal target {} outside the filesystem", entry.target),
                });
            }
            images.push((entry.target, image));
        }

        for (target, image) in &images {
            dev.write_block(*target, image)?;
        }
        self.clear(dev)?;
        self.sequence = header.sequence;

        info!(
            target: "tfs::journal",
            sequence = header.sequence,
            blocks = images.len(),
            "journal_replay"
        );
        Ok(RecoveryOutcome::Replayed(images.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfs_block::{ByteBlockDevice, GatedBlockDevice, MemoryByteDevice, ResetCountdown};
    use tfs_ondisk::FormatOptions;

    fn geometry() -> Geometry {
        FormatOptions::default().geometry().expect("geometry")
    }

    fn image(fill: u8) -> Vec<u8> {
        vec![fill; BLOCK_SIZE_BYTES]
    }

    fn fresh() -> (MemoryByteDevice, Geometry) {
        let opts = FormatOptions::default();
        (
            MemoryByteDevice::new(usize::try_from(opts.image_len()).expect("len")),
            geometry(),
        )
    }

    #[test]
    fn commit_lands_home_and_clears_header() {
        let (mem, geo) = fresh();
        let dev = ByteBlockDevice::new(mem, 512).expect("device");
        let mut journal = Journal::new(&geo);
        journal
            .commit(&dev, &[(BlockNumber(20), image(1)), (BlockNumber(21), image(2))])
            .expect("commit");
        assert_eq!(dev.read_block(BlockNumber(20)).unwrap().as_slice(), image(1).as_slice());
        assert_eq!(dev.read_block(BlockNumber(21)).unwrap().as_slice(), image(2).as_slice());
        assert!(journal.is_clean(&dev).unwrap());
        assert_eq!(journal.recover(&dev).unwrap(), RecoveryOutcome::Clean);
    }

    #[test]
    fn oversized_transaction_is_refused_before_any_write() {
        let (mem, geo) = fresh();
        let dev = ByteBlockDevice::new(mem.clone(), 512).expect("device");
        let mut journal = Journal::new(&geo);
        let writes: Vec<_> = (0..=u64::from(journal.capacity()))
            .map(|b| (BlockNumber(13 + b), image(9)))
            .collect();
        assert!(matches!(
            journal.commit(&dev, &writes),
            Err(TfsError::StorageFull(_))
        ));
        assert!(mem.snapshot().iter().all(|b| *b == 0));
    }

    /// Commit of `n` images issues `n` payload writes, one header write, `n`
    /// home writes and one clearing write. Cut it at every point.
    #[test]
    fn every_truncation_point_is_all_or_nothing() {
        let writes = vec![
            (BlockNumber(14), image(0xA1)),
            (BlockNumber(2), image(0xA2)),
            (BlockNumber(30), image(0xA3)),
        ];
        let total_writes = 2 * writes.len() + 2;
        for cut in 0..=total_writes {
            let (mem, geo) = fresh();
            let countdown = ResetCountdown::disarmed();
            let gated = GatedBlockDevice::new(
                ByteBlockDevice::new(mem.clone(), 512).expect("device"),
                countdown.clone(),
            );
            countdown.set(i64::try_from(cut).expect("cut"));
            Journal::new(&geo).commit(&gated, &writes).expect("commit");
            drop(gated);

            let dev = ByteBlockDevice::new(mem, 512).expect("reopen");
            let outcome = Journal::new(&geo).recover(&dev).expect("recover");
            let committed = cut > writes.len();
            for (target, img) in &writes {
                let home = dev.read_block(*target).expect("read");
                if committed {
                    assert_eq!(home.as_slice(), img.as_slice(), "cut {cut}");
                } else {
                    assert!(home.as_slice().iter().all(|b| *b == 0), "cut {cut}");
                }
            }
            let expected = if committed && cut < total_writes {
                RecoveryOutcome::Replayed(writes.len())
            } else {
                RecoveryOutcome::Clean
            };
            assert_eq!(outcome, expected, "cut {cut}");
            assert!(Journal::new(&geo).is_clean(&dev).unwrap());
        }
    }

    #[test]
    fn garbage_header_is_discarded() {
        let (mem, geo) = fresh();
        let dev = ByteBlockDevice::new(mem, 512).expect("device");
        dev.write_block(geo.journal_header(), &image(0x5A)).expect("poke");
        let mut journal = Journal::new(&geo);
        assert_eq!(journal.recover(&dev).unwrap(), RecoveryOutcome::Discarded);
        assert!(journal.is_clean(&dev).unwrap());
    }

    #[test]
    fn damaged_payload_under_sealed_header_is_corruption() {
        let (mem, geo) = fresh();
        let dev = ByteBlockDevice::new(mem, 512).expect("device");
        let header = JournalHeader {
            sequence: 3,
            entries: vec![JournalEntry {
                target: BlockNumber(20),
                payload_crc: crc32c::crc32c(&image(1)),
            }],
        };
        dev.write_block(geo.journal_payload(0), &image(2)).expect("payload");
        dev.write_block(geo.journal_header(), &header.to_block().unwrap())
            .expect("header");
        assert!(matches!(
            Journal::new(&geo).recover(&dev),
            Err(TfsError::Corruption { .. })
        ));
    }
}
