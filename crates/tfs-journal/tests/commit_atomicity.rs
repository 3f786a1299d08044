#![forbid(unsafe_code)]

use proptest::prelude::*;
use tfs_block::{BlockDevice, ByteBlockDevice, GatedBlockDevice, MemoryByteDevice, ResetCountdown};
use tfs_journal::{Journal, RecoveryOutcome, Transaction};
use tfs_ondisk::FormatOptions;
use tfs_types::{BLOCK_SIZE_BYTES, BlockNumber};

fn fill_block(dev: &dyn BlockDevice, block: u64, fill: u8) {
    dev.write_block(BlockNumber(block), &[fill; BLOCK_SIZE_BYTES])
        .expect("write");
}

proptest! {
    /// Whatever prefix of a commit survives, recovery yields either the old
    /// image set or the new one, never a blend.
    #[test]
    fn recovered_state_is_before_or_after(
        targets in proptest::collection::btree_set(1_u64..207, 1..20),
        cut in 0_i64..48,
    ) {
        let opts = FormatOptions::default();
        let geo = opts.geometry().expect("geometry");
        let mem = MemoryByteDevice::new(usize::try_from(opts.image_len()).expect("len"));
        {
            let dev = ByteBlockDevice::new(mem.clone(), 512).expect("device");
            for block in &targets {
                fill_block(&dev, *block, 0x11);
            }
        }
        let before = mem.snapshot();

        let countdown = ResetCountdown::disarmed();
        let gated = GatedBlockDevice::new(
            ByteBlockDevice::new(mem.clone(), 512).expect("device"),
            countdown.clone(),
        );
        let txn = Transaction::new(&gated);
        for block in &targets {
            fill_block(&txn, *block, 0x22);
        }
        let writes = txn.into_writes();
        countdown.set(cut);
        Journal::new(&geo).commit(&gated, &writes).expect("commit");
        drop(gated);

        let dev = ByteBlockDevice::new(mem.clone(), 512).expect("reopen");
        let outcome = Journal::new(&geo).recover(&dev).expect("recover");
        prop_assert_ne!(outcome, RecoveryOutcome::Discarded);

        let home: Vec<u8> = targets
            .iter()
            .map(|b| dev.read_block(BlockNumber(*b)).expect("read").as_slice()[0])
            .collect();
        let all_old = home.iter().all(|b| *b == 0x11);
        let all_new = home.iter().all(|b| *b == 0x22);
        prop_assert!(all_old || all_new, "mixed state {home:?}");

        // Outside the journal region nothing but the targets changed.
        let after = mem.snapshot();
        let journal_start = usize::try_from(geo.journal.start).expect("start") * BLOCK_SIZE_BYTES;
        for (block, (old, new)) in before[..journal_start]
            .chunks(BLOCK_SIZE_BYTES)
            .zip(after[..journal_start].chunks(BLOCK_SIZE_BYTES))
            .enumerate()
        {
            if !targets.contains(&(block as u64)) {
                prop_assert_eq!(old, new);
            }
        }
    }
}
