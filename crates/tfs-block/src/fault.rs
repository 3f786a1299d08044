//! Write-stream fault injection.
//!
//! A [`WriteGate`] sees every block write before it reaches storage and
//! decides whether the write lands. [`ResetCountdown`] models an abrupt power
//! cut: after `k` more admitted writes, every later write is lost until the
//! countdown is disarmed. Writes that are dropped still report success, so the
//! engine above cannot tell that anything happened.

use crate::{BlockBuf, BlockDevice};
use parking_lot::Mutex;
use std::sync::Arc;
use tfs_error::Result;
use tfs_types::BlockNumber;
use tracing::warn;

/// Decides whether a block write reaches storage.
pub trait WriteGate: Send + Sync {
    fn admit(&self, block: BlockNumber) -> bool;
}

/// Admits every write.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl WriteGate for NoFaults {
    fn admit(&self, _block: BlockNumber) -> bool {
        true
    }
}

#[derive(Debug)]
struct CountdownState {
    remaining: i64,
    dropped: u64,
}

/// Shared write countdown.
///
/// | value | on block write |
/// |-------|----------------|
/// | negative | disarmed, admit |
/// | `0` | triggered, drop |
/// | `k > 0` | admit, decrement |
///
/// Clones share state: the session keeps one handle and the gated device
/// holds another.
#[derive(Debug, Clone)]
pub struct ResetCountdown {
    state: Arc<Mutex<CountdownState>>,
}

impl Default for ResetCountdown {
    fn default() -> Self {
        Self::disarmed()
    }
}

impl ResetCountdown {
    pub const DISARMED: i64 = -1;

    #[must_use]
    pub fn disarmed() -> Self {
        Self {
            state: Arc::new(Mutex::new(CountdownState {
                remaining: Self::DISARMED,
                dropped: 0,
            })),
        }
    }

    /// Arm (or re-arm) the countdown. Does not check for a pending countdown.
    pub fn set(&self, value: i64) {
        let mut state = self.state.lock();
        state.remaining = value;
        state.dropped = 0;
    }

    #[must_use]
    pub fn get(&self) -> i64 {
        self.state.lock().remaining
    }

    pub fn disarm(&self) {
        self.set(Self::DISARMED);
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.get() >= 0
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.get() == 0
    }

    /// Writes dropped since the countdown was last set.
    #[must_use]
    pub fn dropped_writes(&self) -> u64 {
        self.state.lock().dropped
    }
}

impl WriteGate for ResetCountdown {
    fn admit(&self, block: BlockNumber) -> bool {
        let mut state = self.state.lock();
        match state.remaining {
            r if r < 0 => true,
            0 => {
                state.dropped += 1;
                if state.dropped == 1 {
                    warn!(
                        target: "tfs::block",
                        block = block.0,
                        "write_gate_triggered"
                    );
                }
                false
            }
            _ => {
                state.remaining -= 1;
                true
            }
        }
    }
}

/// A `BlockDevice` whose writes pass through a [`WriteGate`].
#[derive(Debug)]
pub struct GatedBlockDevice<D, G> {
    inner: D,
    gate: G,
}

impl<D: BlockDevice, G: WriteGate> GatedBlockDevice<D, G> {
    pub fn new(inner: D, gate: G) -> Self {
        Self { inner, gate }
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }

    #[must_use]
    pub fn gate(&self) -> &G {
        &self.gate
    }
}

impl<D: BlockDevice, G: WriteGate> BlockDevice for GatedBlockDevice<D, G> {
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        self.inner.read_block(block)
    }

    fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()> {
        if self.gate.admit(block) {
            self.inner.write_block(block, data)
        } else {
            Ok(())
        }
    }

    fn block_size(&self) -> u32 {
        self.inner.block_size()
    }

    fn block_count(&self) -> u64 {
        self.inner.block_count()
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ByteBlockDevice, MemoryByteDevice};

    fn gated(countdown: &ResetCountdown) -> (MemoryByteDevice, impl BlockDevice) {
        let mem = MemoryByteDevice::new(512 * 8);
        let dev = ByteBlockDevice::new(mem.clone(), 512).expect("device");
        (mem, GatedBlockDevice::new(dev, countdown.clone()))
    }

    #[test]
    fn disarmed_countdown_admits_everything() {
        let countdown = ResetCountdown::disarmed();
        let (_mem, dev) = gated(&countdown);
        for block in 0..8 {
            dev.write_block(BlockNumber(block), &[1_u8; 512]).expect("write");
        }
        assert_eq!(countdown.get(), -1);
        assert_eq!(countdown.dropped_writes(), 0);
    }

    #[test]
    fn countdown_admits_k_writes_then_drops() {
        let countdown = ResetCountdown::disarmed();
        let (mem, dev) = gated(&countdown);
        countdown.set(2);

        for block in 0..5 {
            dev.write_block(BlockNumber(block), &[block as u8 + 1; 512])
                .expect("dropped writes still report success");
        }
        assert!(countdown.is_triggered());
        assert_eq!(countdown.dropped_writes(), 3);

        let raw = mem.snapshot();
        assert_eq!(raw[0], 1);
        assert_eq!(raw[512], 2);
        assert!(raw[1024..].iter().all(|b| *b == 0));
    }

    #[test]
    fn disarm_restores_writes() {
        let countdown = ResetCountdown::disarmed();
        let (mem, dev) = gated(&countdown);
        countdown.set(0);
        dev.write_block(BlockNumber(0), &[5_u8; 512]).expect("write");
        countdown.disarm();
        assert!(!countdown.is_armed());
        dev.write_block(BlockNumber(1), &[6_u8; 512]).expect("write");

        let raw = mem.snapshot();
        assert_eq!(raw[0], 0);
        assert_eq!(raw[512], 6);
    }

    #[test]
    fn reads_bypass_gate() {
        let countdown = ResetCountdown::disarmed();
        let (_mem, dev) = gated(&countdown);
        dev.write_block(BlockNumber(3), &[4_u8; 512]).expect("write");
        countdown.set(0);
        assert_eq!(
            dev.read_block(BlockNumber(3)).expect("read").as_slice(),
            &[4_u8; 512]
        );
        assert_eq!(countdown.dropped_writes(), 0);
    }

    #[test]
    fn no_faults_gate_admits() {
        assert!(NoFaults.admit(BlockNumber(0)));
    }
}
