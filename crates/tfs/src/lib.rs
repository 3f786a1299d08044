#![forbid(unsafe_code)]
//! TestFS public API facade.
//!
//! Re-exports the engine from `tfs-core` together with the error and device
//! types a caller needs to drive it. The harness and the binary depend on
//! this crate only.

pub use tfs_block::{
    BlockDevice, ByteBlockDevice, ByteDevice, FileByteDevice, GatedBlockDevice,
    MemoryByteDevice, NoFaults, ResetCountdown, WriteGate,
};
pub use tfs_core::*;
pub use tfs_error::{ExpectedKind, Result, TfsError};
pub use tfs_types::{BLOCK_SIZE, FileKind, InodeNumber, MAX_FILE_SIZE, NAME_MAX};
