#![forbid(unsafe_code)]
//! Error types for TestFS.
//!
//! # Error Taxonomy
//!
//! TestFS uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `tfs-types` | On-disk format violations detected during byte decoding |
//! | Runtime | `TfsError` | `tfs-error` (this crate) | Caller-facing errors for the engine, the harness and the binary |
//!
//! ## Mapping Policy: ParseError → TfsError
//!
//! `tfs-error` does not depend on `tfs-types`. The conversion is done in
//! `tfs-core`, which knows whether the decode happened while opening an image
//! or while serving a live operation:
//!
//! | Context | TfsError Variant |
//! |---------|------------------|
//! | superblock decode during `open` | `CorruptSuperblock(detail)` |
//! | inode / directory / journal decode during an operation | `Corruption { block, detail }` |
//!
//! ## Fatal vs. recoverable
//!
//! Operation-level errors (`NotFound`, `WrongType`, `AlreadyExists`, ...) are
//! expected: the caller gets a result code and may carry on with another path.
//! `CorruptSuperblock`, `Corruption`, `InvariantViolation` and `Io` mean the
//! image left the envelope the engine guarantees; [`TfsError::is_fatal`]
//! reports them so a driver can stop the session.
//!
//! ## Result codes
//!
//! Every variant maps to exactly one POSIX errno via [`TfsError::to_errno`].
//! The driver-facing surface returns `0` on success and [`TfsError::to_code`]
//! (`-errno`) on failure.
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error or `EIO` |
//! | `NotFound` | `ENOENT` |
//! | `WrongType { expected: Directory }` | `ENOTDIR` |
//! | `WrongType { expected: File }` | `EISDIR` |
//! | `AlreadyExists` | `EEXIST` |
//! | `NotEmpty` | `ENOTEMPTY` |
//! | `Busy` | `EBUSY` |
//! | `InvalidPath` | `EINVAL` |
//! | `AllocationExhausted` | `ENOSPC` |
//! | `StorageFull` | `EDQUOT` |
//! | `NameTooLong` | `ENAMETOOLONG` |
//! | `DataTooLong` | `EFBIG` |
//! | `ChecksumMismatch` | `EBADMSG` |
//! | `CorruptSuperblock` | `EUCLEAN` |
//! | `Corruption` | `EIO` |
//! | `InvariantViolation` | `ENOTRECOVERABLE` |
//! | `Format` | `EINVAL` |

use std::fmt;
use thiserror::Error;

/// The kind of object an operation required at a path component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpectedKind {
    Directory,
    File,
}

impl fmt::Display for ExpectedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory => write!(f, "directory"),
            Self::File => write!(f, "file"),
        }
    }
}

/// Unified error type for all TestFS operations.
#[derive(Debug, Error)]
pub enum TfsError {
    /// Operating system I/O error from a file-backed device.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A path component does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A path component exists but has the wrong type.
    #[error("{path}: expected a {expected}")]
    WrongType { path: String, expected: ExpectedKind },

    /// mkdir/create on a name that is already present.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// rmdir on a directory that still has entries.
    #[error("directory not empty: {0}")]
    NotEmpty(String),

    /// rmdir on the root directory.
    #[error("resource busy: {0}")]
    Busy(String),

    /// The path cannot name the requested object (NUL byte, rmdir of `.`).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// No free inode or data block is left.
    #[error("no free {0} left")]
    AllocationExhausted(&'static str),

    /// A fixed per-object limit was hit (directory slots, journal capacity).
    #[error("storage full: {0}")]
    StorageFull(String),

    /// A path component exceeds the directory-entry name limit.
    #[error("name too long")]
    NameTooLong,

    /// A write payload exceeds the largest file the inode can describe.
    #[error("data too long: {len} bytes exceeds maximum of {max}")]
    DataTooLong { len: usize, max: usize },

    /// A block's content does not match its checksum-table entry.
    #[error("checksum mismatch at block {block}")]
    ChecksumMismatch { block: u64 },

    /// The superblock cannot describe a usable image.
    #[error("corrupt superblock: {0}")]
    CorruptSuperblock(String),

    /// Live metadata failed to decode at a known block.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: String },

    /// The consistency checker rejected the on-disk state.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Invalid format options or device geometry.
    #[error("invalid format: {0}")]
    Format(String),
}

impl TfsError {
    /// Convert this error into a POSIX errno.
    ///
    /// The match is exhaustive so a new variant cannot ship without a code.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::NotFound(_) => libc::ENOENT,
            Self::WrongType { expected, .. } => match expected {
                ExpectedKind::Directory => libc::ENOTDIR,
                ExpectedKind::File => libc::EISDIR,
            },
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::NotEmpty(_) => libc::ENOTEMPTY,
            Self::Busy(_) => libc::EBUSY,
            Self::InvalidPath(_) | Self::Format(_) => libc::EINVAL,
            Self::AllocationExhausted(_) => libc::ENOSPC,
            Self::StorageFull(_) => libc::EDQUOT,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::DataTooLong { .. } => libc::EFBIG,
            Self::ChecksumMismatch { .. } => libc::EBADMSG,
            Self::CorruptSuperblock(_) => libc::EUCLEAN,
            Self::Corruption { .. } => libc::EIO,
            Self::InvariantViolation(_) => libc::ENOTRECOVERABLE,
        }
    }

    /// Driver-facing result code: the negated errno.
    #[must_use]
    pub fn to_code(&self) -> i32 {
        -self.to_errno()
    }

    /// Whether the error means the session can no longer be trusted.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::CorruptSuperblock(_)
                | Self::Corruption { .. }
                | Self::InvariantViolation(_)
        )
    }
}

/// Result alias using `TfsError`.
pub type Result<T> = std::result::Result<T, TfsError>;
