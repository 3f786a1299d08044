#![forbid(unsafe_code)]
//! Driver-facing surface for TestFS.
//!
//! [`Session`] is the explicit context a driver threads through every call:
//! the in-memory storage, the fault countdown and the open filesystem. Every
//! operation returns an `i32` result code (0 on success, `-errno` on
//! failure). After each step the driver calls [`Session::after_step`], which
//! reopens from storage when the countdown fired and then runs the checker.

pub mod e2e;
pub mod model;

use serde::{Deserialize, Serialize};
use tfs::{
    BLOCK_SIZE, BlockDevice, ByteBlockDevice, CheckReport, Filesystem, FormatOptions,
    GatedBlockDevice, MemoryByteDevice, ResetCountdown, Result, TfsError,
};
use tracing::{debug, info};

/// Map an engine result to a driver result code.
#[must_use]
pub fn result_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => err.to_code(),
    }
}

/// What [`Session::after_step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// The countdown had fired and the image was reopened from storage.
    pub reopened: bool,
    pub report: CheckReport,
}

/// Storage, countdown and the open filesystem of one driver run.
#[derive(Debug)]
pub struct Session {
    opts: FormatOptions,
    storage: MemoryByteDevice,
    offset: u64,
    countdown: ResetCountdown,
    fs: Option<Filesystem>,
}

impl Session {
    /// Fresh zeroed storage, formatted with `opts`.
    pub fn format(opts: FormatOptions) -> Result<Self> {
        Self::format_at(opts, 0)
    }

    /// As [`Session::format`], with the image starting `offset` bytes into
    /// the storage.
    pub fn format_at(opts: FormatOptions, offset: u64) -> Result<Self> {
        let len = offset
            .checked_add(opts.image_len())
            .and_then(|len| usize::try_from(len).ok())
            .ok_or_else(|| TfsError::Format(format!("offset {offset} overflows storage")))?;
        let mut session = Self {
            opts,
            storage: MemoryByteDevice::new(len),
            offset,
            countdown: ResetCountdown::disarmed(),
            fs: None,
        };
        session.fs = Some(Filesystem::format(session.device()?, &opts)?);
        info!(
            target: "tfs::harness",
            total_blocks = opts.total_blocks,
            inode_count = opts.inode_count,
            offset,
            "session_format"
        );
        Ok(session)
    }

    fn device(&self) -> Result<Box<dyn BlockDevice>> {
        let dev = ByteBlockDevice::with_offset(self.storage.clone(), BLOCK_SIZE, self.offset)?;
        Ok(Box::new(GatedBlockDevice::new(dev, self.countdown.clone())))
    }

    /// Drop the current handle and open the image again from storage.
    pub fn reopen(&mut self) -> Result<()> {
        self.close();
        self.fs = Some(Filesystem::open(self.device()?)?);
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(fs) = self.fs.take() {
            fs.close();
        }
    }

    /// The open filesystem.
    pub fn fs(&self) -> Result<&Filesystem> {
        self.fs
            .as_ref()
            .ok_or_else(|| TfsError::Io(std::io::Error::other("no open filesystem")))
    }

    #[must_use]
    pub fn options(&self) -> &FormatOptions {
        &self.opts
    }

    #[must_use]
    pub fn storage(&self) -> &MemoryByteDevice {
        &self.storage
    }

    /// Arm the countdown. Only one countdown may be pending at a time.
    pub fn set_countdown(&self, k: i64) {
        debug_assert!(
            !self.countdown.is_armed(),
            "a countdown is already pending"
        );
        self.countdown.set(k);
    }

    #[must_use]
    pub fn get_countdown(&self) -> i64 {
        self.countdown.get()
    }

    /// Reopen if the countdown fired, then check the image.
    pub fn after_step(&mut self) -> Result<StepOutcome> {
        let reopened = self.countdown.is_triggered();
        if reopened {
            let dropped = self.countdown.dropped_writes();
            self.countdown.disarm();
            self.reopen()?;
            info!(target: "tfs::harness", dropped_writes = dropped, "crash_reopen");
        }
        let report = self.checkfs()?;
        Ok(StepOutcome { reopened, report })
    }

    pub fn checkfs(&self) -> Result<CheckReport> {
        self.fs()?.checkfs()
    }

    pub fn mkdir(&self, path: &str) -> i32 {
        result_code(&self.fs().and_then(|fs| fs.mkdir(path)))
    }

    pub fn rmdir(&self, path: &str) -> i32 {
        result_code(&self.fs().and_then(|fs| fs.rmdir(path)))
    }

    pub fn create(&self, path: &str) -> i32 {
        result_code(&self.fs().and_then(|fs| fs.create(path)))
    }

    pub fn write(&self, path: &str, data: &[u8]) -> i32 {
        result_code(&self.fs().and_then(|fs| fs.write(path, data)))
    }

    pub fn stat(&self, path: &str) -> i32 {
        result_code(&self.fs().and_then(|fs| fs.stat(path)))
    }

    pub fn cat(&self, path: &str) -> i32 {
        result_code(&self.fs().and_then(|fs| fs.cat(path)))
    }

    /// Root directory listing, one `name inode` line per entry in stored
    /// order.
    pub fn ls_lines(&self) -> Result<Vec<String>> {
        let entries = self.fs()?.ls()?;
        Ok(entries
            .iter()
            .map(|entry| format!("{} {}", entry.name, entry.inode))
            .collect())
    }

    /// Recursive listing in pre-order, one `path kind inode size` line per
    /// node, starting with `/`.
    pub fn lsr_lines(&self) -> Result<Vec<String>> {
        let tree = self.fs()?.lsr()?;
        Ok(tree
            .iter()
            .map(|entry| {
                format!(
                    "{} {} {} {}",
                    entry.path, entry.stat.kind, entry.stat.inode, entry.stat.size
                )
            })
            .collect())
    }

    pub fn ls(&self) -> i32 {
        let result = self.ls_lines();
        if let Ok(lines) = &result {
            for line in lines {
                debug!(target: "tfs::harness", entry = %line, "ls");
            }
        }
        result_code(&result)
    }

    pub fn lsr(&self) -> i32 {
        let result = self.lsr_lines();
        if let Ok(lines) = &result {
            for line in lines {
                debug!(target: "tfs::harness", entry = %line, "lsr");
            }
        }
        result_code(&result)
    }
}

/// Outcome of the fixed `a/f` crash scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub countdown: i64,
    pub write_code: i32,
    pub reopened: bool,
    pub recovered: String,
    pub report: CheckReport,
}

/// Format, create `a/f`, crash while writing `"xy"` to it with the given
/// countdown, reopen and read the file back.
pub fn run_write_crash_scenario(opts: FormatOptions, countdown: i64) -> Result<ScenarioReport> {
    let mut session = Session::format(opts)?;
    session.fs()?.mkdir("a")?;
    session.fs()?.create("a/f")?;
    session.after_step()?;

    session.set_countdown(countdown);
    let write_code = session.write("a/f", b"xy");
    let outcome = session.after_step()?;
    let recovered = session.fs()?.cat("a/f")?;
    info!(
        target: "tfs::harness",
        countdown,
        write_code,
        reopened = outcome.reopened,
        recovered_len = recovered.len(),
        "scenario_done"
    );
    Ok(ScenarioReport {
        countdown,
        write_code,
        reopened: outcome.reopened,
        recovered: String::from_utf8_lossy(&recovered).into_owned(),
        report: outcome.report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_errno() {
        let session = Session::format(FormatOptions::default()).expect("format");
        assert_eq!(session.mkdir("a"), 0);
        assert_eq!(
            session.mkdir("a"),
            TfsError::AlreadyExists(String::new()).to_code()
        );
        assert_eq!(session.ls(), 0);
        assert_eq!(session.lsr(), 0);
        assert!(session.cat("a") < 0);
        assert!(session.stat("missing") < 0);
    }

    #[test]
    fn listings_show_entries() {
        let session = Session::format(FormatOptions::default()).expect("format");
        assert_eq!(session.mkdir("a"), 0);
        assert_eq!(session.create("a/f"), 0);
        assert_eq!(session.write("a/f", b"xy"), 0);
        assert_eq!(session.create("g"), 0);

        assert_eq!(session.ls_lines().expect("ls"), vec!["a 1", "g 3"]);
        assert_eq!(
            session.lsr_lines().expect("lsr"),
            vec!["/ dir 0 64", "/a dir 1 32", "/a/f file 2 2", "/g file 3 0"]
        );
    }

    #[test]
    fn closed_session_reports_errors() {
        let mut session = Session::format(FormatOptions::default()).expect("format");
        session.close();
        assert!(session.mkdir("a") < 0);
        assert!(session.checkfs().is_err());
        session.reopen().expect("reopen");
        assert_eq!(session.mkdir("a"), 0);
    }

    #[test]
    fn countdown_triggers_reopen() {
        let mut session = Session::format(FormatOptions::default()).expect("format");
        session.set_countdown(1);
        assert_eq!(session.get_countdown(), 1);
        assert_eq!(session.mkdir("a"), 0);
        let outcome = session.after_step().expect("check");
        assert!(outcome.reopened);
        assert_eq!(session.get_countdown(), ResetCountdown::DISARMED);
        // One write landed: a journal payload, which is never replayed.
        assert_eq!(outcome.report.inodes_in_use, 1);
    }

    #[test]
    fn image_at_offset() {
        let mut session = Session::format_at(FormatOptions::default(), 4096).expect("format");
        assert_eq!(session.create("f"), 0);
        session.reopen().expect("reopen");
        assert_eq!(session.stat("f"), 0);
        assert!(session.storage().snapshot()[..4096].iter().all(|b| *b == 0));
    }
}
