//! Deterministic crash-replay suite.
//!
//! Each schedule is a seeded sequence of driver steps over a small path
//! alphabet, interleaved with countdown arms. The suite runs it against a
//! [`Session`] and the reference [`ModelFs`] side by side:
//!
//! - every result code must equal the model's prediction
//! - the checker must accept the image after every step
//! - after a crash the recovered tree must equal the model either before or
//!   after the interrupted step, and the model follows whichever it was
//! - at the end the engine tree must equal the model tree

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tfs::{FormatOptions, MAX_FILE_SIZE, NAME_MAX, TfsError};
use tracing::{debug, info, warn};

use crate::Session;
use crate::model::{ModelFs, TreeSnapshot, snapshot_of};

const PATH_ALPHABET: &[u8] = b"aAbB/.";
const MAX_PATH_LEN: usize = 10;
const MAX_DATA_LEN: usize = 2;

/// One driver step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrashOperation {
    Mkdir { path: String },
    Rmdir { path: String },
    Create { path: String },
    Write { path: String, data: Vec<u8> },
    Stat { path: String },
    Cat { path: String },
    Ls,
    Lsr,
    SetCountdown { k: i64 },
}

/// A deterministic crash-replay schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrashSchedule {
    pub schedule_id: u32,
    pub seed: u64,
    pub operations: Vec<CrashOperation>,
}

/// Result for one generated schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashReplayScheduleResult {
    pub schedule_id: u32,
    pub seed: u64,
    pub operation_count: usize,
    /// Steps after which the image was reopened from storage.
    pub crashes: u32,
    /// Crashes where the interrupted step survived recovery.
    pub replayed: u32,
    /// Countdown arms skipped because one was already pending.
    pub skipped_countdowns: u32,
    pub passed: bool,
    pub errors: Vec<String>,
    pub duration_us: u64,
}

/// Config for the deterministic crash-replay suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashReplaySuiteConfig {
    /// Number of schedules to generate and execute.
    pub schedule_count: u32,
    /// Minimum steps in each schedule.
    pub min_operations: usize,
    /// Maximum steps in each schedule.
    pub max_operations: usize,
    /// Seed used to derive per-schedule deterministic seeds.
    pub base_seed: u64,
    /// Countdowns are drawn from `1..=max_countdown`.
    pub max_countdown: i64,
    pub format: FormatOptions,
    /// Optional directory to persist per-schedule artifacts.
    pub output_dir: Option<PathBuf>,
}

impl Default for CrashReplaySuiteConfig {
    fn default() -> Self {
        Self {
            schedule_count: 200,
            min_operations: 20,
            max_operations: 60,
            base_seed: 0x7F5E_ED00_0000_0001,
            max_countdown: 32,
            format: FormatOptions::default(),
            output_dir: None,
        }
    }
}

/// Aggregate result of the crash-replay suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashReplaySuiteReport {
    pub schedule_count: u32,
    pub passed_schedules: u32,
    pub failed_schedules: u32,
    pub total_crashes: u32,
    pub duration_us: u64,
    pub output_dir: Option<String>,
    pub results: Vec<CrashReplayScheduleResult>,
}

#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn next_bool(&mut self) -> bool {
        self.next_u64() & 1 == 0
    }

    fn next_usize(&mut self, upper_exclusive: usize) -> usize {
        if upper_exclusive <= 1 {
            return 0;
        }
        let upper_u64 = u64::try_from(upper_exclusive).unwrap_or(u64::MAX);
        let value = self.next_u64() % upper_u64;
        usize::try_from(value).unwrap_or(0)
    }

    fn one_of(&mut self, alphabet: &[u8]) -> u8 {
        alphabet[self.next_usize(alphabet.len())]
    }

    /// 1 to 10 characters over `aAbB/.`, occasionally with one over-long
    /// component.
    fn path(&mut self) -> String {
        let len = 1 + self.next_usize(MAX_PATH_LEN);
        let mut path: String = (0..len)
            .map(|_| char::from(self.one_of(PATH_ALPHABET)))
            .collect();
        if self.next_usize(40) == 0 {
            path.push('/');
            path.push_str(&"a".repeat(NAME_MAX + 1));
        }
        path
    }

    /// 1 or 2 bytes over `{x, y}`, occasionally a multi-block payload.
    fn data(&mut self) -> Vec<u8> {
        let len = if self.next_usize(16) == 0 {
            1 + self.next_usize(MAX_FILE_SIZE)
        } else {
            1 + self.next_usize(MAX_DATA_LEN)
        };
        (0..len)
            .map(|_| if self.next_bool() { b'x' } else { b'y' })
            .collect()
    }
}

fn next_operation(rng: &mut DeterministicRng, max_countdown: i64) -> CrashOperation {
    match rng.next_usize(9) {
        0 => CrashOperation::Mkdir { path: rng.path() },
        1 => CrashOperation::Rmdir { path: rng.path() },
        2 => CrashOperation::Ls,
        3 => CrashOperation::Lsr,
        4 => CrashOperation::Create { path: rng.path() },
        5 => CrashOperation::Write {
            path: rng.path(),
            data: rng.data(),
        },
        6 => CrashOperation::Stat { path: rng.path() },
        7 => CrashOperation::Cat { path: rng.path() },
        _ => {
            let span = usize::try_from(max_countdown.max(1)).unwrap_or(1);
            let k = 1 + rng.next_usize(span);
            CrashOperation::SetCountdown {
                k: i64::try_from(k).unwrap_or(1),
            }
        }
    }
}

fn derive_schedule_seed(base_seed: u64, schedule_id: u32) -> u64 {
    base_seed ^ u64::from(schedule_id).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Generate one deterministic crash-replay schedule.
pub fn generate_crash_schedule(
    schedule_id: u32,
    seed: u64,
    min_operations: usize,
    max_operations: usize,
    max_countdown: i64,
) -> Result<CrashSchedule> {
    if min_operations == 0 {
        bail!("min_operations must be greater than zero");
    }
    if max_operations < min_operations {
        bail!("max_operations must be >= min_operations");
    }
    if max_countdown < 1 {
        bail!("max_countdown must be at least 1");
    }

    let mut rng = DeterministicRng::new(seed);
    let span = max_operations
        .saturating_sub(min_operations)
        .saturating_add(1);
    let operation_count = min_operations.saturating_add(rng.next_usize(span));
    let operations = (0..operation_count)
        .map(|_| next_operation(&mut rng, max_countdown))
        .collect();

    Ok(CrashSchedule {
        schedule_id,
        seed,
        operations,
    })
}

fn expected_code<T>(result: &std::result::Result<T, TfsError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => err.to_code(),
    }
}

/// Run one step on both sides. Returns `(engine code, model code)`, or
/// `None` for a countdown arm that had to be skipped.
fn apply_step(session: &Session, model: &mut ModelFs, op: &CrashOperation) -> Option<(i32, i32)> {
    Some(match op {
        CrashOperation::Mkdir { path } => (session.mkdir(path), expected_code(&model.mkdir(path))),
        CrashOperation::Rmdir { path } => (session.rmdir(path), expected_code(&model.rmdir(path))),
        CrashOperation::Create { path } => {
            (session.create(path), expected_code(&model.create(path)))
        }
        CrashOperation::Write { path, data } => (
            session.write(path, data),
            expected_code(&model.write(path, data)),
        ),
        CrashOperation::Stat { path } => (session.stat(path), expected_code(&model.stat(path))),
        CrashOperation::Cat { path } => (session.cat(path), expected_code(&model.cat(path))),
        CrashOperation::Ls => (session.ls(), 0),
        CrashOperation::Lsr => (session.lsr(), 0),
        CrashOperation::SetCountdown { k } => {
            if session.get_countdown() >= 0 {
                return None;
            }
            session.set_countdown(*k);
            (0, 0)
        }
    })
}

fn snapshot(session: &Session) -> std::result::Result<TreeSnapshot, TfsError> {
    snapshot_of(session.fs()?)
}

/// Execute a generated schedule.
pub fn run_crash_schedule(
    schedule: &CrashSchedule,
    format: FormatOptions,
) -> Result<CrashReplayScheduleResult> {
    if schedule.operations.is_empty() {
        bail!("schedule has no operations");
    }

    let start = Instant::now();
    let mut session = Session::format(format).context("format session image")?;
    let mut model = ModelFs::new(session.fs()?.geometry());
    let mut errors = Vec::new();
    let mut crashes = 0_u32;
    let mut replayed = 0_u32;
    let mut skipped_countdowns = 0_u32;

    for (index, op) in schedule.operations.iter().enumerate() {
        let before = model.clone();
        let Some((code, expected)) = apply_step(&session, &mut model, op) else {
            skipped_countdowns += 1;
            continue;
        };
        debug!(target: "tfs::harness", step = index, ?op, code, "step");
        if code != expected {
            errors.push(format!(
                "step {index}: {op:?} returned {code}, model expected {expected}"
            ));
            break;
        }
        if matches!(op, CrashOperation::Ls) {
            let names: Vec<String> = session
                .fs()
                .and_then(tfs::Filesystem::ls)
                .map(|entries| entries.into_iter().map(|entry| entry.name).collect())
                .unwrap_or_default();
            if names != model.ls() {
                errors.push(format!("step {index}: root listing {names:?} differs from the model"));
                break;
            }
        }

        let outcome = match session.after_step() {
            Ok(outcome) => outcome,
            Err(err) => {
                errors.push(format!("step {index}: after {op:?}: {err}"));
                break;
            }
        };
        if !outcome.reopened {
            continue;
        }

        crashes += 1;
        let recovered = match snapshot(&session) {
            Ok(recovered) => recovered,
            Err(err) => {
                errors.push(format!("step {index}: reading recovered tree: {err}"));
                break;
            }
        };
        if recovered == model.snapshot() {
            if model != before {
                replayed += 1;
            }
        } else if recovered == before.snapshot() {
            model = before;
        } else {
            errors.push(format!(
                "step {index}: recovered tree matches neither side of {op:?}"
            ));
            break;
        }
    }

    if errors.is_empty() {
        match snapshot(&session) {
            Ok(tree) if tree == model.snapshot() => {}
            Ok(_) => errors.push("final tree differs from the model".to_owned()),
            Err(err) => errors.push(format!("reading final tree: {err}")),
        }
    }

    let passed = errors.is_empty();
    if !passed {
        warn!(
            target: "tfs::harness",
            schedule_id = schedule.schedule_id,
            seed = schedule.seed,
            first_error = %errors[0],
            "crash_replay_schedule_failed"
        );
    }
    Ok(CrashReplayScheduleResult {
        schedule_id: schedule.schedule_id,
        seed: schedule.seed,
        operation_count: schedule.operations.len(),
        crashes,
        replayed,
        skipped_countdowns,
        passed,
        errors,
        duration_us: u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX),
    })
}

fn write_schedule_artifact(
    output_dir: &Path,
    schedule: &CrashSchedule,
    result: &CrashReplayScheduleResult,
) -> Result<()> {
    #[derive(Serialize)]
    struct ScheduleArtifact<'a> {
        schedule: &'a CrashSchedule,
        result: &'a CrashReplayScheduleResult,
    }

    let schedules_dir = output_dir.join("schedules");
    fs::create_dir_all(&schedules_dir)
        .with_context(|| format!("create schedule artifact dir {}", schedules_dir.display()))?;

    let path = schedules_dir.join(format!("schedule_{:04}.json", schedule.schedule_id));
    let payload = ScheduleArtifact { schedule, result };
    let text = serde_json::to_string_pretty(&payload)
        .context("serialize crash schedule artifact to json")?;
    fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn write_manifest(
    output_dir: &Path,
    config: &CrashReplaySuiteConfig,
    report: &CrashReplaySuiteReport,
) -> Result<()> {
    #[derive(Serialize)]
    struct Manifest<'a> {
        config: &'a CrashReplaySuiteConfig,
        pkg_version: &'a str,
        schedule_count: u32,
        passed_schedules: u32,
        failed_schedules: u32,
        total_crashes: u32,
    }

    fs::create_dir_all(output_dir)
        .with_context(|| format!("create output dir {}", output_dir.display()))?;
    let manifest = Manifest {
        config,
        pkg_version: env!("CARGO_PKG_VERSION"),
        schedule_count: report.schedule_count,
        passed_schedules: report.passed_schedules,
        failed_schedules: report.failed_schedules,
        total_crashes: report.total_crashes,
    };
    let path = output_dir.join("manifest.json");
    let text = serde_json::to_string_pretty(&manifest).context("serialize manifest")?;
    fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Run the deterministic crash-replay suite.
pub fn run_crash_replay_suite(config: &CrashReplaySuiteConfig) -> Result<CrashReplaySuiteReport> {
    if config.schedule_count == 0 {
        bail!("schedule_count must be greater than zero");
    }

    let start = Instant::now();
    let mut results = Vec::with_capacity(usize::try_from(config.schedule_count).unwrap_or(0));
    let mut passed_schedules = 0_u32;
    let mut total_crashes = 0_u32;

    for schedule_id in 0..config.schedule_count {
        let seed = derive_schedule_seed(config.base_seed, schedule_id);
        let schedule = generate_crash_schedule(
            schedule_id,
            seed,
            config.min_operations,
            config.max_operations,
            config.max_countdown,
        )?;
        let result = run_crash_schedule(&schedule, config.format)?;
        if result.passed {
            passed_schedules = passed_schedules.saturating_add(1);
        }
        total_crashes = total_crashes.saturating_add(result.crashes);
        if let Some(output_dir) = &config.output_dir {
            write_schedule_artifact(output_dir, &schedule, &result)?;
        }
        results.push(result);
    }

    let report = CrashReplaySuiteReport {
        schedule_count: config.schedule_count,
        passed_schedules,
        failed_schedules: config.schedule_count.saturating_sub(passed_schedules),
        total_crashes,
        duration_us: u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX),
        output_dir: config
            .output_dir
            .as_ref()
            .map(|path| path.display().to_string()),
        results,
    };
    info!(
        target: "tfs::harness",
        schedules = report.schedule_count,
        passed = report.passed_schedules,
        crashes = report.total_crashes,
        "crash_replay_suite"
    );

    if let Some(output_dir) = &config.output_dir {
        write_manifest(output_dir, config, &report)?;
    }
    Ok(report)
}
