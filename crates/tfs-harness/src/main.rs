#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tfs::{BLOCK_SIZE, ByteBlockDevice, FileByteDevice, Filesystem, FormatOptions};
use tfs_harness::e2e::{CrashReplaySuiteConfig, run_crash_replay_suite};
use tfs_harness::run_write_crash_scenario;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tfs-harness")]
#[command(about = "Crash-replay and image tooling for TestFS")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the deterministic crash-replay suite.
    RunCrashReplay {
        /// Number of schedules to generate
        #[arg(long)]
        schedules: Option<u32>,
        #[arg(long)]
        min_ops: Option<usize>,
        #[arg(long)]
        max_ops: Option<usize>,
        /// Base seed for per-schedule seeds
        #[arg(long)]
        seed: Option<u64>,
        /// Largest countdown a schedule may arm
        #[arg(long)]
        max_countdown: Option<i64>,
        /// Directory for per-schedule artifacts
        #[arg(long)]
        out: Option<PathBuf>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Crash while writing "xy" to a/f and show what recovery kept.
    Scenario {
        #[arg(long, default_value_t = 2)]
        countdown: i64,
    },
    /// Create and format an image file.
    FormatImage {
        path: PathBuf,
        #[arg(long)]
        blocks: Option<u32>,
        #[arg(long)]
        inodes: Option<u32>,
    },
    /// Open an image file (replaying its journal) and check it.
    CheckImage { path: PathBuf },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    match Cli::parse().command {
        Command::RunCrashReplay {
            schedules,
            min_ops,
            max_ops,
            seed,
            max_countdown,
            out,
            json,
        } => {
            let defaults = CrashReplaySuiteConfig::default();
            let config = CrashReplaySuiteConfig {
                schedule_count: schedules.unwrap_or(defaults.schedule_count),
                min_operations: min_ops.unwrap_or(defaults.min_operations),
                max_operations: max_ops.unwrap_or(defaults.max_operations),
                base_seed: seed.unwrap_or(defaults.base_seed),
                max_countdown: max_countdown.unwrap_or(defaults.max_countdown),
                format: defaults.format,
                output_dir: out,
            };
            run_crash_replay(&config, json)
        }
        Command::Scenario { countdown } => {
            if countdown < 1 {
                bail!("--countdown must be at least 1");
            }
            let report = run_write_crash_scenario(FormatOptions::default(), countdown)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::FormatImage {
            path,
            blocks,
            inodes,
        } => {
            let defaults = FormatOptions::default();
            let opts = FormatOptions {
                total_blocks: blocks.unwrap_or(defaults.total_blocks),
                inode_count: inodes.unwrap_or(defaults.inode_count),
            };
            let file = FileByteDevice::create(&path, opts.image_len())
                .with_context(|| format!("failed to create {}", path.display()))?;
            let fs = Filesystem::format(Box::new(ByteBlockDevice::new(file, BLOCK_SIZE)?), &opts)?;
            println!("{}", serde_json::to_string_pretty(fs.geometry())?);
            fs.close();
            Ok(())
        }
        Command::CheckImage { path } => {
            let file = FileByteDevice::open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            let fs = Filesystem::open(Box::new(ByteBlockDevice::new(file, BLOCK_SIZE)?))?;
            let report = fs.checkfs()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            fs.close();
            Ok(())
        }
    }
}

fn run_crash_replay(config: &CrashReplaySuiteConfig, json: bool) -> Result<()> {
    let report = run_crash_replay_suite(config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "schedules={} passed={} failed={} crashes={} duration_us={}",
            report.schedule_count,
            report.passed_schedules,
            report.failed_schedules,
            report.total_crashes,
            report.duration_us
        );
        for result in report.results.iter().filter(|result| !result.passed) {
            println!(
                "schedule {} seed={:#x}: {}",
                result.schedule_id,
                result.seed,
                result.errors.join("; ")
            );
        }
    }
    if report.failed_schedules > 0 {
        bail!(
            "crash replay suite reported {} failing schedule(s)",
            report.failed_schedules
        );
    }
    Ok(())
}
