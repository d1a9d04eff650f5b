use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Benchflow - declarative test-campaign sequencer
#[derive(Parser)]
#[command(name = "benchflow")]
#[command(about = "Run declarative measurement sequences against a bench of instruments")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a sequence against a bench
    Run {
        /// YAML sequence document to execute
        sequence: PathBuf,

        /// Bench TOML describing the instruments
        #[arg(short, long, default_value = "bench_configs/sim_bench.toml")]
        bench: PathBuf,

        /// Output directory for result streams and the run manifest
        #[arg(short, long, default_value = "runs/out")]
        out: PathBuf,

        /// Directory holding the per-bench calibration stores
        #[arg(long, default_value = "calibration")]
        cal_dir: PathBuf,
    },
    /// Validate a sequence document without touching any instrument
    Validate {
        /// YAML sequence document to check
        sequence: PathBuf,
    },
    /// List sequence documents in a directory
    ListSequences {
        /// Directory of YAML sequence documents
        #[arg(short, long, default_value = "testspecs")]
        dir: PathBuf,
    },
    /// List the instruments a bench provides and their method tables
    ListInstruments {
        /// Bench TOML describing the instruments
        #[arg(short, long, default_value = "bench_configs/sim_bench.toml")]
        bench: PathBuf,
    },
    /// Inspect or maintain stored calibrations
    Cal {
        #[command(subcommand)]
        command: CalCommands,
    },
}

#[derive(Subcommand)]
pub enum CalCommands {
    /// Show stored calibration values for a bench
    Show {
        /// Bench TOML selecting the calibration namespace
        #[arg(short, long, default_value = "bench_configs/sim_bench.toml")]
        bench: PathBuf,

        /// Directory holding the per-bench calibration stores
        #[arg(long, default_value = "calibration")]
        cal_dir: PathBuf,

        /// Show only this calibration
        name: Option<String>,
    },
    /// Show the archived history of one calibration (oldest first)
    History {
        #[arg(short, long, default_value = "bench_configs/sim_bench.toml")]
        bench: PathBuf,

        #[arg(long, default_value = "calibration")]
        cal_dir: PathBuf,

        /// Calibration name
        name: String,
    },
    /// Delete a calibration (the value is archived to history first)
    Delete {
        #[arg(short, long, default_value = "bench_configs/sim_bench.toml")]
        bench: PathBuf,

        #[arg(long, default_value = "calibration")]
        cal_dir: PathBuf,

        /// Calibration name
        name: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
