// src/cli.rs

use crate::{constants::DEFAULT_STATE_CEILING, models::LaunchOptions};
use clap::Parser;
use std::path::PathBuf;

/// volley: enumerate parameter states and launch one job per state.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the sweep declaration file.
    pub input: PathBuf,

    /// Enable debug logging.
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Print the full per-job plan without launching anything.
    #[arg(short = 'r', long)]
    pub dry_run: bool,

    /// Print the aggregate plan only, without launching anything.
    #[arg(long)]
    pub summarize: bool,

    /// Never overwrite existing directories or generated input files.
    #[arg(short = 's', long)]
    pub safe: bool,

    /// Abort if the sweep would generate more than this many states.
    #[arg(long, default_value_t = DEFAULT_STATE_CEILING)]
    pub max_states: usize,

    /// Index of the first state to launch.
    #[arg(long, default_value_t = 0)]
    pub start_from: usize,

    /// Launch at most this many states, counted from --start-from.
    #[arg(long)]
    pub end_after: Option<usize>,

    /// Seconds to wait before dispatching the first job.
    #[arg(long)]
    pub delay: Option<f64>,
}

impl Cli {
    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            dry_run: self.dry_run,
            summarize: self.summarize,
            safe: self.safe,
            start_from: self.start_from,
            end_after: self.end_after,
            delay: self.delay,
        }
    }
}
