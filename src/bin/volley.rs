// src/bin/volley.rs

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use volley::{cli::Cli, core::launcher::Launcher};

/// The main entry point of the `volley` application.
/// It sets up logging, parses arguments, runs the sweep, and performs
/// centralized error handling: any fatal configuration or validation error
/// exits with code 1, while individual job failures are only logged.
fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter),
    )
    .init();

    if let Err(e) = run(cli) {
        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let launcher = Launcher::from_input(&cli.input, cli.max_states)?;
    log::debug!("sweep enumerated: {} states", launcher.state_count());
    launcher.launch(&cli.launch_options())
}
