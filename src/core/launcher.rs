// src/core/launcher.rs

use crate::{
    constants::{
        BASE_DIR_KEY, COPY_FROM_KEY, DEFAULT_WAIT_TIME, DIRECTORY_STRUCTURE_KEY, INPUT_TYPE_KEY,
        JOB_ID_KEY, NEXT_DIRECTORY_KEY, PARALLEL_JOBS_KEY, SWAP_LAST_KEY, TIMES_KEY, WAIT_TIME_KEY,
    },
    core::{
        factory::StateFactory,
        job::{self, EngineShared},
        table::{ConfigError, KeyTable},
    },
    models::{Dialect, LaunchOptions, State, is_truthy},
    system::fs_ops,
};
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Owns a validated, fully enumerated sweep and dispatches it to the worker
/// pool.
///
/// All states are generated up front, in deterministic order, before any
/// concurrency starts.
#[derive(Debug)]
pub struct Launcher {
    states: Vec<State>,
    key_order: Vec<String>,
    fixed: Vec<(String, String)>,
    max_jobs: usize,
    wait_time: f64,
    times: usize,
    template: Option<Vec<String>>,
    dialect: Dialect,
    base_dir: PathBuf,
    input_name: Option<String>,
}

impl Launcher {
    /// Parses, validates, and enumerates the input file at `path`.
    pub fn from_input(path: &Path, max_states: usize) -> Result<Self> {
        let mut table = KeyTable::from_file(path)?;
        table.validate()?;
        Self::from_table(table, max_states)
    }

    /// Builds a launcher from an already parsed table. Separated from
    /// [`Launcher::from_input`] so the sweep logic is testable without
    /// touching the process working directory.
    pub fn from_table(mut table: KeyTable, max_states: usize) -> Result<Self> {
        let max_jobs: usize = table.pop_number(PARALLEL_JOBS_KEY)?.unwrap_or(0);
        let times: usize = table.pop_number(TIMES_KEY)?.unwrap_or(1);
        let wait_time: f64 = table
            .pop_number(WAIT_TIME_KEY)?
            .unwrap_or(DEFAULT_WAIT_TIME);

        let dialect = table
            .get(INPUT_TYPE_KEY)
            .map(|k| k.raw().parse::<Dialect>())
            .transpose()
            .map_err(|value| ConfigError::UnsupportedDialect { value })?
            .unwrap_or_default();

        let base_dir = PathBuf::from(
            table
                .get(BASE_DIR_KEY)
                .map(|k| k.raw().to_string())
                .unwrap_or_default(),
        );

        let swap = table.get(SWAP_LAST_KEY).is_some_and(|k| is_truthy(k.raw()));

        // The template is read once; every job renders from the same lines.
        let mut template = None;
        let mut input_name = None;
        if let Some(key) = table.get(COPY_FROM_KEY) {
            let expanded = shellexpand::tilde(key.raw()).into_owned();
            let mut file = PathBuf::from(expanded);
            if file.is_relative() {
                file = base_dir.join(file);
            }
            let lines = fs_ops::read_lines(&file).map_err(|source| match source.kind() {
                std::io::ErrorKind::NotFound => ConfigError::InputNotFound { path: file.clone() },
                _ => ConfigError::Io {
                    path: file.clone(),
                    source,
                },
            })?;
            template = Some(lines);
            input_name = Some(key.raw().to_string());
        }

        let mut factory = StateFactory::new(table)?;
        let mut states: Vec<State> = Vec::new();
        while factory.advance() {
            let state = factory.snapshot()?;
            if swap && !states.is_empty() {
                // Link each state to its successor for the swap protocol.
                if let Some(next_dir) = state.get(DIRECTORY_STRUCTURE_KEY) {
                    let previous = states.len() - 1;
                    states[previous].insert(NEXT_DIRECTORY_KEY.to_string(), next_dir.clone());
                }
            }
            states.push(state);
            if states.len() > max_states {
                return Err(ConfigError::StateCeiling { limit: max_states }.into());
            }
        }

        Ok(Self {
            states,
            key_order: factory.key_order().map(str::to_string).collect(),
            fixed: factory
                .fixed_keys()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            max_jobs,
            wait_time: wait_time.max(0.0),
            times,
            template,
            dialect,
            base_dir,
            input_name,
        })
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Dispatches the sweep: prints the plan for dry runs, otherwise spawns
    /// the worker pool and feeds it every state in order, rate-limited by
    /// the configured wait time, then waits for the queue to drain.
    pub fn launch(&self, options: &LaunchOptions) -> Result<()> {
        let worker_count = self.worker_count();

        if options.dry_run || options.summarize {
            self.print_plan(worker_count, !options.summarize);
            return Ok(());
        }

        if let Some(delay) = options.delay {
            log::info!("waiting {delay}s before dispatching");
            thread::sleep(Duration::from_secs_f64(delay.max(0.0)));
        }

        let shared = Arc::new(EngineShared::new(
            self.template.clone(),
            self.dialect,
            self.base_dir.clone(),
            options.safe,
        ));

        // A single-slot handoff: the configured wait time, not queue depth,
        // is the launch throttle.
        let (sender, receiver) = crossbeam_channel::bounded::<State>(1);
        let workers: Vec<_> = (0..worker_count)
            .map(|id| {
                let receiver = receiver.clone();
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("worker-{id}"))
                    .spawn(move || job::worker_loop(id, receiver, shared))
                    .context("failed to spawn a worker thread")
            })
            .collect::<Result<_>>()?;
        drop(receiver);

        let end_at = match options.end_after {
            Some(count) => (options.start_from + count).min(self.states.len()),
            None => self.states.len(),
        };
        for round in 0..self.times {
            for (index, state) in self
                .states
                .iter()
                .enumerate()
                .take(end_at)
                .skip(options.start_from)
            {
                log::debug!("dispatching state {index} (round {round}): {state:?}");
                sender
                    .send(state.clone())
                    .context("the worker pool died before the sweep was dispatched")?;
                thread::sleep(Duration::from_secs_f64(self.wait_time));
            }
        }

        // Closing the channel lets the workers drain it and exit.
        drop(sender);
        for worker in workers {
            if worker.join().is_err() {
                log::error!("a worker thread panicked");
            }
        }
        Ok(())
    }

    fn worker_count(&self) -> usize {
        if self.max_jobs == 0 || self.max_jobs > self.states.len() {
            self.states.len()
        } else {
            self.max_jobs
        }
    }

    /// The dry-run / summary report: aggregate numbers, the fixed keys, and
    /// (for full dry runs) every job's varying keys.
    fn print_plan(&self, worker_count: usize, per_job: bool) {
        println!("\n{}", "RUN INFO:".bold());
        println!("Number of processes: {}", self.states.len());
        println!("Parallel workers: {worker_count}");
        println!("Waiting time between job launches: {}s", self.wait_time);
        if self.times > 1 {
            println!("Each job will be repeated {} times", self.times);
        }
        if let Some(name) = &self.input_name {
            println!("Input file will be based on '{}'", name.cyan());
        }

        println!("\n{}", "KEYS WITH FIXED VALUES".bold());
        for (name, value) in &self.fixed {
            println!("\t{}: {}", name.cyan(), value);
        }

        if !per_job {
            return;
        }
        for (index, state) in self.states.iter().enumerate() {
            println!("\n{}", format!("JOB {index}").bold());
            for name in &self.key_order {
                let Some(value) = state.get(name) else {
                    continue;
                };
                if name == JOB_ID_KEY
                    || self.fixed.iter().any(|(f, v)| f == name && v == value)
                {
                    continue;
                }
                println!("\t{}: {}", name.cyan(), value);
            }
        }
    }
}
