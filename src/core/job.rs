// src/core/job.rs

use crate::{
    constants::{
        COPY_FROM_KEY, COPY_OBJECTS_KEY, COPY_TO_KEY, COPY_TO_WRITE_KEY, DEFAULT_SEPARATOR,
        DIRECTORY_STRUCTURE_KEY, EXCLUSIVE_KEY, EXECUTE_KEY, INPUT_SEPARATOR_KEY, LAST_FILE_KEY,
        NEXT_DIRECTORY_KEY, POST_EXECUTE_KEY, PRE_EXECUTE_KEY, RELAUNCH_KEY, SUBDIRECTORIES_KEY,
        SWAP_LOG_FILENAME,
    },
    models::{Dialect, State, is_truthy},
    system::{
        executor::{self, ExecutionError},
        fs_ops,
        template::{self, TemplateError},
    },
};
use crossbeam_channel::Receiver;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Resources shared by every worker in the pool.
///
/// The claims map is the *logical* lock — which relative directories are
/// currently owned by an exclusive job. The setup lock is the *mechanical*
/// one: it serializes mutation of the shared directory tree (directory
/// creation, input materialization, aux copies, the swap) across workers.
pub struct EngineShared {
    pub claims: Mutex<HashMap<String, bool>>,
    pub setup_lock: Mutex<()>,
    pub template: Option<Vec<String>>,
    pub dialect: Dialect,
    pub base_dir: PathBuf,
    pub safe: bool,
}

impl EngineShared {
    pub fn new(
        template: Option<Vec<String>>,
        dialect: Dialect,
        base_dir: PathBuf,
        safe: bool,
    ) -> Self {
        Self {
            claims: Mutex::new(HashMap::new()),
            setup_lock: Mutex::new(()),
            template,
            dialect,
            base_dir,
            safe,
        }
    }
}

/// Recoverable per-job failures. These abandon the job, never the worker.
#[derive(Error, Debug)]
enum JobError {
    #[error("can't overwrite directory '{}' in safe mode, aborting job", .path.display())]
    SafeDirectory { path: PathBuf },
    #[error("can't overwrite file '{}' in safe mode, aborting job", .path.display())]
    SafeOverwrite { path: PathBuf },
    #[error("could not prepare '{}': {source}", .path.display())]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Pulls states off the handoff channel until the dispatcher closes it.
pub fn worker_loop(worker_id: usize, jobs: Receiver<State>, shared: Arc<EngineShared>) {
    for state in jobs.iter() {
        run_job(worker_id, &state, &shared);
    }
    log::debug!("worker {worker_id}: queue drained, exiting");
}

/// Runs one state to completion: claims the target directory when the state
/// is exclusive, executes the pipeline, and releases the claim on every exit
/// path. Errors are logged here and never escape to the worker loop.
fn run_job(worker_id: usize, state: &State, shared: &Arc<EngineShared>) {
    let relative_dir = state
        .get(DIRECTORY_STRUCTURE_KEY)
        .map_or(".", String::as_str);
    let exclusive = state.get(EXCLUSIVE_KEY).is_some_and(|v| is_truthy(v));

    if exclusive {
        let mut claims = shared.claims.lock().unwrap();
        if claims.get(relative_dir).copied().unwrap_or(false) {
            log::info!(
                "job {worker_id}: directory '{relative_dir}' is already taken, skipping this state"
            );
            return;
        }
        claims.insert(relative_dir.to_string(), true);
    }
    // Release the claim no matter how the pipeline exits.
    let _claim = exclusive.then(|| {
        scopeguard::guard(
            (Arc::clone(shared), relative_dir.to_string()),
            |(shared, dir)| {
                shared.claims.lock().unwrap().insert(dir, false);
            },
        )
    });

    if let Err(e) = run_pipeline(worker_id, state, shared, relative_dir) {
        log::error!("job {worker_id}: {e}");
    }
}

fn run_pipeline(
    worker_id: usize,
    state: &State,
    shared: &EngineShared,
    relative_dir: &str,
) -> Result<(), JobError> {
    let working_dir = if state.contains_key(DIRECTORY_STRUCTURE_KEY) {
        shared.base_dir.join(relative_dir)
    } else {
        shared.base_dir.clone()
    };

    {
        let _setup = shared.setup_lock.lock().unwrap();
        create_dir_structure(state, &working_dir, shared)?;
        materialize_input(worker_id, state, &working_dir, shared)?;
        copy_objects(worker_id, state, &working_dir, shared);
    }

    if let Some(pre) = state.get(PRE_EXECUTE_KEY) {
        let code = executor::run_command(pre, &working_dir)?;
        if code != 0 {
            log::error!(
                "job {worker_id}: pre-command exited with code {code}, skipping the main command"
            );
            return Ok(());
        }
    }

    let Some(command) = state.get(EXECUTE_KEY) else {
        return Ok(());
    };
    let relaunch = state.get(RELAUNCH_KEY).is_some_and(|v| is_truthy(v));
    let mut code = executor::run_command(command, &working_dir)?;
    while code != 0 && relaunch {
        log::warn!("job {worker_id}: command exited with code {code}, relaunching");
        code = executor::run_command(command, &working_dir)?;
    }

    if state.contains_key(NEXT_DIRECTORY_KEY) {
        let _setup = shared.setup_lock.lock().unwrap();
        if let Err(e) = swap_last(state, shared) {
            log::debug!("job {worker_id}: swap skipped: {e}");
        }
    }

    if code == 0 {
        if let Some(post) = state.get(POST_EXECUTE_KEY) {
            let post_code = executor::run_command(post, &working_dir)?;
            if post_code != 0 {
                log::error!("job {worker_id}: post-command exited with code {post_code}");
            }
        }
    } else {
        log::error!("job {worker_id}: command exited with code {code}");
    }
    Ok(())
}

fn create_dir_structure(
    state: &State,
    working_dir: &Path,
    shared: &EngineShared,
) -> Result<(), JobError> {
    if state.contains_key(DIRECTORY_STRUCTURE_KEY) {
        if working_dir.exists() {
            if shared.safe {
                return Err(JobError::SafeDirectory {
                    path: working_dir.to_path_buf(),
                });
            }
        } else {
            fs::create_dir_all(working_dir).map_err(|source| JobError::Setup {
                path: working_dir.to_path_buf(),
                source,
            })?;
        }
    }

    if let Some(subdirs) = state.get(SUBDIRECTORIES_KEY) {
        for subdir in subdirs.split_whitespace() {
            let path = working_dir.join(subdir);
            if !path.exists() {
                fs::create_dir_all(&path).map_err(|source| JobError::Setup { path, source })?;
            }
        }
    }
    Ok(())
}

/// Renders the job's input file from the `CopyFrom` template in the selected
/// dialect and writes it into the working directory.
fn materialize_input(
    worker_id: usize,
    state: &State,
    working_dir: &Path,
    shared: &EngineShared,
) -> Result<(), JobError> {
    let Some(lines) = &shared.template else {
        return Ok(());
    };

    let separator = state
        .get(INPUT_SEPARATOR_KEY)
        .map_or(DEFAULT_SEPARATOR, String::as_str);
    let file_name = state
        .get(COPY_TO_KEY)
        .map(String::as_str)
        .or_else(|| {
            state
                .get(COPY_FROM_KEY)
                .and_then(|f| Path::new(f).file_name())
                .and_then(|n| n.to_str())
        })
        .unwrap_or("input");

    // Deduplicated rewrite list; entries naming unknown keys can't be
    // substituted and are reported once per job.
    let mut rewrite: Vec<String> = Vec::new();
    let mut unknown: Vec<&str> = Vec::new();
    if let Some(to_write) = state.get(COPY_TO_WRITE_KEY) {
        for name in to_write.split_whitespace() {
            if !state.contains_key(name) {
                unknown.push(name);
            } else if !rewrite.iter().any(|r| r == name) {
                rewrite.push(name.to_string());
            }
        }
    }
    if !unknown.is_empty() {
        log::warn!(
            "job {worker_id}: keys '{}' are in {COPY_TO_WRITE_KEY} but are not defined",
            unknown.join(" ")
        );
    }

    let out_path = working_dir.join(file_name);
    if shared.safe && out_path.exists() {
        return Err(JobError::SafeOverwrite { path: out_path });
    }

    let text = template::render(shared.dialect, lines, state, separator, &rewrite)?;
    fs::write(&out_path, text).map_err(|source| JobError::Setup {
        path: out_path.clone(),
        source,
    })
}

/// Best-effort copy of declared auxiliary files and directory trees into the
/// working directory. Failures degrade the job, they do not abort it.
fn copy_objects(worker_id: usize, state: &State, working_dir: &Path, shared: &EngineShared) {
    let Some(objects) = state.get(COPY_OBJECTS_KEY) else {
        return;
    };
    for object in objects.split_whitespace() {
        // join() leaves absolute paths alone, so entries may be relative to
        // the base directory or absolute.
        let src = shared.base_dir.join(object);
        if let Err(e) = fs_ops::copy_into(&src, working_dir) {
            log::warn!("job {worker_id}: caught an error while trying to copy '{object}': {e}");
        }
    }
}

/// The swap protocol: exchange the designated last file with the successor
/// state's directory, but only when both sides report the same record count.
/// Every attempt is recorded in the append-only swap log (1 = swapped,
/// 0 = counts differed); an unreadable side skips the attempt entirely.
fn swap_last(state: &State, shared: &EngineShared) -> std::io::Result<()> {
    let (Some(dir), Some(next_dir), Some(last)) = (
        state.get(DIRECTORY_STRUCTURE_KEY),
        state.get(NEXT_DIRECTORY_KEY),
        state.get(LAST_FILE_KEY),
    ) else {
        return Ok(());
    };

    let here = shared.base_dir.join(dir).join(last);
    let next = shared.base_dir.join(next_dir).join(last);
    let count_here = read_record_count(&here)?;
    let count_next = read_record_count(&next)?;

    let mut swap_log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(shared.base_dir.join(dir).join(SWAP_LOG_FILENAME))?;

    if count_here == count_next {
        let staging = next.with_extension("swap_tmp");
        fs::rename(&here, &staging)?;
        fs::rename(&next, &here)?;
        fs::rename(&staging, &next)?;
        writeln!(swap_log, "1")?;
    } else {
        writeln!(swap_log, "0")?;
    }
    Ok(())
}

/// The record count lives in the third whitespace-separated token of the
/// file's first line (`t = 100`-style headers).
fn read_record_count(path: &Path) -> std::io::Result<i64> {
    let text = fs::read_to_string(path)?;
    text.lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(2))
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| {
            std::io::Error::other(format!("'{}' has no record-count header", path.display()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn state(pairs: &[(&str, &str)]) -> State {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn shared(base: &Path) -> Arc<EngineShared> {
        Arc::new(EngineShared::new(
            None,
            Dialect::Standard,
            base.to_path_buf(),
            false,
        ))
    }

    #[test]
    fn test_directory_structure_and_subdirectories_are_created() {
        let base = tempfile::tempdir().unwrap();
        let shared = shared(base.path());
        let state = state(&[
            ("DirectoryStructure", "run_0"),
            ("Subdirectories", "confs logs"),
            ("Execute", ""),
        ]);

        run_job(0, &state, &shared);

        assert!(base.path().join("run_0/confs").is_dir());
        assert!(base.path().join("run_0/logs").is_dir());
    }

    #[test]
    fn test_safe_mode_aborts_on_existing_directory() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir(base.path().join("run_0")).unwrap();
        let shared = Arc::new(EngineShared::new(
            None,
            Dialect::Standard,
            base.path().to_path_buf(),
            true,
        ));
        let state = state(&[
            ("DirectoryStructure", "run_0"),
            ("Execute", "touch should_not_exist.txt"),
        ]);

        run_job(0, &state, &shared);

        assert!(!base.path().join("run_0/should_not_exist.txt").exists());
    }

    #[test]
    fn test_input_file_is_materialized() {
        let base = tempfile::tempdir().unwrap();
        let shared = Arc::new(EngineShared::new(
            Some(vec!["steps = 100".to_string()]),
            Dialect::Standard,
            base.path().to_path_buf(),
            false,
        ));
        let state = state(&[
            ("DirectoryStructure", "run_0"),
            ("CopyFrom", "base.inp"),
            ("CopyToWrite", "steps"),
            ("steps", "5000"),
            ("Execute", ""),
        ]);

        run_job(0, &state, &shared);

        let rendered = fs::read_to_string(base.path().join("run_0/base.inp")).unwrap();
        assert_eq!(rendered, "steps = 5000\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_exclusive_states_never_run_concurrently() {
        let base = tempfile::tempdir().unwrap();
        let shared = shared(base.path());
        let job = state(&[
            ("DirectoryStructure", "shared_dir"),
            ("Exclusive", "true"),
            ("Execute", "echo ran >> marks.txt; sleep 1"),
        ]);

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let job = job.clone();
                let shared = Arc::clone(&shared);
                thread::spawn(move || run_job(i, &job, &shared))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Exactly one of the two jobs may have executed; the loser skips
        // without side effects.
        let marks = fs::read_to_string(base.path().join("shared_dir/marks.txt")).unwrap();
        assert_eq!(marks.lines().count(), 1);
    }

    #[test]
    fn test_claim_is_released_after_the_job() {
        let base = tempfile::tempdir().unwrap();
        let shared = shared(base.path());
        let job = state(&[
            ("DirectoryStructure", "d"),
            ("Exclusive", "true"),
            ("Execute", ""),
        ]);

        run_job(0, &job, &shared);

        let claims = shared.claims.lock().unwrap();
        assert_eq!(claims.get("d"), Some(&false));
    }

    #[cfg(unix)]
    #[test]
    fn test_claim_is_released_on_setup_error() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir(base.path().join("d")).unwrap();
        let shared = Arc::new(EngineShared::new(
            None,
            Dialect::Standard,
            base.path().to_path_buf(),
            true, // safe mode → existing directory aborts the job
        ));
        let job = state(&[
            ("DirectoryStructure", "d"),
            ("Exclusive", "true"),
            ("Execute", ""),
        ]);

        run_job(0, &job, &shared);

        let claims = shared.claims.lock().unwrap();
        assert_eq!(claims.get("d"), Some(&false));
    }

    #[cfg(unix)]
    #[test]
    fn test_relaunch_repeats_until_zero_exit() {
        let base = tempfile::tempdir().unwrap();
        let shared = shared(base.path());
        // Fails on the first invocation, succeeds on the second.
        let job = state(&[
            ("DirectoryStructure", "r"),
            ("Relaunch", "true"),
            (
                "Execute",
                "echo run >> attempts.txt; test -f flag || { touch flag; exit 1; }",
            ),
            ("PostExecute", "touch post_ran.txt"),
        ]);

        run_job(0, &job, &shared);

        let attempts = fs::read_to_string(base.path().join("r/attempts.txt")).unwrap();
        assert_eq!(attempts.lines().count(), 2);
        assert!(base.path().join("r/post_ran.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_post_command_skipped_on_failure() {
        let base = tempfile::tempdir().unwrap();
        let shared = shared(base.path());
        let job = state(&[
            ("DirectoryStructure", "p"),
            ("Execute", "exit 3"),
            ("PostExecute", "touch post_ran.txt"),
        ]);

        run_job(0, &job, &shared);

        assert!(!base.path().join("p/post_ran.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_pre_command_skips_main() {
        let base = tempfile::tempdir().unwrap();
        let shared = shared(base.path());
        let job = state(&[
            ("DirectoryStructure", "q"),
            ("PreExecute", "exit 1"),
            ("Execute", "touch main_ran.txt"),
        ]);

        run_job(0, &job, &shared);

        assert!(!base.path().join("q/main_ran.txt").exists());
    }

    #[test]
    fn test_swap_exchanges_files_with_matching_counts() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir_all(base.path().join("a")).unwrap();
        fs::create_dir_all(base.path().join("b")).unwrap();
        fs::write(base.path().join("a/last.conf"), "t = 100\nAAA\n").unwrap();
        fs::write(base.path().join("b/last.conf"), "t = 100\nBBB\n").unwrap();
        let shared = shared(base.path());
        let job = state(&[
            ("DirectoryStructure", "a"),
            ("NextDirectoryStructure", "b"),
            ("LastFile", "last.conf"),
        ]);

        swap_last(&job, &shared).unwrap();

        let a = fs::read_to_string(base.path().join("a/last.conf")).unwrap();
        let b = fs::read_to_string(base.path().join("b/last.conf")).unwrap();
        assert!(a.contains("BBB"));
        assert!(b.contains("AAA"));
        let log = fs::read_to_string(base.path().join("a/swap_log.dat")).unwrap();
        assert_eq!(log, "1\n");
    }

    #[test]
    fn test_swap_skipped_on_count_mismatch() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir_all(base.path().join("a")).unwrap();
        fs::create_dir_all(base.path().join("b")).unwrap();
        fs::write(base.path().join("a/last.conf"), "t = 100\nAAA\n").unwrap();
        fs::write(base.path().join("b/last.conf"), "t = 250\nBBB\n").unwrap();
        let shared = shared(base.path());
        let job = state(&[
            ("DirectoryStructure", "a"),
            ("NextDirectoryStructure", "b"),
            ("LastFile", "last.conf"),
        ]);

        swap_last(&job, &shared).unwrap();

        let a = fs::read_to_string(base.path().join("a/last.conf")).unwrap();
        assert!(a.contains("AAA"));
        let log = fs::read_to_string(base.path().join("a/swap_log.dat")).unwrap();
        assert_eq!(log, "0\n");
    }

    #[test]
    fn test_swap_skips_silently_when_last_file_is_missing() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir_all(base.path().join("a")).unwrap();
        let shared = shared(base.path());
        let job = state(&[
            ("DirectoryStructure", "a"),
            ("NextDirectoryStructure", "b"),
            ("LastFile", "last.conf"),
        ]);

        assert!(swap_last(&job, &shared).is_err());
        assert!(!base.path().join("a/swap_log.dat").exists());
    }

    #[test]
    fn test_worker_loop_drains_queue() {
        let base = tempfile::tempdir().unwrap();
        let shared = shared(base.path());
        let (tx, rx) = crossbeam_channel::bounded::<State>(1);
        let worker = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || worker_loop(0, rx, shared))
        };

        for i in 0..3 {
            let job = state(&[("DirectoryStructure", &format!("job_{i}")), ("Execute", "")]);
            tx.send(job).unwrap();
            thread::sleep(Duration::from_millis(5));
        }
        drop(tx);
        worker.join().unwrap();

        for i in 0..3 {
            assert!(base.path().join(format!("job_{i}")).is_dir());
        }
    }
}
