// src/constants.rs

/// Hard ceiling on generated states, overridable from the command line.
pub const DEFAULT_STATE_CEILING: usize = 100_000;

/// Seconds the dispatcher sleeps between two consecutive job launches.
pub const DEFAULT_WAIT_TIME: f64 = 2.0;

/// Separator used when rewriting template lines, unless the input overrides it.
pub const DEFAULT_SEPARATOR: &str = "=";

/// Name of the append-only log recording swap attempts (1 = swapped, 0 = skipped).
pub const SWAP_LOG_FILENAME: &str = "swap_log.dat";

// Injected keys. These are filled in by the engine and cannot be declared
// by the user.
pub const JOB_ID_KEY: &str = "JOB_ID";
pub const BASE_DIR_KEY: &str = "BASE_DIR";

pub const PROTECTED_KEYS: &[&str] = &[JOB_ID_KEY, BASE_DIR_KEY];

// Structural keys understood by the engine.
pub const EXECUTE_KEY: &str = "Execute";
pub const PRE_EXECUTE_KEY: &str = "PreExecute";
pub const POST_EXECUTE_KEY: &str = "PostExecute";
pub const PARALLEL_JOBS_KEY: &str = "ParallelJobs";
pub const WAIT_TIME_KEY: &str = "WaitTime";
pub const TIMES_KEY: &str = "Times";
pub const RELAUNCH_KEY: &str = "Relaunch";
pub const DIRECTORY_STRUCTURE_KEY: &str = "DirectoryStructure";
pub const SUBDIRECTORIES_KEY: &str = "Subdirectories";
pub const EXCLUSIVE_KEY: &str = "Exclusive";
pub const INPUT_TYPE_KEY: &str = "InputType";
pub const INPUT_SEPARATOR_KEY: &str = "InputSeparator";
pub const COPY_FROM_KEY: &str = "CopyFrom";
pub const COPY_TO_KEY: &str = "CopyTo";
pub const COPY_TO_WRITE_KEY: &str = "CopyToWrite";
pub const COPY_OBJECTS_KEY: &str = "CopyObjects";
pub const SWAP_LAST_KEY: &str = "SwapLast";
pub const LAST_FILE_KEY: &str = "LastFile";

/// Injected into a state when the swap protocol links it to its successor.
pub const NEXT_DIRECTORY_KEY: &str = "NextDirectoryStructure";

/// Keys whose value is never whitespace-split into a list, even when unquoted.
pub const STRUCTURAL_KEYS: &[&str] = &[
    EXECUTE_KEY,
    PRE_EXECUTE_KEY,
    POST_EXECUTE_KEY,
    PARALLEL_JOBS_KEY,
    WAIT_TIME_KEY,
    TIMES_KEY,
    RELAUNCH_KEY,
    DIRECTORY_STRUCTURE_KEY,
    SUBDIRECTORIES_KEY,
    EXCLUSIVE_KEY,
    INPUT_TYPE_KEY,
    INPUT_SEPARATOR_KEY,
    COPY_FROM_KEY,
    COPY_TO_KEY,
    COPY_TO_WRITE_KEY,
    COPY_OBJECTS_KEY,
    SWAP_LAST_KEY,
    LAST_FILE_KEY,
];

/// Launch-control keys that must be plain constants: no lists, no expressions.
pub const PLAIN_VALUE_KEYS: &[&str] = &[
    COPY_FROM_KEY,
    PARALLEL_JOBS_KEY,
    WAIT_TIME_KEY,
    TIMES_KEY,
];
