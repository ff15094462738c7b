// src/system/executor.rs

use std::path::Path;
use std::process::{Command as StdCommand, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("command '{command}' could not be executed: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command '{command}' produced output that was not valid UTF-8")]
    InvalidUtf8Output {
        command: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

/// Runs a command line through the system shell in `cwd` and blocks until it
/// exits. Stdio is inherited, so the child writes straight to the user's
/// terminal. Returns the exit code; a spawn failure is the only error.
///
/// Commands run with a per-process working directory: the launcher's own
/// cwd is never touched, so concurrent jobs cannot observe each other's
/// directory changes.
pub fn run_command(command_line: &str, cwd: &Path) -> Result<i32, ExecutionError> {
    let trimmed = command_line.trim();
    if trimmed.is_empty() {
        // An empty command is a success, not an error.
        return Ok(0);
    }

    let status = shell_command(trimmed)
        .current_dir(dunce::simplified(cwd))
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|source| ExecutionError::SpawnFailed {
            command: trimmed.to_string(),
            source,
        })?;

    // A termination by signal has no code; report it as a plain failure.
    Ok(status.code().unwrap_or(-1))
}

/// Runs a command line through the system shell and captures its standard
/// output. Stderr is passed through to the user's terminal. Intended for
/// short-running commands used for value substitution.
pub fn capture_output(command_line: &str, cwd: &Path) -> Result<(i32, String), ExecutionError> {
    let trimmed = command_line.trim();
    if trimmed.is_empty() {
        return Ok((0, String::new()));
    }

    let output = shell_command(trimmed)
        .current_dir(dunce::simplified(cwd))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|source| ExecutionError::SpawnFailed {
            command: trimmed.to_string(),
            source,
        })?;

    let stdout =
        String::from_utf8(output.stdout).map_err(|source| ExecutionError::InvalidUtf8Output {
            command: trimmed.to_string(),
            source,
        })?;
    Ok((output.status.code().unwrap_or(-1), stdout))
}

fn shell_command(command_line: &str) -> StdCommand {
    if cfg!(target_os = "windows") {
        let mut command = StdCommand::new("cmd");
        command.arg("/C").arg(command_line);
        command
    } else {
        let mut command = StdCommand::new("sh");
        command.arg("-c").arg(command_line);
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_is_a_success() {
        assert_eq!(run_command("   ", Path::new(".")).unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_codes_are_reported() {
        assert_eq!(run_command("true", Path::new(".")).unwrap(), 0);
        assert_eq!(run_command("exit 7", Path::new(".")).unwrap(), 7);
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_output() {
        let (code, output) = capture_output("echo hello", Path::new(".")).unwrap();
        assert_eq!(code, 0);
        assert_eq!(output.trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_runs_in_the_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (code, output) = capture_output("pwd", dir.path()).unwrap();
        assert_eq!(code, 0);
        assert!(output.trim().ends_with(
            dir.path().file_name().unwrap().to_str().unwrap()
        ));
    }
}
