// src/system/executor.rs

use crate::CancellationToken;
use std::env;
use std::process::{Command as StdCommand, Output, Stdio};
use std::sync::atomic::Ordering;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
    #[error("Command '{0}' exited with a non-zero error code.")]
    NonZeroExitStatus(String),
    #[error("Operation was cancelled by the user.")]
    Cancelled,
}

/// Runs a helper command and captures its output.
/// The call blocks until the command finishes; cancellation is only checked
/// before spawning, which is enough for the short-lived helpers this tool
/// shells out to.
pub fn run_and_capture(
    program: &str,
    args: &[&str],
    cancellation_token: &CancellationToken,
) -> Result<Output, ExecutionError> {
    if cancellation_token.load(Ordering::Relaxed) {
        return Err(ExecutionError::Cancelled);
    }

    StdCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| ExecutionError::CommandFailed(display_command(program, args), e))
}

/// Runs a helper command with all output discarded, failing on a non-zero exit.
pub fn run_quiet(program: &str, args: &[&str]) -> Result<(), ExecutionError> {
    let status = StdCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| ExecutionError::CommandFailed(display_command(program, args), e))?;
    if !status.success() {
        return Err(ExecutionError::NonZeroExitStatus(display_command(
            program, args,
        )));
    }
    Ok(())
}

pub fn is_executable_in_path(executable_name: &str) -> bool {
    if let Ok(path_var) = env::var("PATH") {
        for path in env::split_paths(&path_var) {
            if path.join(executable_name).is_file() {
                return true;
            }
        }
    }
    false
}

fn display_command(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_cancellation_is_checked_before_spawning() {
        let token: CancellationToken = Arc::new(AtomicBool::new(true));
        let err = run_and_capture("true", &[], &token).unwrap_err();
        assert!(matches!(err, ExecutionError::Cancelled));
    }

    #[test]
    fn test_display_command_joins_program_and_args() {
        assert_eq!(
            display_command("vmlinux-to-elf", &["--", "bzImage", "vmlinux"]),
            "vmlinux-to-elf -- bzImage vmlinux"
        );
    }
}
