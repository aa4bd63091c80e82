//! Response Types

use std::process::Command;

use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("{command} exited with {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },
    #[error("failed to launch {command}: {message}")]
    Spawn { command: String, message: String },
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("network error: {message}")]
    NetworkError { message: String },
}

// ============================================================================
// COMMAND EXECUTION
// ============================================================================

/// Run a command to completion; non-zero exit is an error. Returns stdout.
pub fn run_checked(program: &str, args: &[&str]) -> Result<String, ActionError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| ActionError::Spawn {
            command: program.to_string(),
            message: e.to_string(),
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(ActionError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
