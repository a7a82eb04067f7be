//! Common utilities for CLI-based connectors.
//!
//! This module provides shared infrastructure for connectors that reach
//! their target system through a command-line tool (`psql`, `chpasswd`).

use crate::{KeyturnError, Result};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Executes a command and returns stdout as a string.
///
/// This is the primary way CLI connectors should execute commands.
///
/// # Arguments
///
/// - `program`: Command to execute (e.g., "psql", "chpasswd")
/// - `args`: Command arguments
/// - `env`: Optional environment variables (e.g., `PGPASSWORD`) - passing
///   secrets via the environment keeps them out of the process argument
///   list, which is world-readable on most systems
///
/// # Errors
///
/// Returns [`KeyturnError::CommandFailed`] if:
/// - Exit code is non-zero
/// - Output is not valid UTF-8
///
/// Returns [`KeyturnError::ConnectorNotInstalled`] if the command is not
/// found.
pub async fn run_command(program: &str, args: &[&str], env: &[(&str, &str)]) -> Result<String> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    for (key, value) in env {
        cmd.env(key, value);
    }

    let output = cmd.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            KeyturnError::ConnectorNotInstalled(format!("{} command not found", program))
        } else {
            KeyturnError::Io(e)
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(KeyturnError::CommandFailed(format!(
            "{} failed with exit code {}: {}",
            program,
            output.status.code().unwrap_or(-1),
            stderr
        )));
    }

    String::from_utf8(output.stdout)
        .map_err(|e| KeyturnError::Other(anyhow::anyhow!("Invalid UTF-8 in command output: {}", e)))
}

/// Executes a command with stdin input.
///
/// Used for tools that only accept secret material on stdin (`chpasswd`).
pub async fn run_command_with_stdin(
    program: &str,
    args: &[&str],
    env: &[(&str, &str)],
    stdin_data: &str,
) -> Result<String> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            KeyturnError::ConnectorNotInstalled(format!("{} command not found", program))
        } else {
            KeyturnError::Io(e)
        }
    })?;

    // Write to stdin
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(stdin_data.as_bytes())
            .await
            .map_err(KeyturnError::Io)?;
        stdin.flush().await.map_err(KeyturnError::Io)?;
    }

    let output = child.wait_with_output().await.map_err(KeyturnError::Io)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(KeyturnError::CommandFailed(format!(
            "{} failed with exit code {}: {}",
            program,
            output.status.code().unwrap_or(-1),
            stderr
        )));
    }

    String::from_utf8(output.stdout)
        .map_err(|e| KeyturnError::Other(anyhow::anyhow!("Invalid UTF-8 in command output: {}", e)))
}

/// Checks if a command-line tool is available in PATH.
///
/// # Example
///
/// ```no_run
/// use keyturn::cli::check_command_exists;
///
/// #[tokio::main]
/// async fn main() -> keyturn::Result<()> {
///     if !check_command_exists("psql").await? {
///         println!("psql is not installed");
///     }
///     Ok(())
/// }
/// ```
pub async fn check_command_exists(program: &str) -> Result<bool> {
    let output = Command::new("which")
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(KeyturnError::Io)?;

    Ok(output.success())
}
