//! Run external programs to completion and capture their output

use tokio::process::Command;
use tracing::debug;

/// Captured result of an external program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status was zero
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run `program` with `args` and wait for it to exit
///
/// A program that cannot be started is reported as a failed run with the
/// spawn error as stderr, so callers only ever deal with one shape.
pub async fn execute(program: &str, args: &[String]) -> CommandOutput {
    debug!("Executing {} {}", program, args.join(" "));

    match Command::new(program).args(args).kill_on_drop(true).output().await {
        Ok(output) => CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        },
        Err(e) => CommandOutput {
            success: false,
            stdout: String::new(),
            stderr: format!("Failed to execute {}: {}", program, e),
        },
    }
}
