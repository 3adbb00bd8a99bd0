//! Subprocess boundary: run external tools and classify their failures.

use std::process::Command;

use log::{debug, warn};

use crate::error::{Result, TapeVaultError};

/// Run a command to completion, returning its captured stdout as a string.
///
/// Fails with [`TapeVaultError::ToolUnavailable`] if the binary cannot be
/// spawned at all, or [`TapeVaultError::ToolFailed`] if it exits non-zero.
pub fn run(mut command: Command) -> Result<String> {
    debug!("running command: {:?}", command);

    let output = command
        .output()
        .map_err(|err| TapeVaultError::ToolUnavailable(format!("{:?}: {}", command, err)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        return Err(TapeVaultError::ToolFailed {
            tool: format!("{:?}", command),
            exit: output.status.code(),
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a command, logging and swallowing any failure.
///
/// Used for idempotent unload/unmount sequences where "already in the
/// desired state" must not abort the caller.
pub fn run_best_effort(command: Command) {
    let debug_repr = format!("{:?}", command);
    if let Err(err) = run(command) {
        warn!("best-effort command failed (ignored): {debug_repr}: {err}");
    }
}
