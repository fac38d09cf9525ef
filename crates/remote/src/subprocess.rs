//! Shared subprocess management.
//!
//! Both gateways build a [`tokio::process::Command`] for their transport and
//! delegate spawn, output capture and timeout handling to [`run_command`].

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::error::GatewayError;
use crate::gateway::CommandOutput;

/// Maximum stdout or stderr size captured per stream (10 MiB).
///
/// Output beyond this limit is read and discarded: the pipe stays open so
/// the child never sees a broken pipe.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Spawn `cmd`, capture stdout/stderr, and enforce `timeout`.
///
/// On timeout the child is dropped, and `kill_on_drop(true)` kills it.
pub async fn run_command(
    cmd: &mut Command,
    timeout: Duration,
) -> Result<CommandOutput, GatewayError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let start = Instant::now();

    let mut child = cmd.spawn().map_err(|e| GatewayError::Spawn {
        program: program.clone(),
        message: e.to_string(),
    })?;

    // Read both pipes in spawned tasks so `child.wait()` can borrow `child`.
    let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
    let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let stdout_bytes = stdout_task.await.unwrap_or_default();
            let stderr_bytes = stderr_task.await.unwrap_or_default();
            Ok(CommandOutput {
                exit_code: status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
                duration: start.elapsed(),
            })
        }
        Ok(Err(e)) => Err(GatewayError::Io(e)),
        Err(_elapsed) => {
            stdout_task.abort();
            stderr_task.abort();
            Err(GatewayError::Timeout {
                operation: program,
                elapsed: start.elapsed(),
            })
        }
    }
}

/// Read an output stream to EOF, keeping the first [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
        let _ = tokio::io::copy(&mut h, &mut tokio::io::sink()).await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
