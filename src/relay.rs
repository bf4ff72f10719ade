//! Forwards captured guest output to the host's own streams.

use std::io::Write;

use crate::error::HostError;
use crate::sandbox::ExecutionResult;

/// Writes the guest's stdout and stderr verbatim, then hands back the run
/// outcome. The buffers are written even when the run failed.
///
/// A failure to write to the host streams is ignored: the run outcome is
/// what decides the exit status.
pub fn relay<O: Write, E: Write>(
    result: ExecutionResult,
    stdout: &mut O,
    stderr: &mut E,
) -> Result<(), HostError> {
    if !result.stdout.is_empty() {
        let _ = stdout.write_all(&result.stdout);
        let _ = stdout.flush();
    }
    if !result.stderr.is_empty() {
        let _ = stderr.write_all(&result.stderr);
        let _ = stderr.flush();
    }
    result.outcome
}
