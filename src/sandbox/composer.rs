//! Builds the sandbox for one run and executes the module in it.
//!
//! Filesystem work goes through `tokio::fs`; compilation and guest
//! execution are CPU-bound and run on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{debug, warn};

use super::{
    CapturedOutput, ExecutionResult, MountSet, SandboxEngine, GUEST_INPUT_DIR, GUEST_OUTPUT_DIR,
    INPUT_FILE_NAME, PROGRAM_NAME,
};
use crate::config::RunRequest;
use crate::error::{HostError, SandboxError};
use crate::fetch::FetchResult;

/// Prefix of the per-run input directory under the system temp dir.
const INPUT_DIR_PREFIX: &str = "sandhost-in-";

pub struct SandboxComposer<E> {
    engine: Arc<E>,
}

impl<E: SandboxEngine> SandboxComposer<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    /// Runs the module over `fetched`. Never fails outright: every problem
    /// ends up in [`ExecutionResult::outcome`] next to whatever output the
    /// guest produced.
    pub async fn run(&self, request: &RunRequest, fetched: &FetchResult) -> ExecutionResult {
        let output_dir = match prepare_output_dir(&request.output_dir).await {
            Ok(dir) => dir,
            Err(e) => return ExecutionResult::failed(e),
        };

        // Removed when dropped, including on unwind
        let input_dir = match prepare_input_dir(fetched).await {
            Ok(dir) => dir,
            Err(e) => return ExecutionResult::failed(e),
        };
        debug!(
            "Mounting {} at {GUEST_INPUT_DIR} and {} at {GUEST_OUTPUT_DIR}",
            input_dir.path().display(),
            output_dir.display()
        );

        let result = self.execute(request, &input_dir, output_dir).await;

        let input_path = input_dir.path().to_path_buf();
        if let Err(e) = input_dir.close() {
            warn!("Failed to remove {}: {e}", input_path.display());
        }
        result
    }

    async fn execute(
        &self,
        request: &RunRequest,
        input_dir: &TempDir,
        output_dir: PathBuf,
    ) -> ExecutionResult {
        let wasm = match tokio::fs::read(&request.module_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return ExecutionResult::failed(HostError::io(
                    format!("read module {}", request.module_path.display()),
                    e,
                ))
            }
        };

        let mounts = MountSet::new(input_dir.path(), output_dir);
        let args = guest_args(request);
        let deadline = request.exec_timeout;
        let engine = Arc::clone(&self.engine);

        let joined = tokio::task::spawn_blocking(move || {
            let mut output = CapturedOutput::default();
            let outcome = engine.compile(&wasm).and_then(|module| {
                debug!("Module compiled ({} bytes)", wasm.len());
                engine.instantiate(&module, &mounts, &args, deadline, &mut output)
            });
            (output, outcome)
        })
        .await;

        match joined {
            Ok((output, outcome)) => {
                ExecutionResult::from_captured(output, outcome.map_err(HostError::from))
            }
            Err(e) => {
                ExecutionResult::failed(SandboxError::Engine(format!("execution task failed: {e}")))
            }
        }
    }
}

/// The guest argument vector: program name, the two file paths, then one
/// flag per metadata field, in that order.
pub fn guest_args(request: &RunRequest) -> Vec<String> {
    let mut args = vec![
        PROGRAM_NAME.to_string(),
        format!("--text-file={GUEST_INPUT_DIR}/{INPUT_FILE_NAME}"),
        format!("--out-file={GUEST_OUTPUT_DIR}/{}", request.output_file),
    ];
    args.extend(request.fields.to_args());
    args
}

async fn prepare_output_dir(dir: &Path) -> Result<PathBuf, HostError> {
    let absolute = std::path::absolute(dir)
        .map_err(|e| HostError::io(format!("resolve output dir {}", dir.display()), e))?;
    tokio::fs::create_dir_all(&absolute)
        .await
        .map_err(|e| HostError::io(format!("create output dir {}", absolute.display()), e))?;
    Ok(absolute)
}

async fn prepare_input_dir(fetched: &FetchResult) -> Result<TempDir, HostError> {
    let dir = tempfile::Builder::new()
        .prefix(INPUT_DIR_PREFIX)
        .tempdir()
        .map_err(|e| HostError::io("create input dir", e))?;

    let path = dir.path().join(INPUT_FILE_NAME);
    write_private(&path, &fetched.bytes)
        .await
        .map_err(|e| HostError::io(format!("write {}", path.display()), e))?;
    Ok(dir)
}

#[cfg(unix)]
async fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

#[cfg(not(unix))]
async fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(path, bytes).await
}
