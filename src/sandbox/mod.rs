//! Execution sandbox.
//!
//! The guest sees exactly two preopened directories and an argument
//! vector. No environment, no stdin, no sockets:
//!
//! 1. `/in`  — read-only, holds the downloaded text as `input.txt`
//! 2. `/out` — read-write, the operator's output directory
//!
//! Engines plug in behind [`SandboxEngine`]; [`WasmtimeEngine`] is the real
//! one, tests use recording doubles.

pub mod composer;
pub mod engine;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HostError, SandboxError};

pub use composer::SandboxComposer;
pub use engine::WasmtimeEngine;

/// Guest path of the download mount.
pub const GUEST_INPUT_DIR: &str = "/in";

/// Guest path of the output mount.
pub const GUEST_OUTPUT_DIR: &str = "/out";

/// File name of the downloaded text inside `/in`.
pub const INPUT_FILE_NAME: &str = "input.txt";

/// `argv[0]` handed to the guest.
pub const PROGRAM_NAME: &str = "record-formatter";

/// What the guest may do inside a mounted directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountAccess {
    /// List and read only. No create, write, rename or delete.
    ReadOnly,
    ReadWrite,
}

/// A host directory exposed to the guest under `guest_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxMount {
    host_dir: PathBuf,
    guest_path: &'static str,
    access: MountAccess,
}

impl SandboxMount {
    pub fn host_dir(&self) -> &Path {
        &self.host_dir
    }

    pub fn guest_path(&self) -> &'static str {
        self.guest_path
    }

    pub fn access(&self) -> MountAccess {
        self.access
    }
}

/// The two mounts of a run, `/in` first then `/out`.
///
/// Only constructible through [`MountSet::new`], so an engine can never be
/// handed a third directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSet {
    mounts: [SandboxMount; 2],
}

impl MountSet {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            mounts: [
                SandboxMount {
                    host_dir: input_dir.into(),
                    guest_path: GUEST_INPUT_DIR,
                    access: MountAccess::ReadOnly,
                },
                SandboxMount {
                    host_dir: output_dir.into(),
                    guest_path: GUEST_OUTPUT_DIR,
                    access: MountAccess::ReadWrite,
                },
            ],
        }
    }

    pub fn input(&self) -> &SandboxMount {
        &self.mounts[0]
    }

    pub fn output(&self) -> &SandboxMount {
        &self.mounts[1]
    }

    pub fn as_slice(&self) -> &[SandboxMount] {
        &self.mounts
    }
}

/// Guest stdout/stderr collected during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Capability provider behind the composer.
///
/// Implementations must not grant the guest anything beyond `mounts`,
/// `args` and the two capture buffers.
pub trait SandboxEngine: Send + Sync + 'static {
    type Module: Send + 'static;

    /// Validates and compiles module bytes.
    fn compile(&self, wasm: &[u8]) -> Result<Self::Module, SandboxError>;

    /// Runs the module's entry point to completion.
    ///
    /// Whatever the guest wrote is left in `output` even when this returns
    /// an error. `deadline` of `None` means no execution bound.
    fn instantiate(
        &self,
        module: &Self::Module,
        mounts: &MountSet,
        args: &[String],
        deadline: Option<Duration>,
        output: &mut CapturedOutput,
    ) -> Result<(), SandboxError>;
}

/// Captured guest streams plus how the run ended.
#[derive(Debug)]
pub struct ExecutionResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub outcome: Result<(), HostError>,
}

impl ExecutionResult {
    /// A run that failed before the guest produced anything.
    pub fn failed(err: impl Into<HostError>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            outcome: Err(err.into()),
        }
    }

    pub fn from_captured(output: CapturedOutput, outcome: Result<(), HostError>) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            outcome,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}
