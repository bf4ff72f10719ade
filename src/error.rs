//! Error types for the host pipeline.
//!
//! Each stage owns its own error enum. [`HostError`] wraps them and carries
//! the fixed per-stage prefix that ends up on the diagnostic line, so the
//! exit status stays uniform while the message tells the stages apart.

use std::time::Duration;

/// Invalid or missing run configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required field was not supplied by flag, env var or config file.
    #[error("--{field} is required")]
    Missing { field: &'static str },

    /// A field was supplied but its value is unusable.
    #[error("--{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The command line itself did not parse (unknown flag, bad number).
    #[error("{0}")]
    Args(String),

    /// The `--config` file could not be read or parsed.
    #[error("config file {path}: {reason}")]
    File { path: String, reason: String },
}

/// The read URL did not pass the origin allow list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermissionDenied {
    #[error("read-url must be https: {url}")]
    NotHttps { url: String },

    #[error("read-url not in allow list: {url}")]
    NotAllowed { url: String },
}

/// The bounded download failed. No partial body is ever returned.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Connection, TLS, timeout or body read failure.
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    /// Anything other than `200 OK`, redirects included.
    #[error("status={0}")]
    Status(u16),

    /// The body is larger than the ceiling.
    #[error("download too large, max={limit} bytes")]
    TooLarge { limit: usize },
}

/// Compilation or execution of the guest module failed.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The engine could not be set up (linker, WASI context, worker thread).
    #[error("engine setup: {0}")]
    Engine(String),

    /// The module bytes are not a valid module for this engine.
    #[error("compile: {0}")]
    Compile(String),

    /// The module trapped, lacks an entry point, or could not be linked.
    #[error("instantiate: {0}")]
    Instantiate(String),

    /// The guest called `proc_exit` with a non-zero code.
    #[error("module exited with code {0}")]
    Exit(i32),

    /// The execution deadline elapsed before the guest finished.
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),
}

/// Every way a run can fail. The Display output is the single diagnostic
/// line written to stderr.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("parse args failed: {0}")]
    Config(#[from] ConfigError),

    #[error("permission denied: {0}")]
    PermissionDenied(#[from] PermissionDenied),

    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("run wasm failed: {0}")]
    Sandbox(#[from] SandboxError),

    /// Filesystem failure while preparing the sandbox mounts.
    #[error("run wasm failed: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl HostError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        HostError::Io {
            context: context.into(),
            source,
        }
    }
}
