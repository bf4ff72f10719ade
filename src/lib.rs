//! Sandboxed execution host.
//!
//! Fetches one allow-listed HTTPS text file with a hard size ceiling and runs
//! an untrusted WASI module over it. The module sees the download under a
//! read-only `/in`, the operator's output directory under `/out`, and a
//! fixed argument vector. Nothing else.

pub mod config;
pub mod error;
pub mod fetch;
pub mod origin;
pub mod pipeline;
pub mod relay;
pub mod sandbox;

pub use config::{Cli, RecordFields, RunRequest};
pub use error::HostError;
pub use fetch::{FetchResult, Fetcher, HttpFetcher};
pub use pipeline::Pipeline;
pub use sandbox::{ExecutionResult, SandboxEngine, WasmtimeEngine};
