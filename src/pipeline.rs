//! The run pipeline:
//!
//! `Init → Validated → OriginChecked → Fetched → Sandboxed → Completed | Failed`
//!
//! Stages only move forward. Any error is terminal; nothing is retried.

use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::RunRequest;
use crate::fetch::Fetcher;
use crate::origin;
use crate::sandbox::{ExecutionResult, SandboxComposer, SandboxEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Init,
    Validated,
    OriginChecked,
    Fetched,
    Sandboxed,
    Completed,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

/// Tracks the current stage of one run.
#[derive(Debug)]
struct Progress {
    stage: Stage,
}

impl Progress {
    fn new() -> Self {
        Self { stage: Stage::Init }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(!self.stage.is_terminal() && next > self.stage);
        debug!("{:?} -> {:?}", self.stage, next);
        self.stage = next;
    }
}

/// Origin check, download and sandbox run for a validated request.
pub struct Pipeline<F, E> {
    fetcher: F,
    composer: SandboxComposer<E>,
}

impl<F: Fetcher, E: SandboxEngine> Pipeline<F, E> {
    pub fn new(fetcher: F, engine: E) -> Self {
        Self {
            fetcher,
            composer: SandboxComposer::new(engine),
        }
    }

    /// Runs every stage after validation. The returned result always goes
    /// through the relay, so failures before the sandbox carry empty buffers.
    pub async fn run(&self, request: &RunRequest) -> ExecutionResult {
        let run_id = Uuid::new_v4();
        self.run_stages(request)
            .instrument(info_span!("run", %run_id))
            .await
    }

    async fn run_stages(&self, request: &RunRequest) -> ExecutionResult {
        let mut progress = Progress::new();
        progress.advance(Stage::Validated);

        if let Err(denied) = origin::check(&request.read_url, &request.allow_urls) {
            progress.advance(Stage::Failed);
            return ExecutionResult::failed(denied);
        }
        progress.advance(Stage::OriginChecked);

        let fetched = match self.fetcher.fetch(&request.read_url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                progress.advance(Stage::Failed);
                return ExecutionResult::failed(e);
            }
        };
        progress.advance(Stage::Fetched);
        info!("Fetched {} bytes from {}", fetched.len(), request.read_url);

        let result = self.composer.run(request, &fetched).await;
        progress.advance(Stage::Sandboxed);

        if result.is_success() {
            progress.advance(Stage::Completed);
            info!(
                "Module completed, output at {}",
                request.output_dir.join(&request.output_file).display()
            );
        } else {
            progress.advance(Stage::Failed);
        }
        result
    }
}
