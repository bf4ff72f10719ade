use std::process::ExitCode;

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use sandhost::config::{Cli, ParseOutcome};
use sandhost::{relay, HostError, HttpFetcher, Pipeline, RunRequest, WasmtimeEngine};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging (RUST_LOG=sandhost=debug for stage transitions).
    // Diagnostics go to stderr so stdout carries only the guest's output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sandhost=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(ParseOutcome::Info(info)) => {
            let _ = info.print();
            return ExitCode::SUCCESS;
        }
        Err(ParseOutcome::Invalid(e)) => return fail(e.into()),
    };

    // Nothing touches the network or the sandbox before this succeeds
    let request = match cli
        .file_config()
        .and_then(|file| RunRequest::resolve(cli, file))
    {
        Ok(request) => request,
        Err(e) => return fail(e.into()),
    };
    debug!("Resolved run: {request:?}");
    info!(
        "Module {} over {} ({} allowed URLs)",
        request.module_path.display(),
        request.read_url,
        request.allow_urls.len()
    );

    let engine = match WasmtimeEngine::new() {
        Ok(engine) => engine,
        Err(e) => return fail(e.into()),
    };

    let fetcher = match HttpFetcher::new() {
        Ok(fetcher) => fetcher,
        Err(e) => return fail(e.into()),
    };

    let pipeline = Pipeline::new(fetcher, engine);
    let result = pipeline.run(&request).await;

    let mut stdout = std::io::stdout().lock();
    let mut stderr = std::io::stderr().lock();
    match relay::relay(result, &mut stdout, &mut stderr) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

/// Prints the one-line diagnostic and picks the exit status.
fn fail(err: HostError) -> ExitCode {
    eprintln!("{err}");
    ExitCode::FAILURE
}
