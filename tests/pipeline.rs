//! End-to-end runs of the pipeline with an in-process fetcher and engine.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sandhost::config::{Cli, FileConfig};
use sandhost::error::{ConfigError, DownloadError, HostError, PermissionDenied, SandboxError};
use sandhost::sandbox::{CapturedOutput, MountSet, INPUT_FILE_NAME};
use sandhost::{relay, FetchResult, Fetcher, Pipeline, RunRequest, SandboxEngine};

const URL: &str = "https://example.com/in.txt";

/// Serves fixed bytes and counts how often it was asked.
#[derive(Clone)]
struct StaticFetcher {
    body: Result<Vec<u8>, u16>,
    calls: Arc<AtomicUsize>,
}

impl StaticFetcher {
    fn ok(body: &[u8]) -> Self {
        Self {
            body: Ok(body.to_vec()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn status(code: u16) -> Self {
        Self {
            body: Err(code),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, _url: &str) -> Result<FetchResult, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.body {
            Ok(bytes) => Ok(FetchResult {
                bytes: bytes.clone(),
            }),
            Err(code) => Err(DownloadError::Status(*code)),
        }
    }
}

/// Stand-in guest: upper-cases `/in/input.txt` into the `--out-file` under
/// `/out`, echoes the result to stdout and the argv to stderr.
#[derive(Clone, Default)]
struct UppercaseEngine {
    instantiated: Arc<Mutex<usize>>,
}

impl SandboxEngine for UppercaseEngine {
    type Module = ();

    fn compile(&self, wasm: &[u8]) -> Result<(), SandboxError> {
        if wasm.starts_with(b"\0asm") {
            Ok(())
        } else {
            Err(SandboxError::Compile("magic header not detected".to_string()))
        }
    }

    fn instantiate(
        &self,
        _module: &(),
        mounts: &MountSet,
        args: &[String],
        _deadline: Option<Duration>,
        output: &mut CapturedOutput,
    ) -> Result<(), SandboxError> {
        *self.instantiated.lock().unwrap() += 1;

        let text = std::fs::read(mounts.input().host_dir().join(INPUT_FILE_NAME))
            .map_err(|e| SandboxError::Instantiate(e.to_string()))?;
        let upper = text.to_ascii_uppercase();

        let out_file = args
            .iter()
            .find_map(|a| a.strip_prefix("--out-file=/out/"))
            .ok_or_else(|| SandboxError::Instantiate("no --out-file".to_string()))?;
        std::fs::write(mounts.output().host_dir().join(out_file), &upper)
            .map_err(|e| SandboxError::Instantiate(e.to_string()))?;

        output.stdout.extend_from_slice(&upper);
        output.stderr.extend_from_slice(args.join(" ").as_bytes());
        Ok(())
    }
}

struct Workspace {
    root: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("guest.wasm"), b"\0asm\x01\0\0\0").unwrap();
        std::fs::write(root.path().join("broken.wasm"), b"not wasm").unwrap();
        Self { root }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    fn request(&self, read_url: &str, allow: &str) -> RunRequest {
        let args = vec![
            "sandhost".to_string(),
            format!("--wasm={}", self.path("guest.wasm").display()),
            format!("--read-url={read_url}"),
            format!("--allow-urls={allow}"),
            format!("--output-dir={}", self.path("out").display()),
            "--type=weird".to_string(),
            "--mood=dark".to_string(),
        ];
        let cli = Cli::parse_flags(args).unwrap();
        RunRequest::resolve(cli, FileConfig::default()).unwrap()
    }
}

#[tokio::test]
async fn test_successful_run_writes_output_and_relays() {
    let ws = Workspace::new();
    let fetcher = StaticFetcher::ok(b"hello");
    let pipeline = Pipeline::new(fetcher.clone(), UppercaseEngine::default());

    let result = pipeline.run(&ws.request(URL, URL)).await;
    let (mut out, mut err) = (Vec::new(), Vec::new());
    relay::relay(result, &mut out, &mut err).unwrap();

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(out, b"HELLO");
    assert_eq!(
        String::from_utf8(err).unwrap(),
        "record-formatter --text-file=/in/input.txt --out-file=/out/result.json \
         --type=weird --phase= --outcome= --tags= --mood=dark"
    );
    assert_eq!(std::fs::read(ws.path("out/result.json")).unwrap(), b"HELLO");
}

#[tokio::test]
async fn test_denied_origin_never_fetches() {
    let ws = Workspace::new();
    let fetcher = StaticFetcher::ok(b"hello");
    let engine = UppercaseEngine::default();
    let pipeline = Pipeline::new(fetcher.clone(), engine.clone());

    let result = pipeline
        .run(&ws.request("https://example.com/other.txt", URL))
        .await;

    assert!(matches!(
        result.outcome,
        Err(HostError::PermissionDenied(PermissionDenied::NotAllowed { .. }))
    ));
    assert_eq!(fetcher.calls(), 0);
    assert_eq!(*engine.instantiated.lock().unwrap(), 0);
    assert!(!ws.path("out").exists());
}

#[tokio::test]
async fn test_plain_http_is_denied_even_if_listed() {
    let ws = Workspace::new();
    let fetcher = StaticFetcher::ok(b"hello");
    let pipeline = Pipeline::new(fetcher.clone(), UppercaseEngine::default());

    let url = "http://example.com/in.txt";
    let result = pipeline.run(&ws.request(url, url)).await;

    assert!(matches!(
        result.outcome,
        Err(HostError::PermissionDenied(PermissionDenied::NotHttps { .. }))
    ));
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_download_failure_skips_sandbox() {
    let ws = Workspace::new();
    let engine = UppercaseEngine::default();
    let pipeline = Pipeline::new(StaticFetcher::status(500), engine.clone());

    let result = pipeline.run(&ws.request(URL, URL)).await;

    assert!(matches!(
        result.outcome,
        Err(HostError::Download(DownloadError::Status(500)))
    ));
    assert!(result.stdout.is_empty());
    assert_eq!(*engine.instantiated.lock().unwrap(), 0);
    assert!(!ws.path("out").exists());
}

#[tokio::test]
async fn test_compile_failure_is_reported() {
    let ws = Workspace::new();
    let mut request = ws.request(URL, URL);
    request.module_path = ws.path("broken.wasm");
    let pipeline = Pipeline::new(StaticFetcher::ok(b"hello"), UppercaseEngine::default());

    let result = pipeline.run(&request).await;
    let err = result.outcome.unwrap_err();
    assert!(err.to_string().starts_with("run wasm failed: compile:"));
}

#[tokio::test]
async fn test_identical_runs_produce_identical_output() {
    let ws = Workspace::new();
    let request = ws.request(URL, URL);
    let pipeline = Pipeline::new(StaticFetcher::ok(b"same input"), UppercaseEngine::default());

    pipeline.run(&request).await.outcome.unwrap();
    let first = std::fs::read(ws.path("out/result.json")).unwrap();
    pipeline.run(&request).await.outcome.unwrap();
    let second = std::fs::read(ws.path("out/result.json")).unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_input_dir_does_not_outlive_run() {
    let ws = Workspace::new();
    let seen = Arc::new(Mutex::new(None::<PathBuf>));

    struct Spy(Arc<Mutex<Option<PathBuf>>>);

    impl SandboxEngine for Spy {
        type Module = ();

        fn compile(&self, _wasm: &[u8]) -> Result<(), SandboxError> {
            Ok(())
        }

        fn instantiate(
            &self,
            _module: &(),
            mounts: &MountSet,
            _args: &[String],
            _deadline: Option<Duration>,
            _output: &mut CapturedOutput,
        ) -> Result<(), SandboxError> {
            *self.0.lock().unwrap() = Some(mounts.input().host_dir().to_path_buf());
            Err(SandboxError::Instantiate("trap".to_string()))
        }
    }

    let pipeline = Pipeline::new(StaticFetcher::ok(b"x"), Spy(Arc::clone(&seen)));
    let result = pipeline.run(&ws.request(URL, URL)).await;
    assert!(result.outcome.is_err());

    let input_dir = seen.lock().unwrap().clone().unwrap();
    assert!(!input_dir.exists());
}

#[test]
fn test_invalid_config_fails_before_anything_runs() {
    let cli = Cli::parse_flags(["sandhost", "--read-url=https://example.com/in.txt"]).unwrap();
    let err = RunRequest::resolve(cli, FileConfig::default()).unwrap_err();
    assert!(matches!(err, ConfigError::Missing { field: "wasm" }));
    assert_eq!(
        HostError::from(err).to_string(),
        "parse args failed: --wasm is required"
    );
}
