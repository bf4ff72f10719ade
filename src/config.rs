use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use serde::Deserialize;

use crate::error::ConfigError;

/// Output file name used when neither the flag nor the config file set one.
pub const DEFAULT_OUTPUT_FILE: &str = "result.json";

/// Execution deadline applied to the guest when none is configured.
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;

/// Command line of the host. Every flag can also come from a `SANDHOST_*`
/// environment variable; anything left unset falls back to the config file.
#[derive(Debug, Default, clap::Parser)]
#[command(
    name = "sandhost",
    version,
    about = "Fetch an allow-listed HTTPS text file and run a WASI module over it",
    after_help = "RUST_LOG controls host diagnostics on stderr (e.g. RUST_LOG=sandhost=debug)."
)]
pub struct Cli {
    /// Path to the wasm module
    #[arg(long, env = "SANDHOST_WASM")]
    pub wasm: Option<String>,

    /// HTTPS URL fetched as the module's input
    #[arg(long = "read-url", env = "SANDHOST_READ_URL")]
    pub read_url: Option<String>,

    /// Comma separated exact allowed HTTPS URLs
    #[arg(long = "allow-urls", env = "SANDHOST_ALLOW_URLS")]
    pub allow_urls: Option<String>,

    /// Host directory mounted at /out
    #[arg(long = "output-dir", env = "SANDHOST_OUTPUT_DIR")]
    pub output_dir: Option<String>,

    /// Output file name under /out [default: result.json]
    #[arg(long = "output-file", env = "SANDHOST_OUTPUT_FILE")]
    pub output_file: Option<String>,

    /// Forwarded to the module as --type
    #[arg(long = "type", env = "SANDHOST_TYPE")]
    pub record_type: Option<String>,

    /// Forwarded to the module as --phase
    #[arg(long, env = "SANDHOST_PHASE")]
    pub phase: Option<String>,

    /// Forwarded to the module as --outcome
    #[arg(long, env = "SANDHOST_OUTCOME")]
    pub outcome: Option<String>,

    /// Forwarded to the module as --tags
    #[arg(long, env = "SANDHOST_TAGS")]
    pub tags: Option<String>,

    /// Forwarded to the module as --mood
    #[arg(long, env = "SANDHOST_MOOD")]
    pub mood: Option<String>,

    /// Guest execution deadline in seconds, 0 disables it [default: 30]
    #[arg(long = "exec-timeout-secs", env = "SANDHOST_EXEC_TIMEOUT_SECS")]
    pub exec_timeout_secs: Option<u64>,

    /// Optional TOML file providing defaults for the flags above
    #[arg(long, env = "SANDHOST_CONFIG")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Parses an argument vector without exiting the process.
    ///
    /// Help and version requests come back as [`ParseOutcome::Info`]; usage
    /// errors are flattened into [`ParseOutcome::Invalid`].
    pub fn parse_args<I, T>(args: I) -> Result<Self, ParseOutcome>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::parse_with(Self::command(), args)
    }

    /// Same as [`Cli::parse_args`] but ignores `SANDHOST_*` variables, so
    /// only the argument vector counts.
    pub fn parse_flags<I, T>(args: I) -> Result<Self, ParseOutcome>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::parse_with(flags_only_command(), args)
    }

    fn parse_with<I, T>(command: clap::Command, args: I) -> Result<Self, ParseOutcome>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let parsed = command
            .try_get_matches_from(args)
            .and_then(|matches| Cli::from_arg_matches(&matches));
        parsed.map_err(|e| match e.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                ParseOutcome::Info(e)
            }
            _ => {
                let rendered = e.render().to_string();
                let line = rendered.lines().next().unwrap_or("invalid arguments");
                ParseOutcome::Invalid(ConfigError::Args(
                    line.trim_start_matches("error: ").to_string(),
                ))
            }
        })
    }

    /// Loads the `--config` file if one was given.
    pub fn file_config(&self) -> Result<FileConfig, ConfigError> {
        match &self.config {
            Some(path) => FileConfig::load(path).map_err(|e| ConfigError::File {
                path: path.display().to_string(),
                reason: format!("{e:#}"),
            }),
            None => Ok(FileConfig::default()),
        }
    }
}

/// The host command with every `env` binding removed.
fn flags_only_command() -> clap::Command {
    Cli::command().mut_args(|arg| arg.env(None::<&'static str>))
}

/// Result of argument parsing that did not produce a [`Cli`].
#[derive(Debug)]
pub enum ParseOutcome {
    /// `--help` or `--version`; print and exit successfully.
    Info(clap::Error),
    Invalid(ConfigError),
}

/// Optional TOML config file.
///
/// ```toml
/// wasm = "./record-formatter.wasm"
/// read_url = "https://example.com/in.txt"
/// allow_urls = ["https://example.com/in.txt"]
/// output_dir = "${HOME}/out"
///
/// [metadata]
/// type = "weird"
/// tags = "cat, dog"
/// ```
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub wasm: Option<String>,
    pub read_url: Option<String>,
    #[serde(default)]
    pub allow_urls: Vec<String>,
    pub output_dir: Option<String>,
    pub output_file: Option<String>,
    pub exec_timeout_secs: Option<u64>,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct MetadataConfig {
    #[serde(rename = "type")]
    pub record_type: Option<String>,
    pub phase: Option<String>,
    pub outcome: Option<String>,
    pub tags: Option<String>,
    pub mood: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${HOME}
        let expanded = shellexpand::env(&content)?;
        let config: FileConfig = toml::from_str(&expanded)?;
        Ok(config)
    }
}

/// Metadata forwarded to the module, one flag per field.
///
/// A closed record rather than a map so the module always sees the same
/// five flags, empty or not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFields {
    pub record_type: String,
    pub phase: String,
    pub outcome: String,
    pub tags: String,
    pub mood: String,
}

impl RecordFields {
    /// Flag-style arguments in a fixed order.
    pub fn to_args(&self) -> [String; 5] {
        [
            format!("--type={}", self.record_type),
            format!("--phase={}", self.phase),
            format!("--outcome={}", self.outcome),
            format!("--tags={}", self.tags),
            format!("--mood={}", self.mood),
        ]
    }
}

/// A validated run. Built once per invocation and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub module_path: PathBuf,
    pub read_url: String,
    /// Exact URLs the host may fetch. Never empty.
    pub allow_urls: Vec<String>,
    pub output_dir: PathBuf,
    /// Single path component joined under the guest's `/out`.
    pub output_file: String,
    pub fields: RecordFields,
    /// `None` lets the guest run without a deadline.
    pub exec_timeout: Option<Duration>,
}

impl RunRequest {
    /// Merges flags over the config file and validates the result.
    ///
    /// Pure: touches neither the filesystem nor the network.
    pub fn resolve(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let wasm = non_empty(cli.wasm.or(file.wasm))
            .ok_or(ConfigError::Missing { field: "wasm" })?;
        let read_url = non_empty(cli.read_url.or(file.read_url))
            .ok_or(ConfigError::Missing { field: "read-url" })?;

        let allow_urls = match cli.allow_urls {
            Some(raw) => parse_csv(&raw),
            None => file
                .allow_urls
                .iter()
                .flat_map(|entry| parse_csv(entry))
                .collect(),
        };
        if allow_urls.is_empty() {
            return Err(ConfigError::Invalid {
                field: "allow-urls",
                reason: "must not be empty".to_string(),
            });
        }

        let output_dir = non_empty(cli.output_dir.or(file.output_dir))
            .ok_or(ConfigError::Missing { field: "output-dir" })?;

        let output_file = cli
            .output_file
            .or(file.output_file)
            .unwrap_or_else(|| DEFAULT_OUTPUT_FILE.to_string());
        validate_output_file(&output_file)?;

        let meta = file.metadata;
        let fields = RecordFields {
            record_type: cli.record_type.or(meta.record_type).unwrap_or_default(),
            phase: cli.phase.or(meta.phase).unwrap_or_default(),
            outcome: cli.outcome.or(meta.outcome).unwrap_or_default(),
            tags: cli.tags.or(meta.tags).unwrap_or_default(),
            mood: cli.mood.or(meta.mood).unwrap_or_default(),
        };

        let timeout_secs = cli
            .exec_timeout_secs
            .or(file.exec_timeout_secs)
            .unwrap_or(DEFAULT_EXEC_TIMEOUT_SECS);
        let exec_timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));

        Ok(RunRequest {
            module_path: PathBuf::from(wasm),
            read_url,
            allow_urls,
            output_dir: PathBuf::from(output_dir),
            output_file,
            fields,
            exec_timeout,
        })
    }
}

/// Splits a comma separated list, trimming each element and dropping
/// elements that are empty after trimming. Order is preserved.
pub fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn validate_output_file(name: &str) -> Result<(), ConfigError> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.contains('/') || name.contains('\\') {
        Some("must be a file name, not a path")
    } else if name == "." || name == ".." {
        Some("must name a file")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ConfigError::Invalid {
            field: "output-file",
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
