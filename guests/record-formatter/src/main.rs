//! Record formatter guest.
//!
//! Reads text from `--text-file` (or `--text`), combines it with the
//! metadata flags and prints the record as JSON. With `--out-file` the same
//! bytes are also written to that path. Built for `wasm32-wasip1` and run by
//! the host with `/in` and `/out` preopened; runs natively too.

mod record;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use record::{parse_tags, Record};

#[derive(Debug, Parser)]
#[command(name = "record-formatter", version, about = "Format text and metadata as a JSON record")]
struct Args {
    /// Text content, ignored when --text-file is given
    #[arg(long)]
    text: Option<String>,

    /// File to read the text content from
    #[arg(long = "text-file")]
    text_file: Option<PathBuf>,

    /// Also write the record to this path
    #[arg(long = "out-file")]
    out_file: Option<PathBuf>,

    #[arg(long = "type")]
    record_type: Option<String>,

    #[arg(long)]
    phase: Option<String>,

    #[arg(long)]
    outcome: Option<String>,

    /// Comma separated tags
    #[arg(long)]
    tags: Option<String>,

    #[arg(long)]
    mood: Option<String>,
}

impl Args {
    fn into_record(self) -> Result<Record> {
        let text = match &self.text_file {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("read text file {}", path.display()))?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
            None => self.text.unwrap_or_default(),
        };

        Ok(Record {
            text,
            record_type: self.record_type.unwrap_or_default(),
            phase: self.phase.unwrap_or_default(),
            outcome: self.outcome.unwrap_or_default(),
            tags: parse_tags(self.tags.as_deref().unwrap_or_default()),
            mood: self.mood.unwrap_or_default(),
        })
    }
}

fn run(args: Args) -> Result<()> {
    let out_file = args.out_file.clone();
    let record = args.into_record()?;
    let json = record.to_json().context("serialize record")?;

    if let Some(path) = out_file {
        std::fs::write(&path, &json).with_context(|| format!("write {}", path.display()))?;
    }

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&json).context("write stdout")?;
    stdout.flush().context("write stdout")?;
    Ok(())
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("record-formatter: {e:#}");
            ExitCode::FAILURE
        }
    }
}
