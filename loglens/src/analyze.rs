//! loglens-analyze - one-shot analysis of a local access log
//!
//! Runs the same pipeline the worker runs, in the foreground, and prints the
//! summary. With `--no-store` nothing is written; the file is only aggregated.

mod context;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use loglens_core::{Aggregator, LogEntry, Summary};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use crate::context::AppContext;

#[derive(Parser)]
#[command(name = "loglens-analyze")]
#[command(about = "Analyze a local access log and print its summary")]
#[command(version)]
struct Args {
    /// Access log to analyze
    file: PathBuf,

    /// Owner recorded when the log is stored
    #[arg(short, long, default_value = "local")]
    owner: String,

    /// Aggregate only; do not store the log, its events or its summary
    #[arg(long)]
    no_store: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let ctx = AppContext::init("loglens-analyze")?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} ({elapsed})")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(format!("Reading {}", args.file.display()));

    let on_progress = |lines: u64| pb.set_message(format!("{} lines read", lines));

    let result = if args.no_store {
        aggregate_only(&ctx, &args, on_progress)
    } else {
        analyze_and_store(&ctx, &args, on_progress)
    };
    pb.finish_and_clear();

    let (subject_id, summary) = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if let Some(subject_id) = subject_id {
        println!("Stored as {}", subject_id);
        println!();
    }
    report::print_summary(&summary);
    Ok(())
}

fn aggregate_only<F>(ctx: &AppContext, args: &Args, on_progress: F) -> Result<(Option<String>, Summary)>
where
    F: FnMut(u64),
{
    let file = File::open(&args.file)
        .with_context(|| format!("failed to open {}", args.file.display()))?;
    let subject_id = args.file.display().to_string();

    let mut discard = |_: &[LogEntry]| -> loglens_core::Result<()> { Ok(()) };
    let summary = Aggregator::new(ctx.config.ingest.batch_size)
        .with_progress_every(ctx.config.ingest.progress_every)
        .run_with_progress(&subject_id, BufReader::new(file), &mut discard, on_progress)
        .context("failed to aggregate log")?;

    tracing::info!(
        file = %args.file.display(),
        total_lines = summary.total_lines,
        parsed_lines = summary.parsed_lines(),
        "Aggregated without storing"
    );
    Ok((None, summary))
}

fn analyze_and_store<F>(ctx: &AppContext, args: &Args, on_progress: F) -> Result<(Option<String>, Summary)>
where
    F: FnMut(u64),
{
    let content = std::fs::read(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let filename = args
        .file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "access.log".to_string());

    let (record, job) = ctx
        .service()
        .store_upload(&args.owner, &filename, &content)
        .context("failed to store log")?;

    let summary = ctx
        .analyzer()
        .run_with_progress(&job.job_id, &record.subject_id, on_progress)
        .with_context(|| format!("analysis of {} failed", record.subject_id))?;

    Ok((Some(record.subject_id), summary))
}
