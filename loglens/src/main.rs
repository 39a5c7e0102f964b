//! loglens - access log catalog and query CLI
//!
//! Registers uploads for the worker and reads back summaries, events and job
//! state from the shared store.

#[allow(dead_code)]
mod context;
mod report;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use loglens_core::types::{format_ordering_key, parse_time_bound};
use loglens_core::{EventQuery, Job, LogService, SummaryState};
use std::path::{Path, PathBuf};

use crate::context::AppContext;

#[derive(Parser)]
#[command(name = "loglens")]
#[command(about = "Register access logs and query their analysis")]
#[command(version)]
struct Args {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a log file and queue it for analysis
    Upload {
        /// Path to the access log
        file: PathBuf,

        /// Owner recorded with the upload
        #[arg(short, long, default_value = "local")]
        owner: String,
    },

    /// Register a blob that is already in the blob store and queue it
    Register {
        subject_id: String,
        storage_key: String,

        #[arg(long, default_value = "access.log")]
        filename: String,

        #[arg(long)]
        size: Option<u64>,

        #[arg(short, long, default_value = "local")]
        owner: String,
    },

    /// Queue a fresh analysis of a registered log
    Reanalyze { subject_id: String },

    /// List registered logs, newest first
    List {
        #[arg(short, long)]
        owner: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show the summary of a log
    Summary { subject_id: String },

    /// Page through a log's events
    Events {
        subject_id: String,

        /// Page number, starting at 1
        #[arg(short, long, default_value_t = 1)]
        page: usize,

        /// Events per page (0 uses the configured default)
        #[arg(short, long, default_value_t = 0)]
        limit: usize,

        /// Only events from this client address
        #[arg(long)]
        client: Option<String>,

        /// Only events with this status code
        #[arg(long)]
        status: Option<u16>,

        /// Inclusive lower time bound (RFC 3339 or YYYY-MM-DDTHH:MM[:SS] in UTC)
        #[arg(long, value_parser = time_bound)]
        from: Option<DateTime<Utc>>,

        /// Inclusive upper time bound
        #[arg(long, value_parser = time_bound)]
        to: Option<DateTime<Utc>>,

        /// Newest first
        #[arg(long)]
        desc: bool,
    },

    /// Show whether a summary exists and recent jobs
    Status { subject_id: String },

    /// Show one job
    Job { job_id: String },

    /// Delete a log with its blob, summary and events
    Delete { subject_id: String },
}

fn time_bound(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_time_bound(s).ok_or_else(|| format!("unrecognized time '{}'", s))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let ctx = AppContext::init("loglens")?;
    let service = ctx.service();
    let json = args.json;

    match args.command {
        Command::Upload { file, owner } => cmd_upload(&service, &file, &owner, json),
        Command::Register {
            subject_id,
            storage_key,
            filename,
            size,
            owner,
        } => {
            let reg = service
                .register_existing(&owner, &subject_id, &storage_key, &filename, size)
                .context("failed to register log")?;
            print_registration(&reg.subject_id, &reg.job_id, json)
        }
        Command::Reanalyze { subject_id } => {
            let job = service
                .request_analysis(&subject_id)
                .context("failed to queue analysis")?;
            print_registration(&subject_id, &job.job_id, json)
        }
        Command::List { owner, limit } => cmd_list(&service, owner.as_deref(), limit, json),
        Command::Summary { subject_id } => cmd_summary(&service, &subject_id, json),
        Command::Events {
            subject_id,
            page,
            limit,
            client,
            status,
            from,
            to,
            desc,
        } => {
            let query = EventQuery {
                page,
                limit,
                client,
                status,
                time_from: from,
                time_to: to,
                descending: desc,
            };
            cmd_events(&service, &subject_id, &query, json)
        }
        Command::Status { subject_id } => cmd_status(&service, &subject_id, json),
        Command::Job { job_id } => {
            let job = service
                .job(&job_id)?
                .with_context(|| format!("job {} not found", job_id))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&job)?);
            } else {
                print_job(&job);
            }
            Ok(())
        }
        Command::Delete { subject_id } => {
            let removed = service
                .delete_log(&subject_id)
                .with_context(|| format!("failed to delete log {}", subject_id))?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "subject_id": subject_id, "events_removed": removed })
                );
            } else {
                println!("Deleted {} ({} events removed)", subject_id, removed);
            }
            Ok(())
        }
    }
}

fn cmd_upload(service: &LogService, file: &Path, owner: &str, json: bool) -> Result<()> {
    let content =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "access.log".to_string());

    let reg = service
        .register_upload(owner, &filename, &content)
        .context("failed to register upload")?;
    tracing::info!(subject_id = %reg.subject_id, job_id = %reg.job_id, bytes = content.len(), "Upload registered");

    print_registration(&reg.subject_id, &reg.job_id, json)
}

fn print_registration(subject_id: &str, job_id: &str, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::json!({ "subject_id": subject_id, "job_id": job_id })
        );
    } else {
        println!("Subject: {}", subject_id);
        println!("Job:     {} (queued)", job_id);
    }
    Ok(())
}

fn cmd_list(service: &LogService, owner: Option<&str>, limit: usize, json: bool) -> Result<()> {
    let logs = service.list_logs(owner, limit)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&logs)?);
        return Ok(());
    }

    if logs.is_empty() {
        println!("No logs registered.");
        return Ok(());
    }
    for log in logs {
        println!(
            "{}  {}  {:<10}  {}",
            log.subject_id,
            log.uploaded_at.format("%Y-%m-%d %H:%M:%S"),
            log.owner,
            log.filename
        );
    }
    Ok(())
}

fn cmd_summary(service: &LogService, subject_id: &str, json: bool) -> Result<()> {
    match service.summary_state(subject_id)? {
        SummaryState::NotFound => bail!("log {} not found", subject_id),
        SummaryState::Pending { latest_job } => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "subject_id": subject_id, "pending": true, "latest_job": latest_job })
                );
            } else {
                match latest_job {
                    Some(job) => println!(
                        "Analysis pending (job {}: {})",
                        job.job_id,
                        job.status.as_str()
                    ),
                    None => println!("Analysis pending (no job yet)"),
                }
            }
            Ok(())
        }
        SummaryState::Ready(summary) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                report::print_summary(&summary);
            }
            Ok(())
        }
    }
}

fn cmd_events(service: &LogService, subject_id: &str, query: &EventQuery, json: bool) -> Result<()> {
    if service.get_log(subject_id)?.is_none() {
        bail!("log {} not found", subject_id);
    }
    let page = service
        .events(subject_id, query)
        .context("failed to query events")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    for event in &page.items {
        println!(
            "{}  {:<15} {:<6} {:<5} {:>8}  {}",
            format_ordering_key(&event.ordering_key),
            event.client,
            event.method,
            event.status,
            event.bytes,
            event.path
        );
    }
    println!(
        "page {} ({} per page): {} shown, {}{} matching",
        page.page,
        page.limit,
        page.items.len(),
        if page.exhausted { "" } else { "at least " },
        page.total
    );
    Ok(())
}

fn cmd_status(service: &LogService, subject_id: &str, json: bool) -> Result<()> {
    let status = service.status(subject_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Subject:  {}", subject_id);
    println!(
        "Summary:  {}",
        if status.has_summary { "ready" } else { "not yet" }
    );
    println!();
    if status.jobs.is_empty() {
        println!("No jobs.");
    }
    for job in &status.jobs {
        print_job(job);
        println!();
    }
    Ok(())
}

fn print_job(job: &Job) {
    println!("Job:      {}", job.job_id);
    println!("Status:   {}", job.status.as_str());
    println!("Attempts: {}", job.attempts);
    println!(
        "Created:  {}",
        job.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(started) = job.started_at {
        println!("Started:  {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(finished) = job.finished_at {
        println!("Finished: {}", finished.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(error) = &job.error {
        println!("Error:    {}", error);
    }
}
