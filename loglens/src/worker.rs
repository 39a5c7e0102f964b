//! loglens-worker - queue worker daemon
//!
//! Consumes analysis work units until interrupted. Ctrl-C stops polling; units
//! already in flight are finished before the process exits.

#[allow(dead_code)]
mod context;

use anyhow::{Context, Result};
use clap::Parser;
use loglens_core::{Outcome, Worker};

use crate::context::AppContext;

#[derive(Parser)]
#[command(name = "loglens-worker")]
#[command(about = "Process queued log analysis jobs")]
#[command(version)]
struct Args {
    /// Drain the queue once and exit instead of polling forever
    #[arg(long)]
    once: bool,

    /// Override the number of units received per poll
    #[arg(short, long)]
    max_messages: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let ctx = AppContext::init("loglens-worker")?;

    let mut worker_config = ctx.config.worker.clone();
    if let Some(max) = args.max_messages {
        worker_config.max_messages = max.max(1);
    }
    let worker = Worker::new(ctx.queue.clone(), ctx.analyzer(), worker_config);

    if args.once {
        return drain(&worker).await;
    }

    println!("loglens-worker running. Press Ctrl-C to stop.");
    worker
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Could not listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
        })
        .await
        .context("worker stopped with an error")?;
    println!("Stopped.");
    Ok(())
}

/// Poll until a receive comes back empty, then report what happened.
async fn drain(worker: &Worker) -> Result<()> {
    let mut completed = 0;
    let mut skipped = 0;
    let mut failed = 0;

    loop {
        let outcomes = worker
            .poll_once()
            .await
            .context("failed to receive work units")?;
        if outcomes.is_empty() {
            break;
        }
        for outcome in outcomes {
            match outcome {
                Outcome::Completed => completed += 1,
                Outcome::Skipped => skipped += 1,
                Outcome::Failed(reason) => {
                    eprintln!("Failed: {}", reason);
                    failed += 1;
                }
            }
        }
    }

    println!(
        "Processed: {} completed, {} skipped, {} failed",
        completed, skipped, failed
    );
    Ok(())
}
