//! mailsift - command-line entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use mailsift::config::Settings;
use mailsift::domain::MessageId;
use mailsift::providers::mailbox::SnapshotMailbox;
use mailsift::providers::scoring::LlmScorer;
use mailsift::services::{
    CleanupSummary, DigestStyle, TracingObserver, TriageError, TriageService,
};
use mailsift::storage::JsonRecordStore;

#[derive(Debug, Parser)]
#[command(name = "mailsift", version, about = "Score unread email and pick safe cleanup candidates")]
struct Cli {
    /// Settings file (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch unread mail and reconcile it into the record store.
    Sync {
        #[arg(long)]
        max: Option<usize>,
    },
    /// Score unanalyzed and stale messages.
    Analyze {
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// List deletion candidates.
    Candidates {
        #[arg(long, allow_hyphen_values = true)]
        min_score: Option<f64>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Mark deletion candidates as read.
    MarkRead {
        #[arg(long, allow_hyphen_values = true)]
        min_score: Option<f64>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show analysis coverage and tier distribution.
    Summary,
    /// Digest of stored mail: categories, senders, important messages.
    Summarize {
        /// bullet, paragraph or keywords
        #[arg(long, default_value = "bullet")]
        style: DigestStyle,
        /// Only messages received in the last N days.
        #[arg(long)]
        days: Option<u32>,
    },
    /// Explain whether one message would be offered for deletion.
    Explain { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Settings::default_path);
    let settings = Settings::load(&config_path)
        .with_context(|| format!("loading settings from {}", config_path.display()))?;

    tracing::debug!(path = %config_path.display(), "Settings loaded");

    let store = Arc::new(JsonRecordStore::new(settings.storage.records_path.clone()));
    let mailbox = Arc::new(SnapshotMailbox::new(settings.mailbox.snapshot_path.clone()));
    let scorer = Arc::new(
        LlmScorer::from_settings(&settings.scoring).context("configuring the scorer")?,
    );
    let triage = TriageService::new(
        store,
        mailbox.clone(),
        mailbox,
        scorer.clone(),
        Arc::new(settings.analysis.clone()),
    )
    .context("validating analysis settings")?
    .with_batch_timeout(settings.scoring.batch_timeout())
    .with_summarizer(scorer);

    match cli.command {
        Command::Sync { max } => {
            let report = triage.sync(max.unwrap_or(settings.mailbox.max_fetch)).await?;
            println!(
                "fetched {}, kept {} analyses, {} new, {} dropped",
                report.fetched,
                report.carried_over,
                report.new_ids.len(),
                report.dropped_ids.len()
            );
        }
        Command::Analyze { batch_size } => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted; stopping after the current batch");
                    on_interrupt.cancel();
                }
            });

            let report = triage
                .analyze(batch_size, &TracingObserver, &cancel)
                .await?;
            println!(
                "analyzed {} of {} messages in {} batches, {} failed{}",
                report.analyzed,
                report.selected,
                report.batches_completed,
                report.failed,
                if report.cancelled { " (cancelled)" } else { "" }
            );
            if report.summarized > 0 {
                println!("summarized {}", report.summarized);
            }
            for failure in report.failures() {
                println!("  {}: {:?}", failure.message_id, failure.outcome);
            }
        }
        Command::Candidates { min_score, limit } => {
            let candidates = triage.candidates(min_score, limit).await?;
            for candidate in &candidates {
                println!(
                    "{:>6.1}  {}  {}  {}  {}",
                    candidate.analysis.score,
                    candidate.message.received_at.format("%Y-%m-%d"),
                    candidate.message.id,
                    candidate.message.sender_display(),
                    candidate.message.subject
                );
            }
            println!("{}", CleanupSummary::from_candidates(&candidates));
        }
        Command::MarkRead { min_score, limit } => {
            let candidates = triage.candidates(min_score, limit).await?;
            let ids: BTreeSet<MessageId> =
                candidates.iter().map(|c| c.message.id.clone()).collect();
            let report = match triage.mark_read(&ids).await {
                Ok(report) => report,
                Err(TriageError::MirrorFailed { report, source }) => {
                    println!("marked {} of {} as read", report.succeeded.len(), ids.len());
                    return Err(source).context("saving read state after the mailbox was updated");
                }
                Err(e) => return Err(e.into()),
            };
            println!("marked {} of {} as read", report.succeeded.len(), ids.len());
            for (id, reason) in &report.failed {
                println!("  failed {id}: {reason}");
            }
            if !report.is_complete() {
                anyhow::bail!("{} messages could not be marked as read", report.failed.len());
            }
        }
        Command::Summary => {
            println!("{}", triage.summary().await?);
        }
        Command::Summarize { style, days } => {
            println!("{}", triage.digest(days).await?.render(style));
        }
        Command::Explain { id } => {
            let explanation = triage.explain(&MessageId::from(id)).await?;
            let message = &explanation.record.message;
            println!("{}  {}", message.id, message.subject);
            println!("from {}", message.sender);
            if let Some(analysis) = &explanation.record.analysis {
                println!(
                    "score {:.1} ({}), category {}",
                    analysis.score, analysis.tier, analysis.category
                );
                if !analysis.rationale.is_empty() {
                    println!("rationale: {}", analysis.rationale);
                }
                if let Some(summary) = &analysis.summary {
                    println!("summary: {}", summary.summary);
                    for point in &summary.key_points {
                        println!("  - {point}");
                    }
                }
            }
            println!("{}", explanation.check);
        }
    }

    Ok(())
}
