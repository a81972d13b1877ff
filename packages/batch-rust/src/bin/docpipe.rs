//! `docpipe` command-line interface.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use docpipe_batch::{
    BatchConfig, BatchReport, BatchRun, DocumentStore, FsDocumentStore, Manifest,
};
use docpipe_core::{codec, Document, EditOperation, FailurePolicy, Pipeline, PipelineConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Apply editing pipelines to documents, one at a time or in batches.
#[derive(Parser, Debug)]
#[command(name = "docpipe", author, version, about, long_about = None)]
struct Cli {
    /// Log output format (logs go to stderr).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "DOCPIPE_LOG_FORMAT", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a blank document
    New {
        path: PathBuf,
        #[arg(long, default_value_t = 1)]
        pages: usize,
        #[arg(long, default_value_t = docpipe_core::types::DEFAULT_PAGE_WIDTH)]
        width: f64,
        #[arg(long, default_value_t = docpipe_core::types::DEFAULT_PAGE_HEIGHT)]
        height: f64,
        #[arg(long)]
        title: Option<String>,
    },

    /// Print a document's content and fingerprint as JSON
    Inspect { path: PathBuf },

    /// Run one pipeline on one document
    Apply {
        input: PathBuf,
        output: PathBuf,
        /// JSON file holding an array of operations
        #[arg(long)]
        operations: PathBuf,
        #[arg(long, value_enum, default_value_t = Policy::Abort)]
        policy: Policy,
    },

    /// Run a batch from a manifest or from an input directory
    Batch(BatchArgs),
}

#[derive(clap::Args, Debug)]
struct BatchArgs {
    /// JSON batch manifest
    #[arg(long, conflicts_with_all = ["input_dir", "output_dir"])]
    manifest: Option<PathBuf>,

    /// Process every document under this directory
    #[arg(long, requires = "output_dir", requires = "operations")]
    input_dir: Option<PathBuf>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// JSON file holding the operations for `--input-dir` batches
    #[arg(long)]
    operations: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Policy::Abort)]
    policy: Policy,

    #[arg(long, default_value_t = 4, env = "DOCPIPE_WORKERS")]
    workers: usize,

    /// Default per-job timeout in milliseconds
    #[arg(long, env = "DOCPIPE_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Cancel the remaining jobs after the first failure
    #[arg(long, env = "DOCPIPE_STOP_ON_ERROR")]
    stop_on_error: bool,

    /// Do not write documents whose pipeline only partially committed
    #[arg(long)]
    no_partial: bool,

    /// Do not write documents that no operation changed
    #[arg(long)]
    skip_unmodified: bool,

    /// Copy each input here before a job overwrites it in place
    #[arg(long, env = "DOCPIPE_BACKUP_DIR")]
    backup_dir: Option<PathBuf>,

    /// Write the report here instead of stdout
    #[arg(long, env = "DOCPIPE_REPORT")]
    report: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ReportFormat::Json)]
    format: ReportFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Policy {
    Abort,
    SkipAndContinue,
}

impl From<Policy> for FailurePolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Abort => Self::Abort,
            Policy::SkipAndContinue => Self::SkipAndContinue,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReportFormat {
    Json,
    Csv,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<ExitCode> {
    let store = FsDocumentStore::new();
    match command {
        Command::New {
            path,
            pages,
            width,
            height,
            title,
        } => {
            if pages == 0 {
                bail!("a document needs at least one page");
            }
            let mut document = Document::blank(&path, pages, width, height);
            if let Some(title) = title {
                document.content_mut().metadata.insert("title".to_string(), title);
            }
            let bytes = store.write(&document, &path).await?;
            info!(path = %path.display(), pages, bytes, "document created");
            Ok(ExitCode::SUCCESS)
        }
        Command::Inspect { path } => {
            let document = store.open(&path).await?;
            let output = serde_json::json!({
                "source": document.source(),
                "fingerprint": codec::fingerprint(document.content())?,
                "content": document.content(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Apply {
            input,
            output,
            operations,
            policy,
        } => {
            let edits = read_operations(&operations)?;
            let pipeline = Pipeline::from_edits(edits, FailurePolicy::from(policy).into());
            let mut document = store.open(&input).await?;
            let result = pipeline.run(&mut document);
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.status.is_committed() {
                let bytes = store.write(&document, &output).await?;
                info!(output = %output.display(), bytes, status = ?result.status, "output written");
                Ok(ExitCode::SUCCESS)
            } else {
                warn!(input = %input.display(), "pipeline rolled back; nothing written");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Batch(args) => run_batch(args, store).await,
    }
}

fn read_operations(path: &Path) -> Result<Vec<EditOperation>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read operations from {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid operations in {}", path.display()))
}

async fn run_batch(args: BatchArgs, store: FsDocumentStore) -> Result<ExitCode> {
    let manifest = match (&args.manifest, &args.input_dir, &args.output_dir) {
        (Some(path), _, _) => Manifest::load(path)?,
        (None, Some(input_dir), Some(output_dir)) => {
            let operations_path = args
                .operations
                .as_deref()
                .context("--operations is required with --input-dir")?;
            let text = std::fs::read_to_string(operations_path)
                .with_context(|| format!("failed to read {}", operations_path.display()))?;
            let operations: Vec<serde_json::Value> = serde_json::from_str(&text)?;
            let mut manifest = Manifest::from_dir(input_dir, output_dir, operations)?;
            manifest.failure_policy = args.policy.into();
            manifest
        }
        _ => bail!("pass either --manifest or --input-dir with --output-dir"),
    };
    let PipelineConfig { failure_policy, .. } = manifest.pipeline_config();
    let jobs = manifest.into_jobs()?;

    let config = BatchConfig {
        worker_count: args.workers,
        continue_on_error: !args.stop_on_error,
        default_job_timeout: args.timeout_ms.map(Duration::from_millis),
        save_partial_commits: !args.no_partial,
        write_unmodified: !args.skip_unmodified,
        backup_dir: args.backup_dir,
    };
    info!(jobs = jobs.len(), ?failure_policy, workers = config.worker_count, "starting batch");

    let run = BatchRun::new(jobs, config, Arc::new(store))?;
    let handle = run.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling queued jobs");
            handle.cancel();
        }
    });

    let report = run.run().await;
    write_report(&report, args.format, args.report.as_deref())?;

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn write_report(report: &BatchReport, format: ReportFormat, path: Option<&Path>) -> Result<()> {
    let rendered = match format {
        ReportFormat::Json => report.to_json_pretty()?,
        ReportFormat::Csv => report.to_csv(),
    };
    match path {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{rendered}"),
    }
    let summary = report.summary();
    eprintln!(
        "{} jobs: {} succeeded, {} failed, {} skipped, {} cancelled ({:.1}% success)",
        summary.total,
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.cancelled,
        summary.success_rate()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_flags_parse() {
        let cli = Cli::try_parse_from([
            "docpipe",
            "batch",
            "--manifest",
            "jobs.json",
            "--backup-dir",
            "bak",
            "--stop-on-error",
        ])
        .unwrap();
        let Command::Batch(args) = cli.command else {
            panic!("expected the batch subcommand");
        };
        assert_eq!(args.manifest, Some(PathBuf::from("jobs.json")));
        assert_eq!(args.backup_dir, Some(PathBuf::from("bak")));
        assert!(args.stop_on_error);
    }

    #[test]
    fn manifest_and_input_dir_conflict() {
        let parsed = Cli::try_parse_from([
            "docpipe",
            "batch",
            "--manifest",
            "jobs.json",
            "--input-dir",
            "in",
        ]);
        assert!(parsed.is_err());
    }
}
