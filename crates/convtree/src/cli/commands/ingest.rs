use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::config::RuntimePaths;
use crate::ingest::{
    default_plan_from_paths, ingest_report_artifact_path, run_ingest,
    write_ingest_report_artifact,
};

#[derive(Debug, Clone, Args)]
pub struct IngestArgs {
    /// Transcripts to load; defaults to `<out-dir>/transcripts.jsonl`.
    #[arg(long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Target database; defaults to `<out-dir>/convtree.sqlite`.
    #[arg(long, value_name = "PATH")]
    pub sqlite: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub fail_fast: bool,
}

pub fn run(args: &IngestArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let input = args
        .input
        .as_deref()
        .map(|path| runtime_paths.resolve_input(path))
        .transpose()?;
    let sqlite = args
        .sqlite
        .as_deref()
        .map(|path| runtime_paths.resolve_input(path))
        .transpose()?;
    let mut plan = default_plan_from_paths(
        &runtime_paths.out_dir,
        input.as_deref(),
        sqlite.as_deref(),
    );
    plan.fail_fast = args.fail_fast;
    println!(
        "ingest: start input={} sqlite={} fail_fast={}",
        plan.transcripts_jsonl_path.display(),
        plan.sqlite_path.display(),
        plan.fail_fast
    );

    let report = run_ingest(&plan).context("ingest failed")?;
    for warning in &report.warnings {
        println!("ingest: warning detail={warning}");
    }

    let artifact_path = ingest_report_artifact_path(&runtime_paths.out_dir);
    write_ingest_report_artifact(&artifact_path, &report)?;
    println!(
        "ingest: complete records_read={} skipped={} conversations={} messages={} anomalies={} batches={} duration_ms={} report={}",
        report.records_read,
        report.records_skipped,
        report.conversations_written,
        report.messages_written,
        report.anomalies_written,
        report.batches_committed,
        report.duration_ms,
        artifact_path.display()
    );

    Ok(())
}
