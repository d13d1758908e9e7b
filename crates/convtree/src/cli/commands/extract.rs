use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::{Args, ValueEnum};

use crate::config::RuntimePaths;
use crate::extract::ExtractionPlan;
use crate::reconstruct::{DEFAULT_MAX_ALTERNATES, ReconstructOptions, RootSelectionPolicy};
use crate::utils::time::now_utc_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RootPolicyArg {
    MostMessages,
    FirstInDocument,
}

impl From<RootPolicyArg> for RootSelectionPolicy {
    fn from(value: RootPolicyArg) -> Self {
        match value {
            RootPolicyArg::MostMessages => Self::MostMessages,
            RootPolicyArg::FirstInDocument => Self::FirstInDocument,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ExtractArgs {
    /// Backup root to search for conversation folders; defaults to the cwd.
    #[arg(long, value_name = "PATH", conflicts_with = "conversations_dir")]
    pub backup_root: Option<PathBuf>,

    /// Read documents from this folder directly, skipping discovery.
    #[arg(long, value_name = "PATH")]
    pub conversations_dir: Option<PathBuf>,

    /// Also emit alternate branches (edits and regenerations).
    #[arg(long, default_value_t = false)]
    pub alternates: bool,

    #[arg(long, default_value_t = DEFAULT_MAX_ALTERNATES)]
    pub max_alternates: usize,

    #[arg(long, value_enum, default_value_t = RootPolicyArg::MostMessages)]
    pub root_policy: RootPolicyArg,

    /// Record a sha256 digest for every source document.
    #[arg(long, default_value_t = false)]
    pub hash: bool,

    /// Also render a static HTML report.
    #[arg(long, default_value_t = false)]
    pub html: bool,

    #[arg(long, default_value_t = false)]
    pub fail_fast: bool,
}

impl ExtractArgs {
    #[must_use]
    pub fn plan(&self) -> ExtractionPlan {
        ExtractionPlan {
            reconstruct: ReconstructOptions {
                include_alternates: self.alternates,
                max_alternates: self.max_alternates,
                root_policy: self.root_policy.into(),
            },
            hash_sources: self.hash,
            fail_fast: self.fail_fast,
        }
    }
}

pub fn run(args: &ExtractArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let plan = args.plan();
    println!(
        "extract: start alternates={} max_alternates={} root_policy={} hash={} fail_fast={} out_dir={}",
        plan.reconstruct.include_alternates,
        plan.reconstruct.max_alternates,
        plan.reconstruct.root_policy.as_str(),
        plan.hash_sources,
        plan.fail_fast,
        runtime_paths.out_dir.display()
    );

    println!("extract: stage locate_conversations");
    let conversations_dir = locate_conversations_dir(args, runtime_paths)?;
    let documents = crate::discovery::list_conversation_documents(&conversations_dir)?;
    println!(
        "extract: checkpoint documents_listed dir={} documents={}",
        conversations_dir.display(),
        documents.len()
    );

    println!("extract: stage reconstruct");
    let run = crate::extract::extract_documents(&documents, &plan)?;
    println!(
        "extract: checkpoint reconstruct_complete reconstructed={} failed={}",
        run.records.len(),
        run.failures.len()
    );
    for failure in &run.failures {
        println!(
            "extract: failure kind={} path={} reason={}",
            failure.kind.as_str(),
            failure.source_path,
            failure.reason
        );
    }

    println!("extract: stage write_extract_artifacts");
    let artifacts = crate::extract::build_artifact_layout(&runtime_paths.out_dir);
    let stats = crate::extract::write_extract_artifacts(&artifacts, &run)?;
    println!(
        "extract: checkpoint transcripts_written {}",
        artifacts.transcripts_jsonl.display()
    );
    let mut written: Vec<&Path> = vec![
        &artifacts.transcripts_jsonl,
        &artifacts.failures_json,
        &artifacts.schema_json,
        &artifacts.stats_json,
    ];

    println!("extract: stage device_info");
    let lookup = crate::device::lookup_device_info(&conversations_dir);
    if let Some(device) = &lookup.device {
        crate::device::write_device_artifact(&artifacts.device_json, device)?;
        written.push(&artifacts.device_json);
        println!(
            "extract: checkpoint device_written {}",
            artifacts.device_json.display()
        );
    }
    for warning in &lookup.warnings {
        println!("extract: device_warning detail={warning}");
    }

    let generated_at_utc = now_utc_rfc3339()?;
    if args.html {
        println!("extract: stage render_report");
        let html = crate::report::render_report(
            &run.records,
            &stats,
            lookup.device.as_ref(),
            &generated_at_utc,
        );
        crate::report::write_report_artifact(&artifacts.report_html, &html)?;
        written.push(&artifacts.report_html);
        println!(
            "extract: checkpoint report_written {}",
            artifacts.report_html.display()
        );
    }

    let manifest = crate::extract::build_manifest(
        &conversations_dir,
        generated_at_utc,
        &plan,
        &run,
        &written,
    )?;
    crate::extract::write_manifest_artifact(&artifacts.manifest_json, &manifest)?;
    println!(
        "extract: complete documents={} reconstructed={} failed={} messages={} anomalies={} manifest={}",
        stats.counts.documents_seen,
        stats.counts.documents_reconstructed,
        stats.counts.documents_failed,
        stats.counts.messages_emitted,
        stats.counts.anomalies,
        artifacts.manifest_json.display()
    );
    println!(
        "extract: next `convtree validate {}`",
        artifacts.transcripts_jsonl.display()
    );

    Ok(())
}

fn locate_conversations_dir(args: &ExtractArgs, runtime_paths: &RuntimePaths) -> Result<PathBuf> {
    if let Some(path) = &args.conversations_dir {
        let resolved = runtime_paths.resolve_input(path)?;
        if !resolved.is_dir() {
            return Err(anyhow!(
                "conversations dir does not exist: {}",
                resolved.display()
            ));
        }
        return Ok(resolved);
    }

    let backup_root = match &args.backup_root {
        Some(path) => runtime_paths.resolve_input(path)?,
        None => runtime_paths.cwd.clone(),
    };
    let folders = crate::discovery::discover_conversation_folders(&backup_root)?;
    crate::discovery::select_conversation_folder(&folders)
        .map(|folder| folder.path.clone())
        .ok_or_else(|| {
            anyhow!(
                "no conversations-v3-* folder found under {}",
                backup_root.display()
            )
        })
}
