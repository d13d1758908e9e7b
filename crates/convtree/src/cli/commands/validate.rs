use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::config::RuntimePaths;

#[derive(Debug, Clone, Args)]
pub struct ValidateArgs {
    /// Transcripts file to check; defaults to `<out-dir>/transcripts.jsonl`.
    #[arg(value_name = "INPUT")]
    pub input: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub strict: bool,
}

#[derive(Debug)]
pub struct ValidationCommandFailure {
    pub errors: usize,
    pub first_issue: Option<String>,
}

impl std::fmt::Display for ValidationCommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "validation failed with {} error(s).", self.errors)?;
        if let Some(issue) = &self.first_issue {
            write!(f, " {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationCommandFailure {}

pub fn run(args: &ValidateArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let mode = if args.strict {
        crate::validate::ValidationMode::Strict
    } else {
        crate::validate::ValidationMode::Baseline
    };
    let input = match &args.input {
        Some(path) => runtime_paths.resolve_input(path)?,
        None => crate::extract::build_artifact_layout(&runtime_paths.out_dir).transcripts_jsonl,
    };
    println!(
        "validate: start mode={} input={} out_dir={}",
        validation_mode_key(mode),
        input.display(),
        runtime_paths.out_dir.display()
    );

    let report = crate::validate::validate_jsonl_file(&input, mode)?;
    let artifacts = crate::validate::build_artifact_layout(&runtime_paths.out_dir);
    crate::validate::write_report_artifact(&artifacts.report_json, &report)?;
    println!(
        "validate: report status={} records={} validated={} errors={} warnings={} report={}",
        validation_status_key(report.status),
        report.total_records,
        report.records_validated,
        report.errors,
        report.warnings,
        artifacts.report_json.display()
    );
    println!(
        "validate: scorecard overall={} coverage={} parse_success={} content_completeness={} timestamp_coverage={}",
        report.quality_scorecard.overall_score,
        report.quality_scorecard.coverage_score,
        report.quality_scorecard.parse_success_score,
        report.quality_scorecard.content_completeness_score,
        report.quality_scorecard.timestamp_coverage_score
    );

    if report.errors > 0 {
        eprintln!(
            "validate: failed errors={} warnings={} next=review_report",
            report.errors, report.warnings
        );
        let first_issue = report
            .issues
            .first()
            .map(|issue| format!("line {}: {}", issue.line, issue.detail))
            .filter(|text| !text.is_empty());
        return Err(ValidationCommandFailure {
            errors: report.errors,
            first_issue,
        }
        .into());
    }

    println!(
        "validate: complete exit_code={} next=`convtree ingest --input {}`",
        report.exit_code(),
        input.display()
    );

    Ok(())
}

fn validation_mode_key(mode: crate::validate::ValidationMode) -> &'static str {
    match mode {
        crate::validate::ValidationMode::Baseline => "baseline",
        crate::validate::ValidationMode::Strict => "strict",
    }
}

fn validation_status_key(status: crate::validate::ValidationStatus) -> &'static str {
    match status {
        crate::validate::ValidationStatus::Pass => "pass",
        crate::validate::ValidationStatus::Warn => "warn",
        crate::validate::ValidationStatus::Fail => "fail",
    }
}
