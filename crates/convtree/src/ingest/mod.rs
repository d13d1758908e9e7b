use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;

use crate::models::ConversationRecord;
use crate::sqlite::{SqliteWriterConfig, write_records_to_sqlite};
use crate::utils::time::now_utc_rfc3339;

pub const INGEST_REPORT_SCHEMA_VERSION: &str = "convtree.ingest-report.v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestPlan {
    pub transcripts_jsonl_path: PathBuf,
    pub sqlite_path: PathBuf,
    pub fail_fast: bool,
}

#[must_use]
pub fn default_plan_from_paths(
    out_dir: &Path,
    input_override: Option<&Path>,
    sqlite_override: Option<&Path>,
) -> IngestPlan {
    IngestPlan {
        transcripts_jsonl_path: input_override
            .map_or_else(|| out_dir.join("transcripts.jsonl"), Path::to_path_buf),
        sqlite_path: sqlite_override
            .map_or_else(|| out_dir.join("convtree.sqlite"), Path::to_path_buf),
        fail_fast: false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub schema_version: String,
    pub transcripts_jsonl_path: String,
    pub sqlite_path: String,
    pub started_at_utc: String,
    pub finished_at_utc: String,
    pub duration_ms: u64,
    pub records_read: usize,
    pub records_skipped: usize,
    pub conversations_written: usize,
    pub messages_written: usize,
    pub anomalies_written: usize,
    pub batches_committed: usize,
    pub warnings: Vec<String>,
}

pub fn run_ingest(plan: &IngestPlan) -> Result<IngestReport> {
    let started_at_utc = now_utc_rfc3339()?;
    let started_at = std::time::Instant::now();

    let input = std::fs::read_to_string(&plan.transcripts_jsonl_path).with_context(|| {
        format!(
            "failed to read transcripts file: {}",
            plan.transcripts_jsonl_path.display()
        )
    })?;
    let (records, warnings) = parse_transcripts_jsonl(&input, plan.fail_fast)?;

    let write_stats =
        write_records_to_sqlite(&plan.sqlite_path, &records, SqliteWriterConfig::default())
            .context("failed to write conversations to sqlite")?;

    Ok(IngestReport {
        schema_version: INGEST_REPORT_SCHEMA_VERSION.to_string(),
        transcripts_jsonl_path: plan.transcripts_jsonl_path.display().to_string(),
        sqlite_path: plan.sqlite_path.display().to_string(),
        started_at_utc,
        finished_at_utc: now_utc_rfc3339()?,
        duration_ms: started_at.elapsed().as_millis() as u64,
        records_read: records.len() + warnings.len(),
        records_skipped: warnings.len(),
        conversations_written: write_stats.conversations_written,
        messages_written: write_stats.messages_written,
        anomalies_written: write_stats.anomalies_written,
        batches_committed: write_stats.batches_committed,
        warnings,
    })
}

pub fn parse_transcripts_jsonl(
    input: &str,
    fail_fast: bool,
) -> Result<(Vec<ConversationRecord>, Vec<String>)> {
    let mut records = Vec::new();
    let mut warnings = Vec::new();

    for (index, line) in input.lines().enumerate() {
        let line_number = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<ConversationRecord>(trimmed) {
            Ok(record) => records.push(record),
            Err(error) if fail_fast => {
                return Err(anyhow!(
                    "invalid transcripts jsonl row at line {line_number}: {error}"
                ));
            }
            Err(error) => warnings.push(format!(
                "invalid transcripts jsonl row at line {line_number}: {error}"
            )),
        }
    }

    Ok((records, warnings))
}

#[must_use]
pub fn ingest_report_artifact_path(out_dir: &Path) -> PathBuf {
    out_dir.join("ingest").join("report.json")
}

pub fn write_ingest_report_artifact(path: &Path, report: &IngestReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create ingest report artifact directory: {}",
                parent.display()
            )
        })?;
    }
    let encoded =
        serde_json::to_vec_pretty(report).context("failed to encode ingest report artifact")?;
    std::fs::write(path, encoded)
        .with_context(|| format!("failed to write ingest report artifact: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_rows_are_skipped_unless_fail_fast() {
        let input = "{\"not\": \"a record\"}\n\n";
        let (records, warnings) =
            parse_transcripts_jsonl(input, false).expect("lenient parse should succeed");
        assert!(records.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("line 1"));

        let error = parse_transcripts_jsonl(input, true).expect_err("strict parse should fail");
        assert!(error.to_string().contains("line 1"));
    }

    #[test]
    fn overrides_replace_default_paths() {
        let plan = default_plan_from_paths(
            Path::new("/out"),
            Some(Path::new("/elsewhere/t.jsonl")),
            None,
        );
        assert_eq!(plan.transcripts_jsonl_path, PathBuf::from("/elsewhere/t.jsonl"));
        assert_eq!(plan.sqlite_path, PathBuf::from("/out/convtree.sqlite"));
    }
}
