use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ConversationRecord, NormalizedMessage, Role, Transcript};
use crate::utils::time::{
    format_unix_seconds, parse_rfc3339_to_unix_millis, unix_seconds_to_millis,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    Baseline,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationIssueKind {
    InvalidJson,
    SchemaViolation,
    InvariantViolation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationIssueSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub line: usize,
    pub kind: ValidationIssueKind,
    pub severity: ValidationIssueSeverity,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationQualityScorecard {
    pub overall_score: u8,
    pub coverage_score: u8,
    pub parse_success_score: u8,
    pub content_completeness_score: u8,
    pub timestamp_coverage_score: u8,
    pub weakest_dimensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub schema_version: String,
    pub mode: ValidationMode,
    pub status: ValidationStatus,
    pub interpreted_exit_code: i32,
    pub total_records: usize,
    pub records_validated: usize,
    pub errors: usize,
    pub warnings: usize,
    pub quality_scorecard: ValidationQualityScorecard,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.errors > 0 { 2 } else { 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationArtifactLayout {
    pub report_json: PathBuf,
}

#[must_use]
pub fn build_artifact_layout(out_dir: &Path) -> ValidationArtifactLayout {
    ValidationArtifactLayout {
        report_json: out_dir.join("validate").join("report.json"),
    }
}

pub fn write_report_artifact(path: &Path, report: &ValidationReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("failed to create validate artifact directory")?;
    }

    let encoded =
        serde_json::to_vec_pretty(report).context("failed to encode validation report json")?;
    std::fs::write(path, encoded).context("failed to write validation report artifact")
}

pub fn validate_jsonl_file(path: &Path, mode: ValidationMode) -> Result<ValidationReport> {
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read input file: {}", path.display()))?;
    Ok(validate_jsonl_against_generated_schema(&input, mode))
}


#[must_use]
pub fn validate_jsonl_against_generated_schema(
    input: &str,
    mode: ValidationMode,
) -> ValidationReport {
    let schema = crate::models::json_schema();
    let required_fields = required_fields_from_schema(&schema);
    let mut issues = Vec::new();
    let mut total_records = 0usize;
    let mut json_records_parsed = 0usize;
    let mut records_validated = 0usize;
    let mut parsed_records = Vec::new();

    for (index, line) in input.lines().enumerate() {
        let line_number = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        total_records += 1;

        let value = match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => value,
            Err(error) => {
                issues.push(ValidationIssue {
                    line: line_number,
                    kind: ValidationIssueKind::InvalidJson,
                    severity: ValidationIssueSeverity::Error,
                    detail: format!("invalid JSON: {error}"),
                });
                continue;
            }
        };
        json_records_parsed += 1;

        match validate_record_against_schema(&value, &required_fields) {
            Ok(record) => {
                records_validated += 1;
                parsed_records.push((line_number, record));
            }
            Err(detail) => {
                issues.push(ValidationIssue {
                    line: line_number,
                    kind: ValidationIssueKind::SchemaViolation,
                    severity: ValidationIssueSeverity::Error,
                    detail,
                });
            }
        }
    }

    issues.extend(validate_invariants(&parsed_records, mode));
    issues.sort_by_key(|issue| issue.line);

    let errors = issues
        .iter()
        .filter(|issue| issue.severity == ValidationIssueSeverity::Error)
        .count();
    let warnings = issues
        .iter()
        .filter(|issue| issue.severity == ValidationIssueSeverity::Warning)
        .count();
    let status = validation_status(errors, warnings);
    let interpreted_exit_code = if errors > 0 { 2 } else { 0 };
    let quality_scorecard = build_quality_scorecard(
        total_records,
        json_records_parsed,
        records_validated,
        &parsed_records,
    );

    ValidationReport {
        schema_version: crate::models::SCHEMA_VERSION.to_string(),
        mode,
        status,
        interpreted_exit_code,
        total_records,
        records_validated,
        errors,
        warnings,
        quality_scorecard,
        issues,
    }
}

fn required_fields_from_schema(schema: &Value) -> BTreeSet<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect::<BTreeSet<String>>()
        })
        .unwrap_or_default()
}

fn validate_record_against_schema(
    value: &Value,
    required_fields: &BTreeSet<String>,
) -> Result<ConversationRecord, String> {
    let object = value
        .as_object()
        .ok_or_else(|| "record is not a JSON object".to_string())?;

    let missing_fields = required_fields
        .iter()
        .filter(|field| !object.contains_key(field.as_str()))
        .cloned()
        .collect::<Vec<_>>();

    if !missing_fields.is_empty() {
        return Err(format!(
            "missing required fields: {}",
            missing_fields.join(", ")
        ));
    }

    serde_json::from_value::<ConversationRecord>(value.clone())
        .map_err(|error| format!("record does not match convtree.v1 schema: {error}"))
}

type InvariantCheck = fn(&[(usize, ConversationRecord)], ValidationMode) -> Vec<ValidationIssue>;

fn validate_invariants(
    records: &[(usize, ConversationRecord)],
    mode: ValidationMode,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for check in invariant_catalog() {
        issues.extend(check(records, mode));
    }

    issues.sort_by(|left, right| {
        left.line
            .cmp(&right.line)
            .then_with(|| left.detail.cmp(&right.detail))
    });
    issues
}

fn invariant_catalog() -> &'static [InvariantCheck] {
    &[
        invariant_sequence_contiguity,
        invariant_timestamp_consistency,
        invariant_message_counts,
        invariant_content_presence,
        invariant_unique_conversation_ids,
    ]
}

/// Every transcript a record carries, labelled for issue details.
fn labelled_transcripts(record: &ConversationRecord) -> Vec<(String, &Transcript)> {
    let mut transcripts = vec![("primary".to_string(), &record.primary)];
    for (index, transcript) in record.secondary.iter().enumerate() {
        transcripts.push((format!("secondary[{index}]"), transcript));
    }
    for (index, alternate) in record.alternates.iter().enumerate() {
        transcripts.push((format!("alternates[{index}]"), &alternate.transcript));
    }
    transcripts
}

fn invariant_sequence_contiguity(
    records: &[(usize, ConversationRecord)],
    _mode: ValidationMode,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for (line, record) in records {
        for (label, transcript) in labelled_transcripts(record) {
            let gap = transcript
                .messages
                .iter()
                .enumerate()
                .find(|(position, message)| message.sequence_index != *position as u64);
            if let Some((position, message)) = gap {
                issues.push(ValidationIssue {
                    line: *line,
                    kind: ValidationIssueKind::InvariantViolation,
                    severity: ValidationIssueSeverity::Error,
                    detail: format!(
                        "{label} sequence_index {} at position {position} is not contiguous",
                        message.sequence_index
                    ),
                });
            }
        }
    }
    issues
}

fn invariant_timestamp_consistency(
    records: &[(usize, ConversationRecord)],
    _mode: ValidationMode,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for (line, record) in records {
        for (label, transcript) in labelled_transcripts(record) {
            for message in &transcript.messages {
                if let Err(detail) = validate_timestamp_consistency(message) {
                    issues.push(ValidationIssue {
                        line: *line,
                        kind: ValidationIssueKind::InvariantViolation,
                        severity: ValidationIssueSeverity::Error,
                        detail: format!(
                            "{label} message {}: {detail}",
                            message.sequence_index
                        ),
                    });
                }
            }
        }
    }
    issues
}

fn invariant_message_counts(
    records: &[(usize, ConversationRecord)],
    _mode: ValidationMode,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for (line, record) in records {
        let expected = [
            ("message_count", record.message_count, record.primary.messages.len()),
            (
                "user_message_count",
                record.user_message_count,
                record.primary.count_role(Role::User),
            ),
            (
                "assistant_message_count",
                record.assistant_message_count,
                record.primary.count_role(Role::Assistant),
            ),
        ];
        for (field, recorded, actual) in expected {
            if recorded != actual {
                issues.push(ValidationIssue {
                    line: *line,
                    kind: ValidationIssueKind::InvariantViolation,
                    severity: ValidationIssueSeverity::Error,
                    detail: format!("{field}={recorded} but primary transcript has {actual}"),
                });
            }
        }
    }
    issues
}

fn invariant_content_presence(
    records: &[(usize, ConversationRecord)],
    mode: ValidationMode,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut message_lines = Vec::new();
    let mut missing_content_lines = Vec::new();

    for (line, record) in records {
        for message in &record.primary.messages {
            if !requires_content_text(message) {
                continue;
            }

            message_lines.push(*line);
            if message.rendered_content.trim().is_empty() {
                missing_content_lines.push(*line);
                issues.push(ValidationIssue {
                    line: *line,
                    kind: ValidationIssueKind::InvariantViolation,
                    severity: missing_content_severity(mode),
                    detail: format!(
                        "rendered_content is empty for {} message {}",
                        message.role.as_str(),
                        message.source_node_id
                    ),
                });
            }
        }
    }

    if !message_lines.is_empty() {
        let null_rate = (missing_content_lines.len() as f64) / (message_lines.len() as f64);
        let threshold = missing_content_null_rate_threshold(mode);
        if null_rate > threshold {
            let anchor_line = *missing_content_lines.first().unwrap_or(&message_lines[0]);
            issues.push(ValidationIssue {
                line: anchor_line,
                kind: ValidationIssueKind::InvariantViolation,
                severity: missing_content_severity(mode),
                detail: format!(
                    "rendered_content empty-rate {:.2} exceeds {:.2} threshold",
                    null_rate, threshold
                ),
            });
        }
    }

    issues
}

fn invariant_unique_conversation_ids(
    records: &[(usize, ConversationRecord)],
    _mode: ValidationMode,
) -> Vec<ValidationIssue> {
    let mut seen = BTreeSet::new();
    let mut issues = Vec::new();
    for (line, record) in records {
        if !seen.insert(record.conversation_id.as_str()) {
            issues.push(ValidationIssue {
                line: *line,
                kind: ValidationIssueKind::InvariantViolation,
                severity: ValidationIssueSeverity::Warning,
                detail: format!(
                    "conversation_id `{}` appears on more than one line",
                    record.conversation_id
                ),
            });
        }
    }
    issues
}

fn validate_timestamp_consistency(message: &NormalizedMessage) -> Result<(), String> {
    match (message.timestamp, message.timestamp_utc.as_deref()) {
        (None, None) => Ok(()),
        (Some(seconds), None) if format_unix_seconds(seconds).is_none() => Ok(()),
        (Some(_), None) => Err("timestamp is set but timestamp_utc is null".to_string()),
        (None, Some(_)) => Err("timestamp_utc is set but timestamp is null".to_string()),
        (Some(seconds), Some(utc)) => {
            let parsed_millis = parse_rfc3339_to_unix_millis(utc)
                .map_err(|error| format!("timestamp_utc is not RFC3339: {error}"))?;
            let expected_millis = unix_seconds_to_millis(seconds)
                .ok_or_else(|| format!("timestamp {seconds} is not representable"))?;
            if parsed_millis != expected_millis {
                return Err(format!(
                    "timestamp mismatch: timestamp_utc={parsed_millis}ms, timestamp={expected_millis}ms"
                ));
            }
            Ok(())
        }
    }
}

fn requires_content_text(message: &NormalizedMessage) -> bool {
    matches!(message.role, Role::User | Role::Assistant)
}

fn missing_content_severity(mode: ValidationMode) -> ValidationIssueSeverity {
    match mode {
        ValidationMode::Baseline => ValidationIssueSeverity::Warning,
        ValidationMode::Strict => ValidationIssueSeverity::Error,
    }
}

fn missing_content_null_rate_threshold(mode: ValidationMode) -> f64 {
    match mode {
        ValidationMode::Baseline => 0.4,
        ValidationMode::Strict => 0.2,
    }
}

fn build_quality_scorecard(
    total_records: usize,
    json_records_parsed: usize,
    records_validated: usize,
    parsed_records: &[(usize, ConversationRecord)],
) -> ValidationQualityScorecard {
    let coverage_score = ratio_to_score(records_validated, total_records);
    let parse_success_score = ratio_to_score(json_records_parsed, total_records);

    let mut content_total = 0usize;
    let mut content_present = 0usize;
    let mut messages_total = 0usize;
    let mut messages_timestamped = 0usize;

    for (_, record) in parsed_records {
        for message in &record.primary.messages {
            messages_total += 1;
            if message.timestamp.is_some() {
                messages_timestamped += 1;
            }
            if requires_content_text(message) {
                content_total += 1;
                if !message.rendered_content.trim().is_empty() {
                    content_present += 1;
                }
            }
        }
    }

    let content_completeness_score = ratio_to_score(content_present, content_total);
    let timestamp_coverage_score = ratio_to_score(messages_timestamped, messages_total);

    let dimensions = [
        ("coverage".to_string(), coverage_score),
        ("parse_success".to_string(), parse_success_score),
        (
            "content_completeness".to_string(),
            content_completeness_score,
        ),
        ("timestamp_coverage".to_string(), timestamp_coverage_score),
    ];

    let overall_score = ((u32::from(coverage_score)
        + u32::from(parse_success_score)
        + u32::from(content_completeness_score)
        + u32::from(timestamp_coverage_score)) as f64
        / 4.0)
        .round() as u8;

    let mut weakest_ranked = dimensions.to_vec();
    weakest_ranked.sort_by(|left, right| left.1.cmp(&right.1).then_with(|| left.0.cmp(&right.0)));
    let weakest_dimensions = weakest_ranked
        .into_iter()
        .take(2)
        .map(|(name, _)| name)
        .collect::<Vec<_>>();

    ValidationQualityScorecard {
        overall_score,
        coverage_score,
        parse_success_score,
        content_completeness_score,
        timestamp_coverage_score,
        weakest_dimensions,
    }
}

fn ratio_to_score(numerator: usize, denominator: usize) -> u8 {
    if denominator == 0 {
        return 100;
    }

    (((numerator as f64 / denominator as f64) * 100.0)
        .round()
        .clamp(0.0, 100.0)) as u8
}

fn validation_status(errors: usize, warnings: usize) -> ValidationStatus {
    if errors > 0 {
        ValidationStatus::Fail
    } else if warnings > 0 {
        ValidationStatus::Warn
    } else {
        ValidationStatus::Pass
    }
}
