use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::discovery::DocumentSource;
use crate::error::LoadError;
use crate::models::{
    AnomalyKind, ConversationRecord, FailureKind, FailureRecord, Role, SCHEMA_VERSION,
    SchemaVersion,
};
use crate::reconstruct::{ReconstructOptions, Reconstruction, reconstruct};
use crate::tree::{ConversationDocument, load_document_named};
use crate::utils::hash::{sha256_file, sha256_hex};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionPlan {
    pub reconstruct: ReconstructOptions,
    pub hash_sources: bool,
    pub fail_fast: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub transcripts_jsonl: PathBuf,
    pub failures_json: PathBuf,
    pub stats_json: PathBuf,
    pub schema_json: PathBuf,
    pub manifest_json: PathBuf,
    pub device_json: PathBuf,
    pub report_html: PathBuf,
}

#[must_use]
pub fn build_artifact_layout(out_dir: &Path) -> ArtifactLayout {
    ArtifactLayout {
        transcripts_jsonl: out_dir.join("transcripts.jsonl"),
        failures_json: out_dir.join("failures.json"),
        stats_json: out_dir.join("stats.json"),
        schema_json: out_dir.join("convtree.v1.schema.json"),
        manifest_json: out_dir.join("manifest.json"),
        device_json: out_dir.join("device.json"),
        report_html: out_dir.join("report.html"),
    }
}

/// Lifecycle of one document through the pipeline. A document is never
/// retried once it reaches `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Unparsed,
    Loaded,
    Reconstructed,
    Failed,
}

impl DocumentState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unparsed => "unparsed",
            Self::Loaded => "loaded",
            Self::Reconstructed => "reconstructed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOutcome {
    Reconstructed(Box<ConversationRecord>),
    Failed(FailureRecord),
}

impl DocumentOutcome {
    #[must_use]
    pub const fn state(&self) -> DocumentState {
        match self {
            Self::Reconstructed(_) => DocumentState::Reconstructed,
            Self::Failed(_) => DocumentState::Failed,
        }
    }
}

/// Parses, loads and reconstructs one document. Pure: the same bytes always
/// produce the same outcome.
#[must_use]
pub fn process_document_bytes(
    source_path: &str,
    fallback_id: Option<&str>,
    bytes: &[u8],
    plan: &ExtractionPlan,
) -> DocumentOutcome {
    let mut state = DocumentState::Unparsed;
    debug!(source_path, state = state.as_str(), "document queued");

    let loaded = serde_json::from_slice::<Value>(bytes)
        .map_err(LoadError::from)
        .and_then(|value| load_document_named(&value, fallback_id));
    let document = match loaded {
        Ok(document) => document,
        Err(error) => {
            state = DocumentState::Failed;
            debug!(source_path, state = state.as_str(), "document rejected");
            return DocumentOutcome::Failed(FailureRecord {
                source_path: source_path.to_string(),
                kind: error.failure_kind(),
                reason: error.to_string(),
            });
        }
    };
    state = DocumentState::Loaded;
    debug!(source_path, state = state.as_str(), nodes = document.len(), "document loaded");

    let reconstruction = reconstruct(&document, &plan.reconstruct);
    state = DocumentState::Reconstructed;
    debug!(
        source_path,
        state = state.as_str(),
        messages = reconstruction.primary.messages.len(),
        "document reconstructed"
    );

    let source_sha256 = plan.hash_sources.then(|| sha256_hex(bytes));
    DocumentOutcome::Reconstructed(Box::new(build_record(
        &document,
        reconstruction,
        source_path,
        source_sha256,
    )))
}

#[must_use]
pub fn build_record(
    document: &ConversationDocument,
    reconstruction: Reconstruction,
    source_path: &str,
    source_sha256: Option<String>,
) -> ConversationRecord {
    let primary = reconstruction.primary;
    ConversationRecord {
        schema_version: SchemaVersion::ConvtreeV1,
        conversation_id: document.conversation_id.clone(),
        title: document.title.clone(),
        source_path: source_path.to_string(),
        source_sha256,
        current_node_id: document.current_node.clone(),
        metadata: document.metadata.clone(),
        message_count: primary.messages.len(),
        user_message_count: primary.count_role(Role::User),
        assistant_message_count: primary.count_role(Role::Assistant),
        primary,
        secondary: reconstruction.secondary,
        alternates: reconstruction.alternates,
        anomalies: reconstruction.anomalies,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvidenceEntry {
    pub path: String,
    pub size_bytes: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionRun {
    pub records: Vec<ConversationRecord>,
    pub failures: Vec<FailureRecord>,
    pub evidence: Vec<EvidenceEntry>,
}

/// Runs every document in order. Failures are collected and the run goes on,
/// unless `fail_fast` is set.
pub fn extract_documents(documents: &[DocumentSource], plan: &ExtractionPlan) -> Result<ExtractionRun> {
    let mut run = ExtractionRun::default();

    for source in documents {
        let source_path = source.path.display().to_string();
        let outcome = match std::fs::read(&source.path) {
            Ok(bytes) => {
                run.evidence.push(EvidenceEntry {
                    path: source_path.clone(),
                    size_bytes: bytes.len() as u64,
                    sha256: plan.hash_sources.then(|| sha256_hex(&bytes)),
                });
                process_document_bytes(&source_path, Some(&source.stem), &bytes, plan)
            }
            Err(error) => DocumentOutcome::Failed(FailureRecord {
                source_path: source_path.clone(),
                kind: FailureKind::Io,
                reason: format!("failed to read document: {error}"),
            }),
        };

        match outcome {
            DocumentOutcome::Reconstructed(record) => run.records.push(*record),
            DocumentOutcome::Failed(failure) => {
                warn!(
                    source_path = %failure.source_path,
                    kind = failure.kind.as_str(),
                    reason = %failure.reason,
                    "document failed"
                );
                if plan.fail_fast {
                    bail!(
                        "extraction stopped at `{}` ({}): {}",
                        failure.source_path,
                        failure.kind.as_str(),
                        failure.reason
                    );
                }
                run.failures.push(failure);
            }
        }
    }

    Ok(run)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractCounts {
    pub documents_seen: usize,
    pub documents_reconstructed: usize,
    pub documents_failed: usize,
    pub messages_emitted: usize,
    pub secondary_transcripts: usize,
    pub alternates_emitted: usize,
    pub anomalies: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    pub schema_version: String,
    pub counts: ExtractCounts,
    pub role_counts: BTreeMap<String, usize>,
    pub content_type_counts: BTreeMap<String, usize>,
    pub anomaly_kind_counts: BTreeMap<String, usize>,
    pub failure_kind_counts: BTreeMap<String, usize>,
}

#[must_use]
pub fn build_extract_stats(run: &ExtractionRun) -> ExtractStats {
    let role_keys = Role::all().map(Role::as_str);
    let anomaly_keys = AnomalyKind::all().map(AnomalyKind::as_str);
    let mut role_counts = seeded_counts(&role_keys);
    let mut content_type_counts = seeded_counts(&[
        "text",
        "audio_transcription",
        "image_asset_pointer",
        "multimodal_text",
        "code",
    ]);
    let mut anomaly_kind_counts = seeded_counts(&anomaly_keys);
    let mut failure_kind_counts = seeded_counts(&["io", "invalid_json", "malformed_document"]);

    let mut messages_emitted = 0_usize;
    let mut secondary_transcripts = 0_usize;
    let mut alternates_emitted = 0_usize;
    let mut anomalies = 0_usize;
    for record in &run.records {
        let transcripts = std::iter::once(&record.primary).chain(&record.secondary);
        for transcript in transcripts {
            for message in &transcript.messages {
                increment_count(&mut role_counts, message.role.as_str());
                increment_count(&mut content_type_counts, &message.content_type);
                messages_emitted += 1;
            }
        }
        for anomaly in &record.anomalies {
            increment_count(&mut anomaly_kind_counts, anomaly.kind.as_str());
        }
        secondary_transcripts += record.secondary.len();
        alternates_emitted += record.alternates.len();
        anomalies += record.anomalies.len();
    }
    for failure in &run.failures {
        increment_count(&mut failure_kind_counts, failure.kind.as_str());
    }

    ExtractStats {
        schema_version: SCHEMA_VERSION.to_string(),
        counts: ExtractCounts {
            documents_seen: run.records.len() + run.failures.len(),
            documents_reconstructed: run.records.len(),
            documents_failed: run.failures.len(),
            messages_emitted,
            secondary_transcripts,
            alternates_emitted,
            anomalies,
        },
        role_counts,
        content_type_counts,
        anomaly_kind_counts,
        failure_kind_counts,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractManifest {
    pub schema_version: String,
    pub generated_at_utc: String,
    pub conversations_dir: String,
    pub root_policy: String,
    pub include_alternates: bool,
    pub max_alternates: usize,
    pub hash_sources: bool,
    pub documents_reconstructed: usize,
    pub documents_failed: usize,
    pub evidence: Vec<EvidenceEntry>,
    pub artifacts: Vec<ArtifactEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactEntry {
    pub path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Artifacts already on disk are digested too when sources are hashed, so
/// the manifest covers everything the run produced.
pub fn build_manifest(
    conversations_dir: &Path,
    generated_at_utc: String,
    plan: &ExtractionPlan,
    run: &ExtractionRun,
    artifacts: &[&Path],
) -> Result<ExtractManifest> {
    let artifacts = artifacts
        .iter()
        .map(|path| {
            Ok(ArtifactEntry {
                path: path.display().to_string(),
                sha256: if plan.hash_sources {
                    Some(sha256_file(path)?)
                } else {
                    None
                },
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ExtractManifest {
        schema_version: SCHEMA_VERSION.to_string(),
        generated_at_utc,
        conversations_dir: conversations_dir.display().to_string(),
        root_policy: plan.reconstruct.root_policy.as_str().to_string(),
        include_alternates: plan.reconstruct.include_alternates,
        max_alternates: plan.reconstruct.max_alternates,
        hash_sources: plan.hash_sources,
        documents_reconstructed: run.records.len(),
        documents_failed: run.failures.len(),
        evidence: run.evidence.clone(),
        artifacts,
    })
}

pub fn write_transcripts_artifact(path: &Path, records: &[ConversationRecord]) -> Result<()> {
    ensure_parent_dir(path)?;

    let file = std::fs::File::create(path).context("failed to create transcripts artifact")?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)
            .context("failed to encode transcripts jsonl row")?;
        writer
            .write_all(b"\n")
            .context("failed to write transcripts newline")?;
    }
    writer
        .flush()
        .context("failed to flush transcripts artifact writer")
}

pub fn write_failures_artifact(path: &Path, failures: &[FailureRecord]) -> Result<()> {
    write_pretty_json(path, &failures, "failures")
}

pub fn write_stats_artifact(path: &Path, stats: &ExtractStats) -> Result<()> {
    write_pretty_json(path, stats, "stats")
}

pub fn write_schema_artifact(path: &Path) -> Result<()> {
    write_pretty_json(path, &crate::models::json_schema(), "schema")
}

pub fn write_manifest_artifact(path: &Path, manifest: &ExtractManifest) -> Result<()> {
    write_pretty_json(path, manifest, "manifest")
}

/// Writes the artifacts every extraction produces and returns the stats.
pub fn write_extract_artifacts(layout: &ArtifactLayout, run: &ExtractionRun) -> Result<ExtractStats> {
    write_transcripts_artifact(&layout.transcripts_jsonl, &run.records)?;
    write_failures_artifact(&layout.failures_json, &run.failures)?;
    write_schema_artifact(&layout.schema_json)?;
    let stats = build_extract_stats(run);
    write_stats_artifact(&layout.stats_json, &stats)?;
    Ok(stats)
}

fn write_pretty_json<T: Serialize + ?Sized>(path: &Path, value: &T, label: &str) -> Result<()> {
    ensure_parent_dir(path)?;
    let encoded = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to encode {label} artifact"))?;
    std::fs::write(path, encoded)
        .with_context(|| format!("failed to write {label} artifact: {}", path.display()))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("failed to create artifact directory: {}", parent.display())
        })?;
    }
    Ok(())
}

fn seeded_counts(keys: &[&str]) -> BTreeMap<String, usize> {
    keys.iter()
        .map(|key| ((*key).to_string(), 0_usize))
        .collect()
}

fn increment_count(counts: &mut BTreeMap<String, usize>, key: &str) {
    if let Some(count) = counts.get_mut(key) {
        *count += 1;
    } else {
        counts.insert(key.to_string(), 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_bytes_fail_without_panicking() {
        let outcome = process_document_bytes("a.json", None, b"{oops", &ExtractionPlan::default());
        let DocumentOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::InvalidJson);
        assert_eq!(failure.source_path, "a.json");
    }

    #[test]
    fn documents_without_nodes_are_malformed() {
        let outcome = process_document_bytes("b.json", None, b"{\"title\":\"x\"}", &ExtractionPlan::default());
        assert_eq!(outcome.state(), DocumentState::Failed);
        assert!(matches!(
            outcome,
            DocumentOutcome::Failed(FailureRecord {
                kind: FailureKind::MalformedDocument,
                ..
            })
        ));
    }

    #[test]
    fn hashing_is_opt_in() {
        let bytes = br#"{"mapping": {}}"#;
        let plain = process_document_bytes("c.json", Some("stem"), bytes, &ExtractionPlan::default());
        let hashed = process_document_bytes(
            "c.json",
            Some("stem"),
            bytes,
            &ExtractionPlan {
                hash_sources: true,
                ..ExtractionPlan::default()
            },
        );

        let (DocumentOutcome::Reconstructed(plain), DocumentOutcome::Reconstructed(hashed)) =
            (plain, hashed)
        else {
            panic!("both documents should reconstruct");
        };
        assert_eq!(plain.conversation_id, "stem");
        assert_eq!(plain.source_sha256, None);
        assert_eq!(hashed.source_sha256, Some(sha256_hex(bytes)));
    }

    #[test]
    fn stats_seed_every_anomaly_kind() {
        let stats = build_extract_stats(&ExtractionRun::default());
        assert_eq!(stats.anomaly_kind_counts.len(), AnomalyKind::all().len());
        assert_eq!(stats.role_counts.get("unknown"), Some(&0));
        assert_eq!(stats.counts.documents_seen, 0);
    }
}
