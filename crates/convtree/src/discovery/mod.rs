use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;

/// Directories under a backup root that may hold conversation folders,
/// relative to the root.
pub const CANDIDATE_PARENTS: [&str; 3] = ["", "Application Support", "Library/Application Support"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationFolder {
    pub path: PathBuf,
    pub suffix: String,
    pub is_default: bool,
    pub json_files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSource {
    pub path: PathBuf,
    pub stem: String,
    pub guid_like: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryArtifactLayout {
    pub discovery_json: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryArtifact {
    pub backup_root: String,
    pub total_folders: usize,
    pub selected_folder: Option<String>,
    pub folders: Vec<ConversationFolder>,
    pub total_documents: usize,
    pub guid_like_documents: usize,
    pub documents: Vec<DocumentSource>,
}

fn conversations_folder_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^conversations-v3-(.+)$")
            .expect("conversations folder regex should compile")
    })
}

fn guid_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}$")
            .expect("guid regex should compile")
    })
}

#[must_use]
pub fn conversations_folder_suffix(name: &str) -> Option<&str> {
    conversations_folder_regex()
        .captures(name)
        .and_then(|captures| captures.get(1))
        .map(|suffix| suffix.as_str())
}

#[must_use]
pub fn looks_like_guid(stem: &str) -> bool {
    guid_regex().is_match(stem)
}

/// Finds every `conversations-v3-*` folder below the backup root's known
/// parents, best candidate first.
pub fn discover_conversation_folders(backup_root: &Path) -> Result<Vec<ConversationFolder>> {
    let mut folders = Vec::new();
    for relative in CANDIDATE_PARENTS {
        let parent = if relative.is_empty() {
            backup_root.to_path_buf()
        } else {
            backup_root.join(relative)
        };
        if !parent.is_dir() {
            continue;
        }

        let entries = std::fs::read_dir(&parent).with_context(|| {
            format!("failed to read backup directory: {}", parent.display())
        })?;
        for entry in entries {
            let entry = entry.with_context(|| {
                format!("failed to read backup directory entry: {}", parent.display())
            })?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(suffix) = conversations_folder_suffix(&name) else {
                continue;
            };

            folders.push(ConversationFolder {
                json_files: list_conversation_documents(&path)?.len(),
                is_default: suffix.to_ascii_lowercase().contains("default"),
                suffix: suffix.to_string(),
                path,
            });
        }
    }

    rank_folders(&mut folders);
    Ok(folders)
}

/// Folders holding documents first, then non-default before default, then
/// larger folders, then path.
pub fn rank_folders(folders: &mut [ConversationFolder]) {
    folders.sort_by(compare_folders);
}

fn compare_folders(left: &ConversationFolder, right: &ConversationFolder) -> Ordering {
    (right.json_files > 0)
        .cmp(&(left.json_files > 0))
        .then_with(|| left.is_default.cmp(&right.is_default))
        .then_with(|| right.json_files.cmp(&left.json_files))
        .then_with(|| left.path.cmp(&right.path))
}

#[must_use]
pub fn select_conversation_folder(folders: &[ConversationFolder]) -> Option<&ConversationFolder> {
    folders.first()
}

/// `*.json` files directly inside a conversation folder, sorted by path.
pub fn list_conversation_documents(folder: &Path) -> Result<Vec<DocumentSource>> {
    let entries = std::fs::read_dir(folder).with_context(|| {
        format!("failed to read conversation folder: {}", folder.display())
    })?;

    let mut documents = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| {
            format!("failed to read conversation folder entry: {}", folder.display())
        })?;
        let path = entry.path();
        let is_json = path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
        if !is_json || !path.is_file() {
            continue;
        }

        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        documents.push(DocumentSource {
            guid_like: looks_like_guid(&stem),
            stem,
            path,
        });
    }

    documents.sort_by(|left, right| left.path.cmp(&right.path));
    Ok(documents)
}

#[must_use]
pub fn build_artifact_layout(out_dir: &Path) -> DiscoveryArtifactLayout {
    DiscoveryArtifactLayout {
        discovery_json: out_dir.join("discovery").join("discovery.json"),
    }
}

#[must_use]
pub fn build_discovery_artifact(
    backup_root: &Path,
    folders: &[ConversationFolder],
    documents: &[DocumentSource],
) -> DiscoveryArtifact {
    DiscoveryArtifact {
        backup_root: backup_root.display().to_string(),
        total_folders: folders.len(),
        selected_folder: select_conversation_folder(folders)
            .map(|folder| folder.path.display().to_string()),
        folders: folders.to_vec(),
        total_documents: documents.len(),
        guid_like_documents: documents.iter().filter(|document| document.guid_like).count(),
        documents: documents.to_vec(),
    }
}

pub fn write_discovery_artifact(path: &Path, artifact: &DiscoveryArtifact) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create discovery artifact directory: {}",
                parent.display()
            )
        })?;
    }

    let encoded =
        serde_json::to_vec_pretty(artifact).context("failed to encode discovery artifact")?;
    std::fs::write(path, encoded)
        .with_context(|| format!("failed to write discovery artifact: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(suffix: &str, json_files: usize) -> ConversationFolder {
        ConversationFolder {
            path: PathBuf::from(format!("/backup/conversations-v3-{suffix}")),
            suffix: suffix.to_string(),
            is_default: suffix.contains("default"),
            json_files,
        }
    }

    #[test]
    fn folder_suffix_requires_exact_prefix() {
        assert_eq!(conversations_folder_suffix("conversations-v3-default"), Some("default"));
        assert_eq!(conversations_folder_suffix("conversations-v2-default"), None);
        assert_eq!(conversations_folder_suffix("conversations-v3-"), None);
    }

    #[test]
    fn guid_stems_are_recognized() {
        assert!(looks_like_guid("6F9619FF-8B86-D011-B42D-00C04FC964FF"));
        assert!(!looks_like_guid("notes"));
    }

    #[test]
    fn ranking_prefers_populated_non_default_folders() {
        let mut folders = vec![
            folder("default", 40),
            folder("empty-user", 0),
            folder("user-a", 3),
            folder("user-b", 9),
        ];
        rank_folders(&mut folders);

        let order: Vec<&str> = folders.iter().map(|folder| folder.suffix.as_str()).collect();
        assert_eq!(order, vec!["user-b", "user-a", "default", "empty-user"]);
    }
}
