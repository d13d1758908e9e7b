pub mod branch;
pub mod content;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{AlternateBranch, Anomaly, AnomalyKind, NormalizedMessage, Role, Transcript};
use crate::tree::{ConversationDocument, MessageNode};
use crate::utils::time::{cocoa_to_unix, format_unix_seconds};

pub use branch::select_branch_child;
pub use content::{RenderedContent, render_content};

pub const DEFAULT_MAX_ALTERNATES: usize = 64;

/// How to pick the primary root when the current node does not identify one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootSelectionPolicy {
    /// The root whose tree carries the most payload nodes; ties go to the
    /// earlier root.
    #[default]
    MostMessages,
    FirstInDocument,
}

impl RootSelectionPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MostMessages => "most_messages",
            Self::FirstInDocument => "first_in_document",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconstructOptions {
    pub include_alternates: bool,
    pub max_alternates: usize,
    pub root_policy: RootSelectionPolicy,
}

impl Default for ReconstructOptions {
    fn default() -> Self {
        Self {
            include_alternates: false,
            max_alternates: DEFAULT_MAX_ALTERNATES,
            root_policy: RootSelectionPolicy::MostMessages,
        }
    }
}

/// Everything reconstructed from one document. `anomalies` starts with the
/// loader's findings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconstruction {
    pub primary: Transcript,
    pub secondary: Vec<Transcript>,
    pub alternates: Vec<AlternateBranch>,
    pub anomalies: Vec<Anomaly>,
}

impl Reconstruction {
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.primary.messages.len()
            + self
                .secondary
                .iter()
                .map(|transcript| transcript.messages.len())
                .sum::<usize>()
    }
}

pub fn reconstruct(document: &ConversationDocument, options: &ReconstructOptions) -> Reconstruction {
    let mut anomalies = document.anomalies().to_vec();
    let mut emitter = Emitter::default();

    let roots: Vec<&MessageNode> = document
        .nodes()
        .iter()
        .filter(|node| node.parent.is_none())
        .collect();

    let current_path = current_path(document, &mut anomalies);
    if !document.is_empty() && roots.is_empty() {
        anomalies.push(Anomaly::new(
            AnomalyKind::NoRoot,
            None,
            "every node has a parent; no transcript can be reconstructed",
        ));
    }

    let reachable = reachable_nodes(document, &roots);
    if reachable.len() < document.len() {
        let unreachable: Vec<&str> = document
            .nodes()
            .iter()
            .map(|node| node.id.as_str())
            .filter(|id| !reachable.contains(id))
            .collect();
        anomalies.push(Anomaly::new(
            AnomalyKind::UnreachableNodes,
            None,
            format!(
                "{} node(s) are not reachable from any root: {}",
                unreachable.len(),
                unreachable.join(", ")
            ),
        ));
    }

    let Some(primary_root) = primary_root(document, &roots, &current_path, options, &mut anomalies)
    else {
        return Reconstruction {
            anomalies,
            ..Reconstruction::default()
        };
    };

    let main_branch = walk_main_branch(document, primary_root, &current_path);
    let primary = emitter.transcript(&main_branch, &mut anomalies, true);

    let secondary = roots
        .iter()
        .filter(|root| root.id != primary_root.id)
        .map(|root| {
            let branch = walk_main_branch(document, root, &BTreeSet::new());
            emitter.transcript(&branch, &mut anomalies, true)
        })
        .collect();

    let alternates = if options.include_alternates {
        alternate_branches(
            document,
            primary_root,
            &main_branch,
            options.max_alternates,
            &mut emitter,
            &mut anomalies,
        )
    } else {
        Vec::new()
    };

    debug!(
        conversation_id = %document.conversation_id,
        primary_messages = primary.messages.len(),
        alternates = alternates.len(),
        anomalies = anomalies.len(),
        "reconstructed conversation"
    );

    Reconstruction {
        primary,
        secondary,
        alternates,
        anomalies,
    }
}

/// Ids from the root down to the current node. Empty when there is no current
/// node or it cannot be traced back to a root.
fn current_path<'a>(
    document: &'a ConversationDocument,
    anomalies: &mut Vec<Anomaly>,
) -> BTreeSet<&'a str> {
    let Some(current) = document.current_node.as_deref() else {
        return BTreeSet::new();
    };
    let Some(mut node) = document.node(current) else {
        anomalies.push(Anomaly::at(
            AnomalyKind::UnreachableCurrentNode,
            current,
            "current node is not in the document",
        ));
        return BTreeSet::new();
    };

    let mut path = BTreeSet::new();
    loop {
        if !path.insert(node.id.as_str()) {
            anomalies.push(Anomaly::at(
                AnomalyKind::UnreachableCurrentNode,
                current,
                "current node is not connected to a root",
            ));
            return BTreeSet::new();
        }
        match node.parent.as_deref().and_then(|parent| document.node(parent)) {
            Some(parent) => node = parent,
            None => return path,
        }
    }
}

fn reachable_nodes<'a>(document: &'a ConversationDocument, roots: &[&'a MessageNode]) -> BTreeSet<&'a str> {
    let mut reachable = BTreeSet::new();
    let mut stack: Vec<&str> = roots.iter().map(|root| root.id.as_str()).collect();
    while let Some(id) = stack.pop() {
        if !reachable.insert(id) {
            continue;
        }
        if let Some(node) = document.node(id) {
            stack.extend(node.children.iter().map(String::as_str));
        }
    }
    reachable
}

fn primary_root<'a>(
    document: &'a ConversationDocument,
    roots: &[&'a MessageNode],
    current_path: &BTreeSet<&str>,
    options: &ReconstructOptions,
    anomalies: &mut Vec<Anomaly>,
) -> Option<&'a MessageNode> {
    if let Some(root) = roots
        .iter()
        .find(|root| current_path.contains(root.id.as_str()))
    {
        return Some(*root);
    }

    let chosen = match options.root_policy {
        RootSelectionPolicy::FirstInDocument => roots.first().copied(),
        RootSelectionPolicy::MostMessages => {
            let mut best: Option<(&MessageNode, usize)> = None;
            for &root in roots {
                let count = payload_count(document, root);
                if best.is_none_or(|(_, best_count)| count > best_count) {
                    best = Some((root, count));
                }
            }
            best.map(|(root, _)| root)
        }
    };

    if roots.len() > 1
        && let Some(root) = chosen
    {
        anomalies.push(Anomaly::at(
            AnomalyKind::AmbiguousPrimaryRoot,
            &root.id,
            format!(
                "{} roots and the current node does not identify one; chose by {}",
                roots.len(),
                options.root_policy.as_str()
            ),
        ));
    }
    chosen
}

fn payload_count(document: &ConversationDocument, root: &MessageNode) -> usize {
    let mut seen = BTreeSet::new();
    let mut stack = vec![root];
    let mut count = 0;
    while let Some(node) = stack.pop() {
        if !seen.insert(node.id.as_str()) {
            continue;
        }
        if node.message.is_some() {
            count += 1;
        }
        stack.extend(node.children.iter().filter_map(|child| document.node(child)));
    }
    count
}

fn walk_main_branch<'a>(
    document: &'a ConversationDocument,
    root: &'a MessageNode,
    current_path: &BTreeSet<&str>,
) -> Vec<&'a MessageNode> {
    let current = document.current_node.as_deref();
    let mut branch = Vec::new();
    let mut visited = BTreeSet::new();
    let mut node = root;

    while visited.insert(node.id.as_str()) {
        branch.push(node);
        if current == Some(node.id.as_str()) {
            break;
        }
        match select_branch_child(&node.children, current_path).and_then(|id| document.node(id)) {
            Some(child) => node = child,
            None => break,
        }
    }
    branch
}

/// Enumerates root-to-leaf paths depth first, skipping the main branch.
fn alternate_branches(
    document: &ConversationDocument,
    root: &MessageNode,
    main_branch: &[&MessageNode],
    max_alternates: usize,
    emitter: &mut Emitter,
    anomalies: &mut Vec<Anomaly>,
) -> Vec<AlternateBranch> {
    let main_ids: Vec<&str> = main_branch.iter().map(|node| node.id.as_str()).collect();
    let mut alternates = Vec::new();
    let mut path: Vec<&MessageNode> = Vec::new();
    let mut stack = vec![(root, 0usize)];

    while let Some((node, depth)) = stack.pop() {
        path.truncate(depth);
        if path.iter().any(|ancestor| ancestor.id == node.id) {
            continue;
        }
        path.push(node);

        if !node.children.is_empty() {
            stack.extend(
                node.children
                    .iter()
                    .rev()
                    .filter_map(|child| document.node(child))
                    .map(|child| (child, depth + 1)),
            );
            continue;
        }

        let ids: Vec<&str> = path.iter().map(|node| node.id.as_str()).collect();
        if ids == main_ids {
            continue;
        }
        if alternates.len() == max_alternates {
            anomalies.push(Anomaly::at(
                AnomalyKind::AlternatesTruncated,
                &root.id,
                format!("more than {max_alternates} alternate branches; remainder omitted"),
            ));
            break;
        }

        let shared = ids
            .iter()
            .zip(&main_ids)
            .take_while(|(left, right)| left == right)
            .count();
        let divergence_node_id = ids[shared.saturating_sub(1)].to_string();
        alternates.push(AlternateBranch {
            divergence_node_id,
            transcript: emitter.transcript(&path, anomalies, false),
        });
    }
    alternates
}

/// Turns node paths into transcripts. Unknown content and unrepresentable
/// timestamps are reported once per node even when the node appears on
/// several paths.
#[derive(Default)]
struct Emitter {
    reported_unknown: BTreeSet<String>,
    reported_out_of_range: BTreeSet<String>,
}

impl Emitter {
    fn transcript(
        &mut self,
        path: &[&MessageNode],
        anomalies: &mut Vec<Anomaly>,
        check_timestamps: bool,
    ) -> Transcript {
        let mut messages = Vec::new();
        let mut previous_timestamp: Option<f64> = None;
        let mut missing_timestamps = Vec::new();

        for node in path {
            let Some(payload) = &node.message else {
                continue;
            };

            let unknown_tags = payload.content.unrecognized_tags();
            if !unknown_tags.is_empty() && self.reported_unknown.insert(node.id.clone()) {
                anomalies.push(Anomaly::at(
                    AnomalyKind::UnknownContentType,
                    &node.id,
                    format!("unrecognized content type(s): {}", unknown_tags.join(", ")),
                ));
            }

            let timestamp = payload.create_time.map(cocoa_to_unix);
            if check_timestamps {
                match timestamp {
                    Some(current) => {
                        if let Some(previous) = previous_timestamp
                            && current < previous
                        {
                            anomalies.push(Anomaly::at(
                                AnomalyKind::TimestampOrder,
                                &node.id,
                                format!(
                                    "timestamp {current} precedes the previous message at {previous}"
                                ),
                            ));
                        }
                        previous_timestamp = Some(current);
                    }
                    None if payload.role != Role::System => missing_timestamps.push(node.id.as_str()),
                    None => {}
                }
            }

            let timestamp_utc = timestamp.and_then(format_unix_seconds);
            if let Some(seconds) = timestamp
                && timestamp_utc.is_none()
                && self.reported_out_of_range.insert(node.id.clone())
            {
                anomalies.push(Anomaly::at(
                    AnomalyKind::TimestampOutOfRange,
                    &node.id,
                    format!("timestamp {seconds} has no RFC 3339 representation"),
                ));
            }

            let rendered = render_content(&payload.content);
            messages.push(NormalizedMessage {
                sequence_index: messages.len() as u64,
                role: payload.role,
                timestamp,
                timestamp_utc,
                content_type: rendered.content_type,
                rendered_content: rendered.text,
                source_node_id: node.id.clone(),
                author_name: payload.author_name.clone(),
                assets: rendered.assets,
                image_title: payload.image_title.clone(),
            });
        }

        if !missing_timestamps.is_empty() {
            anomalies.push(Anomaly::new(
                AnomalyKind::MissingTimestamp,
                None,
                format!(
                    "{} message(s) without a timestamp: {}",
                    missing_timestamps.len(),
                    missing_timestamps.join(", ")
                ),
            ));
        }

        Transcript {
            root_node_id: path.first().map(|node| node.id.clone()),
            leaf_node_id: path.last().map(|node| node.id.clone()),
            messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tree::load_document;

    fn message(role: &str, text: &str, create_time: f64) -> serde_json::Value {
        json!({
            "author": {"role": role},
            "createTime": create_time,
            "content": {"contentType": "text", "parts": [text]}
        })
    }

    #[test]
    fn secondary_roots_are_reported_separately() {
        let document = load_document(&json!({
            "currentNode": "u2",
            "mapping": {
                "u1": {"children": [], "message": message("user", "orphan", 1.0)},
                "r": {"children": ["u2"]},
                "u2": {"parent": "r", "children": [], "message": message("user", "main", 2.0)}
            }
        }))
        .expect("document should load");

        let result = reconstruct(&document, &ReconstructOptions::default());
        assert_eq!(result.primary.root_node_id.as_deref(), Some("r"));
        assert_eq!(result.primary.messages[0].rendered_content, "main");
        assert_eq!(result.secondary.len(), 1);
        assert_eq!(result.secondary[0].messages[0].rendered_content, "orphan");
        assert!(result.anomalies.is_empty());
    }

    #[test]
    fn root_policy_applies_without_current_node() {
        let document = load_document(&json!({
            "mapping": {
                "small": {"children": [], "message": message("user", "one", 1.0)},
                "big": {"children": ["big-1"], "message": message("user", "two", 1.0)},
                "big-1": {"parent": "big", "children": [], "message": message("assistant", "three", 2.0)}
            }
        }))
        .expect("document should load");

        let most = reconstruct(&document, &ReconstructOptions::default());
        assert_eq!(most.primary.root_node_id.as_deref(), Some("big"));
        assert_eq!(most.anomalies[0].kind, AnomalyKind::AmbiguousPrimaryRoot);

        let first = reconstruct(
            &document,
            &ReconstructOptions {
                root_policy: RootSelectionPolicy::FirstInDocument,
                ..ReconstructOptions::default()
            },
        );
        assert_eq!(first.primary.root_node_id.as_deref(), Some("small"));
    }

    #[test]
    fn out_of_order_timestamps_keep_structural_order() {
        let document = load_document(&json!({
            "currentNode": "b",
            "mapping": {
                "a": {"children": ["b"], "message": message("user", "first", 50.0)},
                "b": {"parent": "a", "children": [], "message": message("assistant", "second", 10.0)}
            }
        }))
        .expect("document should load");

        let result = reconstruct(&document, &ReconstructOptions::default());
        let texts: Vec<&str> = result
            .primary
            .messages
            .iter()
            .map(|message| message.rendered_content.as_str())
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(result.anomalies.len(), 1);
        assert_eq!(result.anomalies[0].kind, AnomalyKind::TimestampOrder);
        assert_eq!(result.anomalies[0].node_id.as_deref(), Some("b"));
    }

    #[test]
    fn alternates_cover_other_leaves_up_to_the_cap() {
        let document = load_document(&json!({
            "currentNode": "b",
            "mapping": {
                "r": {"children": ["a", "b", "c"]},
                "a": {"parent": "r", "children": [], "message": message("user", "a", 1.0)},
                "b": {"parent": "r", "children": [], "message": message("user", "b", 1.0)},
                "c": {"parent": "r", "children": [], "message": message("user", "c", 1.0)}
            }
        }))
        .expect("document should load");

        let all = reconstruct(
            &document,
            &ReconstructOptions {
                include_alternates: true,
                ..ReconstructOptions::default()
            },
        );
        let leaves: Vec<Option<&str>> = all
            .alternates
            .iter()
            .map(|alternate| alternate.transcript.leaf_node_id.as_deref())
            .collect();
        assert_eq!(leaves, vec![Some("a"), Some("c")]);
        assert!(all.alternates.iter().all(|alternate| alternate.divergence_node_id == "r"));

        let capped = reconstruct(
            &document,
            &ReconstructOptions {
                include_alternates: true,
                max_alternates: 1,
                ..ReconstructOptions::default()
            },
        );
        assert_eq!(capped.alternates.len(), 1);
        assert_eq!(
            capped.anomalies.last().map(|anomaly| anomaly.kind),
            Some(AnomalyKind::AlternatesTruncated)
        );
    }

    #[test]
    fn cyclic_documents_report_missing_root() {
        let document = load_document(&json!({
            "currentNode": "a",
            "mapping": {
                "a": {"parent": "b", "children": ["b"]},
                "b": {"parent": "a", "children": ["a"]}
            }
        }))
        .expect("document should load");

        let result = reconstruct(&document, &ReconstructOptions::default());
        let kinds: Vec<AnomalyKind> = result.anomalies.iter().map(|anomaly| anomaly.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AnomalyKind::UnreachableCurrentNode,
                AnomalyKind::NoRoot,
                AnomalyKind::UnreachableNodes
            ]
        );
        assert!(result.primary.messages.is_empty());
    }
}
