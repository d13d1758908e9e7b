pub mod payload;

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::LoadError;
use crate::models::{Anomaly, AnomalyKind, DocumentMetadata};
use crate::utils::time::cocoa_to_unix;

pub use payload::{Content, ContentPart, MessagePayload};
use payload::{number_field, string_field};

/// One node of the conversation tree with its edges already resolved.
///
/// `parent` and `children` only reference ids present in the owning
/// [`ConversationDocument`], and every child lists this node as its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageNode {
    pub id: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub message: Option<MessagePayload>,
}

/// Arena of message nodes for a single conversation, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationDocument {
    pub conversation_id: String,
    pub title: Option<String>,
    pub current_node: Option<String>,
    pub metadata: DocumentMetadata,
    nodes: Vec<MessageNode>,
    index: BTreeMap<String, usize>,
    anomalies: Vec<Anomaly>,
}

impl ConversationDocument {
    #[must_use]
    pub fn nodes(&self) -> &[MessageNode] {
        &self.nodes
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&MessageNode> {
        self.index.get(id).map(|position| &self.nodes[*position])
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Anomalies recorded while loading, in discovery order.
    #[must_use]
    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }
}

pub fn load_document_str(text: &str) -> Result<ConversationDocument, LoadError> {
    let value: Value = serde_json::from_str(text)?;
    load_document(&value)
}

pub fn load_document(value: &Value) -> Result<ConversationDocument, LoadError> {
    load_document_named(value, None)
}

/// Loads a parsed document. `fallback_id` names the conversation when the
/// document carries no identifier of its own (usually the file stem).
pub fn load_document_named(
    value: &Value,
    fallback_id: Option<&str>,
) -> Result<ConversationDocument, LoadError> {
    let root = value
        .as_object()
        .ok_or_else(|| LoadError::malformed("document root is not a JSON object"))?;

    let mut anomalies = Vec::new();
    let entries = raw_entries(root, &mut anomalies)?;

    let mut index = BTreeMap::new();
    let mut raw_nodes = Vec::with_capacity(entries.len());
    for (id, object) in entries {
        if index.contains_key(&id) {
            anomalies.push(Anomaly::at(
                AnomalyKind::DuplicateNodeId,
                &id,
                "node id appears more than once; keeping the first entry",
            ));
            continue;
        }
        index.insert(id.clone(), raw_nodes.len());
        raw_nodes.push(RawNode::parse(id, object, &mut anomalies));
    }

    let nodes = resolve_edges(raw_nodes, &index, &mut anomalies);
    let conversation_id = string_field(
        root,
        &["conversationId", "conversation_id", "id", "remote_id"],
    )
    .or_else(|| fallback_id.map(ToString::to_string))
    .unwrap_or_else(|| "unknown".to_string());

    let document = ConversationDocument {
        conversation_id,
        title: string_field(root, &["title"]),
        current_node: current_node_id(root),
        metadata: document_metadata(root),
        nodes,
        index,
        anomalies,
    };

    debug!(
        conversation_id = %document.conversation_id,
        nodes = document.len(),
        anomalies = document.anomalies.len(),
        "loaded conversation document"
    );
    Ok(document)
}

fn raw_entries<'a>(
    root: &'a Map<String, Value>,
    anomalies: &mut Vec<Anomaly>,
) -> Result<Vec<(String, &'a Map<String, Value>)>, LoadError> {
    let mut entries = Vec::new();

    if let Some(mapping) = root.get("mapping").and_then(Value::as_object) {
        for (id, entry) in mapping {
            match entry.as_object() {
                Some(object) => entries.push((id.clone(), object)),
                None => anomalies.push(Anomaly::at(
                    AnomalyKind::MalformedNode,
                    id,
                    "mapping entry is not an object; skipped",
                )),
            }
        }
        return Ok(entries);
    }

    let Some(storage) = root
        .get("tree")
        .and_then(Value::as_object)
        .and_then(|tree| tree.get("storage"))
        .and_then(Value::as_array)
    else {
        return Err(LoadError::malformed(
            "document has neither a `mapping` object nor a `tree.storage` array",
        ));
    };

    if storage.len() % 2 != 0 {
        anomalies.push(Anomaly::new(
            AnomalyKind::MalformedNode,
            None,
            "`tree.storage` has an odd number of entries; trailing entry ignored",
        ));
    }

    for pair in storage.chunks_exact(2) {
        let Some(id) = pair[0].as_str() else {
            anomalies.push(Anomaly::new(
                AnomalyKind::MalformedNode,
                None,
                format!("`tree.storage` key {} is not a string; skipped", pair[0]),
            ));
            continue;
        };
        match pair[1].as_object() {
            Some(object) => entries.push((id.to_string(), object)),
            None => anomalies.push(Anomaly::at(
                AnomalyKind::MalformedNode,
                id,
                "`tree.storage` entry is not an object; skipped",
            )),
        }
    }

    Ok(entries)
}

struct RawNode {
    id: String,
    parent: Option<String>,
    children: Vec<String>,
    message: Option<MessagePayload>,
}

impl RawNode {
    fn parse(id: String, object: &Map<String, Value>, anomalies: &mut Vec<Anomaly>) -> Self {
        let parent = string_field(object, &["parent"]);

        let mut children = Vec::new();
        if let Some(listed) = object.get("children").and_then(Value::as_array) {
            for child in listed {
                match child.as_str() {
                    Some(child) => children.push(child.to_string()),
                    None => anomalies.push(Anomaly::at(
                        AnomalyKind::MalformedNode,
                        &id,
                        format!("child reference {child} is not a string; ignored"),
                    )),
                }
            }
        }

        let message = payload_object(object)
            .map(|message| MessagePayload::from_object(&id, message, anomalies));

        Self {
            id,
            parent,
            children,
            message,
        }
    }
}

/// The payload sits under `message`, or directly under `content` when that
/// object looks like a message (the app's on-disk layout).
fn payload_object(node: &Map<String, Value>) -> Option<&Map<String, Value>> {
    if let Some(message) = node.get("message").and_then(Value::as_object) {
        return Some(message);
    }
    node.get("content")
        .and_then(Value::as_object)
        .filter(|content| content.contains_key("author") || content.contains_key("content"))
}

fn resolve_edges(
    raw_nodes: Vec<RawNode>,
    index: &BTreeMap<String, usize>,
    anomalies: &mut Vec<Anomaly>,
) -> Vec<MessageNode> {
    let count = raw_nodes.len();
    let mut declared: Vec<Option<usize>> = Vec::with_capacity(count);
    let mut children: Vec<Vec<usize>> = Vec::with_capacity(count);

    for (position, node) in raw_nodes.iter().enumerate() {
        let parent = match node.parent.as_deref() {
            None => None,
            Some(parent) => match index.get(parent) {
                Some(&target) if target != position => Some(target),
                Some(_) => {
                    anomalies.push(Anomaly::at(
                        AnomalyKind::DanglingParent,
                        &node.id,
                        "node names itself as parent; edge dropped",
                    ));
                    None
                }
                None => {
                    anomalies.push(Anomaly::at(
                        AnomalyKind::DanglingParent,
                        &node.id,
                        format!("parent `{parent}` is not in the document; edge dropped"),
                    ));
                    None
                }
            },
        };
        declared.push(parent);

        let mut resolved = Vec::with_capacity(node.children.len());
        for child in &node.children {
            match index.get(child.as_str()) {
                Some(&target) if target != position => {
                    if !resolved.contains(&target) {
                        resolved.push(target);
                    }
                }
                Some(_) => anomalies.push(Anomaly::at(
                    AnomalyKind::DanglingChild,
                    &node.id,
                    "node lists itself as a child; edge dropped",
                )),
                None => anomalies.push(Anomaly::at(
                    AnomalyKind::DanglingChild,
                    &node.id,
                    format!("child `{child}` is not in the document; edge dropped"),
                )),
            }
        }
        children.push(resolved);
    }

    // Children lists are checked against the recorded parents; a node with no
    // parent of its own is adopted by the first node that lists it.
    let mut effective = declared.clone();
    for position in 0..count {
        let listed = std::mem::take(&mut children[position]);
        let mut kept = Vec::with_capacity(listed.len());
        for child in listed {
            match declared[child] {
                Some(parent) if parent == position => kept.push(child),
                Some(parent) => anomalies.push(Anomaly::at(
                    AnomalyKind::ParentChildMismatch,
                    &raw_nodes[child].id,
                    format!(
                        "listed as a child of `{}` but its parent is `{}`; listing removed",
                        raw_nodes[position].id, raw_nodes[parent].id
                    ),
                )),
                None if effective[child].is_none() => {
                    effective[child] = Some(position);
                    kept.push(child);
                }
                None => anomalies.push(Anomaly::at(
                    AnomalyKind::ParentChildMismatch,
                    &raw_nodes[child].id,
                    format!(
                        "also listed as a child of `{}`; listing removed",
                        raw_nodes[position].id
                    ),
                )),
            }
        }
        children[position] = kept;
    }

    for (child, parent) in declared.iter().enumerate() {
        if let Some(parent) = *parent
            && !children[parent].contains(&child)
        {
            children[parent].push(child);
            anomalies.push(Anomaly::at(
                AnomalyKind::ParentChildMismatch,
                &raw_nodes[child].id,
                format!(
                    "parent `{}` does not list this node as a child; appended",
                    raw_nodes[parent].id
                ),
            ));
        }
    }

    let ids: Vec<String> = raw_nodes.iter().map(|node| node.id.clone()).collect();
    raw_nodes
        .into_iter()
        .zip(children)
        .zip(effective)
        .map(|((node, children), parent)| MessageNode {
            id: node.id,
            parent: parent.map(|parent| ids[parent].clone()),
            children: children.into_iter().map(|child| ids[child].clone()).collect(),
            message: node.message,
        })
        .collect()
}

fn current_node_id(root: &Map<String, Value>) -> Option<String> {
    string_field(root, &["currentNode", "current_node"]).or_else(|| {
        root.get("tree")
            .and_then(Value::as_object)
            .and_then(|tree| string_field(tree, &["current_node_id", "currentNodeId"]))
    })
}

fn document_metadata(root: &Map<String, Value>) -> DocumentMetadata {
    DocumentMetadata {
        creation_date: number_field(root, &["creation_date", "creationDate"]).map(cocoa_to_unix),
        modification_date: number_field(root, &["modification_date", "modificationDate"])
            .map(cocoa_to_unix),
        is_archived: root
            .get("is_archived")
            .or_else(|| root.get("isArchived"))
            .and_then(Value::as_bool),
        model: root
            .get("configuration")
            .and_then(Value::as_object)
            .and_then(|configuration| string_field(configuration, &["last_model", "lastModel"])),
        remote_id: string_field(root, &["remote_id", "remoteId"]),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::Role;

    fn kinds(document: &ConversationDocument) -> Vec<AnomalyKind> {
        document.anomalies().iter().map(|anomaly| anomaly.kind).collect()
    }

    #[test]
    fn rejects_documents_without_nodes() {
        let error = load_document(&json!({"title": "empty"})).expect_err("must fail");
        assert!(matches!(error, LoadError::MalformedDocument { .. }));

        let error = load_document(&json!([1, 2])).expect_err("must fail");
        assert!(error.to_string().contains("not a JSON object"));
    }

    #[test]
    fn rejects_text_that_is_not_json() {
        let error = load_document_str("{\"mapping\": ").expect_err("must fail");
        assert!(matches!(error, LoadError::InvalidJson { .. }));
    }

    #[test]
    fn reads_storage_pairs_and_adopts_listed_children() {
        let document = load_document_named(
            &json!({
                "tree": {
                    "current_node_id": "b",
                    "storage": [
                        "root", {"id": "root", "children": ["a"]},
                        "a", {"id": "a", "children": ["b"], "content": {
                            "author": {"role": "user"},
                            "content": {"content_type": "text", "parts": ["hi"]},
                            "create_time": 10.0
                        }},
                        "b", {"id": "b", "children": []}
                    ]
                },
                "creation_date": 0.0,
                "configuration": {"last_model": "gpt-4o"}
            }),
            Some("guid-stem"),
        )
        .expect("document should load");

        assert_eq!(document.conversation_id, "guid-stem");
        assert_eq!(document.current_node.as_deref(), Some("b"));
        assert_eq!(document.node("a").and_then(|node| node.parent.as_deref()), Some("root"));
        assert_eq!(document.node("b").and_then(|node| node.parent.as_deref()), Some("a"));
        assert!(document.anomalies().is_empty());
        assert_eq!(document.metadata.creation_date, Some(978_307_200.0));
        assert_eq!(document.metadata.model.as_deref(), Some("gpt-4o"));

        let payload = document
            .node("a")
            .and_then(|node| node.message.as_ref())
            .expect("payload should be read from node content");
        assert_eq!(payload.role, Role::User);
        assert_eq!(payload.create_time, Some(10.0));
    }

    #[test]
    fn dangling_references_are_dropped_once() {
        let document = load_document(&json!({
            "mapping": {
                "a": {"id": "a", "parent": "ghost", "children": ["b", "missing"]},
                "b": {"id": "b", "parent": "a", "children": []}
            }
        }))
        .expect("document should load");

        assert_eq!(
            kinds(&document),
            vec![AnomalyKind::DanglingParent, AnomalyKind::DanglingChild]
        );
        let a = document.node("a").expect("node a");
        assert_eq!(a.parent, None);
        assert_eq!(a.children, vec!["b".to_string()]);
    }

    #[test]
    fn recorded_parent_wins_over_stray_listing() {
        let document = load_document(&json!({
            "mapping": {
                "r": {"children": ["x", "y"]},
                "x": {"parent": "r", "children": ["y"]},
                "y": {"parent": "r", "children": []},
                "z": {"parent": "x", "children": []}
            }
        }))
        .expect("document should load");

        assert_eq!(
            kinds(&document),
            vec![
                AnomalyKind::ParentChildMismatch,
                AnomalyKind::ParentChildMismatch
            ]
        );
        let x = document.node("x").expect("node x");
        assert_eq!(x.children, vec!["z".to_string()]);
        assert_eq!(
            document.node("r").map(|node| node.children.clone()),
            Some(vec!["x".to_string(), "y".to_string()])
        );
    }

    #[test]
    fn duplicate_and_malformed_entries_are_recorded() {
        let document = load_document(&json!({
            "tree": {"storage": [
                "a", {"children": []},
                "a", {"children": ["ignored"]},
                7, {"children": []},
                "b", "not a node",
                "dangling"
            ]}
        }))
        .expect("document should load");

        assert_eq!(document.len(), 1);
        assert_eq!(
            kinds(&document),
            vec![
                AnomalyKind::MalformedNode,
                AnomalyKind::MalformedNode,
                AnomalyKind::MalformedNode,
                AnomalyKind::DuplicateNodeId
            ]
        );
    }
}
