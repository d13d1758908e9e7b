use convtree::extract::{DocumentOutcome, ExtractionPlan, process_document_bytes};
use convtree::models::{AnomalyKind, Role, Transcript};
use convtree::reconstruct::{ReconstructOptions, reconstruct};
use convtree::tree::{ConversationDocument, load_document, load_document_str};
use serde_json::Value;

fn fixture(name: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/chatgpt_ios")
        .join(name);
    std::fs::read_to_string(&path).expect("fixture readable")
}

fn load_fixture(name: &str) -> ConversationDocument {
    load_document_str(&fixture(name)).expect("fixture should load")
}

fn node_ids(transcript: &Transcript) -> Vec<&str> {
    transcript
        .messages
        .iter()
        .map(|message| message.source_node_id.as_str())
        .collect()
}

fn assert_contiguous(transcript: &Transcript) {
    let indexes: Vec<u64> = transcript
        .messages
        .iter()
        .map(|message| message.sequence_index)
        .collect();
    let expected: Vec<u64> = (0..transcript.messages.len() as u64).collect();
    assert_eq!(indexes, expected);
}

#[test]
fn main_branch_follows_the_child_that_leads_to_the_current_node() {
    let document = load_fixture("branching_mapping.json");
    let reconstruction = reconstruct(&document, &ReconstructOptions::default());

    assert_eq!(node_ids(&reconstruction.primary), vec!["q1", "a2", "q2", "a4"]);
    assert_eq!(reconstruction.primary.root_node_id.as_deref(), Some("root"));
    assert_eq!(reconstruction.primary.leaf_node_id.as_deref(), Some("a4"));
    assert!(reconstruction.secondary.is_empty());
    assert!(reconstruction.alternates.is_empty());
    assert!(reconstruction.anomalies.is_empty());
}

#[test]
fn without_a_current_node_the_last_child_wins() {
    let mut value: Value =
        serde_json::from_str(&fixture("branching_mapping.json")).expect("fixture is json");
    value
        .as_object_mut()
        .expect("fixture root is an object")
        .remove("currentNode");
    let document = load_document(&value).expect("document should load");

    let reconstruction = reconstruct(&document, &ReconstructOptions::default());

    assert_eq!(node_ids(&reconstruction.primary), vec!["q1", "a3"]);
    assert!(reconstruction.anomalies.is_empty());
}

#[test]
fn structural_nodes_do_not_break_sequence_contiguity() {
    for name in [
        "branching_mapping.json",
        "storage_format.json",
        "dangling_parent.json",
        "missing_current_node.json",
        "content_edge_cases.json",
    ] {
        let document = load_fixture(name);
        let reconstruction = reconstruct(
            &document,
            &ReconstructOptions {
                include_alternates: true,
                ..ReconstructOptions::default()
            },
        );

        assert_contiguous(&reconstruction.primary);
        reconstruction.secondary.iter().for_each(assert_contiguous);
        reconstruction
            .alternates
            .iter()
            .for_each(|alternate| assert_contiguous(&alternate.transcript));
    }

    let storage = reconstruct(&load_fixture("storage_format.json"), &ReconstructOptions::default());
    assert_eq!(node_ids(&storage.primary), vec!["u1", "v1", "u2", "img"]);
}

#[test]
fn reconstruction_is_byte_for_byte_reproducible() {
    let bytes = fixture("branching_mapping.json");
    let plan = ExtractionPlan {
        reconstruct: ReconstructOptions {
            include_alternates: true,
            ..ReconstructOptions::default()
        },
        ..ExtractionPlan::default()
    };

    let encode = || match process_document_bytes("branching_mapping.json", None, bytes.as_bytes(), &plan) {
        DocumentOutcome::Reconstructed(record) => {
            serde_json::to_string(&record).expect("record should serialize")
        }
        DocumentOutcome::Failed(failure) => panic!("unexpected failure: {failure:?}"),
    };

    assert_eq!(encode(), encode());
}

#[test]
fn dangling_parent_becomes_a_root_with_exactly_one_anomaly() {
    let document = load_fixture("dangling_parent.json");
    let reconstruction = reconstruct(&document, &ReconstructOptions::default());

    assert_eq!(node_ids(&reconstruction.primary), vec!["a", "b"]);
    assert_eq!(reconstruction.secondary.len(), 1);
    assert_eq!(node_ids(&reconstruction.secondary[0]), vec!["orphan"]);
    assert_eq!(reconstruction.anomalies.len(), 1);
    assert_eq!(reconstruction.anomalies[0].kind, AnomalyKind::DanglingParent);
    assert_eq!(reconstruction.anomalies[0].node_id.as_deref(), Some("orphan"));
}

#[test]
fn absent_current_node_reconstructs_from_the_root_with_exactly_one_anomaly() {
    let document = load_fixture("missing_current_node.json");
    let reconstruction = reconstruct(&document, &ReconstructOptions::default());

    assert_eq!(node_ids(&reconstruction.primary), vec!["a", "b"]);
    assert_eq!(reconstruction.anomalies.len(), 1);
    assert_eq!(
        reconstruction.anomalies[0].kind,
        AnomalyKind::UnreachableCurrentNode
    );
    assert_eq!(reconstruction.anomalies[0].node_id.as_deref(), Some("nowhere"));
}

#[test]
fn alternates_cover_every_other_leaf_of_the_primary_tree() {
    let document = load_fixture("branching_mapping.json");
    let reconstruction = reconstruct(
        &document,
        &ReconstructOptions {
            include_alternates: true,
            ..ReconstructOptions::default()
        },
    );

    let leaves: Vec<Vec<&str>> = reconstruction
        .alternates
        .iter()
        .map(|alternate| node_ids(&alternate.transcript))
        .collect();
    assert_eq!(leaves, vec![vec!["q1", "a1"], vec!["q1", "a3"]]);
    assert!(
        reconstruction
            .alternates
            .iter()
            .all(|alternate| alternate.divergence_node_id == "q1")
    );
    assert!(reconstruction.anomalies.is_empty());
}

#[test]
fn alternate_cap_is_reported() {
    let document = load_fixture("branching_mapping.json");
    let reconstruction = reconstruct(
        &document,
        &ReconstructOptions {
            include_alternates: true,
            max_alternates: 1,
            ..ReconstructOptions::default()
        },
    );

    assert_eq!(reconstruction.alternates.len(), 1);
    assert_eq!(reconstruction.anomalies.len(), 1);
    assert_eq!(
        reconstruction.anomalies[0].kind,
        AnomalyKind::AlternatesTruncated
    );
}

#[test]
fn out_of_order_timestamps_keep_structural_order() {
    let document = load_fixture("content_edge_cases.json");
    let reconstruction = reconstruct(&document, &ReconstructOptions::default());

    assert_eq!(
        node_ids(&reconstruction.primary),
        vec!["s", "h", "epoch", "neg", "w"]
    );
    let order_anomalies: Vec<Option<&str>> = reconstruction
        .anomalies
        .iter()
        .filter(|anomaly| anomaly.kind == AnomalyKind::TimestampOrder)
        .map(|anomaly| anomaly.node_id.as_deref())
        .collect();
    assert_eq!(order_anomalies, vec![Some("epoch"), Some("neg")]);
    assert_eq!(reconstruction.primary.messages[0].role, Role::System);
}

#[test]
fn cocoa_timestamps_convert_to_unix_seconds() {
    let document = load_fixture("content_edge_cases.json");
    let reconstruction = reconstruct(&document, &ReconstructOptions::default());
    let by_node = |id: &str| {
        reconstruction
            .primary
            .messages
            .iter()
            .find(|message| message.source_node_id == id)
            .expect("message should be emitted")
    };

    let epoch = by_node("epoch");
    assert_eq!(epoch.timestamp, Some(978_307_200.0));
    assert_eq!(epoch.timestamp_utc.as_deref(), Some("2001-01-01T00:00:00.000Z"));

    let before = by_node("neg");
    assert_eq!(before.timestamp, Some(0.0));
    assert_eq!(before.timestamp_utc.as_deref(), Some("1970-01-01T00:00:00.000Z"));

    assert_eq!(by_node("s").timestamp, None);
}
