use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use convtree::extract::{DocumentOutcome, ExtractionPlan, process_document_bytes};
use convtree::models::ConversationRecord;
use convtree::reconstruct::ReconstructOptions;
use convtree::sqlite::{
    ANOMALIES_TABLE, CONVERSATIONS_TABLE, MESSAGES_TABLE, SCHEMA_META_TABLE, SqliteWriterConfig,
    count_rows, ensure_sqlite_schema, open_sqlite_connection, write_records_batched,
    write_records_to_sqlite,
};
use rusqlite::Connection;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{nanos}"))
}

fn fixture_records() -> Vec<ConversationRecord> {
    let plan = ExtractionPlan {
        reconstruct: ReconstructOptions {
            include_alternates: true,
            ..ReconstructOptions::default()
        },
        ..ExtractionPlan::default()
    };
    [
        "branching_mapping.json",
        "storage_format.json",
        "dangling_parent.json",
        "missing_current_node.json",
        "content_edge_cases.json",
    ]
    .into_iter()
    .map(|name| {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures/chatgpt_ios")
            .join(name);
        let bytes = std::fs::read(&path).expect("fixture readable");
        match process_document_bytes(name, None, &bytes, &plan) {
            DocumentOutcome::Reconstructed(record) => *record,
            DocumentOutcome::Failed(failure) => panic!("fixture should reconstruct: {failure:?}"),
        }
    })
    .collect()
}

#[test]
fn writes_every_transcript_and_anomaly_in_batches() {
    let mut connection = Connection::open_in_memory().expect("in-memory sqlite should open");
    ensure_sqlite_schema(&connection).expect("schema should apply");
    let records = fixture_records();

    let stats = write_records_batched(&mut connection, &records, SqliteWriterConfig { batch_size: 2 })
        .expect("records should write");

    assert_eq!(stats.input_records, 5);
    assert_eq!(stats.conversations_written, 5);
    assert_eq!(stats.messages_written, 22);
    assert_eq!(stats.anomalies_written, 5);
    assert_eq!(stats.batches_committed, 3);
    assert_eq!(count_rows(&connection, CONVERSATIONS_TABLE).expect("count"), 5);
    assert_eq!(count_rows(&connection, MESSAGES_TABLE).expect("count"), 22);
    assert_eq!(count_rows(&connection, ANOMALIES_TABLE).expect("count"), 5);

    let mut statement = connection
        .prepare(
            "SELECT DISTINCT transcript FROM messages WHERE conversation_id = 'conv-branching' ORDER BY transcript",
        )
        .expect("query should prepare");
    let labels: Vec<String> = statement
        .query_map([], |row| row.get(0))
        .expect("query should run")
        .collect::<Result<_, _>>()
        .expect("rows should decode");
    assert_eq!(labels, vec!["alternate[0]", "alternate[1]", "primary"]);

    let excerpt: Option<String> = connection
        .query_row(
            "SELECT content_excerpt FROM messages WHERE source_node_id = 'epoch'",
            [],
            |row| row.get(0),
        )
        .expect("epoch message should exist");
    assert_eq!(excerpt.as_deref(), Some("line one line two"));
}

#[test]
fn rewriting_a_conversation_replaces_its_rows() {
    let temp = unique_temp_dir("convtree-sqlite-rewrite");
    let db_path = temp.join("nested/convtree.sqlite");
    let records = fixture_records();

    write_records_to_sqlite(&db_path, &records, SqliteWriterConfig::default())
        .expect("first write should succeed");
    let mut edited = records[0].clone();
    edited.title = Some("Renamed".to_string());
    edited.alternates.clear();
    let stats = write_records_to_sqlite(&db_path, &[edited], SqliteWriterConfig::default())
        .expect("second write should succeed");
    assert_eq!(stats.messages_written, 4);

    let connection = open_sqlite_connection(&db_path).expect("database should reopen");
    assert_eq!(count_rows(&connection, CONVERSATIONS_TABLE).expect("count"), 5);
    assert_eq!(count_rows(&connection, MESSAGES_TABLE).expect("count"), 18);
    assert_eq!(count_rows(&connection, SCHEMA_META_TABLE).expect("count"), 1);

    let title: String = connection
        .query_row(
            "SELECT title FROM conversations WHERE conversation_id = 'conv-branching'",
            [],
            |row| row.get(0),
        )
        .expect("conversation should exist");
    assert_eq!(title, "Renamed");
}
