use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Transaction, params, params_from_iter};

use crate::models::{ConversationRecord, NormalizedMessage, Transcript};
use crate::utils::content::{DEFAULT_EXCERPT_MAX_CHARS, derive_excerpt};
use crate::utils::time::now_utc_rfc3339;

pub const SQLITE_SCHEMA_VERSION: &str = "convtree.v1.sqlite.v1";
pub const CONVERSATIONS_TABLE: &str = "conversations";
pub const MESSAGES_TABLE: &str = "messages";
pub const ANOMALIES_TABLE: &str = "anomalies";
pub const SCHEMA_META_TABLE: &str = "convtree_schema_meta";
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 200;

pub const CONVERSATION_INSERT_COLUMNS: &[&str] = &[
    "conversation_id",
    "schema_version",
    "title",
    "source_path",
    "source_sha256",
    "current_node_id",
    "creation_date",
    "modification_date",
    "is_archived",
    "model",
    "remote_id",
    "message_count",
    "user_message_count",
    "assistant_message_count",
    "secondary_count",
    "alternate_count",
    "anomaly_count",
];

pub const MESSAGE_INSERT_COLUMNS: &[&str] = &[
    "conversation_id",
    "transcript",
    "sequence_index",
    "role",
    "timestamp",
    "timestamp_utc",
    "content_type",
    "rendered_content",
    "content_excerpt",
    "source_node_id",
    "author_name",
    "image_title",
    "assets_json",
];

const CREATE_CONVERSATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    conversation_id TEXT NOT NULL PRIMARY KEY,
    schema_version TEXT NOT NULL,
    title TEXT,
    source_path TEXT NOT NULL,
    source_sha256 TEXT,
    current_node_id TEXT,
    creation_date REAL,
    modification_date REAL,
    is_archived INTEGER,
    model TEXT,
    remote_id TEXT,
    message_count INTEGER NOT NULL,
    user_message_count INTEGER NOT NULL,
    assistant_message_count INTEGER NOT NULL,
    secondary_count INTEGER NOT NULL DEFAULT 0,
    alternate_count INTEGER NOT NULL DEFAULT 0,
    anomaly_count INTEGER NOT NULL DEFAULT 0,
    CHECK (schema_version = 'convtree.v1'),
    CHECK (is_archived IN (0, 1) OR is_archived IS NULL)
);
"#;

const CREATE_MESSAGES_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    conversation_id TEXT NOT NULL,
    transcript TEXT NOT NULL,
    sequence_index INTEGER NOT NULL,
    role TEXT NOT NULL,
    timestamp REAL,
    timestamp_utc TEXT,
    content_type TEXT NOT NULL,
    rendered_content TEXT NOT NULL,
    content_excerpt TEXT,
    source_node_id TEXT NOT NULL,
    author_name TEXT,
    image_title TEXT,
    assets_json TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (conversation_id, transcript, sequence_index),
    FOREIGN KEY (conversation_id) REFERENCES conversations(conversation_id),
    CHECK (role IN ('system', 'user', 'assistant', 'tool', 'unknown'))
);
"#;

const CREATE_ANOMALIES_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS anomalies (
    conversation_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    kind TEXT NOT NULL,
    node_id TEXT,
    detail TEXT NOT NULL,
    PRIMARY KEY (conversation_id, ordinal),
    FOREIGN KEY (conversation_id) REFERENCES conversations(conversation_id)
);
"#;

const CREATE_INDEX_MESSAGES_TIME_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_messages_timestamp
ON messages (timestamp, conversation_id);
"#;

const CREATE_INDEX_MESSAGES_ROLE_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_messages_role_content_type
ON messages (role, content_type);
"#;

const CREATE_INDEX_ANOMALIES_KIND_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_anomalies_kind
ON anomalies (kind);
"#;

const CREATE_META_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS convtree_schema_meta (
    schema_version TEXT NOT NULL,
    applied_at_utc TEXT NOT NULL
);
"#;

#[must_use]
pub fn schema_statements() -> &'static [&'static str] {
    &[
        CREATE_CONVERSATIONS_TABLE_SQL,
        CREATE_MESSAGES_TABLE_SQL,
        CREATE_ANOMALIES_TABLE_SQL,
        CREATE_INDEX_MESSAGES_TIME_SQL,
        CREATE_INDEX_MESSAGES_ROLE_SQL,
        CREATE_INDEX_ANOMALIES_KIND_SQL,
        CREATE_META_TABLE_SQL,
    ]
}

#[must_use]
pub fn create_schema_sql() -> String {
    schema_statements().join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqliteWriterConfig {
    pub batch_size: usize,
}

impl Default for SqliteWriterConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_INSERT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqliteWriteStats {
    pub input_records: usize,
    pub conversations_written: usize,
    pub messages_written: usize,
    pub anomalies_written: usize,
    pub batches_committed: usize,
}

pub fn open_sqlite_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create sqlite parent directory: {}",
                parent.display()
            )
        })?;
    }

    Connection::open(path)
        .with_context(|| format!("failed to open sqlite database: {}", path.display()))
}

pub fn ensure_sqlite_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(&create_schema_sql())
        .context("failed to create sqlite schema")?;

    if schema_meta_has_version(connection, SQLITE_SCHEMA_VERSION)? {
        return Ok(());
    }

    let applied_at_utc = now_utc_rfc3339()?;
    connection
        .execute(
            &format!(
                "INSERT INTO {SCHEMA_META_TABLE} (schema_version, applied_at_utc) VALUES (?1, ?2)"
            ),
            params![SQLITE_SCHEMA_VERSION, applied_at_utc],
        )
        .context("failed to write sqlite schema meta row")?;

    Ok(())
}

fn schema_meta_has_version(connection: &Connection, schema_version: &str) -> Result<bool> {
    let query = format!(
        "SELECT EXISTS(SELECT 1 FROM {SCHEMA_META_TABLE} WHERE schema_version = ?1 LIMIT 1)"
    );
    let exists = connection
        .query_row(&query, [schema_version], |row| row.get::<usize, i64>(0))
        .context("failed to query sqlite schema version metadata")?;
    Ok(exists != 0)
}

pub fn write_records_to_sqlite(
    path: &Path,
    records: &[ConversationRecord],
    config: SqliteWriterConfig,
) -> Result<SqliteWriteStats> {
    let mut connection = open_sqlite_connection(path)?;
    ensure_sqlite_schema(&connection)?;
    write_records_batched(&mut connection, records, config)
}

/// Writes conversations in batches, one transaction per batch. A conversation
/// already in the database has its messages and anomalies replaced.
pub fn write_records_batched(
    connection: &mut Connection,
    records: &[ConversationRecord],
    config: SqliteWriterConfig,
) -> Result<SqliteWriteStats> {
    let batch_size = config.batch_size.max(1);
    let mut stats = SqliteWriteStats {
        input_records: records.len(),
        ..SqliteWriteStats::default()
    };

    for batch in records.chunks(batch_size) {
        let tx = connection
            .transaction()
            .context("failed to open sqlite transaction")?;
        for record in batch {
            write_record(&tx, record, &mut stats).with_context(|| {
                format!("failed to write conversation_id={}", record.conversation_id)
            })?;
        }
        tx.commit()
            .context("failed to commit sqlite batch transaction")?;
        stats.batches_committed += 1;
    }

    Ok(stats)
}

fn write_record(
    tx: &Transaction<'_>,
    record: &ConversationRecord,
    stats: &mut SqliteWriteStats,
) -> Result<()> {
    for table in [MESSAGES_TABLE, ANOMALIES_TABLE] {
        tx.prepare_cached(&format!("DELETE FROM {table} WHERE conversation_id = ?1"))
            .context("failed to prepare sqlite delete statement")?
            .execute([record.conversation_id.as_str()])
            .with_context(|| format!("failed to clear previous {table} rows"))?;
    }

    tx.prepare_cached(&build_upsert_sql(
        CONVERSATIONS_TABLE,
        CONVERSATION_INSERT_COLUMNS,
    ))
    .context("failed to prepare sqlite conversation statement")?
    .execute(params_from_iter(conversation_insert_values(record)?))
    .context("failed to insert conversation row")?;
    stats.conversations_written += 1;

    let message_sql = build_insert_sql(MESSAGES_TABLE, MESSAGE_INSERT_COLUMNS);
    let mut message_statement = tx
        .prepare_cached(&message_sql)
        .context("failed to prepare sqlite message statement")?;
    for (label, transcript) in labelled_transcripts(record) {
        for message in &transcript.messages {
            message_statement
                .execute(params_from_iter(message_insert_values(
                    &record.conversation_id,
                    &label,
                    message,
                )?))
                .with_context(|| {
                    format!(
                        "failed to insert message transcript={label} sequence_index={}",
                        message.sequence_index
                    )
                })?;
            stats.messages_written += 1;
        }
    }

    let mut anomaly_statement = tx
        .prepare_cached(&format!(
            "INSERT INTO {ANOMALIES_TABLE} (conversation_id, ordinal, kind, node_id, detail) VALUES (?1, ?2, ?3, ?4, ?5)"
        ))
        .context("failed to prepare sqlite anomaly statement")?;
    for (ordinal, anomaly) in record.anomalies.iter().enumerate() {
        anomaly_statement
            .execute(params![
                record.conversation_id,
                to_i64(ordinal, "ordinal")?,
                anomaly.kind.as_str(),
                anomaly.node_id,
                anomaly.detail
            ])
            .context("failed to insert anomaly row")?;
        stats.anomalies_written += 1;
    }

    Ok(())
}

/// `primary`, `secondary[i]` and `alternate[i]`, the labels stored in
/// `messages.transcript`.
fn labelled_transcripts(record: &ConversationRecord) -> Vec<(String, &Transcript)> {
    let mut transcripts = vec![("primary".to_string(), &record.primary)];
    for (index, transcript) in record.secondary.iter().enumerate() {
        transcripts.push((format!("secondary[{index}]"), transcript));
    }
    for (index, alternate) in record.alternates.iter().enumerate() {
        transcripts.push((format!("alternate[{index}]"), &alternate.transcript));
    }
    transcripts
}

pub fn count_rows(connection: &Connection, table: &str) -> Result<usize> {
    let count = connection
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get::<usize, i64>(0)
        })
        .with_context(|| format!("failed to count sqlite rows in {table}"))?;
    usize::try_from(count).with_context(|| format!("negative row count in {table}"))
}

fn build_insert_sql(table: &str, columns: &[&str]) -> String {
    let placeholders = (1..=columns.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})",
        columns.join(", ")
    )
}

fn build_upsert_sql(table: &str, columns: &[&str]) -> String {
    let assignments = columns
        .iter()
        .skip(1)
        .map(|column| format!("{column} = excluded.{column}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{} ON CONFLICT({}) DO UPDATE SET {assignments}",
        build_insert_sql(table, columns),
        columns[0]
    )
}

fn conversation_insert_values(record: &ConversationRecord) -> Result<Vec<SqlValue>> {
    Ok(vec![
        text_value(&record.conversation_id),
        text_value(crate::models::SCHEMA_VERSION),
        opt_text_value(record.title.as_deref()),
        text_value(&record.source_path),
        opt_text_value(record.source_sha256.as_deref()),
        opt_text_value(record.current_node_id.as_deref()),
        opt_real_value(record.metadata.creation_date),
        opt_real_value(record.metadata.modification_date),
        opt_bool_int_value(record.metadata.is_archived),
        opt_text_value(record.metadata.model.as_deref()),
        opt_text_value(record.metadata.remote_id.as_deref()),
        int_value(to_i64(record.message_count, "message_count")?),
        int_value(to_i64(record.user_message_count, "user_message_count")?),
        int_value(to_i64(
            record.assistant_message_count,
            "assistant_message_count",
        )?),
        int_value(to_i64(record.secondary.len(), "secondary_count")?),
        int_value(to_i64(record.alternates.len(), "alternate_count")?),
        int_value(to_i64(record.anomalies.len(), "anomaly_count")?),
    ])
}

fn message_insert_values(
    conversation_id: &str,
    transcript: &str,
    message: &NormalizedMessage,
) -> Result<Vec<SqlValue>> {
    let sequence_index = i64::try_from(message.sequence_index)
        .context("sequence_index exceeds sqlite integer range")?;
    Ok(vec![
        text_value(conversation_id),
        text_value(transcript),
        int_value(sequence_index),
        text_value(message.role.as_str()),
        opt_real_value(message.timestamp),
        opt_text_value(message.timestamp_utc.as_deref()),
        text_value(&message.content_type),
        text_value(&message.rendered_content),
        opt_text_value(
            derive_excerpt(&message.rendered_content, DEFAULT_EXCERPT_MAX_CHARS).as_deref(),
        ),
        text_value(&message.source_node_id),
        opt_text_value(message.author_name.as_deref()),
        opt_text_value(message.image_title.as_deref()),
        text_value(
            &serde_json::to_string(&message.assets).context("failed to encode message assets")?,
        ),
    ])
}

fn to_i64(value: usize, field: &str) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("{field} exceeds sqlite integer range"))
}

fn text_value(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

fn opt_text_value(value: Option<&str>) -> SqlValue {
    value.map_or(SqlValue::Null, text_value)
}

fn int_value(value: i64) -> SqlValue {
    SqlValue::Integer(value)
}

fn opt_real_value(value: Option<f64>) -> SqlValue {
    value.map_or(SqlValue::Null, SqlValue::Real)
}

fn opt_bool_int_value(value: Option<bool>) -> SqlValue {
    value.map_or(SqlValue::Null, |flag| SqlValue::Integer(i64::from(flag)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_updates_every_column_but_the_key() {
        let sql = build_upsert_sql("t", &["id", "a", "b"]);
        assert_eq!(
            sql,
            "INSERT INTO t (id, a, b) VALUES (?1, ?2, ?3) ON CONFLICT(id) DO UPDATE SET a = excluded.a, b = excluded.b"
        );
    }

    #[test]
    fn schema_creates_every_table() {
        let connection = Connection::open_in_memory().expect("in-memory sqlite should open");
        ensure_sqlite_schema(&connection).expect("schema should apply");
        ensure_sqlite_schema(&connection).expect("schema should apply twice");

        for table in [CONVERSATIONS_TABLE, MESSAGES_TABLE, ANOMALIES_TABLE] {
            assert_eq!(count_rows(&connection, table).expect("count"), 0);
        }
        assert_eq!(count_rows(&connection, SCHEMA_META_TABLE).expect("count"), 1);
    }
}
