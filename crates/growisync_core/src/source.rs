use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, params};

const PUBLISHED_RECORDS_SQL: &str = r#"
SELECT knowledge_id, tag_names, title, content
FROM knowledges
WHERE delete_flag = 0
ORDER BY knowledge_id
"#;

const DRAFT_RECORDS_SQL: &str = r#"
SELECT draft_id, tag_names, title, content
FROM draft_knowledges
WHERE delete_flag = 0
  AND (knowledge_id IS NULL OR knowledge_id NOT IN (SELECT knowledge_id FROM knowledges))
ORDER BY draft_id
"#;

const PUBLISHED_FILES_SQL: &str = r#"
SELECT file_name, file_binary
FROM knowledge_files
WHERE knowledge_id = ?1
ORDER BY file_no
"#;

const DRAFT_FILES_SQL: &str = r#"
SELECT file_name, file_binary
FROM knowledge_files
WHERE draft_id = ?1
ORDER BY file_no
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Draft,
    Published,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
        }
    }

    pub fn is_draft(self) -> bool {
        matches!(self, Self::Draft)
    }
}

/// One knowledge article as read from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub record_id: i64,
    /// Comma-joined tag list, as stored.
    pub tag_names: Option<String>,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAttachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Supplies migration records in source order.
pub trait RecordSource {
    fn records(&mut self, kind: RecordKind) -> Result<Vec<SourceRecord>>;
    fn attachments(&mut self, kind: RecordKind, record_id: i64) -> Result<Vec<SourceAttachment>>;
}

/// Read-only view of a knowledge-base export in SQLite form.
///
/// The connection lives as long as the source and closes on drop.
pub struct SqliteKnowledgeSource {
    connection: Connection,
}

impl SqliteKnowledgeSource {
    pub fn open(db_path: &Path) -> Result<Self> {
        let connection = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open knowledge database {}", db_path.display()))?;
        Ok(Self { connection })
    }

    pub fn from_connection(connection: Connection) -> Self {
        Self { connection }
    }
}

impl RecordSource for SqliteKnowledgeSource {
    fn records(&mut self, kind: RecordKind) -> Result<Vec<SourceRecord>> {
        let sql = match kind {
            RecordKind::Draft => DRAFT_RECORDS_SQL,
            RecordKind::Published => PUBLISHED_RECORDS_SQL,
        };
        let mut statement = self
            .connection
            .prepare(sql)
            .with_context(|| format!("failed to prepare {} record query", kind.as_str()))?;
        let rows = statement
            .query_map([], |row| {
                Ok(SourceRecord {
                    record_id: row.get(0)?,
                    tag_names: row.get(1)?,
                    title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    body: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                })
            })
            .with_context(|| format!("failed to query {} records", kind.as_str()))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.with_context(|| format!("failed to decode {} record", kind.as_str()))?);
        }
        Ok(records)
    }

    fn attachments(&mut self, kind: RecordKind, record_id: i64) -> Result<Vec<SourceAttachment>> {
        let sql = match kind {
            RecordKind::Draft => DRAFT_FILES_SQL,
            RecordKind::Published => PUBLISHED_FILES_SQL,
        };
        let mut statement = self
            .connection
            .prepare(sql)
            .context("failed to prepare attachment query")?;
        let rows = statement
            .query_map(params![record_id], |row| {
                Ok(SourceAttachment {
                    file_name: row.get(0)?,
                    bytes: row.get::<_, Option<Vec<u8>>>(1)?.unwrap_or_default(),
                })
            })
            .with_context(|| format!("failed to query attachments of {} record {record_id}", kind.as_str()))?;

        let mut attachments = Vec::new();
        for row in rows {
            attachments.push(row.context("failed to decode attachment row")?);
        }
        Ok(attachments)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::tempdir;

    pub(crate) const KNOWLEDGE_SCHEMA_SQL: &str = r#"
CREATE TABLE knowledges (
    knowledge_id INTEGER PRIMARY KEY,
    title TEXT,
    content TEXT,
    tag_names TEXT,
    delete_flag INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE draft_knowledges (
    draft_id INTEGER PRIMARY KEY,
    knowledge_id INTEGER,
    title TEXT,
    content TEXT,
    tag_names TEXT,
    delete_flag INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE knowledge_files (
    file_no INTEGER PRIMARY KEY,
    knowledge_id INTEGER,
    comment_no INTEGER,
    draft_id INTEGER,
    file_name TEXT NOT NULL,
    file_binary BLOB
);
"#;

    pub(crate) fn seeded_connection(path: &Path) -> Connection {
        let connection = Connection::open(path).expect("open db");
        connection
            .execute_batch(KNOWLEDGE_SCHEMA_SQL)
            .expect("create schema");
        connection
    }

    #[test]
    fn published_records_skip_deleted_and_keep_order() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("knowledge.db");
        let connection = seeded_connection(&db_path);
        connection
            .execute_batch(
                "INSERT INTO knowledges (knowledge_id, title, content, tag_names, delete_flag) VALUES
                    (3, 'Third', 'c', NULL, 0),
                    (1, 'First', 'a', 'x,y', 0),
                    (2, 'Gone', 'b', NULL, 1);",
            )
            .expect("seed");
        drop(connection);

        let mut source = SqliteKnowledgeSource::open(&db_path).expect("open source");
        let records = source.records(RecordKind::Published).expect("records");
        assert_eq!(
            records,
            vec![
                SourceRecord {
                    record_id: 1,
                    tag_names: Some("x,y".to_string()),
                    title: "First".to_string(),
                    body: "a".to_string(),
                },
                SourceRecord {
                    record_id: 3,
                    tag_names: None,
                    title: "Third".to_string(),
                    body: "c".to_string(),
                },
            ]
        );
    }

    #[test]
    fn draft_records_exclude_already_published_drafts() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("knowledge.db");
        let connection = seeded_connection(&db_path);
        connection
            .execute_batch(
                "INSERT INTO knowledges (knowledge_id, title, content) VALUES (10, 'Live', 'x');
                 INSERT INTO draft_knowledges (draft_id, knowledge_id, title, content, delete_flag) VALUES
                    (1, NULL, 'Fresh draft', NULL, 0),
                    (2, 10, 'Edit of live', 'y', 0),
                    (3, 99, 'Orphan edit', 'z', 0),
                    (4, NULL, 'Deleted draft', 'w', 1);",
            )
            .expect("seed");
        drop(connection);

        let mut source = SqliteKnowledgeSource::open(&db_path).expect("open source");
        let titles: Vec<String> = source
            .records(RecordKind::Draft)
            .expect("records")
            .into_iter()
            .map(|record| record.title)
            .collect();
        assert_eq!(titles, vec!["Fresh draft", "Orphan edit"]);
    }

    #[test]
    fn attachments_are_keyed_by_record_kind() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("knowledge.db");
        let connection = seeded_connection(&db_path);
        connection
            .execute(
                "INSERT INTO knowledge_files (file_no, knowledge_id, draft_id, file_name, file_binary) VALUES (1, 5, NULL, 'a.png', ?1)",
                params![b"png-bytes".to_vec()],
            )
            .expect("seed published file");
        connection
            .execute(
                "INSERT INTO knowledge_files (file_no, knowledge_id, draft_id, file_name, file_binary) VALUES (2, NULL, 5, 'b.pdf', NULL)",
                [],
            )
            .expect("seed draft file");

        let mut source = SqliteKnowledgeSource::from_connection(connection);
        let published = source.attachments(RecordKind::Published, 5).expect("published");
        assert_eq!(
            published,
            vec![SourceAttachment {
                file_name: "a.png".to_string(),
                bytes: b"png-bytes".to_vec(),
            }]
        );
        let draft = source.attachments(RecordKind::Draft, 5).expect("draft");
        assert_eq!(draft.len(), 1);
        assert_eq!(draft[0].file_name, "b.pdf");
        assert!(draft[0].bytes.is_empty());
        assert!(source.attachments(RecordKind::Published, 6).expect("none").is_empty());
    }

    #[test]
    fn open_fails_for_missing_database() {
        let temp = tempdir().expect("tempdir");
        let error = SqliteKnowledgeSource::open(&temp.path().join("missing.db"))
            .err()
            .expect("must fail");
        assert!(error.to_string().contains("failed to open knowledge database"));
    }
}
