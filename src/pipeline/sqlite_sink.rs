//! SQLite sink
//!
//! Each record target gets its own table holding one JSON document per row.
//! Records that exhaust their retries land in a shared `dead_letter` table.

use crate::pipeline::{Sink, SinkError, SinkResult};
use crate::record::Record;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const DEAD_LETTER_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS dead_letter (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target TEXT NOT NULL,
    data TEXT NOT NULL,
    retry_count INTEGER NOT NULL,
    failed_at TEXT NOT NULL
);
"#;

/// Quotes a target name for use as a table identifier
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

struct State {
    conn: Connection,
    tables: HashSet<String>,
}

/// Stores records in a SQLite database
///
/// The connection is opened lazily by `open` so a misconfigured path is
/// reported at startup, not on the first batch.
pub struct SqliteSink {
    path: PathBuf,
    state: Mutex<Option<State>>,
}

impl SqliteSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_table(state: &mut State, target: &str) -> rusqlite::Result<()> {
        if state.tables.contains(target) {
            return Ok(());
        }
        state.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                data TEXT NOT NULL,
                stored_at TEXT NOT NULL
            );",
            quote_ident(target)
        ))?;
        state.tables.insert(target.to_string());
        Ok(())
    }

    fn write_batch(&self, records: &[Record]) -> SinkResult<()> {
        let mut guard = self.state.lock();
        let state = guard
            .as_mut()
            .ok_or_else(|| SinkError::NotOpen(self.name().to_string()))?;

        for record in records {
            Self::ensure_table(state, record.target())?;
        }

        let now = Utc::now().to_rfc3339();
        let tx = state.conn.transaction()?;
        for record in records {
            tx.execute(
                &format!(
                    "INSERT INTO {} (data, stored_at) VALUES (?1, ?2)",
                    quote_ident(record.target())
                ),
                params![record.to_json().to_string(), now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn write_dead_letters(&self, records: &[Record]) -> SinkResult<()> {
        let mut guard = self.state.lock();
        let state = guard
            .as_mut()
            .ok_or_else(|| SinkError::NotOpen(self.name().to_string()))?;

        let now = Utc::now().to_rfc3339();
        let tx = state.conn.transaction()?;
        for record in records {
            tx.execute(
                "INSERT INTO dead_letter (target, data, retry_count, failed_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.target(),
                    record.to_json().to_string(),
                    record.retry_count(),
                    now
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl Sink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn open(&self) -> SinkResult<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;
        conn.execute_batch(DEAD_LETTER_SQL)?;

        *self.state.lock() = Some(State {
            conn,
            tables: HashSet::new(),
        });
        tracing::info!("SQLite sink writing to {}", self.path.display());
        Ok(())
    }

    async fn process(&self, records: &[Record]) -> bool {
        match self.write_batch(records) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("SQLite sink failed to store {} records: {}", records.len(), e);
                false
            }
        }
    }

    async fn process_error(&self, records: &[Record]) {
        if let Err(e) = self.write_dead_letters(records) {
            tracing::error!("SQLite sink lost {} dead-letter records: {}", records.len(), e);
        }
    }

    async fn close(&self) -> SinkResult<()> {
        if let Some(state) = self.state.lock().take() {
            state.conn.close().map_err(|(_, e)| SinkError::Sqlite(e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FieldKind, RecordSchema};
    use tempfile::TempDir;

    fn create_test_records() -> Vec<Record> {
        let schema = RecordSchema::new("pages")
            .required("url", FieldKind::String)
            .field("title", FieldKind::String)
            .finish()
            .unwrap();
        vec![
            schema.builder().set("url", "https://example.com/a").build().unwrap(),
            schema
                .builder()
                .set("url", "https://example.com/b")
                .set("title", "B")
                .build()
                .unwrap(),
        ]
    }

    fn count(path: &Path, table: &str) -> i64 {
        let conn = Connection::open(path).unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn test_process_before_open_fails() {
        let sink = SqliteSink::new("/nonexistent/records.db");
        assert!(!sink.process(&create_test_records()).await);
    }

    #[tokio::test]
    async fn test_stores_records_per_target() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.db");
        let sink = SqliteSink::new(&path);

        sink.open().await.unwrap();
        assert!(sink.process(&create_test_records()).await);
        sink.close().await.unwrap();

        assert_eq!(count(&path, "pages"), 2);

        let conn = Connection::open(&path).unwrap();
        let data: String = conn
            .query_row("SELECT data FROM pages WHERE id = 2", [], |row| row.get(0))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(value["title"], "B");
    }

    #[tokio::test]
    async fn test_dead_letters() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.db");
        let sink = SqliteSink::new(&path);

        sink.open().await.unwrap();
        let mut records = create_test_records();
        records[0].retry();
        sink.process_error(&records[..1]).await;
        sink.close().await.unwrap();

        assert_eq!(count(&path, "dead_letter"), 1);
        let conn = Connection::open(&path).unwrap();
        let (target, retries): (String, u32) = conn
            .query_row("SELECT target, retry_count FROM dead_letter", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(target, "pages");
        assert_eq!(retries, 1);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("pages"), "\"pages\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
