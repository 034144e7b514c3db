//! SQLite FTS5 implementation of [`IndexEngine`].
//!
//! Documents live in the `emails` table; the external-content FTS5 table
//! `email_fts(subject, body)` is kept in sync by triggers, so every write path
//! only touches `emails`.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection};
use tracing::{debug, warn};

use super::{BatchOutcome, IndexEngine, IngestRun};
use crate::error::{MailIndexError, Result};
use crate::model::mail::{IndexedDocument, SearchHit};

/// SQLite-backed index, one file per deployment.
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Open (or create) the index file at `path` and bring its schema up to date.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| MailIndexError::io(parent, e))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let index = Self { pool };
        index.migrate().await?;
        debug!(path = %path.display(), "Opened index");
        Ok(index)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS emails (
                id INTEGER PRIMARY KEY,
                record_id TEXT NOT NULL UNIQUE,
                message_id TEXT NOT NULL DEFAULT '',
                sent_at TEXT,
                sender TEXT NOT NULL DEFAULT '',
                recipients TEXT NOT NULL DEFAULT '',
                subject TEXT NOT NULL DEFAULT '',
                body TEXT NOT NULL DEFAULT '',
                flags INTEGER NOT NULL DEFAULT 0,
                run_tag TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        self.ensure_column("emails", "run_tag", "TEXT NOT NULL DEFAULT ''")
            .await?;

        // FTS5 CREATE is not idempotent natively, so we check first
        let fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='email_fts'",
        )
        .fetch_one(&self.pool)
        .await?;

        if !fts_exists {
            sqlx::query(
                "CREATE VIRTUAL TABLE email_fts USING fts5(subject, body, content='emails', content_rowid='id')",
            )
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS emails_ai AFTER INSERT ON emails BEGIN
                INSERT INTO email_fts(rowid, subject, body) VALUES (new.id, new.subject, new.body);
            END
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS emails_ad AFTER DELETE ON emails BEGIN
                INSERT INTO email_fts(email_fts, rowid, subject, body)
                VALUES ('delete', old.id, old.subject, old.body);
            END
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS emails_au AFTER UPDATE ON emails BEGIN
                INSERT INTO email_fts(email_fts, rowid, subject, body)
                VALUES ('delete', old.id, old.subject, old.body);
                INSERT INTO email_fts(rowid, subject, body) VALUES (new.id, new.subject, new.body);
            END
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ingest_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_tag TEXT NOT NULL DEFAULT '',
                source_path TEXT NOT NULL,
                source_sha256 TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                summary_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        self.ensure_column("ingest_runs", "run_tag", "TEXT NOT NULL DEFAULT ''")
            .await?;

        Ok(())
    }

    /// Add a column to a table created by an older schema.
    async fn ensure_column(&self, table: &str, column: &str, decl: &str) -> Result<()> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM pragma_table_info(?) WHERE name = ?",
        )
        .bind(table)
        .bind(column)
        .fetch_one(&self.pool)
        .await?;

        if !exists {
            debug!(table, column, "Adding column");
            sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

/// Insert or replace one document. Returns `false` when the record id was
/// already written by the same run and the row was left untouched.
async fn upsert_document(
    conn: &mut SqliteConnection,
    run: &str,
    doc: &IndexedDocument,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO emails (record_id, message_id, sent_at, sender, recipients, subject, body, flags, run_tag)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(record_id) DO UPDATE SET
            message_id = excluded.message_id,
            sent_at = excluded.sent_at,
            sender = excluded.sender,
            recipients = excluded.recipients,
            subject = excluded.subject,
            body = excluded.body,
            flags = excluded.flags,
            run_tag = excluded.run_tag
        WHERE emails.run_tag <> excluded.run_tag
        "#,
    )
    .bind(&doc.record_id)
    .bind(&doc.message_id)
    .bind(&doc.sent_at)
    .bind(&doc.sender)
    .bind(&doc.recipients)
    .bind(&doc.subject)
    .bind(&doc.body)
    .bind(doc.flags.bits())
    .bind(run)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// FTS5 rejects some match expressions at query time; those are not engine faults.
fn is_match_syntax_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let msg = db.message();
            msg.contains("fts5") || msg.contains("syntax error") || msg.contains("no such column")
        }
        _ => false,
    }
}

#[async_trait]
impl IndexEngine for SqliteIndex {
    async fn write_batch(
        &self,
        run: &str,
        batch: u64,
        documents: &[IndexedDocument],
    ) -> Result<BatchOutcome> {
        let failed = |reason: String| MailIndexError::BatchWriteFailed {
            batch,
            documents: documents.len(),
            reason,
        };

        let mut tx = self.pool.begin().await.map_err(|e| failed(e.to_string()))?;
        let mut outcome = BatchOutcome::default();

        for (pos, doc) in documents.iter().enumerate() {
            match upsert_document(&mut tx, run, doc).await {
                Ok(true) => outcome.written += 1,
                Ok(false) => outcome.duplicates.push(pos),
                Err(e) => {
                    if let Err(rb) = tx.rollback().await {
                        warn!(batch, error = %rb, "Rollback failed");
                    }
                    return Err(failed(format!("record '{}': {e}", doc.record_id)));
                }
            }
        }

        tx.commit().await.map_err(|e| failed(e.to_string()))?;
        Ok(outcome)
    }

    async fn search(&self, match_expr: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let result = sqlx::query(
            r#"
            SELECT e.record_id, e.subject, e.sender, e.sent_at, e.body,
                   snippet(email_fts, 1, '[', ']', ' ... ', 12) AS excerpt,
                   bm25(email_fts) AS bm25_score
            FROM email_fts
            JOIN emails e ON e.id = email_fts.rowid
            WHERE email_fts MATCH ?
            ORDER BY bm25_score
            LIMIT ?
            "#,
        )
        .bind(match_expr)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await;

        let rows = match result {
            Ok(rows) => rows,
            Err(e) if is_match_syntax_error(&e) => {
                warn!(query = match_expr, error = %e, "Match expression rejected by the engine");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let hits = rows
            .iter()
            .map(|row| {
                let bm25: f64 = row.get("bm25_score");
                SearchHit {
                    record_id: row.get("record_id"),
                    subject: row.get("subject"),
                    sender: row.get("sender"),
                    sent_at: row.get("sent_at"),
                    excerpt: row.get("excerpt"),
                    body: row.get("body"),
                    score: -bm25,
                }
            })
            .collect();

        Ok(hits)
    }

    async fn scan_texts(&self, after_id: i64, page: usize) -> Result<Vec<(i64, String, String)>> {
        let rows = sqlx::query_as::<_, (i64, String, String)>(
            "SELECT id, subject, body FROM emails WHERE id > ? ORDER BY id ASC LIMIT ?",
        )
        .bind(after_id)
        .bind(page as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn document_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM emails")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn record_run(&self, run: &IngestRun) -> Result<()> {
        let summary_json = serde_json::to_string(&run.summary)?;
        sqlx::query(
            r#"
            INSERT INTO ingest_runs (run_tag, source_path, source_sha256, started_at, finished_at, summary_json)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.run_tag)
        .bind(&run.source_path)
        .bind(&run.source_sha256)
        .bind(&run.started_at)
        .bind(&run.finished_at)
        .bind(&summary_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_run(&self) -> Result<Option<IngestRun>> {
        let row = sqlx::query(
            r#"
            SELECT run_tag, source_path, source_sha256, started_at, finished_at, summary_json
            FROM ingest_runs
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let summary_json: String = row.get("summary_json");
        Ok(Some(IngestRun {
            run_tag: row.get("run_tag"),
            source_path: row.get("source_path"),
            source_sha256: row.get("source_sha256"),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            summary: serde_json::from_str(&summary_json)?,
        }))
    }
}
