//! Full-text index engine abstraction.
//!
//! The [`IndexEngine`] trait is the seam between the ingestion/query core and
//! the storage backend. The core never ranks or tokenizes documents itself; it
//! only hands the engine valid documents and valid match expressions.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::ingest::IngestSummary;
use crate::model::mail::{IndexedDocument, SearchHit};

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

/// Result of one committed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Documents inserted or replaced.
    pub written: u64,
    /// Positions in the batch of documents whose record id was already
    /// written by the same run. Those documents were left out.
    pub duplicates: Vec<usize>,
}

/// One completed ingestion run, as kept in the run log.
#[derive(Debug, Clone, Serialize)]
pub struct IngestRun {
    /// Tag stamped on every document the run wrote.
    pub run_tag: String,
    /// Source file the run read from.
    pub source_path: String,
    /// Hex SHA-256 of the first 4 KB of the source.
    pub source_sha256: String,
    /// RFC 3339 start time.
    pub started_at: String,
    /// RFC 3339 end time.
    pub finished_at: String,
    pub summary: IngestSummary,
}

/// Abstract storage and retrieval backend.
#[async_trait]
pub trait IndexEngine: Send + Sync {
    /// Index every document of batch number `batch` inside one transaction.
    ///
    /// Either all documents become visible or none do; a failure is reported
    /// as `BatchWriteFailed`. A record id indexed by an earlier run is
    /// replaced. One already written under the same `run` tag is kept and the
    /// newcomer is reported in [`BatchOutcome::duplicates`].
    async fn write_batch(
        &self,
        run: &str,
        batch: u64,
        documents: &[IndexedDocument],
    ) -> Result<BatchOutcome>;

    /// Run a compiled match expression, best match first.
    async fn search(&self, match_expr: &str, limit: usize) -> Result<Vec<SearchHit>>;

    /// Page through `(doc_id, subject, body)` in ascending id order, starting after `after_id`.
    async fn scan_texts(&self, after_id: i64, page: usize) -> Result<Vec<(i64, String, String)>>;

    /// Number of indexed documents.
    async fn document_count(&self) -> Result<u64>;

    /// Append a completed run to the run log.
    async fn record_run(&self, run: &IngestRun) -> Result<()>;

    /// Most recently recorded run, if any.
    async fn latest_run(&self) -> Result<Option<IngestRun>>;
}
