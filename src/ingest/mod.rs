//! Streaming ingestion pipeline: CSV rows → parsed emails → batched index writes.
//!
//! Rows are pulled one at a time; at most one batch of documents is held in
//! memory. Row-level problems are counted and skipped, a failed batch is rolled
//! back and skipped, and only an unreadable source aborts the run.

use std::fs::File;
use std::io::{BufRead, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::error::{MailIndexError, Result};
use crate::index::{IndexEngine, IngestRun};
use crate::model::mail::IndexedDocument;
use crate::model::record::RecordSchema;
use crate::parser::csv::{CsvRows, CsvSource, SourceRow};
use crate::parser::record::RecordParser;

/// Bytes of the source hashed for the run log fingerprint.
const FINGERPRINT_LEN: usize = 4096;

/// Report progress at most once per this many bytes read.
const PROGRESS_INTERVAL: u64 = 4 * 1024 * 1024;

/// Knobs for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Accepted documents per committed transaction.
    pub batch_size: usize,
    /// Size ceiling in bytes for one serialized row.
    pub max_record_size: u64,
    /// Stop after this many rows within the size ceiling, valid or not.
    /// Oversize rows are skipped without counting.
    pub limit: Option<u64>,
    /// Cooperative stop flag, checked before each row.
    pub stop: Arc<AtomicBool>,
    /// Stamped on every written document; repeats of a record id under the
    /// same tag are rejected by the engine.
    pub run_tag: String,
}

impl IngestOptions {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_record_size: config.max_record_size,
            limit: None,
            stop: Arc::new(AtomicBool::new(false)),
            run_tag: new_run_tag(),
        }
    }
}

/// Tag unique to this process and call: start time, pid, sequence.
fn new_run_tag() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S%.6fZ"),
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// A batch that was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// 1-based batch number within the run.
    pub batch: u64,
    /// Source line of the first record in the batch.
    pub first_line: u64,
    /// Documents that were in the batch.
    pub lost: u64,
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    /// Records that parsed and were taken by the engine.
    pub accepted: u64,
    pub skipped_oversize: u64,
    /// Rows that failed schema validation or repeated an id within the run.
    pub failed_parse: u64,
    pub header_degraded: u64,
    pub body_fallbacks: u64,
    pub batches_committed: u64,
    pub batch_failures: Vec<BatchFailure>,
    /// Accepted documents lost to rolled-back batches.
    pub documents_lost: u64,
    /// The run halted on the stop flag before the source was exhausted.
    pub stopped: bool,
    pub rows_read: u64,
}

impl IngestSummary {
    /// Documents that are visible in the index after the run.
    pub fn documents_committed(&self) -> u64 {
        self.accepted - self.documents_lost
    }
}

/// Batch under construction.
struct PendingBatch {
    documents: Vec<IndexedDocument>,
    first_line: u64,
    number: u64,
}

/// Drives rows from a [`CsvRows`] reader into an [`IndexEngine`].
pub struct Pipeline<'a, E: IndexEngine + ?Sized> {
    engine: &'a E,
    parser: RecordParser,
    options: IngestOptions,
}

impl<'a, E: IndexEngine + ?Sized> Pipeline<'a, E> {
    pub fn new(engine: &'a E, options: IngestOptions) -> Self {
        Self {
            engine,
            parser: RecordParser::new(options.max_record_size),
            options,
        }
    }

    /// Process every row of `rows` exactly once.
    ///
    /// `progress` receives the number of source bytes consumed so far.
    pub async fn run<R: BufRead>(
        &self,
        rows: &mut CsvRows<R>,
        schema: &RecordSchema,
        progress: Option<&(dyn Fn(u64) + Sync)>,
    ) -> Result<IngestSummary> {
        let batch_size = self.options.batch_size.max(1);
        let mut summary = IngestSummary::default();
        let mut pending = PendingBatch {
            documents: Vec::with_capacity(batch_size),
            first_line: 0,
            number: 0,
        };
        let mut last_progress = 0u64;
        let mut counted = 0u64;

        loop {
            if self.options.stop.load(Ordering::Relaxed) {
                info!(rows = summary.rows_read, "Stop requested, halting ingestion");
                summary.stopped = true;
                break;
            }
            if let Some(limit) = self.options.limit {
                if counted >= limit {
                    debug!(limit, "Row limit reached");
                    break;
                }
            }

            // An unreadable source drops the uncommitted batch
            let Some(row) = rows.next() else { break };
            let row = row?;
            summary.rows_read += 1;

            if let Some(cb) = progress {
                let read = rows.bytes_read();
                if read - last_progress >= PROGRESS_INTERVAL {
                    cb(read);
                    last_progress = read;
                }
            }

            let (line, size, fields) = match row {
                SourceRow::Oversize { line, size } => {
                    debug!(line, size, "Skipping oversize record");
                    summary.skipped_oversize += 1;
                    continue;
                }
                SourceRow::Fields { line, size, fields } => (line, size, fields),
            };
            counted += 1;

            let record = match schema.validate(line, size, fields) {
                Ok(record) => record,
                Err(e) => {
                    debug!(error = %e, "Skipping invalid row");
                    summary.failed_parse += 1;
                    continue;
                }
            };

            let email = match self.parser.parse(&record) {
                Ok(email) => email,
                Err(MailIndexError::RecordTooLarge { line, size, .. }) => {
                    debug!(line, size, "Skipping oversize record");
                    summary.skipped_oversize += 1;
                    continue;
                }
                Err(e) => {
                    debug!(line, error = %e, "Skipping unparseable record");
                    summary.failed_parse += 1;
                    continue;
                }
            };

            if email.flags.header_degraded {
                summary.header_degraded += 1;
            }
            if email.flags.body_fallback {
                summary.body_fallbacks += 1;
            }

            if pending.documents.is_empty() {
                pending.first_line = record.line;
            }
            pending
                .documents
                .push(IndexedDocument::from_parsed(&record.id, email));
            summary.accepted += 1;

            if pending.documents.len() >= batch_size {
                self.commit(&mut pending, &mut summary).await;
            }
        }

        if !pending.documents.is_empty() {
            self.commit(&mut pending, &mut summary).await;
        }

        if let Some(cb) = progress {
            cb(rows.bytes_read());
        }

        info!(
            rows = summary.rows_read,
            accepted = summary.accepted,
            skipped_oversize = summary.skipped_oversize,
            failed_parse = summary.failed_parse,
            batches = summary.batches_committed,
            lost = summary.documents_lost,
            "Ingestion finished"
        );

        Ok(summary)
    }

    /// Write the pending batch; a failure is recorded, never propagated.
    ///
    /// Documents the engine reports as same-run duplicates move from
    /// `accepted` to `failed_parse`.
    async fn commit(&self, pending: &mut PendingBatch, summary: &mut IngestSummary) {
        pending.number += 1;
        let count = pending.documents.len() as u64;

        match self
            .engine
            .write_batch(&self.options.run_tag, pending.number, &pending.documents)
            .await
        {
            Ok(outcome) => {
                for &pos in &outcome.duplicates {
                    let Some(doc) = pending.documents.get(pos) else {
                        continue;
                    };
                    debug!(id = %doc.record_id, "Skipping duplicate record id");
                    summary.accepted -= 1;
                    summary.failed_parse += 1;
                    if doc.flags.header_degraded {
                        summary.header_degraded -= 1;
                    }
                    if doc.flags.body_fallback {
                        summary.body_fallbacks -= 1;
                    }
                }
                summary.batches_committed += 1;
                info!(
                    batch = pending.number,
                    documents = outcome.written,
                    duplicates = outcome.duplicates.len(),
                    "Committed batch"
                );
            }
            Err(e) => {
                warn!(
                    batch = pending.number,
                    first_line = pending.first_line,
                    lost = count,
                    error = %e,
                    "Batch rolled back, continuing with next record"
                );
                summary.batch_failures.push(BatchFailure {
                    batch: pending.number,
                    first_line: pending.first_line,
                    lost: count,
                });
                summary.documents_lost += count;
            }
        }

        pending.documents.clear();
    }
}

/// Ingest a CSV file end to end and append the run to the engine's run log.
pub async fn ingest_file<E: IndexEngine + ?Sized>(
    path: &Path,
    engine: &E,
    config: &IngestConfig,
    options: IngestOptions,
    progress: Option<&(dyn Fn(u64) + Sync)>,
) -> Result<IngestSummary> {
    let started_at = Utc::now();
    let run_tag = options.run_tag.clone();
    let source = CsvSource::open(path, options.max_record_size, config.read_buffer_size)?;
    let fingerprint = source_fingerprint(path)?;
    let mut rows = source.rows()?;

    info!(
        path = %path.display(),
        size = source.file_size(),
        "Starting ingestion"
    );

    let summary = if rows.header().is_empty() {
        info!(path = %path.display(), "Source is empty");
        IngestSummary::default()
    } else {
        let schema =
            RecordSchema::from_header(rows.header(), &config.id_column, &config.message_column)?;
        Pipeline::new(engine, options)
            .run(&mut rows, &schema, progress)
            .await?
    };

    let run = IngestRun {
        run_tag: run_tag.clone(),
        source_path: path.display().to_string(),
        source_sha256: fingerprint,
        started_at: started_at.to_rfc3339(),
        finished_at: Utc::now().to_rfc3339(),
        summary: summary.clone(),
    };
    if let Err(e) = engine.record_run(&run).await {
        warn!(error = %e, "Could not record ingestion run");
    }

    Ok(summary)
}

/// Hex SHA-256 of the first 4 KB of a file.
pub fn source_fingerprint(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| MailIndexError::unreadable(path, &e))?;
    let mut buf = vec![0u8; FINGERPRINT_LEN];
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => return Err(MailIndexError::unreadable(path, &e)),
        }
    }
    let mut hasher = Sha256::new();
    hasher.update(&buf[..filled]);
    Ok(format!("{:x}", hasher.finalize()))
}
