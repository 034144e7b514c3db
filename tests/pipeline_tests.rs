//! End-to-end tests: CSV source → ingestion → SQLite index → search.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mailindex::config::{Config, IngestConfig};
use mailindex::error::MailIndexError;
use mailindex::index::{IndexEngine, SqliteIndex};
use mailindex::ingest::{ingest_file, IngestOptions, IngestSummary};
use mailindex::search::query::FuzzyPolicy;
use mailindex::search::Searcher;
use mailindex::vocab::{SharedVocabulary, VocabularyBuilder};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn ingest_config(max_record_size: u64, batch_size: usize) -> IngestConfig {
    IngestConfig {
        max_record_size,
        batch_size,
        ..IngestConfig::default()
    }
}

async fn ingest(
    index: &SqliteIndex,
    path: &Path,
    config: &IngestConfig,
) -> Result<IngestSummary, MailIndexError> {
    ingest_file(path, index, config, IngestOptions::from_config(config), None).await
}

async fn searcher(index: Arc<SqliteIndex>) -> Searcher<SqliteIndex> {
    let config = Config::default();
    let vocab = VocabularyBuilder::new(config.vocabulary.clone())
        .build(index.as_ref())
        .await
        .unwrap();
    Searcher::new(
        index,
        SharedVocabulary::new(vocab),
        FuzzyPolicy::from_config(&config.query),
    )
}

fn csv_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

// ─── Three-record scenario ──────────────────────────────────────────

#[tokio::test]
async fn test_three_record_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(SqliteIndex::open(&dir.path().join("idx.sqlite")).await.unwrap());

    let summary = ingest(&index, &fixture("three_records.csv"), &ingest_config(2048, 1000))
        .await
        .unwrap();
    assert_eq!(summary.rows_read, 3);
    assert_eq!(summary.accepted, 2);
    assert_eq!(summary.skipped_oversize, 1);
    assert_eq!(summary.failed_parse, 0);
    assert_eq!(summary.batches_committed, 1);
    assert_eq!(index.document_count().await.unwrap(), 2);

    let searcher = searcher(Arc::clone(&index)).await;

    let hits = searcher.search("forecast", 20).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record_id, "allen-p/_sent_mail/1.");
    assert_eq!(hits[0].subject, "Gas forecast");
    assert_eq!(hits[0].sender, "phillip.allen@enron.com");
    assert!(hits[0].sent_at.is_some());
    assert!(hits[0].body.starts_with("Here is our forecast"));

    let hits = searcher.search("quarterly accounting", 20).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record_id, "watkins-s/inbox/3.");
    assert!(hits[0].excerpt.contains("[quarterly]"));

    // Oversize record and attachment content never reach the index
    assert!(searcher.search("position", 20).await.unwrap().is_empty());
    assert!(searcher.search("SECRETATTACHMENT", 20).await.unwrap().is_empty());
    assert!(searcher.search("notes", 20).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fuzzy_and_grouped_queries() {
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(SqliteIndex::open(&dir.path().join("idx.sqlite")).await.unwrap());
    ingest(&index, &fixture("three_records.csv"), &ingest_config(2048, 1000))
        .await
        .unwrap();
    let searcher = searcher(Arc::clone(&index)).await;

    // Transposed letters still find the document
    let hits = searcher.search("quartelry", 20).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record_id, "watkins-s/inbox/3.");

    // Prefix matching
    assert_eq!(searcher.search("forec", 20).await.unwrap().len(), 1);

    // OR across groups, AND within
    let hits = searcher
        .search("gas forecast OR raptor entities", 20)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(searcher
        .search("gas raptor", 20)
        .await
        .unwrap()
        .is_empty());

    assert!(searcher.search("", 20).await.unwrap().is_empty());
    assert!(searcher.search("OR", 20).await.unwrap().is_empty());
}

// ─── Row-level rejection ────────────────────────────────────────────

#[tokio::test]
async fn test_mixed_rows_are_counted() {
    let dir = tempfile::tempdir().unwrap();
    let index = SqliteIndex::open(&dir.path().join("idx.sqlite")).await.unwrap();

    let summary = ingest(&index, &fixture("mixed.csv"), &ingest_config(1_000_000, 2))
        .await
        .unwrap();
    assert_eq!(summary.rows_read, 7);
    assert_eq!(summary.accepted, 3);
    assert_eq!(summary.failed_parse, 4);
    assert_eq!(summary.header_degraded, 2);
    assert_eq!(summary.batches_committed, 2);
    assert_eq!(index.document_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_ceiling_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let message = "Subject: boundary\n\nExactly at the ceiling.";
    let row = format!("a/1.,{}", csv_quote(message));
    let csv_path = dir.path().join("boundary.csv");
    std::fs::write(&csv_path, format!("file,message\n{row}\n")).unwrap();
    let size = row.len() as u64;

    let at = SqliteIndex::open(&dir.path().join("at.sqlite")).await.unwrap();
    let summary = ingest(&at, &csv_path, &ingest_config(size, 10)).await.unwrap();
    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.skipped_oversize, 0);

    let over = SqliteIndex::open(&dir.path().join("over.sqlite")).await.unwrap();
    let summary = ingest(&over, &csv_path, &ingest_config(size - 1, 10))
        .await
        .unwrap();
    assert_eq!(summary.accepted, 0);
    assert_eq!(summary.skipped_oversize, 1);
    assert_eq!(over.document_count().await.unwrap(), 0);
}

// ─── Idempotence ────────────────────────────────────────────────────

#[tokio::test]
async fn test_fresh_ingests_are_identical() {
    let dir = tempfile::tempdir().unwrap();
    let config = ingest_config(2048, 1000);

    let first = SqliteIndex::open(&dir.path().join("one.sqlite")).await.unwrap();
    let second = SqliteIndex::open(&dir.path().join("two.sqlite")).await.unwrap();
    let a = ingest(&first, &fixture("three_records.csv"), &config)
        .await
        .unwrap();
    let b = ingest(&second, &fixture("three_records.csv"), &config)
        .await
        .unwrap();

    assert_eq!(a, b);
    assert_eq!(
        first.document_count().await.unwrap(),
        second.document_count().await.unwrap()
    );

    // Re-ingesting into the same index replaces rather than duplicates
    let again = ingest(&first, &fixture("three_records.csv"), &config)
        .await
        .unwrap();
    assert_eq!(again, a);
    assert_eq!(first.document_count().await.unwrap(), 2);
}

// ─── Batch rollback ─────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_batch_is_invisible_and_others_survive() {
    let dir = tempfile::tempdir().unwrap();
    let index = SqliteIndex::open(&dir.path().join("idx.sqlite")).await.unwrap();

    // The 500th document of the second batch of 1000 cannot be written
    sqlx::query(
        "CREATE TRIGGER reject_one BEFORE INSERT ON emails WHEN new.record_id = 'u/1499' \
         BEGIN SELECT RAISE(ABORT, 'rejected'); END",
    )
    .execute(index.pool())
    .await
    .unwrap();

    let mut csv = String::from("file,message\n");
    for i in 0..2500 {
        let msg = format!("From: u{i}@enron.com\nSubject: note {i}\n\nuniqueword{i} body");
        csv.push_str(&format!("u/{i},{}\n", csv_quote(&msg)));
    }
    let csv_path = dir.path().join("bulk.csv");
    std::fs::write(&csv_path, csv).unwrap();

    let summary = ingest(&index, &csv_path, &ingest_config(1_000_000, 1000))
        .await
        .unwrap();

    assert_eq!(summary.accepted, 2500);
    assert_eq!(summary.batches_committed, 2);
    assert_eq!(summary.documents_lost, 1000);
    assert_eq!(summary.batch_failures.len(), 1);
    assert_eq!(summary.batch_failures[0].batch, 2);
    assert_eq!(summary.batch_failures[0].lost, 1000);
    assert_eq!(index.document_count().await.unwrap(), 1500);

    for (word, expected) in [
        ("uniqueword999", 1),
        ("uniqueword1000", 0),
        ("uniqueword1498", 0),
        ("uniqueword1999", 0),
        ("uniqueword2000", 1),
    ] {
        let hits = index.search(&format!("\"{word}\""), 10).await.unwrap();
        assert_eq!(hits.len(), expected, "{word}");
    }
}

// ─── Source-level behaviour ─────────────────────────────────────────

#[tokio::test]
async fn test_run_log_records_latest_ingest() {
    let dir = tempfile::tempdir().unwrap();
    let index = SqliteIndex::open(&dir.path().join("idx.sqlite")).await.unwrap();
    let summary = ingest(&index, &fixture("three_records.csv"), &ingest_config(2048, 1000))
        .await
        .unwrap();

    let run = index.latest_run().await.unwrap().unwrap();
    assert!(run.source_path.ends_with("three_records.csv"));
    assert_eq!(run.source_sha256.len(), 64);
    assert!(!run.run_tag.is_empty());
    assert_eq!(run.summary, summary);
    assert!(run.started_at <= run.finished_at);
}

#[tokio::test]
async fn test_empty_source_gives_zero_summary() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("empty.csv");
    std::fs::write(&csv_path, "").unwrap();
    let index = SqliteIndex::open(&dir.path().join("idx.sqlite")).await.unwrap();

    let summary = ingest(&index, &csv_path, &IngestConfig::default())
        .await
        .unwrap();
    assert_eq!(summary, IngestSummary::default());
    assert_eq!(index.document_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_source_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let index = SqliteIndex::open(&dir.path().join("idx.sqlite")).await.unwrap();
    let err = ingest(&index, &dir.path().join("nope.csv"), &IngestConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MailIndexError::SourceUnreadable { .. }));
    assert!(index.latest_run().await.unwrap().is_none());
}

#[tokio::test]
async fn test_limit_stops_after_rows_read() {
    let dir = tempfile::tempdir().unwrap();
    let index = SqliteIndex::open(&dir.path().join("idx.sqlite")).await.unwrap();
    let config = ingest_config(1_000_000, 1000);
    let mut options = IngestOptions::from_config(&config);
    options.limit = Some(2);

    let summary = ingest_file(&fixture("mixed.csv"), &index, &config, options, None)
        .await
        .unwrap();
    assert_eq!(summary.rows_read, 2);
    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.failed_parse, 1);
}
