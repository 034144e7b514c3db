//! CLI entry point for `mailindex`.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use mailindex::config::Config;
use mailindex::index::{IndexEngine, SqliteIndex};
use mailindex::ingest::{ingest_file, IngestOptions, IngestSummary};
use mailindex::model::mail::SearchHit;
use mailindex::model::record::RecordSchema;
use mailindex::parser::csv::{CsvSource, SourceRow};
use mailindex::search::query::FuzzyPolicy;
use mailindex::search::Searcher;
use mailindex::vocab::{SharedVocabulary, VocabularyBuilder};

#[derive(Parser)]
#[command(
    name = "mailindex",
    version,
    about = "Index a CSV email dump into SQLite FTS5 and search it with typo-tolerant queries"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Index database file (overrides the configured path)
    #[arg(long, global = true, env = "MAILINDEX_DB", value_name = "PATH")]
    db: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a CSV file with `file` and `message` columns
    Ingest {
        /// CSV source file
        csv: PathBuf,
        /// Stop after this many rows
        #[arg(long)]
        limit: Option<u64>,
        /// Documents per committed transaction
        #[arg(long)]
        batch_size: Option<usize>,
        /// Skip rows larger than this many bytes
        #[arg(long, value_name = "BYTES")]
        max_record_size: Option<u64>,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search the index
    Search {
        /// Query text: terms are AND-ed, `OR` separates groups
        query: String,
        /// Maximum number of results
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
        /// Print the compiled match expression
        #[arg(long)]
        explain: bool,
        /// Print each matched body (first 2000 characters)
        #[arg(long)]
        full: bool,
    },
    /// Show the first rows of a CSV source
    Inspect {
        /// CSV source file
        csv: PathBuf,
        /// Number of rows to show
        #[arg(short = 'n', long, default_value_t = 5)]
        rows: usize,
        /// Message lines to show per row
        #[arg(long, default_value_t = 20)]
        lines: usize,
    },
    /// Build the vocabulary and show the most frequent terms
    Vocab {
        /// Number of terms to show
        #[arg(long, default_value_t = 20)]
        top: usize,
    },
    /// Show index statistics and the latest ingestion run
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = mailindex::config::load_config();
    if let Some(db) = &cli.db {
        config.index.db_path = db.clone();
    }

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    setup_logging(&log_level, &config);

    match cli.command {
        Commands::Ingest {
            csv,
            limit,
            batch_size,
            max_record_size,
            json,
        } => {
            if let Some(n) = batch_size {
                config.ingest.batch_size = n;
            }
            if let Some(n) = max_record_size {
                config.ingest.max_record_size = n;
            }
            config.validate()?;
            cmd_ingest(&csv, limit, json, &config).await
        }
        Commands::Search {
            query,
            limit,
            json,
            explain,
            full,
        } => {
            config.validate()?;
            let limit = limit.unwrap_or(config.query.default_limit);
            cmd_search(&query, limit, json, explain, full, &config).await
        }
        Commands::Inspect { csv, rows, lines } => cmd_inspect(&csv, rows, lines, &config),
        Commands::Vocab { top } => cmd_vocab(top, &config).await,
        Commands::Stats { json } => cmd_stats(json, &config).await,
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = mailindex::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailindex.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailindex", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Open an existing index, refusing to create an empty one for read commands.
async fn open_existing(config: &Config) -> anyhow::Result<SqliteIndex> {
    let db = &config.index.db_path;
    if !db.exists() {
        anyhow::bail!(
            "Index not found: {} (run `mailindex ingest` first)",
            db.display()
        );
    }
    Ok(SqliteIndex::open(db).await?)
}

/// Ingest a CSV source and print the summary.
async fn cmd_ingest(
    path: &Path,
    limit: Option<u64>,
    json: bool,
    config: &Config,
) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("Source not found: {}", path.display());
    }

    let index = SqliteIndex::open(&config.index.db_path).await?;

    let mut options = IngestOptions::from_config(&config.ingest);
    options.limit = limit;

    let stop = Arc::clone(&options.stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, committing the current batch and stopping");
            stop.store(true, Ordering::Relaxed);
        }
    });

    let file_size = std::fs::metadata(path)?.len();
    let pb = ProgressBar::new(file_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} Ingesting [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let report = |read: u64| pb.set_position(read);
    let start = Instant::now();
    let summary = ingest_file(
        path,
        &index,
        &config.ingest,
        options,
        Some(&report as &(dyn Fn(u64) + Sync)),
    )
    .await?;
    pb.finish_and_clear();
    let elapsed = start.elapsed();

    if json {
        print_ingest_json(path, &summary, elapsed)?;
    } else {
        print_ingest_table(path, file_size, &summary, elapsed);
    }

    index.close().await;
    Ok(())
}

fn print_ingest_table(
    path: &Path,
    file_size: u64,
    summary: &IngestSummary,
    elapsed: std::time::Duration,
) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  {:<20} {}", "Source:", path.display());
    println!("  {:<20} {}", "Source size:", format_size(file_size, BINARY));
    println!("  {:<20} {}", "Rows read:", summary.rows_read);
    println!("  {:<20} {}", "Accepted:", summary.accepted);
    println!("  {:<20} {}", "Skipped oversize:", summary.skipped_oversize);
    println!("  {:<20} {}", "Failed parse:", summary.failed_parse);
    println!("  {:<20} {}", "Header degraded:", summary.header_degraded);
    println!("  {:<20} {}", "Body fallbacks:", summary.body_fallbacks);
    println!("  {:<20} {}", "Batches committed:", summary.batches_committed);

    if !summary.batch_failures.is_empty() {
        println!(
            "  {:<20} {} ({} document(s) lost)",
            "Batches rolled back:",
            summary.batch_failures.len(),
            summary.documents_lost
        );
        for failure in &summary.batch_failures {
            println!(
                "    batch {:>5}  from line {:>9}  lost {}",
                failure.batch, failure.first_line, failure.lost
            );
        }
    }
    if summary.stopped {
        println!("  {:<20} yes", "Stopped early:");
    }

    println!("  {:<20} {:.2?}", "Elapsed:", elapsed);
    println!();
}

fn print_ingest_json(
    path: &Path,
    summary: &IngestSummary,
    elapsed: std::time::Duration,
) -> anyhow::Result<()> {
    let out = serde_json::json!({
        "source": path.to_string_lossy(),
        "summary": summary,
        "documents_committed": summary.documents_committed(),
        "elapsed_ms": elapsed.as_millis(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Search the index and print ranked results.
async fn cmd_search(
    query: &str,
    limit: usize,
    json: bool,
    explain: bool,
    full: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let index = Arc::new(open_existing(config).await?);

    let vocab = VocabularyBuilder::new(config.vocabulary.clone())
        .build(index.as_ref())
        .await?;
    let searcher = Searcher::new(
        Arc::clone(&index),
        SharedVocabulary::new(vocab),
        FuzzyPolicy::from_config(&config.query),
    );

    if explain {
        match searcher.compile(query) {
            Some(q) => eprintln!("  Match expression: {}", q.to_match_expr()),
            None => eprintln!("  Match expression: (no query)"),
        }
    }

    let hits = searcher.search(query, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
    } else {
        print_search_results(&hits, full);
    }

    index.close().await;
    Ok(())
}

/// Characters of body shown by `search --full`.
const BODY_PREVIEW_CHARS: usize = 2000;

fn print_search_results(hits: &[SearchHit], full: bool) {
    if hits.is_empty() {
        println!("No matches.");
        return;
    }

    println!();
    for (i, hit) in hits.iter().enumerate() {
        let subject = if hit.subject.is_empty() {
            "(no subject)"
        } else {
            hit.subject.as_str()
        };
        println!("  {:>3}. {}  [{:.2}]", i + 1, subject, hit.score);
        println!("       From: {}", hit.sender);
        if let Some(date) = &hit.sent_at {
            println!("       Date: {date}");
        }
        println!("       File: {}", hit.record_id);
        let excerpt = hit.excerpt.split_whitespace().collect::<Vec<_>>().join(" ");
        if !excerpt.is_empty() {
            println!("       {excerpt}");
        }
        if full {
            println!();
            for line in hit.body_preview(BODY_PREVIEW_CHARS).lines() {
                println!("       | {line}");
            }
        }
        println!();
    }
    println!("  {} result(s)", hits.len());
}

/// Print the header and the first rows of a CSV source.
fn cmd_inspect(path: &Path, rows: usize, lines: usize, config: &Config) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    let source = CsvSource::open(
        path,
        config.ingest.max_record_size,
        config.ingest.read_buffer_size,
    )?;
    let (header, head) = source.head(rows)?;

    println!();
    println!("  {:<20} {}", "Source:", source.path().display());
    println!(
        "  {:<20} {}",
        "Size:",
        format_size(source.file_size(), BINARY)
    );
    if header.is_empty() {
        println!("  {:<20} none (empty source)", "Columns:");
        println!();
        return Ok(());
    }
    println!("  {:<20} {}", "Columns:", header.join(", "));
    println!();

    let schema = RecordSchema::from_header(
        &header,
        &config.ingest.id_column,
        &config.ingest.message_column,
    )?;

    for (i, row) in head.into_iter().enumerate() {
        println!("Row {}", i + 1);
        match row {
            SourceRow::Oversize { line, size } => {
                println!("  line {line}: over the size ceiling ({size} bytes)");
            }
            SourceRow::Fields { line, size, fields } => {
                match schema.validate(line, size, fields) {
                    Ok(record) => {
                        println!("{}: {}", config.ingest.id_column, record.id);
                        let text: Vec<&str> = record.message.trim().lines().collect();
                        for l in text.iter().take(lines) {
                            println!("    {l}");
                        }
                        if text.len() > lines {
                            println!("  ...");
                        }
                    }
                    Err(e) => println!("  {e}"),
                }
            }
        }
        println!("{}", "-".repeat(30));
    }

    Ok(())
}

/// Build the vocabulary and print its most frequent terms.
async fn cmd_vocab(top: usize, config: &Config) -> anyhow::Result<()> {
    let index = open_existing(config).await?;

    let start = Instant::now();
    let vocab = VocabularyBuilder::new(config.vocabulary.clone())
        .build(&index)
        .await?;
    let elapsed = start.elapsed();

    println!();
    println!("  {:<20} {}", "Terms:", vocab.len());
    println!("  {:<20} {:.2?}", "Build time:", elapsed);
    let terms = vocab.top(top);
    if !terms.is_empty() {
        println!();
        println!("  Most frequent:");
        for (term, count) in terms {
            println!("    {count:>9}  {term}");
        }
    }
    println!();

    index.close().await;
    Ok(())
}

/// Show document count, index size, and the latest run.
async fn cmd_stats(json: bool, config: &Config) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    let index = open_existing(config).await?;
    let db = &config.index.db_path;
    let db_size = std::fs::metadata(db).map(|m| m.len()).unwrap_or(0);
    let documents = index.document_count().await?;
    let run = index.latest_run().await?;

    if json {
        let out = serde_json::json!({
            "index": db.to_string_lossy(),
            "index_size": db_size,
            "documents": documents,
            "latest_run": run,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!("  {:<20} {}", "Index:", db.display());
        println!("  {:<20} {}", "Index size:", format_size(db_size, BINARY));
        println!("  {:<20} {}", "Documents:", documents);
        match run {
            Some(run) => {
                println!();
                println!("  Latest ingestion:");
                println!("    {:<18} {}", "Source:", run.source_path);
                println!("    {:<18} {}", "Run tag:", run.run_tag);
                println!("    {:<18} {}", "SHA-256 (4 KB):", run.source_sha256);
                println!("    {:<18} {}", "Started:", run.started_at);
                println!("    {:<18} {}", "Finished:", run.finished_at);
                println!("    {:<18} {}", "Accepted:", run.summary.accepted);
                println!(
                    "    {:<18} {}",
                    "Skipped oversize:", run.summary.skipped_oversize
                );
                println!("    {:<18} {}", "Failed parse:", run.summary.failed_parse);
                println!("    {:<18} {}", "Documents lost:", run.summary.documents_lost);
            }
            None => println!("  {:<20} none recorded", "Latest ingestion:"),
        }
        println!();
    }

    index.close().await;
    Ok(())
}
