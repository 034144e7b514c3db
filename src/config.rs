//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILINDEX_CONFIG` (environment variable)
//! 2. `~/.config/mailindex/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailindex\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! Command-line flags override individual values after loading.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{MailIndexError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Location of the index store.
    pub index: IndexConfig,
    /// Ingestion pipeline tuning.
    pub ingest: IngestConfig,
    /// Vocabulary tokenization.
    pub vocabulary: VocabularyConfig,
    /// Query compilation and fuzzy expansion policy.
    pub query: QueryConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Index store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Path of the SQLite index file.
    pub db_path: PathBuf,
}

/// Ingestion pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Accepted documents per committed transaction.
    pub batch_size: usize,
    /// Rows whose serialized size exceeds this many bytes are skipped unparsed.
    pub max_record_size: u64,
    /// Source column holding the unique record identifier.
    pub id_column: String,
    /// Source column holding the raw RFC 822 message.
    pub message_column: String,
    /// Read buffer size in bytes for the source file.
    pub read_buffer_size: usize,
}

/// Vocabulary tokenization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabularyConfig {
    /// Tokens shorter than this (in characters) are discarded.
    pub min_token_len: usize,
    /// Tokens longer than this (in characters) are discarded.
    pub max_token_len: usize,
    /// Stop scanning after this many documents (`None` scans everything).
    pub max_documents: Option<u64>,
    /// Stop admitting new terms once this many are known.
    pub max_terms: usize,
}

/// Query compilation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Terms up to this many characters use `short_term_distance`.
    pub short_term_max_len: usize,
    /// Maximum edit distance for short terms.
    pub short_term_distance: usize,
    /// Maximum edit distance for longer terms.
    pub long_term_distance: usize,
    /// Cap on fuzzy variants per term (`None` keeps every match).
    pub max_variants: Option<usize>,
    /// Result limit when the caller does not give one.
    pub default_limit: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/mailindex.sqlite"),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_record_size: 1_000_000, // 1 MB
            id_column: "file".to_string(),
            message_column: "message".to_string(),
            read_buffer_size: 1024 * 1024,
        }
    }
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        Self {
            min_token_len: 3,
            max_token_len: 20,
            max_documents: None,
            max_terms: 80_000,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            short_term_max_len: 4,
            short_term_distance: 1,
            long_term_distance: 2,
            max_variants: None,
            default_limit: 20,
        }
    }
}

impl Config {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.ingest.batch_size == 0 {
            return Err(MailIndexError::Config("ingest.batch_size must be > 0".into()));
        }
        if self.ingest.max_record_size == 0 {
            return Err(MailIndexError::Config(
                "ingest.max_record_size must be > 0".into(),
            ));
        }
        if self.ingest.id_column.is_empty() || self.ingest.message_column.is_empty() {
            return Err(MailIndexError::Config(
                "ingest.id_column and ingest.message_column must be set".into(),
            ));
        }
        if self.ingest.read_buffer_size == 0 {
            return Err(MailIndexError::Config(
                "ingest.read_buffer_size must be > 0".into(),
            ));
        }
        if self.vocabulary.min_token_len == 0
            || self.vocabulary.min_token_len > self.vocabulary.max_token_len
        {
            return Err(MailIndexError::Config(
                "vocabulary.min_token_len must be in 1..=max_token_len".into(),
            ));
        }
        if self.query.default_limit == 0 {
            return Err(MailIndexError::Config(
                "query.default_limit must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILINDEX_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("mailindex").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailindex")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.ingest.batch_size, 1000);
        assert_eq!(cfg.ingest.max_record_size, 1_000_000);
        assert_eq!(cfg.ingest.id_column, "file");
        assert_eq!(cfg.query.short_term_max_len, 4);
        assert_eq!(cfg.query.short_term_distance, 1);
        assert_eq!(cfg.query.long_term_distance, 2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[ingest]
batch_size = 250

[query]
long_term_distance = 3
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.ingest.batch_size, 250);
        assert_eq!(cfg.query.long_term_distance, 3);
        assert_eq!(cfg.ingest.message_column, "message");
        assert_eq!(cfg.vocabulary.min_token_len, 3);
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut cfg = Config::default();
        cfg.ingest.batch_size = 0;
        assert!(matches!(cfg.validate(), Err(MailIndexError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_token_bounds() {
        let mut cfg = Config::default();
        cfg.vocabulary.min_token_len = 30;
        assert!(cfg.validate().is_err());
    }
}
