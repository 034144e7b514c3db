//! Term-frequency vocabulary used for fuzzy query expansion.
//!
//! The vocabulary is built once from the indexed documents and then shared
//! read-only. A rebuild publishes a whole new snapshot; readers holding the
//! previous one keep using it undisturbed.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::config::VocabularyConfig;
use crate::error::Result;
use crate::index::IndexEngine;

/// Documents fetched per `scan_texts` page.
const SCAN_PAGE: usize = 500;

/// Split text into lowercase alphanumeric tokens within the length bounds (in chars).
pub fn tokenize(text: &str, min_len: usize, max_len: usize) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(move |t| {
            let len = t.chars().count();
            len >= min_len && len <= max_len
        })
        .map(str::to_lowercase)
}

/// Immutable term → occurrence count snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    terms: BTreeMap<String, u64>,
}

impl Vocabulary {
    pub fn contains(&self, term: &str) -> bool {
        self.terms.contains_key(term)
    }

    pub fn frequency(&self, term: &str) -> Option<u64> {
        self.terms.get(term).copied()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// All terms in ascending lexical order with their counts.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.terms.iter().map(|(t, c)| (t.as_str(), *c))
    }

    /// The `n` most frequent terms, ties broken alphabetically.
    pub fn top(&self, n: usize) -> Vec<(&str, u64)> {
        let mut all: Vec<(&str, u64)> = self.iter().collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        all.truncate(n);
        all
    }
}

impl FromIterator<(String, u64)> for Vocabulary {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self {
            terms: iter.into_iter().collect(),
        }
    }
}

/// Accumulates token counts under the configured caps.
#[derive(Debug, Clone)]
pub struct VocabularyBuilder {
    config: VocabularyConfig,
    terms: BTreeMap<String, u64>,
    documents: u64,
}

impl VocabularyBuilder {
    pub fn new(config: VocabularyConfig) -> Self {
        Self {
            config,
            terms: BTreeMap::new(),
            documents: 0,
        }
    }

    /// Count the tokens of one text.
    ///
    /// Once `max_terms` distinct terms are known, new terms are ignored but
    /// known terms keep counting.
    pub fn add_text(&mut self, text: &str) {
        for token in tokenize(text, self.config.min_token_len, self.config.max_token_len) {
            if let Some(count) = self.terms.get_mut(&token) {
                *count += 1;
            } else if self.terms.len() < self.config.max_terms {
                self.terms.insert(token, 1);
            }
        }
    }

    /// Whether the `max_documents` cap has been reached.
    pub fn is_saturated(&self) -> bool {
        self.config
            .max_documents
            .is_some_and(|max| self.documents >= max)
    }

    /// Count one document's subject and body.
    pub fn add_document(&mut self, subject: &str, body: &str) {
        self.add_text(subject);
        self.add_text(body);
        self.documents += 1;
    }

    pub fn finish(self) -> Vocabulary {
        Vocabulary { terms: self.terms }
    }

    /// Scan every indexed document in ascending id order.
    pub async fn build<E: IndexEngine + ?Sized>(mut self, engine: &E) -> Result<Vocabulary> {
        let mut after_id = 0i64;

        'scan: loop {
            let page = engine.scan_texts(after_id, SCAN_PAGE).await?;
            if page.is_empty() {
                break;
            }
            for (id, subject, body) in &page {
                if self.is_saturated() {
                    break 'scan;
                }
                self.add_document(subject, body);
                after_id = *id;
            }
            debug!(documents = self.documents, terms = self.terms.len(), "Vocabulary page scanned");
        }

        info!(
            documents = self.documents,
            terms = self.terms.len(),
            "Vocabulary built"
        );
        Ok(self.finish())
    }
}

/// Swappable handle to the current vocabulary snapshot.
#[derive(Debug, Clone, Default)]
pub struct SharedVocabulary {
    current: Arc<RwLock<Arc<Vocabulary>>>,
}

impl SharedVocabulary {
    pub fn new(vocab: Vocabulary) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(vocab))),
        }
    }

    /// The current snapshot. Later rebuilds do not affect it.
    pub fn snapshot(&self) -> Arc<Vocabulary> {
        let guard = self.current.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&guard)
    }

    /// Publish a new snapshot.
    pub fn replace(&self, vocab: Vocabulary) {
        let next = Arc::new(vocab);
        let mut guard = self.current.write().unwrap_or_else(|p| p.into_inner());
        *guard = next;
    }

    /// Build from the engine and publish the result.
    pub async fn rebuild<E: IndexEngine + ?Sized>(
        &self,
        engine: &E,
        config: &VocabularyConfig,
    ) -> Result<Arc<Vocabulary>> {
        let vocab = VocabularyBuilder::new(config.clone()).build(engine).await?;
        self.replace(vocab);
        Ok(self.snapshot())
    }
}
