//! Search entry point: compile the user's text against the current vocabulary,
//! then hand the match expression to the index engine.

pub mod query;

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::index::IndexEngine;
use crate::model::mail::SearchHit;
use crate::vocab::SharedVocabulary;

use self::query::{compile, FuzzyPolicy, Query};

/// Glues the query compiler, the vocabulary snapshot, and the engine.
pub struct Searcher<E: IndexEngine + ?Sized> {
    engine: Arc<E>,
    vocab: SharedVocabulary,
    policy: FuzzyPolicy,
}

impl<E: IndexEngine + ?Sized> Searcher<E> {
    pub fn new(engine: Arc<E>, vocab: SharedVocabulary, policy: FuzzyPolicy) -> Self {
        Self {
            engine,
            vocab,
            policy,
        }
    }

    /// Compile `text` against the current vocabulary snapshot.
    pub fn compile(&self, text: &str) -> Option<Query> {
        let snapshot = self.vocab.snapshot();
        compile(text, &snapshot, &self.policy)
    }

    /// Ranked hits for `text`; empty for no query or no match.
    pub async fn search(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let Some(query) = self.compile(text) else {
            debug!("Empty query, nothing to search");
            return Ok(Vec::new());
        };
        let expr = query.to_match_expr();
        debug!(query = text, match_expr = %expr, "Compiled query");
        self.engine.search(&expr, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SqliteIndex;
    use crate::model::mail::{IndexedDocument, ParseFlags};
    use crate::vocab::VocabularyBuilder;
    use crate::config::VocabularyConfig;

    fn doc(id: &str, subject: &str, body: &str) -> IndexedDocument {
        IndexedDocument {
            record_id: id.to_string(),
            message_id: String::new(),
            subject: subject.to_string(),
            sender: "kenneth.lay@enron.com".to_string(),
            recipients: String::new(),
            sent_at: None,
            body: body.to_string(),
            flags: ParseFlags::default(),
        }
    }

    #[tokio::test]
    async fn test_misspelled_query_finds_document() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(SqliteIndex::open(&dir.path().join("s.sqlite")).await.unwrap());
        index
            .write_batch(
                "run-1",
                1,
                &[
                    doc("a/1.", "Merger update", "The merger closes next week."),
                    doc("a/2.", "Lunch", "Sandwiches at noon."),
                ],
            )
            .await
            .unwrap();

        let vocab = VocabularyBuilder::new(VocabularyConfig::default())
            .build(index.as_ref())
            .await
            .unwrap();
        let searcher = Searcher::new(
            index.clone(),
            SharedVocabulary::new(vocab),
            FuzzyPolicy::default(),
        );

        let hits = searcher.search("megrer", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_id, "a/1.");

        let hits = searcher.search("sandwich OR megrer", 10).await.unwrap();
        assert_eq!(hits.len(), 2);

        assert!(searcher.search("   ", 10).await.unwrap().is_empty());
        assert!(searcher.search("zzzzqqq", 10).await.unwrap().is_empty());
    }
}
