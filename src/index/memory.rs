//! In-memory [`IndexEngine`] used by pipeline tests.
//!
//! Documents are kept in insertion order behind `std::sync::RwLock`.
//! There is no full-text index, so `search` always returns an empty result set.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{BatchOutcome, IndexEngine, IngestRun};
use crate::error::Result;
use crate::model::mail::{IndexedDocument, SearchHit};

#[derive(Default)]
struct Inner {
    /// Document id by record id.
    ids: HashMap<String, i64>,
    /// `(doc_id, run_tag, document)` in ascending id order.
    docs: Vec<(i64, String, IndexedDocument)>,
    next_id: i64,
    runs: Vec<IngestRun>,
}

/// Volatile index holding every document in memory.
#[derive(Default)]
pub struct MemoryIndex {
    inner: RwLock<Inner>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored documents, in id order.
    pub fn documents(&self) -> Vec<IndexedDocument> {
        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        inner.docs.iter().map(|(_, _, d)| d.clone()).collect()
    }
}

#[async_trait]
impl IndexEngine for MemoryIndex {
    async fn write_batch(
        &self,
        run: &str,
        _batch: u64,
        documents: &[IndexedDocument],
    ) -> Result<BatchOutcome> {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let mut outcome = BatchOutcome::default();
        for (pos, doc) in documents.iter().enumerate() {
            match inner.ids.get(&doc.record_id).copied() {
                Some(id) => {
                    let Some(slot) = inner.docs.iter_mut().find(|(d, _, _)| *d == id) else {
                        continue;
                    };
                    if slot.1 == run {
                        outcome.duplicates.push(pos);
                        continue;
                    }
                    slot.1 = run.to_string();
                    slot.2 = doc.clone();
                }
                None => {
                    inner.next_id += 1;
                    let id = inner.next_id;
                    inner.ids.insert(doc.record_id.clone(), id);
                    inner.docs.push((id, run.to_string(), doc.clone()));
                }
            }
            outcome.written += 1;
        }
        Ok(outcome)
    }

    async fn search(&self, _match_expr: &str, _limit: usize) -> Result<Vec<SearchHit>> {
        Ok(Vec::new())
    }

    async fn scan_texts(&self, after_id: i64, page: usize) -> Result<Vec<(i64, String, String)>> {
        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        Ok(inner
            .docs
            .iter()
            .filter(|(id, _, _)| *id > after_id)
            .take(page)
            .map(|(id, _, d)| (*id, d.subject.clone(), d.body.clone()))
            .collect())
    }

    async fn document_count(&self) -> Result<u64> {
        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        Ok(inner.docs.len() as u64)
    }

    async fn record_run(&self, run: &IngestRun) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        inner.runs.push(run.clone());
        Ok(())
    }

    async fn latest_run(&self) -> Result<Option<IngestRun>> {
        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        Ok(inner.runs.last().cloned())
    }
}
