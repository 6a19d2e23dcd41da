//! Vector index abstraction with allow-list filtering.
//!
//! [`VectorIndex`] is the backend seam: nearest-neighbour search where the
//! `document_id ∈ allowed` predicate is evaluated by the backend itself, never
//! by over-fetching and discarding rows on the client.
//!
//! [`VectorIndexAdapter`] wraps a backend with the guarantees callers rely on:
//! an empty allow-list returns nothing without contacting the backend,
//! `top_k` must be positive, results are ordered by descending score and
//! never longer than `top_k`, and every call is bounded by a timeout.

pub mod memory;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{GateError, GateResult};
use crate::models::{Chunk, ChunkHit};
use crate::timing::with_timeout;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replace every chunk of `document_id` with `chunks`, one vector per chunk.
    ///
    /// The old chunk set must disappear in the same step, so a re-ingested
    /// document never leaves orphaned chunks behind.
    async fn replace_document(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> GateResult<()>;

    /// Top `top_k` chunks by similarity among chunks whose parent is in `allowed`.
    async fn search_filtered(
        &self,
        query_vec: &[f32],
        allowed: &BTreeSet<String>,
        top_k: usize,
    ) -> GateResult<Vec<ChunkHit>>;
}

#[derive(Clone)]
pub struct VectorIndexAdapter {
    index: Arc<dyn VectorIndex>,
    timeout: Duration,
}

impl VectorIndexAdapter {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self {
            index,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub async fn search(
        &self,
        query_vec: &[f32],
        allowed: &BTreeSet<String>,
        top_k: usize,
    ) -> GateResult<Vec<ChunkHit>> {
        if top_k == 0 {
            return Err(GateError::InvalidRequest(
                "top_k must be a positive integer".to_string(),
            ));
        }
        // An empty filter must never reach a backend that could read it as "no filter".
        if allowed.is_empty() {
            tracing::debug!("empty allow-list, skipping vector search");
            return Ok(Vec::new());
        }

        let mut hits = with_timeout(
            "vector search",
            self.timeout,
            self.index.search_filtered(query_vec, allowed, top_k),
        )
        .await?;

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    pub async fn replace_document(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> GateResult<()> {
        if chunks.len() != vectors.len() {
            return Err(GateError::InvalidRequest(format!(
                "{} chunks but {} vectors for document {}",
                chunks.len(),
                vectors.len(),
                document_id
            )));
        }
        with_timeout(
            "index write",
            self.timeout,
            self.index.replace_document(document_id, chunks, vectors),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryVectorIndex;
    use super::*;

    fn chunk(doc: &str, idx: i64, text: &str) -> Chunk {
        Chunk {
            id: format!("{}-{}", doc, idx),
            document_id: doc.to_string(),
            chunk_index: idx,
            text: text.to_string(),
            hash: String::new(),
        }
    }

    async fn seeded() -> (Arc<InMemoryVectorIndex>, VectorIndexAdapter) {
        let index = Arc::new(InMemoryVectorIndex::new());
        let adapter = VectorIndexAdapter::new(index.clone());
        adapter
            .replace_document(
                "doc_A",
                &[chunk("doc_A", 0, "alpha"), chunk("doc_A", 1, "alpha two")],
                &[vec![1.0, 0.0], vec![0.9, 0.1]],
            )
            .await
            .unwrap();
        adapter
            .replace_document("doc_B", &[chunk("doc_B", 0, "beta")], &[vec![0.0, 1.0]])
            .await
            .unwrap();
        (index, adapter)
    }

    #[tokio::test]
    async fn test_empty_allow_list_skips_backend() {
        let (index, adapter) = seeded().await;
        let hits = adapter
            .search(&[1.0, 0.0], &BTreeSet::new(), 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
        assert_eq!(index.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_top_k_rejected() {
        let (index, adapter) = seeded().await;
        let allowed = BTreeSet::from(["doc_A".to_string()]);
        let err = adapter.search(&[1.0, 0.0], &allowed, 0).await.unwrap_err();
        assert!(matches!(err, GateError::InvalidRequest(_)));
        assert_eq!(index.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_results_restricted_and_ordered() {
        let (_, adapter) = seeded().await;
        let allowed = BTreeSet::from(["doc_B".to_string()]);
        // Query is closest to doc_A chunks, but only doc_B is allowed.
        let hits = adapter.search(&[1.0, 0.0], &allowed, 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "doc_B");

        let both = BTreeSet::from(["doc_A".to_string(), "doc_B".to_string()]);
        let hits = adapter.search(&[1.0, 0.0], &both, 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].chunk_id, "doc_A-0");
    }

    #[tokio::test]
    async fn test_replace_requires_matching_vectors() {
        let (_, adapter) = seeded().await;
        let err = adapter
            .replace_document("doc_C", &[chunk("doc_C", 0, "c")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::InvalidRequest(_)));
    }
}
