//! In-memory [`VectorIndex`] for testing and embedded use.
//!
//! Brute-force cosine similarity; the allow-list predicate is applied while
//! scanning, before any scoring, so disallowed chunks never enter the
//! candidate set. Counts backend searches so tests can assert that a call
//! was (or was not) made.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{GateError, GateResult};
use crate::models::{Chunk, ChunkHit};

use super::VectorIndex;

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
}

pub struct InMemoryVectorIndex {
    chunks: RwLock<Vec<StoredChunk>>,
    search_calls: AtomicUsize,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            search_calls: AtomicUsize::new(0),
        }
    }

    /// Number of `search_filtered` calls that reached this backend.
    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> GateError {
    GateError::IndexUnavailable("in-memory index lock poisoned".to_string())
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn replace_document(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> GateResult<()> {
        let mut stored = self.chunks.write().map_err(|_| poisoned())?;
        stored.retain(|sc| sc.chunk.document_id != document_id);
        for (c, v) in chunks.iter().zip(vectors.iter()) {
            stored.push(StoredChunk {
                chunk: Chunk {
                    document_id: document_id.to_string(),
                    ..c.clone()
                },
                vector: v.clone(),
            });
        }
        Ok(())
    }

    async fn search_filtered(
        &self,
        query_vec: &[f32],
        allowed: &BTreeSet<String>,
        top_k: usize,
    ) -> GateResult<Vec<ChunkHit>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let stored = self.chunks.read().map_err(|_| poisoned())?;

        let mut hits: Vec<ChunkHit> = stored
            .iter()
            .filter(|sc| allowed.contains(&sc.chunk.document_id))
            .map(|sc| ChunkHit {
                chunk_id: sc.chunk.id.clone(),
                score: cosine_similarity(query_vec, &sc.vector) as f64,
                document_id: sc.chunk.document_id.clone(),
                text: sc.chunk.text.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}
