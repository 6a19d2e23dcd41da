//! SQLite-backed [`VectorIndex`] and [`DocumentCatalog`].
//!
//! Vectors are stored as little-endian f32 BLOBs in `chunk_vectors`. The
//! allow-list is bound as a JSON array and expanded with `json_each` inside
//! the query, so rows of documents outside it are never read. Scoring is
//! brute-force cosine similarity over the rows that pass the filter.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};

use gated_context_core::catalog::DocumentCatalog;
use gated_context_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use gated_context_core::error::{GateError, GateResult};
use gated_context_core::index::VectorIndex;
use gated_context_core::models::{Chunk, ChunkHit};

/// A row of the `documents` table.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: String,
    pub title: String,
    pub source_path: Option<String>,
    pub content_hash: String,
}

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert_document(&self, doc: &DocumentRecord) -> GateResult<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, title, source_path, content_hash, ingested_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                source_path = excluded.source_path,
                content_hash = excluded.content_hash,
                ingested_at = excluded.ingested_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.title)
        .bind(&doc.source_path)
        .bind(&doc.content_hash)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(index_err)?;
        Ok(())
    }

    pub async fn chunk_count(&self, document_id: &str) -> GateResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await
            .map_err(index_err)
    }
}

fn index_err(e: sqlx::Error) -> GateError {
    GateError::IndexUnavailable(e.to_string())
}

fn ids_json(ids: &BTreeSet<String>) -> GateResult<String> {
    serde_json::to_string(ids).map_err(|e| GateError::IndexUnavailable(e.to_string()))
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn replace_document(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> GateResult<()> {
        let mut tx = self.pool.begin().await.map_err(index_err)?;

        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(index_err)?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(index_err)?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await
            .map_err(index_err)?;

            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, document_id, dims, embedding) VALUES (?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(document_id)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await
            .map_err(index_err)?;
        }

        tx.commit().await.map_err(index_err)?;
        Ok(())
    }

    async fn search_filtered(
        &self,
        query_vec: &[f32],
        allowed: &BTreeSet<String>,
        top_k: usize,
    ) -> GateResult<Vec<ChunkHit>> {
        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.document_id, cv.embedding, c.text
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE cv.document_id IN (SELECT value FROM json_each(?))
            "#,
        )
        .bind(ids_json(allowed)?)
        .fetch_all(&self.pool)
        .await
        .map_err(index_err)?;

        let mut hits: Vec<ChunkHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ChunkHit {
                    chunk_id: row.get("chunk_id"),
                    score: cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64,
                    document_id: row.get("document_id"),
                    text: row.get("text"),
                }
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

#[async_trait]
impl DocumentCatalog for SqliteVectorIndex {
    async fn display_names(&self, ids: &BTreeSet<String>) -> GateResult<BTreeMap<String, String>> {
        let rows = sqlx::query(
            "SELECT id, title FROM documents WHERE id IN (SELECT value FROM json_each(?))",
        )
        .bind(ids_json(ids)?)
        .fetch_all(&self.pool)
        .await
        .map_err(index_err)?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("id"), row.get::<String, _>("title")))
            .collect())
    }
}
