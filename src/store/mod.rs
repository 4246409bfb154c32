//! PostgreSQL persistence for the retrieval pipeline.
//!
//! One `document_chunks` table holds every patient's chunks; tenant
//! isolation is a filter discipline, not a physical partition. **Every read
//! and write against that table carries `patient_id` as its first
//! predicate**; that is the correctness-critical invariant of this module.

pub mod documents;
pub mod schema;

use crate::embedding::{EmbeddingClient, EmbeddingError};
use crate::models::{ChunkMatch, ChunkSourceMeta, PatientVectorStats};
use crate::processing::{Chunker, ChunkingError};
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by vector-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database operation failed; transactions roll back.
    #[error("database operation failed: {0}")]
    Database(#[from] sqlx::Error),
    /// Chunking the document text failed.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    /// The embedding batch failed; nothing was persisted.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

/// Optional predicates applied on top of the mandatory patient filter.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Restrict matches to one denormalized document category.
    pub document_type: Option<String>,
    /// Restrict matches to chunks of one document.
    pub document_id: Option<i64>,
}

/// Persistence and similarity search over patient chunk collections.
///
/// Constructed once at process start and shared through an `Arc`; the
/// chunker and embedding client ride along so one `add_document` call is a
/// complete chunk → embed → persist pipeline with per-document atomicity.
pub struct VectorStore {
    pool: PgPool,
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingClient>,
}

impl VectorStore {
    /// Build a store over the given pool, chunker, and embedding client.
    pub fn new(pool: PgPool, chunker: Chunker, embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            pool,
            chunker,
            embedder,
        }
    }

    /// Chunk, embed, and persist a document's text for a patient.
    ///
    /// Returns the number of chunks added; empty or whitespace-only text is
    /// a logged no-op returning 0, not an error. All rows for the document
    /// are written in one transaction, so a partially indexed document is
    /// never visible.
    pub async fn add_document(
        &self,
        patient_id: i64,
        document_id: i64,
        text: &str,
        meta: &ChunkSourceMeta,
    ) -> Result<usize, StoreError> {
        if text.trim().is_empty() {
            tracing::warn!(document_id, "No text provided for document; nothing to index");
            return Ok(0);
        }

        let chunks = self.chunker.chunk(text)?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self.embedder.embed(texts).await?;
        debug_assert_eq!(chunks.len(), embeddings.len());

        let mut tx = self.pool.begin().await?;
        for (chunk, vector) in chunks.iter().zip(embeddings) {
            sqlx::query(
                "INSERT INTO document_chunks (patient_id, document_id, extraction_id, \
                 chunk_text, chunk_index, chunk_start_token, chunk_end_token, total_tokens, \
                 document_type, original_filename, upload_date, extraction_method, embedding) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .bind(patient_id)
            .bind(document_id)
            .bind(meta.extraction_id)
            .bind(&chunk.text)
            .bind(chunk.index as i32)
            .bind(chunk.start_token as i32)
            .bind(chunk.end_token as i32)
            .bind(chunk.token_count as i32)
            .bind(meta.document_type.as_deref())
            .bind(meta.original_filename.as_deref())
            .bind(meta.upload_date)
            .bind(meta.extraction_method.as_deref())
            .bind(Vector::from(vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::info!(
            patient_id,
            document_id,
            chunks = chunks.len(),
            "Document added to patient vector collection"
        );
        Ok(chunks.len())
    }

    /// Delete exactly the chunks of one patient+document pair.
    pub async fn delete_document(
        &self,
        patient_id: i64,
        document_id: i64,
    ) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM document_chunks WHERE patient_id = $1 AND document_id = $2")
                .bind(patient_id)
                .bind(document_id)
                .execute(&self.pool)
                .await?;
        tracing::info!(
            patient_id,
            document_id,
            deleted = result.rows_affected(),
            "Deleted document chunks"
        );
        Ok(result.rows_affected())
    }

    /// Delete a patient's entire chunk collection.
    pub async fn delete_patient_collection(&self, patient_id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM document_chunks WHERE patient_id = $1")
            .bind(patient_id)
            .execute(&self.pool)
            .await?;
        tracing::info!(
            patient_id,
            deleted = result.rows_affected(),
            "Deleted patient vector collection"
        );
        Ok(result.rows_affected())
    }

    /// Rank a patient's chunks by cosine distance to the query text.
    ///
    /// The embedding dimension (3072 by default) exceeds what pgvector's
    /// approximate index families support, so this is an exact scan over the
    /// patient's rows. That is fine at per-patient scale, and the documented
    /// scalability ceiling of this store.
    pub async fn search(
        &self,
        patient_id: i64,
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ChunkMatch>, StoreError> {
        let mut vectors = self.embedder.embed(vec![query.to_string()]).await?;
        let vector = vectors.pop().ok_or_else(|| {
            StoreError::Embedding(EmbeddingError::MalformedResponse(
                "provider returned no vector for the query".into(),
            ))
        })?;

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, patient_id, document_id, extraction_id, chunk_text, chunk_index, \
             chunk_start_token, chunk_end_token, total_tokens, document_type, \
             original_filename, upload_date, extraction_method, embedding <=> ",
        );
        builder.push_bind(Vector::from(vector));
        builder.push(" AS distance FROM document_chunks WHERE patient_id = ");
        builder.push_bind(patient_id);
        if let Some(document_type) = &filters.document_type {
            builder.push(" AND document_type = ");
            builder.push_bind(document_type);
        }
        if let Some(document_id) = filters.document_id {
            builder.push(" AND document_id = ");
            builder.push_bind(document_id);
        }
        builder.push(" ORDER BY distance LIMIT ");
        builder.push_bind(top_k as i64);

        let rows: Vec<ChunkMatchRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        let matches = rows.into_iter().map(ChunkMatchRow::into_match).collect();
        Ok(matches)
    }

    /// Aggregate chunk and document counts for a patient.
    pub async fn patient_stats(&self, patient_id: i64) -> Result<PatientVectorStats, StoreError> {
        let (total_chunks, total_documents): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(DISTINCT document_id) FROM document_chunks \
             WHERE patient_id = $1",
        )
        .bind(patient_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(PatientVectorStats {
            patient_id,
            total_chunks,
            total_documents,
            collection_name: format!("patient_{patient_id}_docs"),
        })
    }
}

/// Convert a pgvector cosine distance (in `[0, 2]`) to a `[0, 1]` similarity
/// where 1 means identical direction.
pub fn similarity_from_distance(distance: f64) -> f64 {
    1.0 - distance / 2.0
}

#[derive(sqlx::FromRow)]
struct ChunkMatchRow {
    id: i64,
    patient_id: i64,
    document_id: i64,
    extraction_id: Option<i64>,
    chunk_text: String,
    chunk_index: i32,
    chunk_start_token: Option<i32>,
    chunk_end_token: Option<i32>,
    total_tokens: Option<i32>,
    document_type: Option<String>,
    original_filename: Option<String>,
    upload_date: Option<DateTime<Utc>>,
    extraction_method: Option<String>,
    distance: f64,
}

impl ChunkMatchRow {
    fn into_match(self) -> ChunkMatch {
        let similarity = similarity_from_distance(self.distance);
        ChunkMatch {
            id: self.id,
            patient_id: self.patient_id,
            document_id: self.document_id,
            extraction_id: self.extraction_id,
            chunk_text: self.chunk_text,
            chunk_index: self.chunk_index,
            chunk_start_token: self.chunk_start_token,
            chunk_end_token: self.chunk_end_token,
            total_tokens: self.total_tokens,
            document_type: self.document_type,
            original_filename: self.original_filename,
            upload_date: self.upload_date,
            extraction_method: self.extraction_method,
            distance: self.distance,
            similarity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_is_monotonic_in_distance() {
        let closer = similarity_from_distance(0.3);
        let farther = similarity_from_distance(0.9);
        assert!(closer > farther);
    }

    #[test]
    fn similarity_spans_the_unit_interval() {
        assert_eq!(similarity_from_distance(0.0), 1.0);
        assert_eq!(similarity_from_distance(2.0), 0.0);
        assert_eq!(similarity_from_distance(1.0), 0.5);

        for step in 0..=20 {
            let distance = f64::from(step) * 0.1;
            let similarity = similarity_from_distance(distance);
            assert!((0.0..=1.0).contains(&similarity), "distance {distance}");
        }
    }
}
