//! Reindex and vector-consistency management.
//!
//! Reindexing a patient is delete-then-rebuild: the whole collection is
//! removed first, then every document with a usable extraction is indexed
//! again. The batch is continue-on-error: one document's failure is
//! counted and the rest still index. The operation is not atomic; a crash
//! mid-run leaves a partial collection, and rerunning converges because it
//! always starts with the full delete.
//!
//! Mutations of one patient's collection are serialized with a per-patient
//! async mutex so a reindex and a single-document index cannot interleave
//! their delete/insert sequences.

use crate::metrics::PipelineMetrics;
use crate::models::{ChunkSourceMeta, Document};
use crate::store::{documents, StoreError, VectorStore};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Errors raised by single-document indexing.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The referenced document does not exist.
    #[error("document {0} not found")]
    DocumentNotFound(i64),
    /// The document has no patient and therefore no collection to index into.
    #[error("document {0} has no patient assigned")]
    NoPatient(i64),
    /// A store-level operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for IndexError {
    fn from(error: sqlx::Error) -> Self {
        Self::Store(StoreError::Database(error))
    }
}

/// Aggregate outcome of a full patient reindex.
#[derive(Debug, Clone, Serialize)]
pub struct ReindexReport {
    /// Patient whose collection was rebuilt.
    pub patient_id: i64,
    /// Documents considered for indexing.
    pub total_documents: usize,
    /// Documents indexed successfully.
    pub indexed: usize,
    /// Documents without usable extraction text (not errors).
    pub skipped: usize,
    /// Documents whose indexing failed; the batch continued past them.
    pub failed: usize,
    /// Chunks persisted across all indexed documents.
    pub total_chunks: usize,
}

/// Coordinates collection rebuilds and cascade-safe deletions.
pub struct IndexingService {
    pool: PgPool,
    store: Arc<VectorStore>,
    metrics: Arc<PipelineMetrics>,
    locks: PatientLocks,
}

impl IndexingService {
    /// Build the service over shared pipeline components.
    pub fn new(pool: PgPool, store: Arc<VectorStore>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            pool,
            store,
            metrics,
            locks: PatientLocks::default(),
        }
    }

    /// Rebuild a patient's entire chunk collection from their latest
    /// completed extractions.
    pub async fn reindex_patient(&self, patient_id: i64) -> Result<ReindexReport, StoreError> {
        let _guard = self.locks.acquire(patient_id).await;

        let deleted = self.store.delete_patient_collection(patient_id).await?;
        tracing::info!(patient_id, deleted, "Cleared collection before reindex");

        let docs = documents::documents_for_patient(&self.pool, patient_id).await?;
        let mut report = ReindexReport {
            patient_id,
            total_documents: docs.len(),
            indexed: 0,
            skipped: 0,
            failed: 0,
            total_chunks: 0,
        };

        for document in docs {
            match self.index_resolved(&document).await {
                Ok(Some(chunks)) => {
                    report.indexed += 1;
                    report.total_chunks += chunks;
                }
                Ok(None) => {
                    tracing::info!(
                        patient_id,
                        document_id = document.id,
                        "Skipping document without extraction text"
                    );
                    report.skipped += 1;
                }
                Err(error) => {
                    tracing::error!(
                        patient_id,
                        document_id = document.id,
                        error = %error,
                        "Failed to index document during reindex; continuing"
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            patient_id,
            total_documents = report.total_documents,
            indexed = report.indexed,
            skipped = report.skipped,
            failed = report.failed,
            total_chunks = report.total_chunks,
            "Reindex complete"
        );
        Ok(report)
    }

    /// Index one document into its patient's collection.
    ///
    /// With `force`, existing chunks for the document are deleted first.
    /// Without it, calling this twice duplicates chunks, a documented gap
    /// of the operation, not a guarantee. Returns the number of chunks
    /// added; a document without usable extraction text is a no-op `Ok(0)`.
    pub async fn index_document(
        &self,
        document_id: i64,
        extraction_id: Option<i64>,
        force: bool,
    ) -> Result<usize, IndexError> {
        let document = documents::fetch_document(&self.pool, document_id)
            .await?
            .ok_or(IndexError::DocumentNotFound(document_id))?;
        let patient_id = document
            .patient_id
            .ok_or(IndexError::NoPatient(document_id))?;

        let _guard = self.locks.acquire(patient_id).await;

        let extraction = match extraction_id {
            Some(id) => documents::fetch_extraction(&self.pool, id)
                .await?
                .filter(|extraction| extraction.document_id == document_id),
            None => documents::latest_completed_extraction(&self.pool, document_id).await?,
        };
        let Some(extraction) = extraction else {
            tracing::warn!(document_id, "No completed extraction found; nothing to index");
            return Ok(0);
        };
        let Some(raw_text) = extraction
            .raw_text
            .as_deref()
            .filter(|text| !text.trim().is_empty())
        else {
            tracing::warn!(
                document_id,
                extraction_id = extraction.id,
                "Extraction has no text content"
            );
            return Ok(0);
        };

        if force {
            tracing::info!(document_id, patient_id, "Force reindexing document");
            self.store.delete_document(patient_id, document_id).await?;
        }

        let meta = chunk_meta(&document, extraction.id, extraction.extraction_method.clone());
        let chunks = self
            .store
            .add_document(patient_id, document_id, raw_text, &meta)
            .await?;
        if chunks > 0 {
            self.metrics.record_document_indexed(chunks as u64);
        }
        Ok(chunks)
    }

    /// Delete every chunk belonging to a patient.
    ///
    /// Used by the management surface and by the external patient subsystem
    /// when a patient is removed (the operational half of the cascade).
    pub async fn delete_patient_vector_data(&self, patient_id: i64) -> Result<u64, StoreError> {
        let _guard = self.locks.acquire(patient_id).await;
        self.store.delete_patient_collection(patient_id).await
    }

    /// Index one document while the patient lock is already held by the
    /// caller (the reindex loop). `None` means no usable text.
    async fn index_resolved(&self, document: &Document) -> Result<Option<usize>, IndexError> {
        let patient_id = document
            .patient_id
            .ok_or(IndexError::NoPatient(document.id))?;

        let Some(extraction) =
            documents::latest_completed_extraction(&self.pool, document.id).await?
        else {
            return Ok(None);
        };
        let Some(raw_text) = extraction
            .raw_text
            .as_deref()
            .filter(|text| !text.trim().is_empty())
        else {
            return Ok(None);
        };

        let meta = chunk_meta(document, extraction.id, extraction.extraction_method.clone());
        let chunks = self
            .store
            .add_document(patient_id, document.id, raw_text, &meta)
            .await?;
        if chunks > 0 {
            self.metrics.record_document_indexed(chunks as u64);
        }
        Ok(Some(chunks))
    }
}

/// Snapshot the document metadata denormalized onto each chunk.
fn chunk_meta(
    document: &Document,
    extraction_id: i64,
    extraction_method: Option<String>,
) -> ChunkSourceMeta {
    ChunkSourceMeta {
        extraction_id: Some(extraction_id),
        document_type: Some(
            document
                .document_type
                .map(|doc_type| doc_type.as_str().to_string())
                .unwrap_or_else(|| "other".to_string()),
        ),
        original_filename: Some(document.original_filename.clone()),
        upload_date: document.upload_date,
        extraction_method,
    }
}

/// Registry of per-patient mutexes serializing collection mutation.
#[derive(Default)]
struct PatientLocks {
    inner: StdMutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl PatientLocks {
    async fn acquire(&self, patient_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().expect("patient lock registry poisoned");
            map.entry(patient_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn patient_locks_serialize_same_patient() {
        let locks = PatientLocks::default();
        let guard = locks.acquire(5).await;

        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire(5)).await;
        assert!(second.is_err(), "same-patient acquire should block");

        drop(guard);
        let third = tokio::time::timeout(Duration::from_millis(50), locks.acquire(5)).await;
        assert!(third.is_ok(), "released lock should be reacquirable");
    }

    #[tokio::test]
    async fn patient_locks_do_not_couple_distinct_patients() {
        let locks = PatientLocks::default();
        let _guard = locks.acquire(5).await;

        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire(6)).await;
        assert!(other.is_ok(), "distinct patients must not contend");
    }
}
