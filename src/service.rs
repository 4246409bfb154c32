//! Application service behind the management surface.
//!
//! `AppService` owns long-lived handles to the pool, vector store, indexing
//! coordinator, and job runtime so the HTTP surface stays a thin layer.
//! Handlers depend on the [`ManagementApi`] trait, which tests implement
//! with stubs.

use crate::config::{Config, RecognitionKind};
use crate::extraction::{self, TriggerError};
use crate::indexing::{IndexError, IndexingService};
use crate::jobs::{EnqueueError, Job, JobQueue};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::models::{ChunkMatch, ExtractionStatus, PatientVectorStats};
use crate::store::{documents, SearchFilters, StoreError, VectorStore};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_SEARCH_LIMIT: usize = 5;
const MAX_SEARCH_LIMIT: usize = 50;

/// Errors surfaced by management operations, mapped to HTTP statuses by the
/// router.
#[derive(Debug, Error)]
pub enum ManagementError {
    /// Referenced entity does not exist (404).
    #[error("{0}")]
    NotFound(String),
    /// The request cannot be served in the current state (400).
    #[error("{0}")]
    Invalid(String),
    /// The job queue is at capacity (503).
    #[error("{0}")]
    Busy(String),
    /// Anything else (500).
    #[error("internal failure: {0}")]
    Internal(String),
}

impl From<StoreError> for ManagementError {
    fn from(error: StoreError) -> Self {
        Self::Internal(error.to_string())
    }
}

impl From<sqlx::Error> for ManagementError {
    fn from(error: sqlx::Error) -> Self {
        Self::Internal(error.to_string())
    }
}

impl From<EnqueueError> for ManagementError {
    fn from(error: EnqueueError) -> Self {
        Self::Busy(error.to_string())
    }
}

impl From<TriggerError> for ManagementError {
    fn from(error: TriggerError) -> Self {
        match error {
            TriggerError::DocumentNotFound(id) => Self::NotFound(format!("document {id} not found")),
            TriggerError::Queue(queue) => queue.into(),
            TriggerError::Database(db) => Self::Internal(db.to_string()),
        }
    }
}

impl From<IndexError> for ManagementError {
    fn from(error: IndexError) -> Self {
        match error {
            IndexError::DocumentNotFound(id) => Self::NotFound(format!("document {id} not found")),
            IndexError::NoPatient(id) => {
                Self::Invalid(format!("document {id} has no patient assigned"))
            }
            IndexError::Store(store) => store.into(),
        }
    }
}

/// Acknowledgement returned when a full reindex is scheduled.
#[derive(Debug, Clone, Serialize)]
pub struct ReindexStarted {
    /// Patient whose collection will be rebuilt.
    pub patient_id: i64,
    /// Documents currently attached to the patient.
    pub total_documents: i64,
    /// Identifier of the queued job.
    pub job_id: String,
}

/// Acknowledgement returned when a single-document index is scheduled.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStarted {
    /// Document that will be indexed.
    pub document_id: i64,
    /// Patient owning the document.
    pub patient_id: i64,
    /// Whether existing chunks are deleted first.
    pub force_reindex: bool,
    /// Identifier of the queued job.
    pub job_id: String,
}

/// Acknowledgement returned when recognition is triggered.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionStarted {
    /// Document being recognized.
    pub document_id: i64,
    /// Newly created extraction attempt.
    pub extraction_id: i64,
    /// State of the extraction at trigger time (always pending).
    pub status: ExtractionStatus,
    /// Provider selected for the run.
    pub provider: RecognitionKind,
}

/// Parameters of an ad-hoc debugging search.
#[derive(Debug, Clone)]
pub struct SearchPreviewRequest {
    /// Natural-language query text.
    pub query: String,
    /// Result limit; defaults applied downstream.
    pub top_k: Option<usize>,
    /// Optional document-category filter.
    pub document_type: Option<String>,
    /// Optional single-document filter.
    pub document_id: Option<i64>,
}

/// Pipeline counters plus the queue depth gauge.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsReport {
    /// Counter snapshot.
    #[serde(flatten)]
    pub pipeline: MetricsSnapshot,
    /// Jobs accepted but not yet picked up by a worker.
    pub queue_depth: usize,
}

/// Operations exposed to the non-core system.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Aggregate chunk/document counts for a patient.
    async fn patient_stats(&self, patient_id: i64) -> Result<PatientVectorStats, ManagementError>;

    /// Schedule a full asynchronous reindex of a patient's collection.
    async fn start_reindex(&self, patient_id: i64) -> Result<ReindexStarted, ManagementError>;

    /// Schedule asynchronous indexing of one document.
    async fn start_document_index(
        &self,
        document_id: i64,
        force: bool,
    ) -> Result<IndexStarted, ManagementError>;

    /// Synchronously delete all vector data for a patient.
    async fn delete_patient_vectors(&self, patient_id: i64) -> Result<u64, ManagementError>;

    /// Run an ad-hoc patient-scoped search for debugging.
    async fn search_preview(
        &self,
        patient_id: i64,
        request: SearchPreviewRequest,
    ) -> Result<Vec<ChunkMatch>, ManagementError>;

    /// Trigger text recognition for a document.
    async fn start_extraction(
        &self,
        document_id: i64,
        provider: Option<RecognitionKind>,
    ) -> Result<ExtractionStarted, ManagementError>;

    /// Current counters and queue depth.
    fn metrics(&self) -> MetricsReport;
}

/// Concrete service wiring the pipeline components together.
pub struct AppService {
    pool: PgPool,
    config: Arc<Config>,
    store: Arc<VectorStore>,
    indexing: Arc<IndexingService>,
    jobs: JobQueue,
    metrics: Arc<PipelineMetrics>,
}

impl AppService {
    /// Assemble the service from components constructed at process start.
    pub fn new(
        pool: PgPool,
        config: Arc<Config>,
        store: Arc<VectorStore>,
        indexing: Arc<IndexingService>,
        jobs: JobQueue,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            pool,
            config,
            store,
            indexing,
            jobs,
            metrics,
        }
    }
}

#[async_trait]
impl ManagementApi for AppService {
    async fn patient_stats(&self, patient_id: i64) -> Result<PatientVectorStats, ManagementError> {
        Ok(self.store.patient_stats(patient_id).await?)
    }

    async fn start_reindex(&self, patient_id: i64) -> Result<ReindexStarted, ManagementError> {
        let total_documents = documents::count_documents_for_patient(&self.pool, patient_id).await?;
        let job_id = self.jobs.try_enqueue(Job::ReindexPatient { patient_id })?;
        tracing::info!(patient_id, job_id = %job_id, "Reindex scheduled");
        Ok(ReindexStarted {
            patient_id,
            total_documents,
            job_id: job_id.to_string(),
        })
    }

    async fn start_document_index(
        &self,
        document_id: i64,
        force: bool,
    ) -> Result<IndexStarted, ManagementError> {
        let document = documents::fetch_document(&self.pool, document_id)
            .await?
            .ok_or_else(|| ManagementError::NotFound(format!("document {document_id} not found")))?;
        let patient_id = document.patient_id.ok_or_else(|| {
            ManagementError::Invalid(format!("document {document_id} has no patient assigned"))
        })?;

        let extraction = documents::latest_completed_extraction(&self.pool, document_id)
            .await?
            .ok_or_else(|| {
                ManagementError::Invalid(format!(
                    "document {document_id} has no completed extraction; run recognition first"
                ))
            })?;

        let job_id = self.jobs.try_enqueue(Job::IndexDocument {
            document_id,
            extraction_id: Some(extraction.id),
            force,
        })?;
        tracing::info!(document_id, patient_id, force, job_id = %job_id, "Document index scheduled");
        Ok(IndexStarted {
            document_id,
            patient_id,
            force_reindex: force,
            job_id: job_id.to_string(),
        })
    }

    async fn delete_patient_vectors(&self, patient_id: i64) -> Result<u64, ManagementError> {
        Ok(self.indexing.delete_patient_vector_data(patient_id).await?)
    }

    async fn search_preview(
        &self,
        patient_id: i64,
        request: SearchPreviewRequest,
    ) -> Result<Vec<ChunkMatch>, ManagementError> {
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return Err(ManagementError::Invalid("query must not be empty".into()));
        }
        let top_k = request
            .top_k
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);
        let filters = SearchFilters {
            document_type: request.document_type,
            document_id: request.document_id,
        };
        Ok(self.store.search(patient_id, &query, top_k, &filters).await?)
    }

    async fn start_extraction(
        &self,
        document_id: i64,
        provider: Option<RecognitionKind>,
    ) -> Result<ExtractionStarted, ManagementError> {
        let provider = provider.unwrap_or(self.config.recognition_provider);
        let extraction = extraction::trigger(&self.pool, &self.jobs, document_id, provider).await?;
        Ok(ExtractionStarted {
            document_id,
            extraction_id: extraction.id,
            status: extraction.status,
            provider,
        })
    }

    fn metrics(&self) -> MetricsReport {
        MetricsReport {
            pipeline: self.metrics.snapshot(),
            queue_depth: self.jobs.depth(),
        }
    }
}
