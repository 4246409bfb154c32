//! Row types and status enums shared across the extraction and indexing
//! pipeline. The `documents` table is owned by the external upload
//! subsystem; this core reads it and writes only `status`/`processed_date`.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of an uploaded document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, sqlx::Type, Serialize)]
#[sqlx(type_name = "document_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Stored on disk, not yet processed.
    Uploaded,
    /// An extraction job is running against it.
    Processing,
    /// At least one extraction completed successfully.
    Processed,
    /// The most recent extraction attempt failed.
    Failed,
}

/// Declared clinical category of a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, sqlx::Type, Serialize)]
#[sqlx(type_name = "document_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Laboratory result report.
    LabReport,
    /// Medication prescription.
    Prescription,
    /// General medical record.
    MedicalRecord,
    /// Radiology or imaging report.
    ImagingReport,
    /// Hospital discharge summary.
    DischargeSummary,
    /// Anything not covered by the categories above.
    Other,
}

impl DocumentType {
    /// Stable string form persisted on denormalized chunk metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LabReport => "lab_report",
            Self::Prescription => "prescription",
            Self::MedicalRecord => "medical_record",
            Self::ImagingReport => "imaging_report",
            Self::DischargeSummary => "discharge_summary",
            Self::Other => "other",
        }
    }
}

/// Lifecycle of a single text-recognition attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, sqlx::Type, Serialize)]
#[sqlx(type_name = "extraction_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Created by a trigger, not yet picked up by a worker.
    Pending,
    /// A worker is running the recognition provider.
    InProgress,
    /// Text recognized and stored in `raw_text`.
    Completed,
    /// Recognition failed; `error_message` carries the cause.
    Failed,
}

/// An uploaded file as seen by the processing pipeline.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Document {
    /// Primary key.
    pub id: i64,
    /// Owning patient; documents without one are never indexed.
    pub patient_id: Option<i64>,
    /// Clinic the upload belongs to, if any.
    pub clinic_id: Option<i64>,
    /// Stored filename on disk.
    pub filename: String,
    /// Filename as provided by the uploader.
    pub original_filename: String,
    /// Absolute path of the stored file.
    pub file_path: String,
    /// Size in bytes, when recorded by the upload subsystem.
    pub file_size: Option<i64>,
    /// Declared mime type of the upload.
    pub mime_type: Option<String>,
    /// Declared clinical category.
    pub document_type: Option<DocumentType>,
    /// Current lifecycle state.
    pub status: DocumentStatus,
    /// Upload timestamp.
    pub upload_date: Option<DateTime<Utc>>,
    /// Set when the document reaches the processed state.
    pub processed_date: Option<DateTime<Utc>>,
    /// Free-form uploader notes.
    pub notes: Option<String>,
    /// Row creation timestamp.
    pub created_at: Option<DateTime<Utc>>,
    /// Last row update timestamp.
    pub updated_at: Option<DateTime<Utc>>,
}

/// One text-recognition attempt against a document.
///
/// Rows are append-only history; only the most recent completed row with
/// non-empty text is authoritative for indexing.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Extraction {
    /// Primary key.
    pub id: i64,
    /// Document this attempt ran against.
    pub document_id: i64,
    /// Denormalized patient reference for access checks.
    pub patient_id: Option<i64>,
    /// Current lifecycle state.
    pub status: ExtractionStatus,
    /// Provider tag recorded when the job starts (e.g. `OPENAI_OCR`).
    pub extraction_method: Option<String>,
    /// Recognized text; null until the attempt completes.
    pub raw_text: Option<String>,
    /// Failure cause when the attempt ends in the failed state.
    pub error_message: Option<String>,
    /// Wall-clock duration of the attempt, recorded on both outcomes.
    pub processing_time_seconds: Option<f64>,
    /// Terminal-state timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Row creation timestamp.
    pub created_at: Option<DateTime<Utc>>,
}

/// Denormalized document metadata persisted on every chunk.
///
/// Written at indexing time; it is not a live join and can go stale if the
/// source document row changes afterwards. A reindex refreshes it.
#[derive(Debug, Clone, Default)]
pub struct ChunkSourceMeta {
    /// Extraction the chunk text came from; nulled if that row is removed.
    pub extraction_id: Option<i64>,
    /// Clinical category at indexing time.
    pub document_type: Option<String>,
    /// Uploader filename at indexing time.
    pub original_filename: Option<String>,
    /// Upload timestamp at indexing time.
    pub upload_date: Option<DateTime<Utc>>,
    /// Provider tag of the source extraction.
    pub extraction_method: Option<String>,
}

/// A ranked chunk returned by patient-scoped similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkMatch {
    /// Chunk row id.
    pub id: i64,
    /// Owning patient; always equals the queried patient.
    pub patient_id: i64,
    /// Source document.
    pub document_id: i64,
    /// Source extraction, when still present.
    pub extraction_id: Option<i64>,
    /// Chunk text content.
    pub chunk_text: String,
    /// Zero-based position within the document.
    pub chunk_index: i32,
    /// Token offset where the window starts.
    pub chunk_start_token: Option<i32>,
    /// Token offset where the window ends (clamped to the text length).
    pub chunk_end_token: Option<i32>,
    /// Number of tokens in the window.
    pub total_tokens: Option<i32>,
    /// Denormalized document category.
    pub document_type: Option<String>,
    /// Denormalized uploader filename.
    pub original_filename: Option<String>,
    /// Denormalized upload timestamp.
    pub upload_date: Option<DateTime<Utc>>,
    /// Denormalized provider tag.
    pub extraction_method: Option<String>,
    /// Cosine distance to the query vector, in `[0, 2]`.
    pub distance: f64,
    /// Normalized similarity `1 - distance / 2`, in `[0, 1]`.
    pub similarity: f64,
}

/// Aggregate view of a patient's vector collection.
#[derive(Debug, Clone, Serialize)]
pub struct PatientVectorStats {
    /// Patient the stats describe.
    pub patient_id: i64,
    /// Number of stored chunks.
    pub total_chunks: i64,
    /// Number of distinct documents with at least one chunk.
    pub total_documents: i64,
    /// Logical collection label (`patient_{id}_docs`).
    pub collection_name: String,
}
