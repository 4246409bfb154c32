//! Repository over the `documents` and `extractions` tables.
//!
//! Documents are owned by the upload subsystem: this core reads them and
//! writes only lifecycle fields. Extraction rows are append-only attempt
//! history mutated exclusively by the job that owns them.

use crate::models::{Document, DocumentStatus, Extraction, ExtractionStatus};
use sqlx::PgPool;

const DOCUMENT_COLUMNS: &str = "id, patient_id, clinic_id, filename, original_filename, \
file_path, file_size, mime_type, document_type, status, upload_date, processed_date, notes, \
created_at, updated_at";

const EXTRACTION_COLUMNS: &str = "id, document_id, patient_id, status, extraction_method, \
raw_text, error_message, processing_time_seconds, completed_at, created_at";

/// Load one document by id.
pub async fn fetch_document(
    pool: &PgPool,
    document_id: i64,
) -> Result<Option<Document>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1"
    ))
    .bind(document_id)
    .fetch_optional(pool)
    .await
}

/// Load every document belonging to a patient, oldest upload first.
pub async fn documents_for_patient(
    pool: &PgPool,
    patient_id: i64,
) -> Result<Vec<Document>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE patient_id = $1 ORDER BY upload_date, id"
    ))
    .bind(patient_id)
    .fetch_all(pool)
    .await
}

/// Count the documents currently attached to a patient.
pub async fn count_documents_for_patient(
    pool: &PgPool,
    patient_id: i64,
) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM documents WHERE patient_id = $1")
            .bind(patient_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

/// Load one extraction by id.
pub async fn fetch_extraction(
    pool: &PgPool,
    extraction_id: i64,
) -> Result<Option<Extraction>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {EXTRACTION_COLUMNS} FROM extractions WHERE id = $1"
    ))
    .bind(extraction_id)
    .fetch_optional(pool)
    .await
}

/// The most recent completed extraction with recognized text for a document.
///
/// This row is the authoritative source for indexing; earlier attempts stay
/// around as history and are never consulted.
pub async fn latest_completed_extraction(
    pool: &PgPool,
    document_id: i64,
) -> Result<Option<Extraction>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {EXTRACTION_COLUMNS} FROM extractions \
         WHERE document_id = $1 AND status = $2 AND raw_text IS NOT NULL \
         ORDER BY completed_at DESC NULLS LAST, id DESC LIMIT 1"
    ))
    .bind(document_id)
    .bind(ExtractionStatus::Completed)
    .fetch_optional(pool)
    .await
}

/// Create a new pending extraction attempt for a document.
pub async fn create_pending_extraction(
    pool: &PgPool,
    document_id: i64,
    patient_id: Option<i64>,
) -> Result<Extraction, sqlx::Error> {
    sqlx::query_as(&format!(
        "INSERT INTO extractions (document_id, patient_id, status) VALUES ($1, $2, $3) \
         RETURNING {EXTRACTION_COLUMNS}"
    ))
    .bind(document_id)
    .bind(patient_id)
    .bind(ExtractionStatus::Pending)
    .fetch_one(pool)
    .await
}

/// Update a document's lifecycle state.
pub async fn set_document_status(
    pool: &PgPool,
    document_id: i64,
    status: DocumentStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE documents SET status = $2, updated_at = now() WHERE id = $1")
        .bind(document_id)
        .bind(status)
        .execute(pool)
        .await?;
    Ok(())
}

/// Flip a document to processed and stamp `processed_date`.
pub async fn mark_document_processed(pool: &PgPool, document_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE documents SET status = $2, processed_date = now(), updated_at = now() \
         WHERE id = $1",
    )
    .bind(document_id)
    .bind(DocumentStatus::Processed)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record that a worker picked the extraction up and which provider runs it.
pub async fn mark_extraction_in_progress(
    pool: &PgPool,
    extraction_id: i64,
    method: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE extractions SET status = $2, extraction_method = $3 WHERE id = $1")
        .bind(extraction_id)
        .bind(ExtractionStatus::InProgress)
        .bind(method)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a successful recognition run.
pub async fn mark_extraction_completed(
    pool: &PgPool,
    extraction_id: i64,
    raw_text: &str,
    processing_time_seconds: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE extractions SET status = $2, raw_text = $3, processing_time_seconds = $4, \
         completed_at = now() WHERE id = $1",
    )
    .bind(extraction_id)
    .bind(ExtractionStatus::Completed)
    .bind(raw_text)
    .bind(processing_time_seconds)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failed recognition run; the elapsed time is still kept.
pub async fn mark_extraction_failed(
    pool: &PgPool,
    extraction_id: i64,
    error_message: &str,
    processing_time_seconds: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE extractions SET status = $2, error_message = $3, processing_time_seconds = $4, \
         completed_at = now() WHERE id = $1",
    )
    .bind(extraction_id)
    .bind(ExtractionStatus::Failed)
    .bind(error_message)
    .bind(processing_time_seconds)
    .execute(pool)
    .await?;
    Ok(())
}
