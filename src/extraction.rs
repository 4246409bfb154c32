//! Extraction job state machine.
//!
//! One extraction attempt moves `Pending → InProgress → {Completed, Failed}`
//! and the owning document moves in lockstep (`Processing` on trigger,
//! `Processed`/`Failed` on the outcome). There is no automatic retry:
//! re-triggering creates a brand-new extraction row, so attempt history is
//! preserved and repeated triggers never corrupt prior data.

use crate::config::RecognitionKind;
use crate::jobs::{EnqueueError, Job, JobContext, JobQueue};
use crate::models::{Document, DocumentStatus, Extraction};
use crate::recognition::{self, RecognitionError};
use crate::store::documents;
use sqlx::PgPool;
use std::time::Instant;
use thiserror::Error;

/// Errors raised while triggering recognition.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// The referenced document does not exist.
    #[error("document {0} not found")]
    DocumentNotFound(i64),
    /// The job queue rejected the work.
    #[error(transparent)]
    Queue(#[from] EnqueueError),
    /// Creating or updating rows failed.
    #[error("database operation failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Start recognition for a document and return without waiting for it.
///
/// Creates the pending extraction row, flips the document to processing,
/// and schedules the job. The queue slot is reserved before anything is
/// persisted, so a full queue rejects the trigger without leaving a
/// dangling pending row behind.
pub async fn trigger(
    pool: &PgPool,
    jobs: &JobQueue,
    document_id: i64,
    provider: RecognitionKind,
) -> Result<Extraction, TriggerError> {
    let document = documents::fetch_document(pool, document_id)
        .await?
        .ok_or(TriggerError::DocumentNotFound(document_id))?;

    let slot = jobs.reserve()?;

    let extraction =
        documents::create_pending_extraction(pool, document.id, document.patient_id).await?;
    documents::set_document_status(pool, document.id, DocumentStatus::Processing).await?;

    let job_id = slot.commit(Job::Extract {
        document_id: document.id,
        extraction_id: extraction.id,
        provider,
    });
    tracing::info!(
        document_id = document.id,
        extraction_id = extraction.id,
        provider = %provider,
        job_id = %job_id,
        "Recognition scheduled"
    );
    Ok(extraction)
}

/// Job body: run the recognition provider and record the outcome.
///
/// Every failure is caught here and written to the extraction/document rows;
/// nothing escapes the job boundary.
pub async fn run(
    ctx: &JobContext,
    document_id: i64,
    extraction_id: i64,
    provider: RecognitionKind,
) {
    let started = Instant::now();

    let document = match documents::fetch_document(&ctx.pool, document_id).await {
        Ok(Some(document)) => document,
        Ok(None) => {
            tracing::warn!(document_id, extraction_id, "Document vanished before recognition");
            return;
        }
        Err(error) => {
            tracing::error!(document_id, error = %error, "Failed to load document for recognition");
            return;
        }
    };

    if let Err(error) =
        documents::mark_extraction_in_progress(&ctx.pool, extraction_id, provider.method_tag())
            .await
    {
        tracing::error!(extraction_id, error = %error, "Failed to mark extraction in progress");
        return;
    }

    let outcome = recognize(ctx, &document, provider).await;
    let elapsed = started.elapsed().as_secs_f64();

    match outcome {
        Ok(text) => {
            if let Err(error) = record_success(ctx, &document, extraction_id, &text, elapsed).await
            {
                tracing::error!(
                    document_id,
                    extraction_id,
                    error = %error,
                    "Failed to persist recognition result"
                );
                return;
            }
            ctx.metrics.record_extraction_completed();
            tracing::info!(
                document_id,
                extraction_id,
                length = text.len(),
                processing_time_seconds = elapsed,
                preview = %preview(&text),
                "Recognition completed"
            );
        }
        Err(error) => {
            if error.is_rate_limited() {
                tracing::warn!(
                    document_id,
                    extraction_id,
                    "Recognition hit the provider rate limit; wait before re-triggering or check API billing"
                );
            }
            tracing::error!(document_id, extraction_id, error = %error, "Recognition failed");
            record_failure(ctx, document_id, extraction_id, &error.to_string(), elapsed).await;
            ctx.metrics.record_extraction_failed();
        }
    }
}

/// Mark a cancelled job's rows as failed so the timeout is observable.
pub async fn record_timeout(ctx: &JobContext, document_id: i64, extraction_id: i64) {
    let message = format!(
        "recognition exceeded the {}s job deadline and was cancelled",
        ctx.config.job_timeout_seconds
    );
    record_failure(
        ctx,
        document_id,
        extraction_id,
        &message,
        ctx.config.job_timeout_seconds as f64,
    )
    .await;
    ctx.metrics.record_extraction_failed();
}

async fn recognize(
    ctx: &JobContext,
    document: &Document,
    provider: RecognitionKind,
) -> Result<String, RecognitionError> {
    let recognizer = recognition::recognizer_for(provider, &ctx.config)?;
    let content = tokio::fs::read(&document.file_path).await?;
    recognition::extract(recognizer.as_ref(), &content, document.mime_type.as_deref()).await
}

async fn record_success(
    ctx: &JobContext,
    document: &Document,
    extraction_id: i64,
    text: &str,
    elapsed: f64,
) -> Result<(), sqlx::Error> {
    documents::mark_extraction_completed(&ctx.pool, extraction_id, text, elapsed).await?;
    documents::mark_document_processed(&ctx.pool, document.id).await
}

async fn record_failure(
    ctx: &JobContext,
    document_id: i64,
    extraction_id: i64,
    message: &str,
    elapsed: f64,
) {
    if let Err(error) =
        documents::mark_extraction_failed(&ctx.pool, extraction_id, message, elapsed).await
    {
        tracing::error!(extraction_id, error = %error, "Failed to record extraction failure");
    }
    if let Err(error) =
        documents::set_document_status(&ctx.pool, document_id, DocumentStatus::Failed).await
    {
        tracing::error!(document_id, error = %error, "Failed to record document failure");
    }
}

/// Length-bounded single-line preview of recognized text for the logs.
fn preview(text: &str) -> String {
    const PREVIEW_CHARS: usize = 200;
    let mut shortened: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        shortened.push_str("...");
    }
    shortened.replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_and_flattens() {
        let text = format!("line one\nline two\n{}", "x".repeat(400));
        let rendered = preview(&text);
        assert!(rendered.len() <= 203 + 2);
        assert!(rendered.ends_with("..."));
        assert!(!rendered.contains('\n'));

        assert_eq!(preview("short"), "short");
    }
}
