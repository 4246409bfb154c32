//! Idempotent schema setup executed at process start.
//!
//! The `documents` table is owned by the upload subsystem; it is created
//! here as well so the service can run against an empty database, but this
//! core only ever writes `status`/`processed_date` on it.

use sqlx::PgPool;

/// Apply the schema, creating anything that is missing.
///
/// `embedding_dimension` sizes the vector column; pgvector's approximate
/// index families (ivfflat, hnsw) cap at 2000 dimensions, so no similarity
/// index is created for the 3072-wide default; searches run as exact scans
/// scoped by patient, which is acceptable at per-patient collection sizes.
pub async fn run_migrations(pool: &PgPool, embedding_dimension: usize) -> Result<(), sqlx::Error> {
    let statements = [
        "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
        r#"
        DO $$ BEGIN
            CREATE TYPE document_status AS ENUM ('uploaded', 'processing', 'processed', 'failed');
        EXCEPTION WHEN duplicate_object THEN NULL;
        END $$
        "#
        .to_string(),
        r#"
        DO $$ BEGIN
            CREATE TYPE document_type AS ENUM (
                'lab_report', 'prescription', 'medical_record',
                'imaging_report', 'discharge_summary', 'other'
            );
        EXCEPTION WHEN duplicate_object THEN NULL;
        END $$
        "#
        .to_string(),
        r#"
        DO $$ BEGIN
            CREATE TYPE extraction_status AS ENUM ('pending', 'in_progress', 'completed', 'failed');
        EXCEPTION WHEN duplicate_object THEN NULL;
        END $$
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id BIGSERIAL PRIMARY KEY,
            patient_id BIGINT,
            clinic_id BIGINT,
            filename TEXT NOT NULL,
            original_filename TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_size BIGINT,
            mime_type TEXT,
            document_type document_type,
            status document_status NOT NULL DEFAULT 'uploaded',
            upload_date TIMESTAMPTZ DEFAULT now(),
            processed_date TIMESTAMPTZ,
            notes TEXT,
            created_at TIMESTAMPTZ DEFAULT now(),
            updated_at TIMESTAMPTZ
        )
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS extractions (
            id BIGSERIAL PRIMARY KEY,
            document_id BIGINT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            patient_id BIGINT,
            status extraction_status NOT NULL DEFAULT 'pending',
            extraction_method TEXT,
            raw_text TEXT,
            error_message TEXT,
            processing_time_seconds DOUBLE PRECISION,
            completed_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ DEFAULT now()
        )
        "#
        .to_string(),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS document_chunks (
                id BIGSERIAL PRIMARY KEY,
                patient_id BIGINT NOT NULL,
                document_id BIGINT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                extraction_id BIGINT REFERENCES extractions(id) ON DELETE SET NULL,
                chunk_text TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                chunk_start_token INTEGER,
                chunk_end_token INTEGER,
                total_tokens INTEGER,
                document_type TEXT,
                original_filename TEXT,
                upload_date TIMESTAMPTZ,
                extraction_method TEXT,
                embedding vector({embedding_dimension}) NOT NULL,
                created_at TIMESTAMPTZ DEFAULT now(),
                updated_at TIMESTAMPTZ
            )
            "#
        ),
        "CREATE INDEX IF NOT EXISTS idx_documents_patient_id ON documents (patient_id)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_extractions_document_id ON extractions (document_id)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_document_chunks_patient_id ON document_chunks (patient_id)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_document_chunks_document_id ON document_chunks (document_id)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_document_chunks_patient_document \
         ON document_chunks (patient_id, document_id)"
            .to_string(),
    ];

    for statement in statements {
        sqlx::query(&statement).execute(pool).await?;
    }
    tracing::debug!(embedding_dimension, "Schema ensured");
    Ok(())
}
