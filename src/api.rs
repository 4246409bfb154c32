//! HTTP management surface.
//!
//! A compact Axum router exposing the operations the non-core system uses:
//!
//! - `GET  /vector/patients/{id}/stats` – chunk/document counts for a patient.
//! - `POST /vector/patients/{id}/reindex` – schedule a full collection rebuild.
//! - `POST /vector/documents/{id}/index` – schedule a single-document index,
//!   optionally force-clearing existing chunks first.
//! - `DELETE /vector/patients/{id}/vector-data` – delete all vector data.
//! - `POST /vector/patients/{id}/search-test` – ad-hoc ranked search for
//!   debugging retrieval without the full assistant pipeline.
//! - `POST /documents/{id}/extractions` – trigger text recognition.
//! - `GET  /metrics` – pipeline counters and queue depth.
//!
//! Scheduling endpoints return immediately; completion is observed through
//! the stats endpoint and document/extraction statuses.

use crate::config::RecognitionKind;
use crate::models::ChunkMatch;
use crate::service::{ManagementApi, ManagementError, SearchPreviewRequest};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Build the HTTP router exposing the management surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: ManagementApi + 'static,
{
    Router::new()
        .route("/vector/patients/:patient_id/stats", get(patient_stats::<S>))
        .route(
            "/vector/patients/:patient_id/reindex",
            post(reindex_patient::<S>),
        )
        .route(
            "/vector/documents/:document_id/index",
            post(index_document::<S>),
        )
        .route(
            "/vector/patients/:patient_id/vector-data",
            delete(delete_patient_vectors::<S>),
        )
        .route(
            "/vector/patients/:patient_id/search-test",
            post(search_test::<S>),
        )
        .route(
            "/documents/:document_id/extractions",
            post(trigger_extraction::<S>),
        )
        .route("/metrics", get(metrics::<S>))
        .with_state(service)
}

async fn patient_stats<S>(
    State(service): State<Arc<S>>,
    Path(patient_id): Path<i64>,
) -> Result<Json<crate::models::PatientVectorStats>, AppError>
where
    S: ManagementApi,
{
    Ok(Json(service.patient_stats(patient_id).await?))
}

/// Response body for `POST /vector/patients/{id}/reindex`.
#[derive(Serialize)]
struct ReindexResponse {
    patient_id: i64,
    total_documents: i64,
    job_id: String,
    message: &'static str,
}

async fn reindex_patient<S>(
    State(service): State<Arc<S>>,
    Path(patient_id): Path<i64>,
) -> Result<Json<ReindexResponse>, AppError>
where
    S: ManagementApi,
{
    let started = service.start_reindex(patient_id).await?;
    Ok(Json(ReindexResponse {
        patient_id: started.patient_id,
        total_documents: started.total_documents,
        job_id: started.job_id,
        message: "Reindexing started in background; check the stats endpoint for progress.",
    }))
}

/// Request body for `POST /vector/documents/{id}/index`.
#[derive(Deserialize, Default)]
struct IndexDocumentRequest {
    #[serde(default)]
    force_reindex: bool,
}

/// Response body for `POST /vector/documents/{id}/index`.
#[derive(Serialize)]
struct IndexDocumentResponse {
    document_id: i64,
    patient_id: i64,
    force_reindex: bool,
    job_id: String,
    message: &'static str,
}

async fn index_document<S>(
    State(service): State<Arc<S>>,
    Path(document_id): Path<i64>,
    Json(request): Json<IndexDocumentRequest>,
) -> Result<Json<IndexDocumentResponse>, AppError>
where
    S: ManagementApi,
{
    let started = service
        .start_document_index(document_id, request.force_reindex)
        .await?;
    Ok(Json(IndexDocumentResponse {
        document_id: started.document_id,
        patient_id: started.patient_id,
        force_reindex: started.force_reindex,
        job_id: started.job_id,
        message: "Document indexing started in background.",
    }))
}

/// Response body for `DELETE /vector/patients/{id}/vector-data`.
#[derive(Serialize)]
struct DeleteVectorsResponse {
    patient_id: i64,
    deleted_chunks: u64,
    message: &'static str,
}

async fn delete_patient_vectors<S>(
    State(service): State<Arc<S>>,
    Path(patient_id): Path<i64>,
) -> Result<Json<DeleteVectorsResponse>, AppError>
where
    S: ManagementApi,
{
    let deleted_chunks = service.delete_patient_vectors(patient_id).await?;
    Ok(Json(DeleteVectorsResponse {
        patient_id,
        deleted_chunks,
        message: "Vector data deleted; reindex to restore.",
    }))
}

/// Request body for `POST /vector/patients/{id}/search-test`.
#[derive(Deserialize)]
struct SearchTestRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    document_type: Option<String>,
    #[serde(default)]
    document_id: Option<i64>,
}

/// Response body for `POST /vector/patients/{id}/search-test`.
#[derive(Serialize)]
struct SearchTestResponse {
    patient_id: i64,
    query: String,
    results_count: usize,
    chunks: Vec<ChunkMatch>,
}

async fn search_test<S>(
    State(service): State<Arc<S>>,
    Path(patient_id): Path<i64>,
    Json(request): Json<SearchTestRequest>,
) -> Result<Json<SearchTestResponse>, AppError>
where
    S: ManagementApi,
{
    let query = request.query.clone();
    let chunks = service
        .search_preview(
            patient_id,
            SearchPreviewRequest {
                query: request.query,
                top_k: request.top_k,
                document_type: request.document_type,
                document_id: request.document_id,
            },
        )
        .await?;
    Ok(Json(SearchTestResponse {
        patient_id,
        query,
        results_count: chunks.len(),
        chunks,
    }))
}

/// Request body for `POST /documents/{id}/extractions`.
#[derive(Deserialize, Default)]
struct TriggerExtractionRequest {
    #[serde(default)]
    provider: Option<RecognitionKind>,
}

async fn trigger_extraction<S>(
    State(service): State<Arc<S>>,
    Path(document_id): Path<i64>,
    Json(request): Json<TriggerExtractionRequest>,
) -> Result<(StatusCode, Json<crate::service::ExtractionStarted>), AppError>
where
    S: ManagementApi,
{
    let started = service
        .start_extraction(document_id, request.provider)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

async fn metrics<S>(State(service): State<Arc<S>>) -> Json<crate::service::MetricsReport>
where
    S: ManagementApi,
{
    Json(service.metrics())
}

struct AppError(ManagementError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ManagementError::NotFound(_) => StatusCode::NOT_FOUND,
            ManagementError::Invalid(_) => StatusCode::BAD_REQUEST,
            ManagementError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            ManagementError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

impl From<ManagementError> for AppError {
    fn from(inner: ManagementError) -> Self {
        Self(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::create_router;
    use crate::config::RecognitionKind;
    use crate::metrics::MetricsSnapshot;
    use crate::models::{ChunkMatch, ExtractionStatus, PatientVectorStats};
    use crate::service::{
        ExtractionStarted, IndexStarted, ManagementApi, ManagementError, MetricsReport,
        ReindexStarted, SearchPreviewRequest,
    };
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
    };
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct StubService {
        queue_full: bool,
        search_calls: Mutex<Vec<(i64, String, Option<usize>)>>,
    }

    #[async_trait]
    impl ManagementApi for StubService {
        async fn patient_stats(
            &self,
            patient_id: i64,
        ) -> Result<PatientVectorStats, ManagementError> {
            if patient_id == 404 {
                return Err(ManagementError::NotFound("patient 404 not found".into()));
            }
            Ok(PatientVectorStats {
                patient_id,
                total_chunks: 12,
                total_documents: 3,
                collection_name: format!("patient_{patient_id}_docs"),
            })
        }

        async fn start_reindex(&self, patient_id: i64) -> Result<ReindexStarted, ManagementError> {
            if self.queue_full {
                return Err(ManagementError::Busy("job queue is full (capacity 1)".into()));
            }
            Ok(ReindexStarted {
                patient_id,
                total_documents: 7,
                job_id: "job-1".into(),
            })
        }

        async fn start_document_index(
            &self,
            document_id: i64,
            force: bool,
        ) -> Result<IndexStarted, ManagementError> {
            Ok(IndexStarted {
                document_id,
                patient_id: 5,
                force_reindex: force,
                job_id: "job-2".into(),
            })
        }

        async fn delete_patient_vectors(&self, _patient_id: i64) -> Result<u64, ManagementError> {
            Ok(3)
        }

        async fn search_preview(
            &self,
            patient_id: i64,
            request: SearchPreviewRequest,
        ) -> Result<Vec<ChunkMatch>, ManagementError> {
            self.search_calls
                .lock()
                .await
                .push((patient_id, request.query.clone(), request.top_k));
            Ok(vec![ChunkMatch {
                id: 1,
                patient_id,
                document_id: 9,
                extraction_id: Some(2),
                chunk_text: "blood pressure stable".into(),
                chunk_index: 0,
                chunk_start_token: Some(0),
                chunk_end_token: Some(4),
                total_tokens: Some(4),
                document_type: Some("lab_report".into()),
                original_filename: Some("labs.pdf".into()),
                upload_date: None,
                extraction_method: Some("OPENAI_OCR".into()),
                distance: 0.4,
                similarity: 0.8,
            }])
        }

        async fn start_extraction(
            &self,
            document_id: i64,
            provider: Option<RecognitionKind>,
        ) -> Result<ExtractionStarted, ManagementError> {
            Ok(ExtractionStarted {
                document_id,
                extraction_id: 77,
                status: ExtractionStatus::Pending,
                provider: provider.unwrap_or(RecognitionKind::OpenaiVision),
            })
        }

        fn metrics(&self) -> MetricsReport {
            MetricsReport {
                pipeline: MetricsSnapshot {
                    extractions_completed: 1,
                    extractions_failed: 0,
                    documents_indexed: 2,
                    chunks_indexed: 9,
                },
                queue_depth: 4,
            }
        }
    }

    async fn send(
        service: Arc<StubService>,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let app = create_router(service);
        let mut builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string())),
            None => {
                builder = builder.header("content-type", "application/json");
                builder.body(Body::empty())
            }
        }
        .expect("request");

        let response = app.oneshot(request).await.expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::String(
                String::from_utf8_lossy(&bytes).to_string(),
            ))
        };
        (status, value)
    }

    #[tokio::test]
    async fn stats_route_reports_counts() {
        let (status, body) = send(
            Arc::new(StubService::default()),
            Method::GET,
            "/vector/patients/5/stats",
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["patient_id"], 5);
        assert_eq!(body["total_chunks"], 12);
        assert_eq!(body["collection_name"], "patient_5_docs");
    }

    #[tokio::test]
    async fn missing_patient_maps_to_not_found() {
        let (status, _) = send(
            Arc::new(StubService::default()),
            Method::GET,
            "/vector/patients/404/stats",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reindex_acknowledges_background_start() {
        let (status, body) = send(
            Arc::new(StubService::default()),
            Method::POST,
            "/vector/patients/5/reindex",
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_documents"], 7);
        assert_eq!(body["job_id"], "job-1");
    }

    #[tokio::test]
    async fn full_queue_maps_to_service_unavailable() {
        let service = Arc::new(StubService {
            queue_full: true,
            ..StubService::default()
        });
        let (status, _) = send(service, Method::POST, "/vector/patients/5/reindex", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn index_route_passes_the_force_flag() {
        let (status, body) = send(
            Arc::new(StubService::default()),
            Method::POST,
            "/vector/documents/9/index",
            Some(json!({ "force_reindex": true })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["document_id"], 9);
        assert_eq!(body["force_reindex"], true);
    }

    #[tokio::test]
    async fn search_test_route_forwards_query_and_limit() {
        let service = Arc::new(StubService::default());
        let (status, body) = send(
            service.clone(),
            Method::POST,
            "/vector/patients/5/search-test",
            Some(json!({ "query": "hypertension", "top_k": 3 })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results_count"], 1);
        assert_eq!(body["chunks"][0]["similarity"], 0.8);

        let calls = service.search_calls.lock().await;
        assert_eq!(calls.as_slice(), &[(5, "hypertension".to_string(), Some(3))]);
    }

    #[tokio::test]
    async fn extraction_trigger_returns_accepted() {
        let (status, body) = send(
            Arc::new(StubService::default()),
            Method::POST,
            "/documents/3/extractions",
            Some(json!({ "provider": "gemini_vision" })),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["extraction_id"], 77);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["provider"], "gemini_vision");
    }

    #[tokio::test]
    async fn metrics_route_includes_queue_depth() {
        let (status, body) = send(
            Arc::new(StubService::default()),
            Method::GET,
            "/metrics",
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chunks_indexed"], 9);
        assert_eq!(body["queue_depth"], 4);
    }
}
