//! Document-focused OCR through the Google Vision API.

use super::{RecognitionError, TextRecognizer};
use crate::config::Config;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

const PROVIDER: &str = "Google Vision";

/// Recognizer backed by Google Vision text detection.
///
/// Dense medical scans go through `DOCUMENT_TEXT_DETECTION` first; when that
/// yields nothing, the classic `TEXT_DETECTION` annotations are tried before
/// concluding the image holds no text.
pub struct GoogleVisionRecognizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateResult {
    #[serde(default)]
    full_text_annotation: Option<FullTextAnnotation>,
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    #[serde(default)]
    error: Option<AnnotateError>,
}

#[derive(Deserialize)]
struct FullTextAnnotation {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct AnnotateError {
    #[serde(default)]
    message: Option<String>,
}

impl GoogleVisionRecognizer {
    /// Construct a recognizer, failing fast when the API key is absent.
    pub fn new(config: &Config) -> Result<Self, RecognitionError> {
        let api_key =
            config
                .google_vision_api_key
                .clone()
                .ok_or(RecognitionError::MissingCredential {
                    provider: PROVIDER,
                    env_var: "GOOGLE_VISION_API_KEY",
                })?;
        let client = reqwest::Client::builder()
            .user_agent("medkeep/0.2")
            .build()?;
        Ok(Self {
            client,
            base_url: config.google_vision_api_base.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn annotate(
        &self,
        image: &[u8],
        feature: &str,
    ) -> Result<AnnotateResult, RecognitionError> {
        let body = json!({
            "requests": [
                {
                    "image": { "content": STANDARD.encode(image) },
                    "features": [ { "type": feature } ]
                }
            ]
        });

        let response = self
            .client
            .post(format!("{}/v1/images:annotate", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
                return Err(RecognitionError::RateLimited {
                    provider: PROVIDER,
                    body,
                });
            }
            return Err(RecognitionError::RequestFailed {
                provider: PROVIDER,
                status,
                body,
            });
        }

        let mut payload: AnnotateResponse = response.json().await?;
        if payload.responses.is_empty() {
            return Err(RecognitionError::MalformedResponse(
                "annotate response carried no results".into(),
            ));
        }
        let result = payload.responses.remove(0);

        if let Some(error) = &result.error {
            let message = error.message.clone().unwrap_or_else(|| "unknown".into());
            if message.contains("RESOURCE_EXHAUSTED") || message.contains("quota") {
                return Err(RecognitionError::RateLimited {
                    provider: PROVIDER,
                    body: message,
                });
            }
            return Err(RecognitionError::RequestFailed {
                provider: PROVIDER,
                status,
                body: message,
            });
        }

        Ok(result)
    }
}

#[async_trait]
impl TextRecognizer for GoogleVisionRecognizer {
    fn method(&self) -> &'static str {
        "GOOGLE_OCR"
    }

    async fn recognize_image(
        &self,
        image: &[u8],
        _mime_type: &str,
    ) -> Result<String, RecognitionError> {
        let document = self.annotate(image, "DOCUMENT_TEXT_DETECTION").await?;
        if let Some(text) = document
            .full_text_annotation
            .and_then(|annotation| annotation.text)
        {
            if !text.trim().is_empty() {
                return Ok(text);
            }
        }

        // Sparse images sometimes carry only the classic annotations.
        let sparse = self.annotate(image, "TEXT_DETECTION").await?;
        Ok(sparse
            .text_annotations
            .into_iter()
            .next()
            .and_then(|annotation| annotation.description)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::tests::config_without_credentials;
    use httpmock::{Method::POST, MockServer};

    fn recognizer(base_url: &str) -> GoogleVisionRecognizer {
        let mut config = config_without_credentials();
        config.google_vision_api_key = Some("gv-key".into());
        config.google_vision_api_base = base_url.to_string();
        GoogleVisionRecognizer::new(&config).expect("recognizer")
    }

    #[tokio::test]
    async fn document_detection_text_wins() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/images:annotate")
                    .query_param("key", "gv-key")
                    .body_contains("DOCUMENT_TEXT_DETECTION");
                then.status(200).json_body(serde_json::json!({
                    "responses": [
                        { "fullTextAnnotation": { "text": "Prescription: amoxicillin 500mg" } }
                    ]
                }));
            })
            .await;

        let text = recognizer(&server.base_url())
            .recognize_image(b"png-bytes", "image/png")
            .await
            .expect("recognize");

        mock.assert();
        assert_eq!(text, "Prescription: amoxicillin 500mg");
    }

    #[tokio::test]
    async fn falls_back_to_sparse_annotations() {
        let server = MockServer::start_async().await;
        let dense = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/images:annotate")
                    .body_contains("DOCUMENT_TEXT_DETECTION");
                then.status(200)
                    .json_body(serde_json::json!({ "responses": [ {} ] }));
            })
            .await;
        let sparse = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/images:annotate")
                    .body_contains("\"TEXT_DETECTION\"");
                then.status(200).json_body(serde_json::json!({
                    "responses": [
                        { "textAnnotations": [ { "description": "BP 120/80" } ] }
                    ]
                }));
            })
            .await;

        let text = recognizer(&server.base_url())
            .recognize_image(b"png-bytes", "image/png")
            .await
            .expect("recognize");

        dense.assert();
        sparse.assert();
        assert_eq!(text, "BP 120/80");
    }

    #[tokio::test]
    async fn embedded_errors_surface_as_request_failures() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/images:annotate");
                then.status(200).json_body(serde_json::json!({
                    "responses": [ { "error": { "message": "invalid image payload" } } ]
                }));
            })
            .await;

        let error = recognizer(&server.base_url())
            .recognize_image(b"not-an-image", "image/png")
            .await
            .unwrap_err();
        assert!(matches!(error, RecognitionError::RequestFailed { .. }));
    }
}
