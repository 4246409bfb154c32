//! Vision-prompted transcription through the Gemini API.

use super::{RecognitionError, TextRecognizer, TRANSCRIPTION_PROMPT};
use crate::config::Config;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

const PROVIDER: &str = "Gemini Vision";
const MODEL: &str = "gemini-2.0-flash";

/// Recognizer backed by Gemini flash vision transcription.
pub struct GeminiVisionRecognizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiVisionRecognizer {
    /// Construct a recognizer, failing fast when the API key is absent.
    pub fn new(config: &Config) -> Result<Self, RecognitionError> {
        let api_key =
            config
                .gemini_api_key
                .clone()
                .ok_or(RecognitionError::MissingCredential {
                    provider: PROVIDER,
                    env_var: "GEMINI_API_KEY",
                })?;
        let client = reqwest::Client::builder()
            .user_agent("medkeep/0.2")
            .build()?;
        Ok(Self {
            client,
            base_url: config.gemini_api_base.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl TextRecognizer for GeminiVisionRecognizer {
    fn method(&self) -> &'static str {
        "GEMINI_OCR"
    }

    async fn recognize_image(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, RecognitionError> {
        let body = json!({
            "contents": [
                {
                    "parts": [
                        {
                            "inline_data": {
                                "mime_type": mime_type,
                                "data": STANDARD.encode(image)
                            }
                        },
                        { "text": TRANSCRIPTION_PROMPT }
                    ]
                }
            ]
        });

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{MODEL}:generateContent",
                self.base_url
            ))
            .header("x-goog-api-key", &self.api_key)
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

        let payload: GenerateResponse = response.json().await?;
        let text = payload
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::tests::config_without_credentials;
    use httpmock::{Method::POST, MockServer};

    fn recognizer(base_url: &str) -> GeminiVisionRecognizer {
        let mut config = config_without_credentials();
        config.gemini_api_key = Some("gm-key".into());
        config.gemini_api_base = base_url.to_string();
        GeminiVisionRecognizer::new(&config).expect("recognizer")
    }

    #[tokio::test]
    async fn joins_candidate_parts_into_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-2.0-flash:generateContent")
                    .header("x-goog-api-key", "gm-key")
                    .body_contains("inline_data");
                then.status(200).json_body(serde_json::json!({
                    "candidates": [
                        {
                            "content": {
                                "parts": [
                                    { "text": "Discharge summary " },
                                    { "text": "page 1" }
                                ]
                            }
                        }
                    ]
                }));
            })
            .await;

        let text = recognizer(&server.base_url())
            .recognize_image(b"png-bytes", "image/png")
            .await
            .expect("recognize");

        mock.assert();
        assert_eq!(text, "Discharge summary page 1");
    }

    #[tokio::test]
    async fn resource_exhaustion_maps_to_rate_limit() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-2.0-flash:generateContent");
                then.status(429)
                    .body("{\"error\":{\"status\":\"RESOURCE_EXHAUSTED\"}}");
            })
            .await;

        let error = recognizer(&server.base_url())
            .recognize_image(b"png-bytes", "image/png")
            .await
            .unwrap_err();
        assert!(error.is_rate_limited());
    }

    #[tokio::test]
    async fn missing_candidates_mean_empty_text() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-2.0-flash:generateContent");
                then.status(200).json_body(serde_json::json!({}));
            })
            .await;

        let text = recognizer(&server.base_url())
            .recognize_image(b"png-bytes", "image/png")
            .await
            .expect("recognize");
        assert_eq!(text, "");
    }
}
