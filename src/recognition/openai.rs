//! Vision-prompted transcription through the OpenAI chat API.

use super::{RecognitionError, TextRecognizer, TRANSCRIPTION_PROMPT};
use crate::config::Config;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

const PROVIDER: &str = "OpenAI Vision";
const MODEL: &str = "gpt-4o-mini";

/// Recognizer backed by `gpt-4o-mini` vision transcription.
pub struct OpenAiVisionRecognizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiVisionRecognizer {
    /// Construct a recognizer, failing fast when the API key is absent.
    pub fn new(config: &Config) -> Result<Self, RecognitionError> {
        let api_key =
            config
                .openai_api_key
                .clone()
                .ok_or(RecognitionError::MissingCredential {
                    provider: PROVIDER,
                    env_var: "OPENAI_API_KEY",
                })?;
        let client = reqwest::Client::builder()
            .user_agent("medkeep/0.2")
            .build()?;
        Ok(Self {
            client,
            base_url: config.openai_api_base.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl TextRecognizer for OpenAiVisionRecognizer {
    fn method(&self) -> &'static str {
        "OPENAI_OCR"
    }

    async fn recognize_image(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, RecognitionError> {
        let encoded = STANDARD.encode(image);
        let body = json!({
            "model": MODEL,
            "messages": [
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": TRANSCRIPTION_PROMPT },
                        {
                            "type": "image_url",
                            "image_url": { "url": format!("data:{mime_type};base64,{encoded}") }
                        }
                    ]
                }
            ],
            "max_tokens": 4096,
            "temperature": 0.0
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(RecognitionError::RateLimited {
                provider: PROVIDER,
                body,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecognitionError::RequestFailed {
                provider: PROVIDER,
                status,
                body,
            });
        }

        let payload: ChatResponse = response.json().await?;
        let text = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::tests::config_without_credentials;
    use httpmock::{Method::POST, MockServer};

    fn recognizer(base_url: &str) -> OpenAiVisionRecognizer {
        let mut config = config_without_credentials();
        config.openai_api_key = Some("test-key".into());
        config.openai_api_base = base_url.to_string();
        OpenAiVisionRecognizer::new(&config).expect("recognizer")
    }

    #[tokio::test]
    async fn parses_transcribed_text_from_first_choice() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer test-key")
                    .body_contains("image_url");
                then.status(200).json_body(serde_json::json!({
                    "choices": [
                        { "message": { "content": "  Lab result: glucose 5.4 mmol/L\n" } }
                    ]
                }));
            })
            .await;

        let text = recognizer(&server.base_url())
            .recognize_image(b"png-bytes", "image/png")
            .await
            .expect("recognize");

        mock.assert();
        assert_eq!(text, "Lab result: glucose 5.4 mmol/L");
    }

    #[tokio::test]
    async fn empty_choices_mean_empty_text() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(serde_json::json!({ "choices": [] }));
            })
            .await;

        let text = recognizer(&server.base_url())
            .recognize_image(b"png-bytes", "image/png")
            .await
            .expect("recognize");
        assert_eq!(text, "");
    }

    #[tokio::test]
    async fn quota_exhaustion_is_a_distinct_error_kind() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(429).body("rate_limit_exceeded");
            })
            .await;

        let error = recognizer(&server.base_url())
            .recognize_image(b"png-bytes", "image/png")
            .await
            .unwrap_err();
        assert!(error.is_rate_limited());
    }
}
