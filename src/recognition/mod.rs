//! Text recognition provider strategy.
//!
//! Every provider implements the same capability: turn the bytes of a stored
//! document into text. Selection is explicit: the extraction trigger names a
//! [`crate::config::RecognitionKind`] (defaulting to the configured one) and
//! exactly one provider runs. Providers with a credential fail fast at
//! construction when it is absent, before any network traffic.
//!
//! PDF input is rasterized page-by-page and each page is recognized
//! independently; non-empty page texts are joined with a blank line.

mod gemini;
mod google;
mod openai;
mod pdf;
mod tesseract;

pub use gemini::GeminiVisionRecognizer;
pub use google::GoogleVisionRecognizer;
pub use openai::OpenAiVisionRecognizer;
pub use tesseract::TesseractRecognizer;

use crate::config::{Config, RecognitionKind};
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

/// Instruction sent to the vision-prompted transcription providers.
pub(crate) const TRANSCRIPTION_PROMPT: &str = "Extract all text from this image exactly as it \
appears. Preserve layout and line breaks where relevant. If there is no text, respond with an \
empty string.";

/// Errors raised while recognizing text from a document.
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// Provider credential is absent; raised before any network call.
    #[error("{provider} credential is not configured: set {env_var}")]
    MissingCredential {
        /// Human-readable provider name.
        provider: &'static str,
        /// Environment variable that must carry the credential.
        env_var: &'static str,
    },
    /// The input cannot be recognized by any provider.
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),
    /// PDF pages could not be converted to images.
    #[error("PDF page conversion failed: {0}")]
    PdfConversion(String),
    /// Provider signalled that the request quota is exhausted.
    #[error("{provider} rate limit exceeded: {body}")]
    RateLimited {
        /// Human-readable provider name.
        provider: &'static str,
        /// Diagnostic payload returned with the rate-limit signal.
        body: String,
    },
    /// Provider responded with a non-success status.
    #[error("{provider} request failed with status {status}: {body}")]
    RequestFailed {
        /// Human-readable provider name.
        provider: &'static str,
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Reading the stored file or a temporary artifact failed.
    #[error("I/O failure during recognition: {0}")]
    Io(#[from] std::io::Error),
    /// Provider response could not be interpreted.
    #[error("malformed recognition response: {0}")]
    MalformedResponse(String),
    /// A required external binary is not installed.
    #[error("required external tool '{tool}' is unavailable: {detail}")]
    ToolUnavailable {
        /// Name of the missing binary.
        tool: &'static str,
        /// Spawn failure detail.
        detail: String,
    },
    /// A local external binary ran but did not produce text.
    #[error("local recognition failed: {0}")]
    ToolFailed(String),
}

impl RecognitionError {
    /// Whether this failure is a quota/rate-limit signal worth backing off on.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Uniform text-extraction capability implemented by every provider.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Stable method tag recorded on the extraction row.
    fn method(&self) -> &'static str;

    /// Recognize text in a single raster image.
    async fn recognize_image(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, RecognitionError>;
}

/// Build the recognizer for `kind`, checking its credential up front.
pub fn recognizer_for(
    kind: RecognitionKind,
    config: &Config,
) -> Result<Box<dyn TextRecognizer>, RecognitionError> {
    match kind {
        RecognitionKind::OpenaiVision => Ok(Box::new(OpenAiVisionRecognizer::new(config)?)),
        RecognitionKind::GeminiVision => Ok(Box::new(GeminiVisionRecognizer::new(config)?)),
        RecognitionKind::GoogleVision => Ok(Box::new(GoogleVisionRecognizer::new(config)?)),
        RecognitionKind::Tesseract => Ok(Box::new(TesseractRecognizer::new())),
    }
}

/// Recognize a stored document, dispatching on its mime type.
///
/// PDFs are rasterized to one PNG per page and recognized page by page;
/// empty pages are skipped and the rest are concatenated with a blank-line
/// separator. Everything else is treated as a single image.
pub async fn extract(
    recognizer: &dyn TextRecognizer,
    content: &[u8],
    mime_hint: Option<&str>,
) -> Result<String, RecognitionError> {
    if is_pdf(mime_hint) {
        let pages = pdf::rasterize_pages(content).await?;
        if pages.is_empty() {
            return Ok(String::new());
        }

        let mut page_texts = Vec::with_capacity(pages.len());
        for (number, page) in pages.iter().enumerate() {
            let text = recognizer.recognize_image(page, "image/png").await?;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                tracing::debug!(page = number + 1, "Skipping page without recognizable text");
                continue;
            }
            page_texts.push(trimmed.to_string());
        }
        return Ok(page_texts.join("\n\n"));
    }

    let mime = normalize_image_mime(mime_hint);
    if !mime.starts_with("image/") {
        return Err(RecognitionError::UnsupportedInput(format!(
            "mime type '{mime}' is neither an image nor a PDF"
        )));
    }
    recognizer.recognize_image(content, &mime).await
}

fn is_pdf(mime_hint: Option<&str>) -> bool {
    mime_hint
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/pdf"))
        .unwrap_or(false)
}

/// Normalize image mime hints; `image/jpg` is folded into `image/jpeg` and a
/// missing hint defaults to PNG.
fn normalize_image_mime(mime_hint: Option<&str>) -> String {
    let mime = mime_hint.unwrap_or("image/png").trim().to_lowercase();
    if mime == "image/jpg" {
        "image/jpeg".to_string()
    } else {
        mime
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{EmbeddingProvider, RecognitionKind};

    pub(crate) fn config_without_credentials() -> Config {
        Config {
            database_url: "postgres://localhost/medkeep".into(),
            openai_api_key: None,
            gemini_api_key: None,
            google_vision_api_key: None,
            recognition_provider: RecognitionKind::OpenaiVision,
            embedding_provider: EmbeddingProvider::Deterministic,
            embedding_model: "text-embedding-3-large".into(),
            embedding_dimension: 3072,
            chunk_size_tokens: 400,
            chunk_overlap_tokens: 50,
            job_workers: 2,
            job_queue_capacity: 8,
            job_timeout_seconds: 30,
            server_port: None,
            openai_api_base: "https://api.openai.com".into(),
            gemini_api_base: "https://generativelanguage.googleapis.com".into(),
            google_vision_api_base: "https://vision.googleapis.com".into(),
        }
    }

    #[test]
    fn credentialed_providers_fail_fast_without_keys() {
        let config = config_without_credentials();

        for kind in [
            RecognitionKind::OpenaiVision,
            RecognitionKind::GeminiVision,
            RecognitionKind::GoogleVision,
        ] {
            let error = recognizer_for(kind, &config).err().expect("missing key");
            assert!(
                matches!(error, RecognitionError::MissingCredential { .. }),
                "{kind} should require a credential"
            );
        }
    }

    #[test]
    fn tesseract_needs_no_credential() {
        let config = config_without_credentials();
        let recognizer =
            recognizer_for(RecognitionKind::Tesseract, &config).expect("local recognizer");
        assert_eq!(recognizer.method(), "TESSERACT_OCR");
    }

    #[test]
    fn pdf_detection_uses_the_mime_hint() {
        assert!(is_pdf(Some("application/pdf")));
        assert!(is_pdf(Some(" Application/PDF ")));
        assert!(!is_pdf(Some("image/png")));
        assert!(!is_pdf(None));
    }

    #[test]
    fn image_mime_is_normalized() {
        assert_eq!(normalize_image_mime(Some("image/jpg")), "image/jpeg");
        assert_eq!(normalize_image_mime(Some("IMAGE/JPEG")), "image/jpeg");
        assert_eq!(normalize_image_mime(None), "image/png");
    }

    #[tokio::test]
    async fn non_image_mime_is_rejected_before_any_provider_call() {
        struct PanickingRecognizer;

        #[async_trait]
        impl TextRecognizer for PanickingRecognizer {
            fn method(&self) -> &'static str {
                "TEST"
            }

            async fn recognize_image(
                &self,
                _image: &[u8],
                _mime_type: &str,
            ) -> Result<String, RecognitionError> {
                panic!("recognizer must not be reached for unsupported input");
            }
        }

        let error = extract(&PanickingRecognizer, b"plain text", Some("text/plain"))
            .await
            .unwrap_err();
        assert!(matches!(error, RecognitionError::UnsupportedInput(_)));
    }
}
