use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the MedKeep service.
///
/// Constructed once in `main` and shared through an `Arc`; no part of the
/// pipeline reads the environment after startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string (pgvector extension required).
    pub database_url: String,
    /// API key for OpenAI (vision recognition and embeddings).
    pub openai_api_key: Option<String>,
    /// API key for Gemini vision recognition.
    pub gemini_api_key: Option<String>,
    /// API key for the Google Vision OCR endpoint.
    pub google_vision_api_key: Option<String>,
    /// Recognition provider used when a trigger does not name one.
    pub recognition_provider: RecognitionKind,
    /// Embedding backend used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Token budget per chunk window.
    pub chunk_size_tokens: usize,
    /// Token overlap carried between adjacent windows.
    pub chunk_overlap_tokens: usize,
    /// Maximum number of concurrently executing background jobs.
    pub job_workers: usize,
    /// Capacity of the background job queue; enqueues beyond it are rejected.
    pub job_queue_capacity: usize,
    /// Per-job execution deadline in seconds.
    pub job_timeout_seconds: u64,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Base URL for the OpenAI API (override for tests/proxies).
    pub openai_api_base: String,
    /// Base URL for the Gemini API.
    pub gemini_api_base: String,
    /// Base URL for the Google Vision API.
    pub google_vision_api_base: String,
}

/// Recognition providers selectable for an extraction run.
///
/// Exactly one provider runs per extraction; the variant is recorded on the
/// extraction row as its `extraction_method` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionKind {
    /// Vision-prompted transcription through the OpenAI chat API.
    OpenaiVision,
    /// Vision-prompted transcription through the Gemini API.
    GeminiVision,
    /// Document-focused OCR through the Google Vision API.
    GoogleVision,
    /// Local tesseract binary; no credential required.
    Tesseract,
}

impl RecognitionKind {
    /// Stable tag persisted as `extraction_method` on extraction rows.
    pub fn method_tag(self) -> &'static str {
        match self {
            Self::OpenaiVision => "OPENAI_OCR",
            Self::GeminiVision => "GEMINI_OCR",
            Self::GoogleVision => "GOOGLE_OCR",
            Self::Tesseract => "TESSERACT_OCR",
        }
    }
}

impl std::str::FromStr for RecognitionKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai_vision" | "openai" => Ok(Self::OpenaiVision),
            "gemini_vision" | "gemini" => Ok(Self::GeminiVision),
            "google_vision" | "google" => Ok(Self::GoogleVision),
            "tesseract" => Ok(Self::Tesseract),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for RecognitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::OpenaiVision => "openai_vision",
            Self::GeminiVision => "gemini_vision",
            Self::GoogleVision => "google_vision",
            Self::Tesseract => "tesseract",
        };
        f.write_str(name)
    }
}

/// Supported embedding backends for the indexing pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Hosted OpenAI embeddings API.
    OpenAi,
    /// Offline hash-based vectors for air-gapped deployments and tests.
    Deterministic,
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "deterministic" => Ok(Self::Deterministic),
            _ => Err(()),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let chunk_size_tokens = load_env_parsed("CHUNK_SIZE_TOKENS", 400)?;
        let chunk_overlap_tokens = load_env_parsed("CHUNK_OVERLAP_TOKENS", 50)?;
        if chunk_size_tokens == 0 || chunk_overlap_tokens >= chunk_size_tokens {
            return Err(ConfigError::InvalidValue(
                "CHUNK_OVERLAP_TOKENS must be smaller than CHUNK_SIZE_TOKENS".into(),
            ));
        }

        Ok(Self {
            database_url: load_env("DATABASE_URL")?,
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            gemini_api_key: load_env_optional("GEMINI_API_KEY"),
            google_vision_api_key: load_env_optional("GOOGLE_VISION_API_KEY"),
            recognition_provider: load_env_optional("RECOGNITION_PROVIDER")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("RECOGNITION_PROVIDER".into()))
                })
                .transpose()?
                .unwrap_or(RecognitionKind::OpenaiVision),
            embedding_provider: load_env_optional("EMBEDDING_PROVIDER")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".into()))
                })
                .transpose()?
                .unwrap_or(EmbeddingProvider::OpenAi),
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-large".into()),
            embedding_dimension: load_env_parsed("EMBEDDING_DIMENSION", 3072)?,
            chunk_size_tokens,
            chunk_overlap_tokens,
            job_workers: load_env_parsed("JOB_WORKERS", 4)?,
            job_queue_capacity: load_env_parsed("JOB_QUEUE_CAPACITY", 64)?,
            job_timeout_seconds: load_env_parsed("JOB_TIMEOUT_SECONDS", 300)?,
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
            openai_api_base: load_env_optional("OPENAI_API_BASE")
                .unwrap_or_else(|| "https://api.openai.com".into()),
            gemini_api_base: load_env_optional("GEMINI_API_BASE")
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".into()),
            google_vision_api_base: load_env_optional("GOOGLE_VISION_API_BASE")
                .unwrap_or_else(|| "https://vision.googleapis.com".into()),
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognition_kind_parses_aliases() {
        assert_eq!(
            "openai_vision".parse::<RecognitionKind>(),
            Ok(RecognitionKind::OpenaiVision)
        );
        assert_eq!(
            "gemini".parse::<RecognitionKind>(),
            Ok(RecognitionKind::GeminiVision)
        );
        assert_eq!(
            "GOOGLE_VISION".parse::<RecognitionKind>(),
            Ok(RecognitionKind::GoogleVision)
        );
        assert!("pytesseract".parse::<RecognitionKind>().is_err());
    }

    #[test]
    fn method_tags_are_stable() {
        assert_eq!(RecognitionKind::OpenaiVision.method_tag(), "OPENAI_OCR");
        assert_eq!(RecognitionKind::GeminiVision.method_tag(), "GEMINI_OCR");
        assert_eq!(RecognitionKind::GoogleVision.method_tag(), "GOOGLE_OCR");
        assert_eq!(RecognitionKind::Tesseract.method_tag(), "TESSERACT_OCR");
    }
}
