//! Local fallback recognition via the `tesseract` binary.

use super::{RecognitionError, TextRecognizer};
use async_trait::async_trait;
use std::io::Write;
use tokio::process::Command;

/// Recognizer shelling out to a locally installed tesseract.
///
/// Requires no credential; useful for air-gapped deployments and as a
/// best-effort fallback when no hosted provider is configured.
#[derive(Default)]
pub struct TesseractRecognizer;

impl TesseractRecognizer {
    /// Construct the local recognizer.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    fn method(&self) -> &'static str {
        "TESSERACT_OCR"
    }

    async fn recognize_image(
        &self,
        image: &[u8],
        _mime_type: &str,
    ) -> Result<String, RecognitionError> {
        // tesseract sniffs the image format from content, so no extension
        // is needed on the temporary file.
        let mut file = tempfile::Builder::new()
            .prefix("medkeep_ocr_")
            .tempfile()
            .map_err(RecognitionError::Io)?;
        file.write_all(image).map_err(RecognitionError::Io)?;
        file.flush().map_err(RecognitionError::Io)?;

        let output = Command::new("tesseract")
            .arg(file.path())
            .arg("stdout")
            .output()
            .await
            .map_err(|error| {
                if error.kind() == std::io::ErrorKind::NotFound {
                    RecognitionError::ToolUnavailable {
                        tool: "tesseract",
                        detail: error.to_string(),
                    }
                } else {
                    RecognitionError::Io(error)
                }
            })?;

        if !output.status.success() {
            return Err(RecognitionError::ToolFailed(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
