//! PDF page rasterization.
//!
//! Recognition providers operate on raster images, so PDF input is first
//! converted to one PNG per page at 150 dpi. The primary converter is
//! poppler's `pdftoppm`; when it is missing or fails for environment
//! reasons, `mutool draw` is tried before giving up.

use super::RecognitionError;
use std::path::{Path, PathBuf};
use tokio::process::Command;

enum RasterTool {
    Pdftoppm,
    Mutool,
}

impl RasterTool {
    fn binary(&self) -> &'static str {
        match self {
            Self::Pdftoppm => "pdftoppm",
            Self::Mutool => "mutool",
        }
    }

    fn page_prefix(&self) -> &'static str {
        match self {
            Self::Pdftoppm => "page",
            Self::Mutool => "mpage",
        }
    }
}

/// Convert a PDF to PNG bytes, one entry per page, in page order.
pub(crate) async fn rasterize_pages(pdf: &[u8]) -> Result<Vec<Vec<u8>>, RecognitionError> {
    let dir = tempfile::Builder::new()
        .prefix("medkeep_ocr_")
        .tempdir()
        .map_err(RecognitionError::Io)?;
    let pdf_path = dir.path().join("input.pdf");
    tokio::fs::write(&pdf_path, pdf).await?;

    let primary = run_tool(dir.path(), &pdf_path, RasterTool::Pdftoppm).await;
    let primary_reason = match primary {
        Ok(pages) if !pages.is_empty() => return Ok(pages),
        Ok(_) => "produced no pages".to_string(),
        Err(error) => error.to_string(),
    };
    tracing::debug!(
        reason = %primary_reason,
        "pdftoppm unavailable or failed; falling back to mutool"
    );

    match run_tool(dir.path(), &pdf_path, RasterTool::Mutool).await {
        Ok(pages) if !pages.is_empty() => {
            tracing::warn!(pages = pages.len(), "Rasterized PDF with mutool fallback");
            Ok(pages)
        }
        Ok(_) => Err(RecognitionError::PdfConversion(format!(
            "pdftoppm: {primary_reason}; mutool produced no pages"
        ))),
        Err(fallback) => Err(RecognitionError::PdfConversion(format!(
            "pdftoppm: {primary_reason}; mutool: {fallback}"
        ))),
    }
}

async fn run_tool(
    dir: &Path,
    pdf_path: &Path,
    tool: RasterTool,
) -> Result<Vec<Vec<u8>>, RecognitionError> {
    let prefix = tool.page_prefix();
    let mut command = Command::new(tool.binary());
    match tool {
        RasterTool::Pdftoppm => {
            command
                .arg("-png")
                .arg("-r")
                .arg("150")
                .arg(pdf_path)
                .arg(dir.join(prefix));
        }
        RasterTool::Mutool => {
            command
                .arg("draw")
                .arg("-r")
                .arg("150")
                .arg("-o")
                .arg(dir.join(format!("{prefix}-%d.png")))
                .arg(pdf_path);
        }
    }

    let output = command.output().await.map_err(|error| {
        if error.kind() == std::io::ErrorKind::NotFound {
            RecognitionError::ToolUnavailable {
                tool: tool.binary(),
                detail: error.to_string(),
            }
        } else {
            RecognitionError::Io(error)
        }
    })?;

    if !output.status.success() {
        return Err(RecognitionError::ToolFailed(format!(
            "{} exited with {}: {}",
            tool.binary(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    collect_page_files(dir, prefix).await
}

/// Gather `<prefix>-N.png` outputs in numeric page order.
async fn collect_page_files(dir: &Path, prefix: &str) -> Result<Vec<Vec<u8>>, RecognitionError> {
    let mut numbered: Vec<(u32, PathBuf)> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if let Some(page_number) = page_number(&path, prefix) {
            numbered.push((page_number, path));
        }
    }
    numbered.sort_by_key(|(number, _)| *number);

    let mut pages = Vec::with_capacity(numbered.len());
    for (_, path) in numbered {
        pages.push(tokio::fs::read(path).await?);
    }
    Ok(pages)
}

fn page_number(path: &Path, prefix: &str) -> Option<u32> {
    if path.extension().and_then(|ext| ext.to_str()) != Some("png") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let suffix = stem.strip_prefix(prefix)?.strip_prefix('-')?;
    suffix.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_numbers_parse_for_both_tools() {
        assert_eq!(page_number(Path::new("/tmp/x/page-01.png"), "page"), Some(1));
        assert_eq!(
            page_number(Path::new("/tmp/x/mpage-12.png"), "mpage"),
            Some(12)
        );
        assert_eq!(page_number(Path::new("/tmp/x/page-2.txt"), "page"), None);
        assert_eq!(page_number(Path::new("/tmp/x/input.pdf"), "page"), None);
        // `mpage-*` files must not be picked up by the poppler prefix scan.
        assert_eq!(page_number(Path::new("/tmp/x/mpage-3.png"), "page"), None);
    }
}
