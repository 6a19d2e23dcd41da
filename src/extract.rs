//! Text extraction for ingestable files.
//!
//! Plain text and Markdown are read as UTF-8; PDF goes through `pdf-extract`.
//! Anything else is rejected so the caller can skip the file.

use std::path::Path;
use thiserror::Error;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedContentType(String),
    #[error("file is not valid UTF-8: {0}")]
    Encoding(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Content type for a path, judged by extension.
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" | "text" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        "pdf" => Some(MIME_PDF),
        _ => None,
    }
}

/// Extract plain text from `bytes` of the given content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_TEXT | MIME_MARKDOWN => String::from_utf8(bytes.to_vec())
            .map_err(|e| ExtractError::Encoding(e.to_string())),
        MIME_PDF => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        other => Err(ExtractError::UnsupportedContentType(other.to_string())),
    }
}

/// Title for a document: the first Markdown heading if there is one,
/// otherwise the file stem.
pub fn guess_title(path: &Path, text: &str, content_type: &str) -> String {
    if content_type == MIME_MARKDOWN {
        if let Some(heading) = text
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with("# "))
            .map(|l| l.trim_start_matches('#').trim())
            .filter(|h| !h.is_empty())
        {
            return heading.to_string();
        }
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}
