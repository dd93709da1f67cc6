//! Text extraction for uploaded documents (plain text and PDF).
//!
//! Uploads arrive as a file name plus raw bytes; this module decides the
//! document kind and returns UTF-8 text. PDF parsing is delegated to
//! `pdf-extract`. Extraction never panics: every failure is a
//! [`LoadError`].

use std::path::Path;
use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Text,
    Pdf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("file is not valid UTF-8 text: {0}")]
    Encoding(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("invalid file name: {0:?}")]
    InvalidName(String),
}

impl DocumentKind {
    /// Resolve the kind from a file name's extension (case-insensitive).
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" => Some(DocumentKind::Text),
            "pdf" => Some(DocumentKind::Pdf),
            _ => None,
        }
    }

    /// Resolve the kind from a MIME type, ignoring parameters such as `charset`.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next().unwrap_or("").trim();
        match essence {
            MIME_TEXT | MIME_MARKDOWN => Some(DocumentKind::Text),
            MIME_PDF => Some(DocumentKind::Pdf),
            _ => None,
        }
    }
}

/// Extract text from an uploaded file, choosing the parser by extension.
pub fn load_document(file_name: &str, bytes: &[u8]) -> Result<String, LoadError> {
    let kind = DocumentKind::from_file_name(file_name)
        .ok_or_else(|| LoadError::Unsupported(file_name.to_string()))?;
    extract_text(bytes, kind)
}

pub fn extract_text(bytes: &[u8], kind: DocumentKind) -> Result<String, LoadError> {
    match kind {
        DocumentKind::Text => String::from_utf8(bytes.to_vec())
            .map_err(|e| LoadError::Encoding(e.utf8_error().to_string())),
        DocumentKind::Pdf => extract_pdf(bytes),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, LoadError> {
    // pdf-extract panics on some malformed inputs
    std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| LoadError::Pdf("parser panicked on malformed PDF".to_string()))?
        .map_err(|e| LoadError::Pdf(e.to_string()))
}

/// Reduce an uploaded file name to a safe single path component.
///
/// Directory parts are dropped, whitespace becomes `_`, and anything
/// outside `[A-Za-z0-9._-]` is removed. Leading dots are stripped so the
/// result can never be `.` or `..` or a hidden file.
pub fn sanitize_file_name(name: &str) -> Result<String, LoadError> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = last
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                Some(c)
            } else {
                None
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        return Err(LoadError::InvalidName(name.to_string()));
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension() {
        assert_eq!(DocumentKind::from_file_name("notes.TXT"), Some(DocumentKind::Text));
        assert_eq!(DocumentKind::from_file_name("readme.md"), Some(DocumentKind::Text));
        assert_eq!(DocumentKind::from_file_name("paper.pdf"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_file_name("sheet.xlsx"), None);
        assert_eq!(DocumentKind::from_file_name("noext"), None);
    }

    #[test]
    fn kind_from_content_type() {
        assert_eq!(
            DocumentKind::from_content_type("text/plain; charset=utf-8"),
            Some(DocumentKind::Text)
        );
        assert_eq!(DocumentKind::from_content_type(MIME_PDF), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_content_type("application/octet-stream"), None);
    }

    #[test]
    fn unsupported_extension_returns_error() {
        let err = load_document("foo.docx", b"foo").unwrap_err();
        assert!(matches!(err, LoadError::Unsupported(_)));
    }

    #[test]
    fn text_is_decoded() {
        assert_eq!(load_document("a.txt", "héllo".as_bytes()).unwrap(), "héllo");
    }

    #[test]
    fn invalid_utf8_returns_error() {
        let err = load_document("a.txt", &[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, LoadError::Encoding(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = load_document("a.pdf", b"not a pdf").unwrap_err();
        assert!(matches!(err, LoadError::Pdf(_)));
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("my report.pdf").unwrap(), "my_report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_file_name("C:\\docs\\a&b.txt").unwrap(), "ab.txt");
        assert_eq!(sanitize_file_name(".hidden").unwrap(), "hidden");
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name("").is_err());
    }
}
