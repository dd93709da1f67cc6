//! Core data models shared by the knowledge base, the CLI and the HTTP API.

use serde::{Deserialize, Serialize};

/// Characters kept by [`preview`].
pub const PREVIEW_CHARS: usize = 100;

/// One chunk of an uploaded document, as persisted in `documents.json`.
///
/// Records are stored in index order: the record at position `i` owns row
/// `i` of the embedding matrix and of the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    /// Shared by all chunks of one upload.
    pub document_id: String,
    pub file_name: String,
    pub chunk_index: usize,
    pub content: String,
    /// SHA-256 of `content`.
    pub hash: String,
    /// Start of the raw uploaded text.
    pub original_preview: String,
    /// Unix seconds.
    pub ingested_at: i64,
}

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct SourceHit {
    pub id: String,
    pub file_name: String,
    pub chunk_index: usize,
    pub score: f32,
    pub content: String,
}

/// Result of a question against the knowledge base.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub sources: Vec<SourceHit>,
    /// Score of the best hit, `0.0` when nothing was retrieved.
    pub confidence: f32,
}

/// Result of adding one document.
#[derive(Debug, Clone, Serialize)]
pub struct AddOutcome {
    pub document_id: String,
    pub file_name: String,
    pub chunks_added: usize,
    /// Chunks of an earlier upload with the same file name that were dropped.
    pub replaced_chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBaseStatus {
    pub documents_count: usize,
    pub files_count: usize,
    pub index_status: String,
    pub index_size: usize,
    pub dimension: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub file_name: String,
    pub chunk_index: usize,
    pub content_preview: String,
    pub original_text_preview: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentsInfo {
    pub total_documents: usize,
    pub documents: Vec<DocumentSummary>,
}

/// First [`PREVIEW_CHARS`] characters of `text`, with `...` when cut.
pub fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_unchanged() {
        assert_eq!(preview("short"), "short");
        let exact = "x".repeat(PREVIEW_CHARS);
        assert_eq!(preview(&exact), exact);
    }

    #[test]
    fn long_text_is_cut_on_char_boundary() {
        let long = "é".repeat(PREVIEW_CHARS + 5);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
    }
}
