//! Word-window text chunker.
//!
//! Splits cleaned document text into fixed-size windows of words that
//! overlap by a configurable number of words. Windows start at word 0 and
//! advance by `chunk_size - chunk_overlap`; the last window always ends at
//! the final word, and no window is emitted once the previous one already
//! reached the end of the text.
//!
//! Each chunk carries a SHA-256 hash of its text so the knowledge base can
//! reuse embeddings across index rebuilds.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use thiserror::Error;

/// Chunking settings, both counted in words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkingError {
    #[error("chunk_size must be > 0")]
    ZeroSize,
    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapTooLarge { overlap: usize, size: usize },
}

impl ChunkingParams {
    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.chunk_size == 0 {
            return Err(ChunkingError::ZeroSize);
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChunkingError::OverlapTooLarge {
                overlap: self.chunk_overlap,
                size: self.chunk_size,
            });
        }
        Ok(())
    }

    /// Words between the starts of consecutive windows.
    pub fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

/// One window of words over the input text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: usize,
    /// First word of the window.
    pub start_word: usize,
    /// One past the last word of the window.
    pub end_word: usize,
    /// Byte offset of the first word in the input.
    pub start: usize,
    /// Byte offset one past the last word in the input.
    pub end: usize,
    /// The window's words joined by single spaces.
    pub text: String,
    pub hash: String,
}

fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

fn disallowed_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[^\w\s\.,!\?;:\-\(\)]").expect("character class pattern is valid")
    })
}

/// Normalize extracted text before chunking.
///
/// Collapses whitespace runs to one space, strips every character that is
/// not a word character, whitespace, or basic punctuation, and trims.
pub fn clean_text(text: &str) -> String {
    let collapsed = whitespace_run().replace_all(text, " ");
    let stripped = disallowed_chars().replace_all(&collapsed, "");
    stripped.trim().to_string()
}

/// Byte ranges of the whitespace-separated words of `text`.
fn word_ranges(text: &str) -> Vec<(usize, usize)> {
    let base = text.as_ptr() as usize;
    text.split_whitespace()
        .map(|w| {
            let start = w.as_ptr() as usize - base;
            (start, start + w.len())
        })
        .collect()
}

/// Split text into overlapping word windows.
///
/// Returns no chunks for empty or whitespace-only input. Callers are
/// expected to pass validated params; an invalid step is reported as an
/// error rather than looping.
pub fn chunk_words(text: &str, params: ChunkingParams) -> Result<Vec<ChunkSpan>, ChunkingError> {
    params.validate()?;

    let words = word_ranges(text);
    let total = words.len();
    let mut chunks = Vec::new();
    if total == 0 {
        return Ok(chunks);
    }

    let step = params.step();
    let mut start_word = 0;
    loop {
        let end_word = (start_word + params.chunk_size).min(total);
        let joined = words[start_word..end_word]
            .iter()
            .map(|&(s, e)| &text[s..e])
            .collect::<Vec<_>>()
            .join(" ");

        chunks.push(ChunkSpan {
            index: chunks.len(),
            start_word,
            end_word,
            start: words[start_word].0,
            end: words[end_word - 1].1,
            hash: hash_text(&joined),
            text: joined,
        });

        if end_word == total {
            break;
        }
        start_word += step;
    }

    Ok(chunks)
}

/// SHA-256 hex digest of a chunk's text.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(size: usize, overlap: usize) -> ChunkingParams {
        ChunkingParams {
            chunk_size: size,
            chunk_overlap: overlap,
        }
    }

    fn numbered_words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_words("Hello, world!", params(512, 50)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, "Hello, world!".len());
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_words("", params(512, 50)).unwrap().is_empty());
        assert!(chunk_words("  \n\t ", params(512, 50)).unwrap().is_empty());
    }

    #[test]
    fn test_windows_overlap_and_cover_input() {
        let text = numbered_words(25);
        let chunks = chunk_words(&text, params(10, 3)).unwrap();

        // starts at 0, 7, 14; the window at 14 reaches word 24
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start_word, 0);
        assert_eq!(chunks.last().unwrap().end_word, 25);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks.last().unwrap().end, text.len());

        for pair in chunks.windows(2) {
            assert_eq!(pair[1].index, pair[0].index + 1);
            assert_eq!(pair[1].start_word, pair[0].start_word + 7);
            assert!(pair[1].start_word < pair[0].end_word, "windows must overlap");
            assert_eq!(pair[0].end_word - pair[1].start_word, 3);
        }
    }

    #[test]
    fn test_no_trailing_window_inside_predecessor() {
        // 10 words exactly fill one window; a second window starting at
        // word 7 would be fully contained in the first.
        let chunks = chunk_words(&numbered_words(10), params(10, 3)).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_last_window_may_be_short() {
        let chunks = chunk_words(&numbered_words(12), params(10, 3)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].start_word, 7);
        assert_eq!(chunks[1].end_word, 12);
        assert_eq!(chunks[1].text, "w7 w8 w9 w10 w11");
    }

    #[test]
    fn test_spans_point_into_input() {
        let text = "alpha   beta\ngamma\tdelta epsilon";
        let chunks = chunk_words(text, params(2, 1)).unwrap();
        for c in &chunks {
            let words: Vec<&str> = text[c.start..c.end].split_whitespace().collect();
            assert_eq!(words.join(" "), c.text);
        }
        assert_eq!(chunks.len(), 4);
    }

    #[test]
    fn test_zero_overlap_partitions_words() {
        let chunks = chunk_words(&numbered_words(9), params(3, 0)).unwrap();
        assert_eq!(chunks.len(), 3);
        let total: usize = chunks.iter().map(|c| c.end_word - c.start_word).sum();
        assert_eq!(total, 9);
    }

    #[test]
    fn test_invalid_params() {
        assert_eq!(
            chunk_words("a b c", params(0, 0)).unwrap_err(),
            ChunkingError::ZeroSize
        );
        assert!(matches!(
            chunk_words("a b c", params(3, 3)).unwrap_err(),
            ChunkingError::OverlapTooLarge { .. }
        ));
    }

    #[test]
    fn test_deterministic_hashes() {
        let text = numbered_words(40);
        let c1 = chunk_words(&text, params(8, 2)).unwrap();
        let c2 = chunk_words(&text, params(8, 2)).unwrap();
        assert_eq!(c1, c2);
        assert_ne!(c1[0].hash, c1[1].hash);
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  Hello,\n\n  world!  "), "Hello, world!");
        assert_eq!(clean_text("price: $5 @ store #1"), "price: 5  store 1");
        assert_eq!(clean_text("keep (these) - ok; fine? yes."), "keep (these) - ok; fine? yes.");
        assert_eq!(clean_text("café naïve"), "café naïve");
    }
}
