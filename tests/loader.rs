use frameworkless_rag::chunk::{chunk_words, clean_text, ChunkingParams};
use frameworkless_rag::loader::{load_document, LoadError};

mod common;
use common::minimal_pdf_with_phrase;

fn squash(text: &str) -> String {
    text.split_whitespace().collect()
}

#[test]
fn pdf_text_is_extracted() {
    let pdf = minimal_pdf_with_phrase("retrieval test phrase");
    let text = load_document("paper.pdf", &pdf).unwrap();
    assert!(
        squash(&text).contains("retrievaltestphrase"),
        "extracted: {:?}",
        text
    );
}

#[test]
fn extracted_pdf_text_chunks() {
    let pdf = minimal_pdf_with_phrase("alpha beta gamma delta");
    let text = load_document("Paper.PDF", &pdf).unwrap();
    let chunks = chunk_words(&clean_text(&text), ChunkingParams::default()).unwrap();
    assert_eq!(chunks.len(), 1);
    assert!(squash(&chunks[0].text).contains("gamma"));
}

#[test]
fn corrupt_pdf_is_an_error_not_a_panic() {
    let mut pdf = minimal_pdf_with_phrase("cut short");
    pdf.truncate(40);
    let err = load_document("broken.pdf", &pdf).unwrap_err();
    assert!(matches!(err, LoadError::Pdf(_)));
}

#[test]
fn markdown_is_loaded_as_text() {
    let text = load_document("README.md", b"# Title\n\nBody text.").unwrap();
    assert_eq!(text, "# Title\n\nBody text.");
}
