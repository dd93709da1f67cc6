//! `rag ingest` and `rag reindex`: load files from disk into the knowledge
//! base and re-embed what it holds.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::chunk::ChunkingParams;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::loader::load_document;
use crate::store::{KnowledgeBase, StorePaths};

pub async fn run_ingest(
    config: &Config,
    files: &[PathBuf],
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
) -> Result<()> {
    let defaults = config.chunking.params();
    let params = ChunkingParams {
        chunk_size: chunk_size.unwrap_or(defaults.chunk_size),
        chunk_overlap: chunk_overlap.unwrap_or(defaults.chunk_overlap),
    };
    params.validate().context("invalid chunking options")?;

    let mut kb = KnowledgeBase::open(StorePaths::from_config(&config.storage), params)?;
    let embedder = create_embedder(&config.embedding)?;

    for path in files {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Not a file path: {}", path.display()))?
            .to_string();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let text = load_document(&file_name, &bytes)
            .with_context(|| format!("Failed to load {}", path.display()))?;

        let outcome = kb
            .add_document(embedder.as_ref(), &file_name, &text)
            .await
            .with_context(|| format!("Failed to ingest {}", path.display()))?;

        println!("ingest {}", outcome.file_name);
        println!("  document id: {}", outcome.document_id);
        println!("  chunks added: {}", outcome.chunks_added);
        if outcome.replaced_chunks > 0 {
            println!("  chunks replaced: {}", outcome.replaced_chunks);
        }
    }

    println!(
        "knowledge base: {} chunks (chunk size {}, overlap {})",
        kb.len(),
        params.chunk_size,
        params.chunk_overlap
    );
    println!("ok");
    Ok(())
}

/// Re-embed every stored chunk with the configured embedder, e.g. after
/// `[embedding].model` changed.
pub async fn run_reindex(config: &Config) -> Result<()> {
    let mut kb = KnowledgeBase::open(
        StorePaths::from_config(&config.storage),
        config.chunking.params(),
    )?;
    if kb.is_empty() {
        println!("reindexed 0 chunks");
        println!("ok");
        return Ok(());
    }

    let embedder = create_embedder(&config.embedding)?;
    let previous = kb.embedding_space().map(ToString::to_string);
    let count = kb
        .reindex(embedder.as_ref())
        .await
        .context("Failed to reindex knowledge base")?;

    if let Some(previous) = previous {
        println!("previous model: {}", previous);
    }
    if let Some(current) = kb.embedding_space() {
        println!("current model:  {}", current);
    }
    println!("reindexed {} chunks", count);
    println!("ok");
    Ok(())
}
