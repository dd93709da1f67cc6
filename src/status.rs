//! `rag status`, `rag docs` and `rag clear`.

use anyhow::Result;

use crate::config::Config;
use crate::embedding::resolve_local_model;
use crate::store::{KnowledgeBase, StorePaths};

fn open(config: &Config) -> Result<KnowledgeBase> {
    Ok(KnowledgeBase::open(
        StorePaths::from_config(&config.storage),
        config.chunking.params(),
    )?)
}

fn embedding_model(config: &Config) -> String {
    match config.embedding.provider.as_str() {
        "local" => resolve_local_model(&config.embedding).0,
        "disabled" => "disabled".to_string(),
        _ => config.embedding.model.clone().unwrap_or_default(),
    }
}

pub fn run_status(config: &Config) -> Result<()> {
    let kb = open(config)?;
    let status = kb.status();
    let llm_ready = std::env::var(&config.llm.api_key_env)
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false);

    println!("Knowledge base status");
    println!("=====================");
    println!();
    println!("  Database:    {}", config.storage.database_dir.display());
    println!("  Files:       {}", status.files_count);
    println!("  Chunks:      {}", status.documents_count);
    println!(
        "  Index:       {} ({} vectors, {} dims)",
        status.index_status, status.index_size, status.dimension
    );
    println!(
        "  Chunking:    {} words, {} overlap",
        status.chunk_size, status.chunk_overlap
    );
    println!("  Top k:       {}", config.retrieval.top_k);
    println!();
    let configured = embedding_model(config);
    println!(
        "  Embeddings:  {} ({})",
        configured, config.embedding.provider
    );
    if let Some(space) = kb.embedding_space() {
        if space.model != configured {
            println!("  Indexed by:  {} (run `rag reindex`)", space);
        }
    }
    println!(
        "  LLM:         {} ({})",
        config.llm.model,
        if llm_ready {
            "ready".to_string()
        } else {
            format!("{} not set", config.llm.api_key_env)
        }
    );
    Ok(())
}

pub fn run_docs(config: &Config) -> Result<()> {
    let info = open(config)?.documents_info();
    if info.total_documents == 0 {
        println!("No documents.");
        return Ok(());
    }

    println!("{} chunks", info.total_documents);
    println!();
    println!("  {:<28} {:>6}   {}", "FILE", "CHUNK", "PREVIEW");
    println!("  {}", "-".repeat(76));
    for doc in &info.documents {
        println!(
            "  {:<28} {:>6}   {}",
            doc.file_name,
            doc.chunk_index,
            doc.content_preview.chars().take(40).collect::<String>()
        );
    }
    Ok(())
}

pub fn run_clear(config: &Config) -> Result<()> {
    let removed = open(config)?.clear()?;
    println!("cleared {} chunks", removed);
    println!("ok");
    Ok(())
}
