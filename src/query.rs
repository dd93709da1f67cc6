//! `rag query`: ask the knowledge base from the command line.

use anyhow::Result;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::llm::GroqClient;
use crate::models::{preview, SourceHit};
use crate::store::{KnowledgeBase, StorePaths, NO_DOCUMENTS_ANSWER};

pub async fn run_query(
    config: &Config,
    question: &str,
    top_k: Option<usize>,
    retrieve_only: bool,
) -> Result<()> {
    let kb = KnowledgeBase::open(
        StorePaths::from_config(&config.storage),
        config.chunking.params(),
    )?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);

    if kb.is_empty() {
        println!("{}", NO_DOCUMENTS_ANSWER);
        return Ok(());
    }

    let embedder = create_embedder(&config.embedding)?;

    if retrieve_only {
        let hits = kb.retrieve(embedder.as_ref(), question, top_k).await?;
        if hits.is_empty() {
            println!("No results.");
        } else {
            print_sources(&hits);
        }
        return Ok(());
    }

    let generator = GroqClient::from_config(&config.llm)?;
    let answer = kb
        .query(embedder.as_ref(), &generator, question, top_k)
        .await?;

    println!("{}", answer.answer);
    println!();
    println!("confidence: {:.3}", answer.confidence);
    if !answer.sources.is_empty() {
        println!();
        print_sources(&answer.sources);
    }
    Ok(())
}

fn print_sources(hits: &[SourceHit]) {
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} (chunk {})",
            i + 1,
            hit.score,
            hit.file_name,
            hit.chunk_index
        );
        println!("    {}", preview(&hit.content));
        println!("    id: {}", hit.id);
    }
}
