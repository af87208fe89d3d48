//! `docsync query`: embed a question and print the closest chunks.

use anyhow::{bail, Result};

use docsync_core::models::{CHUNK_INDEX_KEY, FILENAME_KEY};
use docsync_core::store::{QueryMatch, VectorStore};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteVectorStore;

const SNIPPET_CHARS: usize = 240;

pub async fn search(config: &Config, question: &str, top_k: usize) -> Result<Vec<QueryMatch>> {
    if !config.embedding.is_enabled() {
        bail!("Querying requires embeddings. Set [embedding] provider in config.");
    }
    if question.trim().is_empty() {
        bail!("Query must not be empty");
    }

    let embedder = create_embedder(&config.embedding)?.into_inner();
    let vector = embedder.embed(question).await?;

    let store = SqliteVectorStore::open(&config.store).await?;
    let matches = store.query(&vector, top_k).await?;
    store.close().await;
    Ok(matches)
}

pub async fn run_query(config: &Config, question: &str, top_k: usize) -> Result<()> {
    let matches = search(config, question, top_k).await?;
    if matches.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, m) in matches.iter().enumerate() {
        let file = m.metadata.get(FILENAME_KEY).map(String::as_str).unwrap_or("?");
        let index = m.metadata.get(CHUNK_INDEX_KEY).map(String::as_str).unwrap_or("?");
        println!("{}. [{:.4}] {} #{}", i + 1, m.score, file, index);
        println!("    {}", snippet(&m.text));
        println!("    id: {}", m.id);
        println!();
    }
    Ok(())
}

fn snippet(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SNIPPET_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(SNIPPET_CHARS).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_flattens_and_truncates() {
        assert_eq!(snippet("a\n\nb   c"), "a b c");
        let long = "x".repeat(SNIPPET_CHARS + 10);
        let s = snippet(&long);
        assert_eq!(s.chars().count(), SNIPPET_CHARS + 1);
        assert!(s.ends_with('…'));
    }
}
