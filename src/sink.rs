//! Indexing sink: embed chunks and upsert them into the vector store.
//!
//! Success is tracked per source file. A file's previous vectors are
//! removed before its new chunks are written, so a re-indexed file never
//! keeps stale chunks from an older, longer version. Failures in one
//! embedding batch are logged and counted; the remaining batches still run.

use std::collections::BTreeMap;

use anyhow::Result;

use docsync_core::embedding::Embedder;
use docsync_core::models::{Chunk, VectorRecord, CHUNK_INDEX_KEY};
use docsync_core::store::VectorStore;

/// Outcome of indexing one source file's chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIndexResult {
    pub filename: String,
    pub chunks: usize,
    pub indexed: usize,
    pub failed: usize,
    /// First error seen for this file, if any.
    pub error: Option<String>,
}

impl FileIndexResult {
    fn new(filename: &str, chunks: usize) -> Self {
        Self {
            filename: filename.to_string(),
            chunks,
            indexed: 0,
            failed: 0,
            error: None,
        }
    }

    /// True when every chunk of the file is confirmed stored and its
    /// previous vectors were cleared.
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.failed == 0 && self.indexed == self.chunks
    }

    fn fail(&mut self, count: usize, error: &anyhow::Error) {
        self.failed += count;
        if self.error.is_none() {
            self.error = Some(format!("{:#}", error));
        }
    }
}

/// Per-file results of one [`IndexingSink::index`] call, in input order.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub files: Vec<FileIndexResult>,
}

impl IndexReport {
    pub fn get(&self, filename: &str) -> Option<&FileIndexResult> {
        self.files.iter().find(|f| f.filename == filename)
    }

    pub fn indexed(&self) -> usize {
        self.files.iter().map(|f| f.indexed).sum()
    }

    pub fn failed(&self) -> usize {
        self.files.iter().map(|f| f.failed).sum()
    }
}

pub struct IndexingSink {
    embedder: Box<dyn Embedder>,
    store: Box<dyn VectorStore>,
    batch_size: usize,
}

impl IndexingSink {
    pub fn new(embedder: Box<dyn Embedder>, store: Box<dyn VectorStore>, batch_size: usize) -> Self {
        Self {
            embedder,
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    /// Index `chunks`, grouped by source file in order of first appearance.
    pub async fn index(&self, chunks: &[Chunk]) -> IndexReport {
        let mut order: Vec<&str> = Vec::new();
        let mut groups: BTreeMap<&str, Vec<Chunk>> = BTreeMap::new();
        for chunk in chunks {
            let name = chunk.filename.as_str();
            if !groups.contains_key(name) {
                order.push(name);
            }
            groups.entry(name).or_default().push(chunk.clone());
        }

        let mut report = IndexReport::default();
        for name in order {
            let file_chunks = groups.remove(name).unwrap_or_default();
            report.files.push(self.index_file(name, &file_chunks).await);
        }
        report
    }

    /// Replace everything stored for `filename` with `chunks`.
    ///
    /// An empty `chunks` slice still clears the file's old vectors.
    pub async fn index_file(&self, filename: &str, chunks: &[Chunk]) -> FileIndexResult {
        let mut result = FileIndexResult::new(filename, chunks.len());

        match self.store.delete_source(filename).await {
            Ok(removed) if removed > 0 => {
                tracing::debug!(file = filename, removed, "removed previous vectors");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(file = filename, error = %e, "could not clear previous vectors");
                result.fail(chunks.len(), &e);
                return result;
            }
        }

        for batch in chunks.chunks(self.batch_size) {
            match self.index_batch(batch).await {
                Ok(()) => result.indexed += batch.len(),
                Err(e) => {
                    tracing::warn!(
                        file = filename,
                        first_chunk = batch[0].chunk_index,
                        chunks = batch.len(),
                        error = %e,
                        "indexing batch failed"
                    );
                    result.fail(batch.len(), &e);
                }
            }
        }

        tracing::info!(
            file = filename,
            indexed = result.indexed,
            failed = result.failed,
            "indexed"
        );
        result
    }

    async fn index_batch(&self, batch: &[Chunk]) -> Result<()> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != batch.len() {
            anyhow::bail!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            );
        }

        let records: Vec<VectorRecord> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| to_record(chunk, vector))
            .collect();
        self.store.upsert(&records).await
    }
}

fn to_record(chunk: &Chunk, vector: Vec<f32>) -> VectorRecord {
    let mut metadata = chunk.metadata.clone();
    metadata.insert(CHUNK_INDEX_KEY.to_string(), chunk.chunk_index.to_string());
    metadata.insert("chunk_hash".to_string(), chunk.hash.clone());
    VectorRecord {
        id: chunk.id.clone(),
        vector,
        text: chunk.text.clone(),
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docsync_core::chunk::{split_document, ChunkerConfig};
    use docsync_core::embedding::HashEmbedder;
    use docsync_core::models::{NormalizedDocument, SourceFormat, FILENAME_KEY};
    use docsync_core::store::memory::InMemoryStore;
    use docsync_core::store::QueryMatch;
    use std::sync::Arc;

    /// Store whose deletes always fail.
    struct LockedStore;

    #[async_trait]
    impl VectorStore for LockedStore {
        fn collection(&self) -> &str {
            "locked"
        }
        async fn upsert(&self, _records: &[VectorRecord]) -> Result<()> {
            Ok(())
        }
        async fn delete_source(&self, _filename: &str) -> Result<u64> {
            anyhow::bail!("store locked")
        }
        async fn count(&self) -> Result<u64> {
            Ok(0)
        }
        async fn query(&self, _vector: &[f32], _top_k: usize) -> Result<Vec<QueryMatch>> {
            Ok(Vec::new())
        }
    }

    /// Fails any batch containing a text with the marker.
    struct PickyEmbedder;

    #[async_trait]
    impl Embedder for PickyEmbedder {
        fn model_name(&self) -> &str {
            "picky"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("POISON")) {
                anyhow::bail!("refusing poisoned text");
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn chunks_of(name: &str, text: &str, size: usize) -> Vec<Chunk> {
        let doc = NormalizedDocument::new(name, SourceFormat::PlainText, text.to_string());
        split_document(
            &doc,
            &ChunkerConfig {
                chunk_size: size,
                chunk_overlap: 0,
            },
        )
    }

    #[tokio::test]
    async fn reports_per_file_and_tags_metadata() {
        let store = Arc::new(InMemoryStore::default());
        let sink = IndexingSink::new(
            Box::new(HashEmbedder::new(8)),
            Box::new(store.clone()),
            2,
        );

        let mut chunks = chunks_of("a.txt", "one. two. three.", 6);
        chunks.extend(chunks_of("b.txt", "four.", 6));
        let report = sink.index(&chunks).await;

        assert_eq!(report.files.len(), 2);
        assert_eq!(report.files[0].filename, "a.txt");
        assert!(report.get("a.txt").unwrap().is_complete());
        assert!(report.get("b.txt").unwrap().is_complete());
        assert_eq!(report.indexed(), chunks.len());

        let records = store.records();
        assert_eq!(records.len(), chunks.len());
        assert!(records
            .iter()
            .all(|r| r.metadata.contains_key(FILENAME_KEY) && r.metadata.contains_key(CHUNK_INDEX_KEY)));
    }

    #[tokio::test]
    async fn failed_batch_marks_only_its_file_incomplete() {
        let store = Arc::new(InMemoryStore::default());
        let sink = IndexingSink::new(Box::new(PickyEmbedder), Box::new(store.clone()), 1);

        let mut chunks = chunks_of("bad.txt", "fine. POISON.", 8);
        chunks.extend(chunks_of("good.txt", "fine.", 8));
        let report = sink.index(&chunks).await;

        let bad = report.get("bad.txt").unwrap();
        assert!(!bad.is_complete());
        assert_eq!(bad.indexed, 1);
        assert_eq!(bad.failed, 1);
        assert!(bad.error.as_deref().unwrap().contains("poisoned"));
        assert!(report.get("good.txt").unwrap().is_complete());
        assert_eq!(store.records().len(), 2);
    }

    #[tokio::test]
    async fn reindex_replaces_old_vectors() {
        let store = Arc::new(InMemoryStore::default());
        let sink = IndexingSink::new(
            Box::new(HashEmbedder::new(4)),
            Box::new(store.clone()),
            16,
        );

        sink.index(&chunks_of("a.txt", "one. two. three.", 6)).await;
        assert_eq!(store.records().len(), 3);

        let result = sink.index_file("a.txt", &chunks_of("a.txt", "one.", 6)).await;
        assert!(result.is_complete());
        assert_eq!(store.records().len(), 1);

        let cleared = sink.index_file("a.txt", &[]).await;
        assert!(cleared.is_complete());
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn failed_clear_is_incomplete_even_without_chunks() {
        let sink = IndexingSink::new(Box::new(HashEmbedder::new(4)), Box::new(LockedStore), 16);

        let cleared = sink.index_file("a.txt", &[]).await;
        assert!(!cleared.is_complete());
        assert_eq!(cleared.error.as_deref(), Some("store locked"));

        let result = sink.index_file("a.txt", &chunks_of("a.txt", "one. two.", 6)).await;
        assert!(!result.is_complete());
        assert_eq!(result.indexed, 0);
        assert_eq!(result.failed, 2);
    }
}
