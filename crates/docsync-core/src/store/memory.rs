//! In-memory [`VectorStore`] implementation for tests and dry runs.
//!
//! Records live in a `Vec` behind `std::sync::RwLock`. Query is brute-force
//! cosine similarity over all stored vectors.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::VectorRecord;

use super::{QueryMatch, VectorStore};

/// In-memory store bound to a single collection name.
pub struct InMemoryStore {
    collection: String,
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryStore {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            records: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of every stored record, in insertion order.
    pub fn records(&self) -> Vec<VectorRecord> {
        self.records
            .read()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new("documents")
    }
}

fn poisoned() -> anyhow::Error {
    anyhow::anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let mut stored = self.records.write().map_err(|_| poisoned())?;
        for record in records {
            match stored.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => stored.push(record.clone()),
            }
        }
        Ok(())
    }

    async fn delete_source(&self, filename: &str) -> Result<u64> {
        let mut stored = self.records.write().map_err(|_| poisoned())?;
        let before = stored.len();
        stored.retain(|r| r.filename() != Some(filename));
        Ok((before - stored.len()) as u64)
    }

    async fn count(&self) -> Result<u64> {
        let stored = self.records.read().map_err(|_| poisoned())?;
        Ok(stored.len() as u64)
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>> {
        let stored = self.records.read().map_err(|_| poisoned())?;
        let mut matches: Vec<QueryMatch> = stored
            .iter()
            .map(|r| QueryMatch {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.vector),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }
}
