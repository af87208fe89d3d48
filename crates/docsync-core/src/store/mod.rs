//! Vector-store abstraction for docsync.
//!
//! The [`VectorStore`] trait is the upsert/query contract the indexing sink
//! and the retrieval side consume. A store instance is bound to one
//! collection; opening the same collection twice must reuse it.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::VectorRecord;

/// One hit returned by [`VectorStore::query`].
#[derive(Debug, Clone, Serialize)]
pub struct QueryMatch {
    pub id: String,
    /// Cosine similarity to the query vector.
    pub score: f32,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

/// Durable collection of embedded chunks.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or replace records by id |
/// | [`delete_source`](VectorStore::delete_source) | Drop every record of one source file |
/// | [`count`](VectorStore::count) | Number of records in the collection |
/// | [`query`](VectorStore::query) | Top-k records by cosine similarity |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Name of the collection this store is bound to.
    fn collection(&self) -> &str;

    /// Insert or replace records, keyed by `VectorRecord::id`.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Remove all records whose `filename` metadata equals `filename`.
    /// Returns the number of records removed.
    async fn delete_source(&self, filename: &str) -> Result<u64>;

    async fn count(&self) -> Result<u64>;

    /// Return the `top_k` records most similar to `vector`, best first.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>>;
}

#[async_trait]
impl<T: VectorStore + ?Sized> VectorStore for Arc<T> {
    fn collection(&self) -> &str {
        (**self).collection()
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        (**self).upsert(records).await
    }

    async fn delete_source(&self, filename: &str) -> Result<u64> {
        (**self).delete_source(filename).await
    }

    async fn count(&self) -> Result<u64> {
        (**self).count().await
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>> {
        (**self).query(vector, top_k).await
    }
}
