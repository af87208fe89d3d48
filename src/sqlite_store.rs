//! SQLite-backed [`VectorStore`].
//!
//! Vectors are stored as little-endian `f32` BLOBs in the `vectors` table,
//! keyed by `(collection, id)`. Queries load the collection's vectors and
//! rank them by cosine similarity in Rust.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use docsync_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use docsync_core::models::{VectorRecord, CHUNK_INDEX_KEY};
use docsync_core::store::{QueryMatch, VectorStore};

use crate::config::StoreConfig;
use crate::{db, migrate};

pub struct SqliteVectorStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteVectorStore {
    /// Open the database at `store.path`, apply the schema, and get or
    /// create `store.collection`.
    pub async fn open(store: &StoreConfig) -> Result<Self> {
        let pool = db::connect(store).await?;
        Self::with_pool(pool, &store.collection).await
    }

    pub async fn with_pool(pool: SqlitePool, collection: &str) -> Result<Self> {
        migrate::run_migrations(&pool).await?;

        sqlx::query("INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)")
            .bind(collection)
            .bind(chrono::Utc::now().timestamp())
            .execute(&pool)
            .await
            .with_context(|| format!("Failed to create collection '{}'", collection))?;

        Ok(Self {
            pool,
            collection: collection.to_string(),
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Number of distinct source files with vectors in the collection.
    pub async fn source_count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT filename) FROM vectors WHERE collection = ?",
        )
        .bind(&self.collection)
        .fetch_one(&self.pool)
        .await?;
        Ok(n as u64)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for record in records {
            let filename = record.filename().unwrap_or_default();
            let chunk_index: i64 = record
                .metadata
                .get(CHUNK_INDEX_KEY)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let metadata_json = serde_json::to_string(&record.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO vectors (collection, id, filename, chunk_index, text, metadata_json, embedding, dims, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    filename = excluded.filename,
                    chunk_index = excluded.chunk_index,
                    text = excluded.text,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    dims = excluded.dims,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&self.collection)
            .bind(&record.id)
            .bind(filename)
            .bind(chunk_index)
            .bind(&record.text)
            .bind(&metadata_json)
            .bind(vec_to_blob(&record.vector))
            .bind(record.vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_source(&self, filename: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM vectors WHERE collection = ? AND filename = ?")
            .bind(&self.collection)
            .bind(filename)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>> {
        let rows = sqlx::query(
            "SELECT id, text, metadata_json, embedding FROM vectors WHERE collection = ?",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        let mut matches: Vec<QueryMatch> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let metadata_json: String = row.get("metadata_json");
                let metadata: BTreeMap<String, String> =
                    serde_json::from_str(&metadata_json).unwrap_or_default();
                QueryMatch {
                    id: row.get("id"),
                    score: cosine_similarity(vector, &blob_to_vec(&blob)),
                    text: row.get("text"),
                    metadata,
                }
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
