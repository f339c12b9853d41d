//! Embedding index keyed by graph node id.
//!
//! Vectors are stored as little-endian `f32` BLOBs next to the document they
//! were computed from. Nearest-neighbour search is brute-force cosine
//! similarity in Rust; distances are reported as `1 - cos`.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;

use crate::db;
use crate::migrate;

/// A row to upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub id: String,
    pub label: String,
    pub document: String,
    pub embedding: Vec<f32>,
    pub model: String,
    pub content_hash: String,
}

/// One nearest-neighbour result.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    /// Cosine distance; 0 is identical direction.
    pub distance: f32,
    pub document: String,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace entries by id.
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<()>;

    /// The `limit` nearest entries to `embedding`, closest first.
    ///
    /// Only entries of the same dimension are candidates; vectors left
    /// behind by a model of another size never surface as hits.
    async fn query(&self, embedding: &[f32], limit: usize) -> Result<Vec<VectorHit>>;

    async fn count(&self) -> Result<i64>;

    /// `id → content_hash` for entries embedded with `model`.
    async fn content_hashes(&self, model: &str) -> Result<HashMap<String, String>>;

    async fn clear(&self) -> Result<()>;
}

// ============ Vector encoding ============

/// Little-endian `f32` bytes, four per component.
pub fn vec_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]; a trailing partial component is ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .filter_map(|bytes| <[u8; 4]>::try_from(bytes).ok())
        .map(f32::from_le_bytes)
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` when either side has no
/// direction or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, sq_a, sq_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, sq_a, sq_b), (x, y)| {
            (dot + x * y, sq_a + x * x, sq_b + y * y)
        });

    let magnitude = (sq_a * sq_b).sqrt();
    if magnitude < f32::EPSILON {
        0.0
    } else {
        dot / magnitude
    }
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

// ============ SQLite ============

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::migrate_vectors(&pool).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO node_vectors (id, label, document, embedding, model, dims, content_hash, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    label = excluded.label,
                    document = excluded.document,
                    embedding = excluded.embedding,
                    model = excluded.model,
                    dims = excluded.dims,
                    content_hash = excluded.content_hash,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&entry.id)
            .bind(&entry.label)
            .bind(&entry.document)
            .bind(vec_to_blob(&entry.embedding))
            .bind(&entry.model)
            .bind(entry.embedding.len() as i64)
            .bind(&entry.content_hash)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, embedding: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows: Vec<(String, String, Vec<u8>)> =
            sqlx::query_as("SELECT id, document, embedding FROM node_vectors WHERE dims = ?")
                .bind(embedding.len() as i64)
                .fetch_all(&self.pool)
                .await?;

        let mut hits: Vec<VectorHit> = rows
            .into_iter()
            .map(|(id, document, blob)| VectorHit {
                distance: cosine_distance(embedding, &blob_to_vec(&blob)),
                id,
                document,
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM node_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn content_hashes(&self, model: &str) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, content_hash FROM node_vectors WHERE model = ?")
                .bind(model)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM node_vectors")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
