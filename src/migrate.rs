//! Schema creation for the graph and vector databases.
//!
//! All statements are idempotent; running them against an existing database
//! is a no-op.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn migrate_graph(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id TEXT NOT NULL,
            label TEXT NOT NULL,
            properties_json TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (label, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // edge_key is a content hash plus occurrence ordinal, so reloading the
    // same batch adds nothing while repeated contributions stay distinct.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS edges (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            edge_key TEXT NOT NULL UNIQUE,
            relationship TEXT NOT NULL,
            source TEXT NOT NULL,
            source_label TEXT NOT NULL,
            target TEXT NOT NULL,
            target_label TEXT NOT NULL,
            pull_request_id TEXT,
            commit_id TEXT,
            occurrence INTEGER NOT NULL DEFAULT 0,
            properties_json TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(relationship, source)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(relationship, target)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_pull_request ON edges(pull_request_id)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn migrate_vectors(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS node_vectors (
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            document TEXT NOT NULL,
            embedding BLOB NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_node_vectors_model ON node_vectors(model)")
        .execute(pool)
        .await?;

    Ok(())
}

/// `ekb init`: create both databases and their schemas.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let graph = db::connect(&config.graph.path).await?;
    migrate_graph(&graph).await?;
    graph.close().await;

    let vectors = db::connect(&config.vectors.path).await?;
    migrate_vectors(&vectors).await?;
    vectors.close().await;

    Ok(())
}
