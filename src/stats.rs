//! Store maintenance commands: `load`, `stats`, and `reset`.
//!
//! `stats` gives a quick read on what the knowledge base holds (nodes per
//! label, edges per relationship, vector coverage) so a build/load/embed
//! cycle can be checked at a glance.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::graph_builder;
use crate::graph_store::{GraphStore, LoadReport, SqliteGraphStore};
use crate::models::NodeLabel;
use crate::vector_store::{SqliteVectorStore, VectorStore};

/// `ekb load`: push the builder's artifacts into the graph store.
///
/// With `reset`, the graph is emptied first; otherwise loading is
/// idempotent and re-running it leaves counts unchanged.
pub async fn run_load(config: &Config, artifacts_dir: &Path, reset: bool) -> Result<LoadReport> {
    let batch = graph_builder::read_artifacts(artifacts_dir)
        .with_context(|| format!("reading artifacts from {}", artifacts_dir.display()))?;

    let store = SqliteGraphStore::open(&config.graph.path).await?;
    if reset {
        store.reset().await?;
        info!("graph store reset before load");
    }

    let report = store.load(&batch).await?;
    store.close().await;

    info!(
        nodes = report.nodes,
        edges_inserted = report.edges_inserted,
        edges_existing = report.edges_existing,
        "graph loaded"
    );
    println!(
        "Loaded {} nodes, {} new edges ({} already present).",
        report.nodes, report.edges_inserted, report.edges_existing
    );
    Ok(report)
}

/// `ekb stats`: print per-label and per-relationship counts.
pub async fn run_stats(config: &Config) -> Result<()> {
    let graph = SqliteGraphStore::open(&config.graph.path).await?;
    let vectors = SqliteVectorStore::open(&config.vectors.path).await?;

    let stats = graph.stats().await?;
    let embedded = vectors.count().await?;

    let indexable: i64 = [NodeLabel::PullRequest, NodeLabel::Commit]
        .iter()
        .filter_map(|label| stats.nodes.get(label.as_str()))
        .sum();

    println!("Expertise KB — Store Stats");
    println!("==========================");
    println!();
    println!("  Graph:    {}", config.graph.path.display());
    println!("  Size:     {}", format_bytes(file_size(&config.graph.path)));
    println!("  Vectors:  {}", config.vectors.path.display());
    println!("  Size:     {}", format_bytes(file_size(&config.vectors.path)));
    println!();
    println!("  {:<28} {:>8}", "NODE LABEL", "COUNT");
    println!("  {}", "-".repeat(37));
    for (label, count) in &stats.nodes {
        println!("  {:<28} {:>8}", label, count);
    }
    println!();
    println!("  {:<28} {:>8}", "RELATIONSHIP", "COUNT");
    println!("  {}", "-".repeat(37));
    for (relationship, count) in &stats.edges {
        println!("  {:<28} {:>8}", relationship, count);
    }
    println!();
    println!(
        "  Embedded: {} / {} ({}%)",
        embedded,
        indexable,
        if indexable > 0 {
            (embedded * 100) / indexable
        } else {
            0
        }
    );
    println!();

    graph.close().await;
    vectors.close().await;
    Ok(())
}

/// `ekb reset`: empty the graph and, with `vectors`, the vector index too.
pub async fn run_reset(config: &Config, vectors: bool) -> Result<()> {
    let graph = SqliteGraphStore::open(&config.graph.path).await?;
    graph.reset().await?;
    graph.close().await;
    println!("Graph store cleared.");

    if vectors {
        let store = SqliteVectorStore::open(&config.vectors.path).await?;
        store.clear().await?;
        store.close().await;
        println!("Vector index cleared.");
    }
    Ok(())
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
