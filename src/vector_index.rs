//! Embeds pull-request and commit text into the vector store.
//!
//! Documents are keyed by graph node id so a vector hit can be joined back
//! to the graph. Each stored entry remembers the model and a SHA-256 of its
//! document; re-running skips entries whose text and model are unchanged.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{KbError, Service};
use crate::graph_builder;
use crate::models::{Node, NodeLabel};
use crate::vector_store::{SqliteVectorStore, VectorEntry, VectorStore};

/// A node rendered as embeddable text.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub id: String,
    pub label: NodeLabel,
    pub text: String,
    pub hash: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexReport {
    pub candidates: usize,
    pub skipped: usize,
    pub embedded: usize,
}

/// Text for a node, or `None` for labels that are not indexed.
pub fn document_for_node(node: &Node) -> Option<String> {
    match node.label {
        NodeLabel::PullRequest => Some(format!(
            "Title: {}. Body: {}",
            node.prop_str("title").unwrap_or_default(),
            node.prop_str("body").unwrap_or_default()
        )),
        NodeLabel::Commit => Some(format!(
            "Commit message: {}",
            node.prop_str("message").unwrap_or_default()
        )),
        _ => None,
    }
}

pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

pub fn collect_documents(nodes: &[Node]) -> Vec<IndexDocument> {
    nodes
        .iter()
        .filter_map(|node| {
            document_for_node(node).map(|text| IndexDocument {
                id: node.id.clone(),
                label: node.label,
                hash: content_hash(&text),
                text,
            })
        })
        .collect()
}

/// Embed and upsert every indexable node.
///
/// A batch whose embedding call fails, or that comes back with the wrong
/// shape, is logged and counted while the remaining batches still run.
/// Any failed batch makes the call return [`KbError::Upstream`] once the
/// successful ones are stored.
pub async fn index_nodes(
    nodes: &[Node],
    embedder: &dyn EmbeddingProvider,
    store: &dyn VectorStore,
    batch_size: usize,
    rebuild: bool,
) -> Result<IndexReport> {
    if batch_size == 0 {
        bail!("batch size must be > 0");
    }

    if rebuild {
        store.clear().await?;
        info!("vector index cleared");
    }

    let model = embedder.model_name().to_string();
    let dims = embedder.dims();
    let existing = store.content_hashes(&model).await?;
    let documents = collect_documents(nodes);

    let mut report = IndexReport {
        candidates: documents.len(),
        ..Default::default()
    };

    let pending: Vec<&IndexDocument> = documents
        .iter()
        .filter(|doc| existing.get(&doc.id) != Some(&doc.hash))
        .collect();
    report.skipped = documents.len() - pending.len();
    let mut failed = 0usize;

    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();

        let vectors = match embedder.embed(&texts).await {
            Ok(vectors) if vectors.len() != batch.len() => {
                warn!(
                    expected = batch.len(),
                    got = vectors.len(),
                    "embedding batch returned wrong number of vectors"
                );
                failed += batch.len();
                continue;
            }
            Ok(vectors) if vectors.iter().any(|v| v.len() != dims) => {
                warn!(
                    expected = dims,
                    model = %model,
                    "embedding batch returned vectors of the wrong dimension"
                );
                failed += batch.len();
                continue;
            }
            Ok(vectors) => vectors,
            Err(e) => {
                warn!(error = %e, size = batch.len(), "embedding batch failed");
                failed += batch.len();
                continue;
            }
        };

        let entries: Vec<VectorEntry> = batch
            .iter()
            .zip(vectors)
            .map(|(doc, embedding)| VectorEntry {
                id: doc.id.clone(),
                label: doc.label.as_str().to_string(),
                document: doc.text.clone(),
                embedding,
                model: model.clone(),
                content_hash: doc.hash.clone(),
            })
            .collect();

        store.upsert(&entries).await?;
        report.embedded += entries.len();
    }

    info!(
        candidates = report.candidates,
        skipped = report.skipped,
        embedded = report.embedded,
        failed,
        "vector index updated"
    );

    if failed > 0 {
        return Err(KbError::upstream(
            Service::Embedding,
            format!(
                "{} of {} documents failed to embed ({} embedded)",
                failed,
                pending.len(),
                report.embedded
            ),
        )
        .into());
    }
    Ok(report)
}

/// `ekb embed`: index the nodes in `nodes.json` under `artifacts`.
pub async fn run_embed(
    config: &Config,
    artifacts: &Path,
    batch_size_override: Option<usize>,
    rebuild: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let batch = graph_builder::read_artifacts(artifacts)?;
    let provider = embedding::create_provider(&config.embedding)?;
    let store = SqliteVectorStore::open(&config.vectors.path).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let report = index_nodes(
        &batch.nodes,
        provider.as_ref(),
        &store,
        batch_size,
        rebuild,
    )
    .await?;

    println!("embed{}", if rebuild { " (rebuild)" } else { "" });
    println!("  model: {}", provider.model_name());
    println!("  documents: {}", report.candidates);
    println!("  unchanged: {}", report.skipped);
    println!("  embedded: {}", report.embedded);

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pull_request_document() {
        let node = Node::new(
            "acme/web/pr/1",
            NodeLabel::PullRequest,
            json!({"title": "Add streaming", "body": "Uses sockets"}),
        );
        assert_eq!(
            document_for_node(&node).as_deref(),
            Some("Title: Add streaming. Body: Uses sockets")
        );
    }

    #[test]
    fn test_null_body_renders_empty() {
        let node = Node::new(
            "acme/web/pr/2",
            NodeLabel::PullRequest,
            json!({"title": "Fix", "body": null}),
        );
        assert_eq!(document_for_node(&node).as_deref(), Some("Title: Fix. Body: "));
    }

    #[test]
    fn test_commit_document_and_skipped_labels() {
        let commit = Node::new("c1", NodeLabel::Commit, json!({"message": "Bump deps"}));
        assert_eq!(
            document_for_node(&commit).as_deref(),
            Some("Commit message: Bump deps")
        );
        let user = Node::new("alice", NodeLabel::User, json!({"login": "alice"}));
        assert!(document_for_node(&user).is_none());
    }

    #[test]
    fn test_collect_documents_hashes_text() {
        let nodes = vec![
            Node::new("c1", NodeLabel::Commit, json!({"message": "A"})),
            Node::new("React", NodeLabel::Technology, json!({"name": "React"})),
        ];
        let docs = collect_documents(&nodes);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].hash, content_hash("Commit message: A"));
    }
}
