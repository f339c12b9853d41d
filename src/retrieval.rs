//! Semantic search fused with graph enrichment.
//!
//! A question is embedded, the nearest PullRequest/Commit vectors are
//! fetched, and all candidate ids are resolved against the graph in a single
//! batched query. Each resolved record becomes one evidence line:
//!
//! ```text
//! - User 'alice' worked on a PullRequest with content: 'Add streaming response support'. PR URL: https://…/pull/7. Involved technologies: WebSockets.
//! ```
//!
//! Vector hits with no authoring user in the graph are dropped silently.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::embedding::{self, EmbeddingProvider};
use crate::error::{with_timeout, Service};
use crate::graph_store::{EnrichedRecord, GraphStore};
use crate::vector_store::{VectorHit, VectorStore};

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    top_n: usize,
    timeout: Duration,
}

/// Render one enrichment record as an evidence line (with trailing newline).
pub fn context_line(record: &EnrichedRecord) -> String {
    let technologies = if record.technologies.is_empty() {
        "N/A".to_string()
    } else {
        record.technologies.join(", ")
    };
    format!(
        "- User '{}' worked on a {} with content: '{}'. PR URL: {}. Involved technologies: {}.\n",
        record.author, record.node_type, record.content, record.pr_url, technologies
    )
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        top_n: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            vectors,
            graph,
            top_n,
            timeout,
        }
    }

    /// Nearest stored documents to `query`, closest first.
    pub async fn semantic_search(&self, query: &str, limit: usize) -> Result<Vec<VectorHit>> {
        let embedding = with_timeout(
            Service::Embedding,
            self.timeout,
            embedding::embed_query(self.embedder.as_ref(), query),
        )
        .await?;

        let hits = with_timeout(
            Service::VectorStore,
            self.timeout,
            self.vectors.query(&embedding, limit),
        )
        .await?;

        debug!(query, candidates = hits.len(), "semantic search");
        Ok(hits)
    }

    /// Evidence for `query`; empty when nothing in the index is near it.
    pub async fn retrieve_context(&self, query: &str) -> Result<String> {
        let hits = self.semantic_search(query, self.top_n).await?;
        if hits.is_empty() {
            return Ok(String::new());
        }

        let ids: Vec<String> = hits.into_iter().map(|h| h.id).collect();
        let records = with_timeout(Service::GraphStore, self.timeout, self.graph.enrich(&ids)).await?;

        debug!(records = records.len(), "graph enrichment complete");
        Ok(records.iter().map(context_line).collect())
    }
}
