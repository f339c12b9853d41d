//! Property-graph storage and the read queries behind expertise lookups.
//!
//! [`GraphStore`] is the seam between the query-time components and the
//! backing store. [`SqliteGraphStore`] keeps nodes and edges in two tables
//! and answers every traversal with a single SQL statement:
//!
//! | Operation                | Traversal                                               |
//! |--------------------------|---------------------------------------------------------|
//! | `user_expertise`         | `User -CONTRIBUTED_TO_TECHNOLOGY-> Technology`, counted |
//! |                          | `User -AUTHORED-> PullRequest -INCLUDES-> Commit`       |
//! | `technology_experts`     | `User -CONTRIBUTED_TO_TECHNOLOGY-> Technology`, top 10  |
//! | `enrich`                 | candidate → owning PR → author, per-PR technologies     |
//!
//! User ids and technology names match case-insensitively. Missing users or
//! technologies are not errors: the [`Evidence`] they produce is a sentinel
//! sentence the synthesizer can pass through.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

use crate::db;
use crate::error::KbError;
use crate::migrate;
use crate::models::{GraphBatch, NodeLabel, Relationship};

pub const NO_USER_DATA: &str = "No data found for this user.";

/// Maximum experts returned per technology.
pub const EXPERT_LIMIT: i64 = 10;

/// Maximum recent commit messages sampled per user.
pub const RECENT_COMMIT_LIMIT: i64 = 10;

pub fn no_experts_for(technology: &str) -> String {
    format!("No users found with contributions to '{}'.", technology)
}

// ============ Evidence ============

/// Text handed to the synthesizer or router as grounding context.
#[derive(Debug, Clone, PartialEq)]
pub enum Evidence {
    /// Ranked facts drawn from the graph.
    Found(String),
    /// Sentinel sentence for an empty lookup.
    NotFound(String),
}

impl Evidence {
    pub fn text(&self) -> &str {
        match self {
            Evidence::Found(text) | Evidence::NotFound(text) => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Evidence::Found(text) | Evidence::NotFound(text) => text,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Evidence::Found(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TechnologyCount {
    pub name: String,
    pub contributions: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserExpertise {
    pub user_id: String,
    /// Career-wide contribution counts, highest first.
    pub technologies: Vec<TechnologyCount>,
    /// Most recent commit messages, newest first.
    pub recent_commits: Vec<String>,
    pub reviewed_pull_requests: i64,
}

impl UserExpertise {
    pub fn evidence(&self) -> Evidence {
        if self.technologies.is_empty() {
            return Evidence::NotFound(NO_USER_DATA.to_string());
        }

        let mut text = String::from("Ranked Technology Contributions:\n");
        for tech in &self.technologies {
            text.push_str(&format!(
                "- {}: {} contributions\n",
                tech.name, tech.contributions
            ));
        }

        if self.reviewed_pull_requests > 0 {
            text.push_str(&format!(
                "\nPull requests reviewed: {}\n",
                self.reviewed_pull_requests
            ));
        }

        if !self.recent_commits.is_empty() {
            text.push_str("\nSample of recent commit messages:\n");
            for message in &self.recent_commits {
                text.push_str(&format!("- {}\n", message.trim()));
            }
        }

        Evidence::Found(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpertCount {
    pub user: String,
    pub contributions: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TechnologyExperts {
    pub technology: String,
    /// At most [`EXPERT_LIMIT`] users, highest count first.
    pub experts: Vec<ExpertCount>,
}

impl TechnologyExperts {
    pub fn evidence(&self) -> Evidence {
        if self.experts.is_empty() {
            return Evidence::NotFound(no_experts_for(&self.technology));
        }

        let mut text = format!(
            "List of users who contributed to {}, ranked by number of contributions:\n",
            self.technology
        );
        for expert in &self.experts {
            text.push_str(&format!(
                "- User: {}, Contributions: {}\n",
                expert.user, expert.contributions
            ));
        }
        Evidence::Found(text)
    }
}

/// One vector hit joined with its graph neighbourhood.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    /// Position of the candidate in the input id list.
    pub rank: usize,
    pub author: String,
    pub node_type: String,
    pub content: String,
    pub pr_url: String,
    /// Distinct technologies the author touched within the owning PR.
    pub technologies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub nodes: usize,
    pub edges_inserted: u64,
    pub edges_existing: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphStats {
    pub nodes: BTreeMap<String, i64>,
    pub edges: BTreeMap<String, i64>,
}

// ============ Trait ============

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Validate and upsert a batch; nodes by `(label, id)`, edges by key.
    async fn load(&self, batch: &GraphBatch) -> Result<LoadReport>;

    async fn user_expertise(&self, user_id: &str) -> Result<UserExpertise>;

    async fn technology_experts(&self, technology: &str) -> Result<TechnologyExperts>;

    /// Resolve vector hits to authored context in one round trip.
    ///
    /// Ids with no authoring user are omitted. Records come back in
    /// candidate order.
    async fn enrich(&self, ids: &[String]) -> Result<Vec<EnrichedRecord>>;

    /// Remove every node and edge.
    async fn reset(&self) -> Result<()>;

    async fn stats(&self) -> Result<GraphStats>;
}

// ============ Batch validation ============

/// Reject edges whose endpoints are not nodes of the batch.
pub fn validate_batch(batch: &GraphBatch) -> Result<()> {
    let known: HashSet<(NodeLabel, &str)> = batch
        .nodes
        .iter()
        .map(|n| (n.label, n.id.as_str()))
        .collect();

    let dangling: Vec<String> = batch
        .edges
        .iter()
        .filter(|e| {
            let (src, dst) = e.relationship.endpoints();
            !known.contains(&(src, e.source.as_str())) || !known.contains(&(dst, e.target.as_str()))
        })
        .map(|e| format!("{} -[{}]-> {}", e.source, e.relationship, e.target))
        .collect();

    if let Some(first) = dangling.first() {
        for edge in dangling.iter().take(20) {
            debug!(edge = %edge, "dangling edge");
        }
        return Err(KbError::DanglingEdges {
            count: dangling.len(),
            first: first.clone(),
        }
        .into());
    }
    Ok(())
}

/// Keys for each edge in batch order.
///
/// Identical edges get successive occurrence ordinals so that loading the
/// same batch twice is a no-op while repeated contributions stay distinct.
pub fn edge_keys(batch: &GraphBatch) -> Result<Vec<(String, i64)>> {
    let mut seen: HashMap<String, i64> = HashMap::new();
    let mut keys = Vec::with_capacity(batch.edges.len());

    for edge in &batch.edges {
        let props = serde_json::to_string(&edge.properties)?;
        let content = format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}",
            edge.relationship, edge.source, edge.target, props
        );
        let occurrence = seen.entry(content.clone()).or_insert(0);
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hasher.update(occurrence.to_le_bytes());
        keys.push((format!("{:x}", hasher.finalize()), *occurrence));
        *occurrence += 1;
    }

    Ok(keys)
}

// ============ SQLite ============

pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    /// Open the database at `path`, creating the schema if needed.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::migrate_graph(&pool).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

const ENRICH_SQL: &str = r#"
WITH candidates(node_id, ord) AS (
    SELECT value, CAST(key AS INTEGER) FROM json_each(?1)
),
hits(ord, node_type, content, pr_id) AS (
    SELECT c.ord, n.label, json_extract(n.properties_json, '$.title'), n.id
    FROM candidates c
    JOIN nodes n ON n.label = 'PullRequest' AND n.id = c.node_id
    UNION ALL
    SELECT c.ord, n.label, json_extract(n.properties_json, '$.message'), i.source
    FROM candidates c
    JOIN nodes n ON n.label = 'Commit' AND n.id = c.node_id
    JOIN edges i ON i.relationship = 'INCLUDES' AND i.target = n.id
)
SELECT DISTINCT
    h.ord,
    a.source,
    h.node_type,
    h.content,
    json_extract(pr.properties_json, '$.url'),
    (SELECT json_group_array(DISTINCT t.target)
       FROM edges t
      WHERE t.relationship = 'CONTRIBUTED_TO_TECHNOLOGY'
        AND t.source = a.source
        AND t.pull_request_id = h.pr_id)
FROM hits h
JOIN edges a ON a.relationship = 'AUTHORED' AND a.target = h.pr_id
JOIN nodes pr ON pr.label = 'PullRequest' AND pr.id = h.pr_id
ORDER BY h.ord, a.source
"#;

type EnrichRow = (
    i64,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn load(&self, batch: &GraphBatch) -> Result<LoadReport> {
        validate_batch(batch)?;
        let keys = edge_keys(batch)?;

        let mut tx = self.pool.begin().await?;

        for node in &batch.nodes {
            let props = serde_json::to_string(&node.properties)?;
            sqlx::query(
                r#"
                INSERT INTO nodes (id, label, properties_json)
                VALUES (?, ?, ?)
                ON CONFLICT(label, id) DO UPDATE SET
                    properties_json = excluded.properties_json
                "#,
            )
            .bind(&node.id)
            .bind(node.label.as_str())
            .bind(&props)
            .execute(&mut *tx)
            .await?;
        }

        let mut report = LoadReport {
            nodes: batch.nodes.len(),
            ..Default::default()
        };

        for (edge, (key, occurrence)) in batch.edges.iter().zip(keys) {
            let (source_label, target_label) = edge.relationship.endpoints();
            let props = match &edge.properties {
                Some(map) => Some(serde_json::to_string(map)?),
                None => None,
            };
            let result = sqlx::query(
                r#"
                INSERT INTO edges (edge_key, relationship, source, source_label,
                                   target, target_label, pull_request_id, commit_id,
                                   occurrence, properties_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(edge_key) DO NOTHING
                "#,
            )
            .bind(&key)
            .bind(edge.relationship.as_str())
            .bind(&edge.source)
            .bind(source_label.as_str())
            .bind(&edge.target)
            .bind(target_label.as_str())
            .bind(edge.prop_str("pull_request_id"))
            .bind(edge.prop_str("commit_id"))
            .bind(occurrence)
            .bind(props)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                report.edges_inserted += 1;
            } else {
                report.edges_existing += 1;
            }
        }

        tx.commit().await?;

        info!(
            nodes = report.nodes,
            edges_inserted = report.edges_inserted,
            edges_existing = report.edges_existing,
            "graph batch loaded"
        );
        Ok(report)
    }

    async fn user_expertise(&self, user_id: &str) -> Result<UserExpertise> {
        let counts: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT target, COUNT(*) AS contributions
            FROM edges
            WHERE relationship = 'CONTRIBUTED_TO_TECHNOLOGY'
              AND source = ?1 COLLATE NOCASE
            GROUP BY target
            ORDER BY contributions DESC, target ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let commits: Vec<(String, Option<String>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT DISTINCT c.id,
                   json_extract(c.properties_json, '$.message') AS message,
                   json_extract(c.properties_json, '$.committed_at') AS committed_at
            FROM edges a
            JOIN edges i ON i.relationship = 'INCLUDES' AND i.source = a.target
            JOIN nodes c ON c.label = 'Commit' AND c.id = i.target
            WHERE a.relationship = 'AUTHORED'
              AND a.source = ?1 COLLATE NOCASE
            ORDER BY committed_at DESC
            LIMIT ?2
            "#,
        )
        .bind(user_id)
        .bind(RECENT_COMMIT_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let reviewed: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT target)
            FROM edges
            WHERE relationship = 'REVIEWED'
              AND source = ?1 COLLATE NOCASE
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(UserExpertise {
            user_id: user_id.to_string(),
            technologies: counts
                .into_iter()
                .map(|(name, contributions)| TechnologyCount {
                    name,
                    contributions,
                })
                .collect(),
            recent_commits: commits
                .into_iter()
                .filter_map(|(_, message, _)| message)
                .filter(|m| !m.trim().is_empty())
                .collect(),
            reviewed_pull_requests: reviewed,
        })
    }

    async fn technology_experts(&self, technology: &str) -> Result<TechnologyExperts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT source, COUNT(*) AS contributions
            FROM edges
            WHERE relationship = 'CONTRIBUTED_TO_TECHNOLOGY'
              AND target = ?1 COLLATE NOCASE
            GROUP BY source
            ORDER BY contributions DESC, source ASC
            LIMIT ?2
            "#,
        )
        .bind(technology)
        .bind(EXPERT_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        Ok(TechnologyExperts {
            technology: technology.to_string(),
            experts: rows
                .into_iter()
                .map(|(user, contributions)| ExpertCount {
                    user,
                    contributions,
                })
                .collect(),
        })
    }

    async fn enrich(&self, ids: &[String]) -> Result<Vec<EnrichedRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<EnrichRow> = sqlx::query_as(ENRICH_SQL)
            .bind(serde_json::to_string(ids)?)
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for (ord, author, node_type, content, pr_url, technologies) in rows {
            let mut technologies: Vec<String> = match technologies {
                Some(json) => serde_json::from_str(&json)?,
                None => Vec::new(),
            };
            technologies.sort();
            records.push(EnrichedRecord {
                rank: ord as usize,
                author,
                node_type,
                content: content.unwrap_or_else(|| "N/A".to_string()),
                pr_url: pr_url.unwrap_or_else(|| "N/A".to_string()),
                technologies,
            });
        }

        debug!(
            candidates = ids.len(),
            records = records.len(),
            "graph enrichment"
        );
        Ok(records)
    }

    async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM edges").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM nodes").execute(&mut *tx).await?;
        tx.commit().await?;
        info!("graph store reset");
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats> {
        let nodes: Vec<(String, i64)> =
            sqlx::query_as("SELECT label, COUNT(*) FROM nodes GROUP BY label")
                .fetch_all(&self.pool)
                .await?;
        let edges: Vec<(String, i64)> =
            sqlx::query_as("SELECT relationship, COUNT(*) FROM edges GROUP BY relationship")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = GraphStats::default();
        for label in NodeLabel::ALL {
            stats.nodes.insert(label.as_str().to_string(), 0);
        }
        for rel in Relationship::ALL {
            stats.edges.insert(rel.as_str().to_string(), 0);
        }
        stats.nodes.extend(nodes);
        stats.edges.extend(edges);
        Ok(stats)
    }
}
