//! Core data models.
//!
//! Two families of types flow through the pipeline:
//!
//! - **Raw activity** ([`RawRepository`] and its nested records): the JSON
//!   document produced by extraction and consumed by the graph builder.
//! - **Graph artifacts** ([`Node`], [`Edge`], [`GraphBatch`]): the load-ready
//!   property graph written to `nodes.json` / `edges.json`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ============ Raw activity ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawRepository {
    pub full_name: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    pub url: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub pull_requests: Vec<RawPullRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawPullRequest {
    pub id: u64,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: String,
    pub url: String,
    pub created_at: String,
    #[serde(default)]
    pub merged_at: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub reviewers: Vec<String>,
    #[serde(default)]
    pub comments: Vec<RawComment>,
    #[serde(default)]
    pub commits: Vec<RawCommit>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawComment {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawCommit {
    pub sha: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub committed_at: Option<String>,
    #[serde(default)]
    pub files: Vec<RawFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawFile {
    pub filename: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    /// Unified diff text; absent for binary or oversized changes.
    #[serde(default)]
    pub patch: Option<String>,
}

// ============ Graph artifacts ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeLabel {
    #[serde(alias = "Repo")]
    Repository,
    User,
    PullRequest,
    Commit,
    File,
    Technology,
}

impl NodeLabel {
    pub const ALL: [NodeLabel; 6] = [
        NodeLabel::Repository,
        NodeLabel::User,
        NodeLabel::PullRequest,
        NodeLabel::Commit,
        NodeLabel::File,
        NodeLabel::Technology,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Repository => "Repository",
            NodeLabel::User => "User",
            NodeLabel::PullRequest => "PullRequest",
            NodeLabel::Commit => "Commit",
            NodeLabel::File => "File",
            NodeLabel::Technology => "Technology",
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relationship {
    Authored,
    Includes,
    Modified,
    ContributedToTechnology,
    Reviewed,
}

impl Relationship {
    pub const ALL: [Relationship; 5] = [
        Relationship::Authored,
        Relationship::Includes,
        Relationship::Modified,
        Relationship::ContributedToTechnology,
        Relationship::Reviewed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Authored => "AUTHORED",
            Relationship::Includes => "INCLUDES",
            Relationship::Modified => "MODIFIED",
            Relationship::ContributedToTechnology => "CONTRIBUTED_TO_TECHNOLOGY",
            Relationship::Reviewed => "REVIEWED",
        }
    }

    /// Labels of the (source, target) endpoints this relationship connects.
    pub fn endpoints(&self) -> (NodeLabel, NodeLabel) {
        match self {
            Relationship::Authored | Relationship::Reviewed => {
                (NodeLabel::User, NodeLabel::PullRequest)
            }
            Relationship::Includes => (NodeLabel::PullRequest, NodeLabel::Commit),
            Relationship::Modified => (NodeLabel::Commit, NodeLabel::File),
            Relationship::ContributedToTechnology => (NodeLabel::User, NodeLabel::Technology),
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed graph node, keyed by `id` within its label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub label: NodeLabel,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, label: NodeLabel, properties: Value) -> Self {
        let properties = match properties {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            label,
            properties,
        }
    }

    /// String property, or `None` when missing or not a string.
    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }
}

/// A directed, typed edge between two node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub relationship: Relationship,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
}

impl Edge {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relationship: Relationship,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relationship,
            properties: None,
        }
    }

    /// A `CONTRIBUTED_TO_TECHNOLOGY` edge stamped with its provenance.
    pub fn contribution(user: &str, technology: &str, pull_request_id: &str, commit_id: &str) -> Self {
        let mut props = Map::new();
        props.insert(
            "pull_request_id".to_string(),
            Value::String(pull_request_id.to_string()),
        );
        props.insert("commit_id".to_string(), Value::String(commit_id.to_string()));
        Self {
            source: user.to_string(),
            target: technology.to_string(),
            relationship: Relationship::ContributedToTechnology,
            properties: Some(props),
        }
    }

    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.get(key))
            .and_then(|v| v.as_str())
    }
}

/// The two flat collections handed from the builder to the stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphBatch {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl GraphBatch {
    pub fn count_label(&self, label: NodeLabel) -> usize {
        self.nodes.iter().filter(|n| n.label == label).count()
    }

    pub fn count_relationship(&self, relationship: Relationship) -> usize {
        self.edges
            .iter()
            .filter(|e| e.relationship == relationship)
            .count()
    }
}
