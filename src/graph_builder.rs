//! Raw activity → property graph.
//!
//! Walks each repository's pull requests and emits one [`GraphBatch`]:
//!
//! | Node          | id                           |
//! |---------------|------------------------------|
//! | `Repository`  | `full_name`                  |
//! | `User`        | login                        |
//! | `PullRequest` | `{full_name}/pr/{number}`    |
//! | `Commit`      | sha                          |
//! | `File`        | `{full_name}/{path}`         |
//! | `Technology`  | canonical catalog name       |
//!
//! Nodes are emitted at most once per `(label, id)`. Edges are emitted as
//! encountered; `CONTRIBUTED_TO_TECHNOLOGY` is emitted once per matching file
//! occurrence so repetition reflects contribution volume.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::classify::TechnologyClassifier;
use crate::models::{Edge, GraphBatch, Node, NodeLabel, RawPullRequest, RawRepository, Relationship};

pub const NODES_FILE: &str = "nodes.json";
pub const EDGES_FILE: &str = "edges.json";

/// Identifier of a pull request node.
pub fn pull_request_id(repo_full_name: &str, number: u64) -> String {
    format!("{}/pr/{}", repo_full_name, number)
}

/// Identifier of a file node; paths are scoped to their repository.
pub fn file_id(repo_full_name: &str, path: &str) -> String {
    format!("{}/{}", repo_full_name, path)
}

#[derive(Default)]
struct SeenSets {
    by_label: HashSet<(NodeLabel, String)>,
}

impl SeenSets {
    /// Returns true the first time `(label, id)` is offered.
    fn first(&mut self, label: NodeLabel, id: &str) -> bool {
        self.by_label.insert((label, id.to_string()))
    }
}

/// Login of the PR author; absent, blank and the legacy `"N/A"` mean none.
fn author_of(pr: &RawPullRequest) -> Option<&str> {
    pr.author
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty() && *a != "N/A")
}

/// Build the graph for a sequence of repositories.
///
/// Pure: the same input always yields the same batch.
pub fn build_graph(repos: &[RawRepository], classifier: &TechnologyClassifier) -> GraphBatch {
    let mut batch = GraphBatch::default();
    let mut seen = SeenSets::default();
    for repo in repos {
        add_repository(&mut batch, &mut seen, repo, classifier);
    }
    batch
}

fn add_repository(
    batch: &mut GraphBatch,
    seen: &mut SeenSets,
    repo: &RawRepository,
    classifier: &TechnologyClassifier,
) {
    if seen.first(NodeLabel::Repository, &repo.full_name) {
        batch.nodes.push(Node::new(
            &repo.full_name,
            NodeLabel::Repository,
            json!({
                "name": repo.name,
                "description": repo.description,
                "language": repo.language,
                "url": repo.url,
                "topics": repo.topics,
            }),
        ));
    }

    for pr in &repo.pull_requests {
        let pr_id = pull_request_id(&repo.full_name, pr.number);
        let author = author_of(pr);

        if let Some(login) = author {
            if seen.first(NodeLabel::User, login) {
                batch
                    .nodes
                    .push(Node::new(login, NodeLabel::User, json!({ "login": login })));
            }
        }

        if seen.first(NodeLabel::PullRequest, &pr_id) {
            batch.nodes.push(Node::new(
                &pr_id,
                NodeLabel::PullRequest,
                json!({
                    "number": pr.number,
                    "title": pr.title,
                    "body": pr.body,
                    "url": pr.url,
                    "state": pr.state,
                    "created_at": pr.created_at,
                    "merged_at": pr.merged_at,
                    "repository": repo.full_name,
                }),
            ));
        }

        if let Some(login) = author {
            batch
                .edges
                .push(Edge::new(login, &pr_id, Relationship::Authored));
        }

        for reviewer in &pr.reviewers {
            let reviewer = reviewer.trim();
            if reviewer.is_empty() {
                continue;
            }
            if seen.first(NodeLabel::User, reviewer) {
                batch.nodes.push(Node::new(
                    reviewer,
                    NodeLabel::User,
                    json!({ "login": reviewer }),
                ));
            }
            batch
                .edges
                .push(Edge::new(reviewer, &pr_id, Relationship::Reviewed));
        }

        for commit in &pr.commits {
            if seen.first(NodeLabel::Commit, &commit.sha) {
                batch.nodes.push(Node::new(
                    &commit.sha,
                    NodeLabel::Commit,
                    json!({
                        "message": commit.message,
                        "author": commit.author,
                        "committed_at": commit.committed_at,
                    }),
                ));
            }
            batch
                .edges
                .push(Edge::new(&pr_id, &commit.sha, Relationship::Includes));

            for file in &commit.files {
                let node_id = file_id(&repo.full_name, &file.filename);
                if seen.first(NodeLabel::File, &node_id) {
                    batch.nodes.push(Node::new(
                        &node_id,
                        NodeLabel::File,
                        json!({ "path": file.filename }),
                    ));
                }
                batch
                    .edges
                    .push(Edge::new(&commit.sha, &node_id, Relationship::Modified));

                for tech in classifier.classify(file.patch.as_deref()) {
                    if seen.first(NodeLabel::Technology, tech) {
                        batch
                            .nodes
                            .push(Node::new(tech, NodeLabel::Technology, json!({ "name": tech })));
                    }
                    if let Some(login) = author {
                        batch
                            .edges
                            .push(Edge::contribution(login, tech, &pr_id, &commit.sha));
                    }
                }
            }
        }
    }
}

// ============ Artifacts ============

/// Raw activity is written as a list of repositories; a bare repository
/// object is accepted too.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDocument {
    Many(Vec<RawRepository>),
    One(RawRepository),
}

pub fn parse_raw(content: &str) -> Result<Vec<RawRepository>> {
    Ok(match serde_json::from_str(content)? {
        RawDocument::Many(repos) => repos,
        RawDocument::One(repo) => vec![repo],
    })
}

pub fn read_raw(path: &Path) -> Result<Vec<RawRepository>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read raw activity: {}", path.display()))?;
    parse_raw(&content).with_context(|| format!("Failed to parse raw activity: {}", path.display()))
}

pub fn write_artifacts(batch: &GraphBatch, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    std::fs::write(dir.join(NODES_FILE), serde_json::to_string_pretty(&batch.nodes)?)?;
    std::fs::write(dir.join(EDGES_FILE), serde_json::to_string_pretty(&batch.edges)?)?;
    Ok(())
}

pub fn read_artifacts(dir: &Path) -> Result<GraphBatch> {
    let nodes_path = dir.join(NODES_FILE);
    let edges_path = dir.join(EDGES_FILE);
    let nodes = std::fs::read_to_string(&nodes_path)
        .with_context(|| format!("Failed to read {}", nodes_path.display()))?;
    let edges = std::fs::read_to_string(&edges_path)
        .with_context(|| format!("Failed to read {}", edges_path.display()))?;
    Ok(GraphBatch {
        nodes: serde_json::from_str(&nodes)
            .with_context(|| format!("Failed to parse {}", nodes_path.display()))?,
        edges: serde_json::from_str(&edges)
            .with_context(|| format!("Failed to parse {}", edges_path.display()))?,
    })
}

/// `ekb build`: raw activity file → `nodes.json` / `edges.json`.
pub fn run_build(input: &Path, out_dir: &Path) -> Result<GraphBatch> {
    let repos = read_raw(input)?;
    let classifier = TechnologyClassifier::new()?;

    for repo in &repos {
        if repo.pull_requests.is_empty() {
            warn!(repo = %repo.full_name, "raw activity has no pull requests");
        }
    }

    let batch = build_graph(&repos, &classifier);
    write_artifacts(&batch, out_dir)?;

    info!(
        repositories = repos.len(),
        nodes = batch.nodes.len(),
        edges = batch.edges.len(),
        "graph artifacts written"
    );

    println!("build");
    println!("  repositories: {}", repos.len());
    for label in NodeLabel::ALL {
        println!("  {:<26} {}", label.as_str(), batch.count_label(label));
    }
    for rel in Relationship::ALL {
        println!("  {:<26} {}", rel.as_str(), batch.count_relationship(rel));
    }
    println!("  written to {}", out_dir.display());

    Ok(batch)
}
