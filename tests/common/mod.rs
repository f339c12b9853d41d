//! Shared fixtures and test doubles for the integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use expertise_kb::app::AppContext;
use expertise_kb::classify::TechnologyClassifier;
use expertise_kb::config::{self, Config};
use expertise_kb::embedding::EmbeddingProvider;
use expertise_kb::graph_builder::build_graph;
use expertise_kb::graph_store::{
    EnrichedRecord, GraphStats, GraphStore, LoadReport, SqliteGraphStore, TechnologyExperts,
    UserExpertise,
};
use expertise_kb::llm::{ChatModel, ChatReply, ChatRequest, ToolCall};
use expertise_kb::models::{GraphBatch, RawCommit, RawFile, RawPullRequest, RawRepository};
use expertise_kb::vector_index::index_nodes;
use expertise_kb::vector_store::SqliteVectorStore;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ─── Chat model double ──────────────────────────────────────────────

/// Replays canned replies in order and records every request it sees.
pub struct ScriptedChatModel {
    replies: Mutex<VecDeque<Result<ChatReply, String>>>,
    requests: Mutex<Vec<ChatRequest>>,
    calls: AtomicUsize,
}

impl ScriptedChatModel {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn reply_text(self, text: &str) -> Self {
        self.push(Ok(ChatReply {
            content: Some(text.to_string()),
            tool_calls: Vec::new(),
        }))
    }

    pub fn reply_tool(self, name: &str, arguments: &str) -> Self {
        self.push(Ok(ChatReply {
            content: None,
            tool_calls: vec![ToolCall {
                id: format!("call_{}", name),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
        }))
    }

    pub fn fail(self, message: &str) -> Self {
        self.push(Err(message.to_string()))
    }

    fn push(self, reply: Result<ChatReply, String>) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => bail!(message),
            None => bail!("scripted model has no reply left"),
        }
    }
}

// ─── Embedding double ───────────────────────────────────────────────

pub const BAG_DIMS: usize = 64;

/// Deterministic bag-of-words embedder: each lowercase token adds weight to
/// one bucket, so texts sharing words land close together.
pub struct BagOfWordsEmbedder {
    calls: AtomicUsize,
}

impl BagOfWordsEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; BAG_DIMS];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
        {
            let bucket = fnv1a(&token.to_lowercase()) as usize % BAG_DIMS;
            v[bucket] += 1.0;
        }
        v
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in s.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for BagOfWordsEmbedder {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }

    fn dims(&self) -> usize {
        BAG_DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Refuses every batch, or only batches containing `poison` when set.
pub struct FailingEmbedder {
    poison: Option<&'static str>,
    inner: BagOfWordsEmbedder,
}

impl FailingEmbedder {
    pub fn always() -> Self {
        Self {
            poison: None,
            inner: BagOfWordsEmbedder::new(),
        }
    }

    pub fn on_text(poison: &'static str) -> Self {
        Self {
            poison: Some(poison),
            inner: BagOfWordsEmbedder::new(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        BAG_DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match self.poison {
            Some(word) if !texts.iter().any(|t| t.contains(word)) => self.inner.embed(texts).await,
            _ => bail!("embedding service unreachable"),
        }
    }
}

// ─── Graph store double ─────────────────────────────────────────────

/// Delegates to SQLite and counts enrichment round trips.
pub struct CountingGraphStore {
    inner: SqliteGraphStore,
    enrich_calls: AtomicUsize,
}

impl CountingGraphStore {
    pub fn new(inner: SqliteGraphStore) -> Self {
        Self {
            inner,
            enrich_calls: AtomicUsize::new(0),
        }
    }

    pub fn enrich_calls(&self) -> usize {
        self.enrich_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphStore for CountingGraphStore {
    async fn load(&self, batch: &GraphBatch) -> Result<LoadReport> {
        self.inner.load(batch).await
    }

    async fn user_expertise(&self, user_id: &str) -> Result<UserExpertise> {
        self.inner.user_expertise(user_id).await
    }

    async fn technology_experts(&self, technology: &str) -> Result<TechnologyExperts> {
        self.inner.technology_experts(technology).await
    }

    async fn enrich(&self, ids: &[String]) -> Result<Vec<EnrichedRecord>> {
        self.enrich_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.enrich(ids).await
    }

    async fn reset(&self) -> Result<()> {
        self.inner.reset().await
    }

    async fn stats(&self) -> Result<GraphStats> {
        self.inner.stats().await
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

pub const REACT_PATCH: &str = "+import React, { useState } from 'react';";
pub const WEBSOCKET_PATCH: &str = "+const ws = new WebSocket(url);";

pub fn file(name: &str, patch: &str) -> RawFile {
    RawFile {
        filename: name.to_string(),
        status: "modified".to_string(),
        additions: 1,
        deletions: 0,
        patch: Some(patch.to_string()),
    }
}

pub fn commit(sha: &str, message: &str, files: Vec<RawFile>) -> RawCommit {
    RawCommit {
        sha: sha.to_string(),
        author: None,
        email: None,
        message: message.to_string(),
        committed_at: Some("2024-03-01T10:00:00Z".to_string()),
        files,
    }
}

pub fn pull_request(
    number: u64,
    title: &str,
    author: Option<&str>,
    commits: Vec<RawCommit>,
) -> RawPullRequest {
    RawPullRequest {
        id: 1000 + number,
        number,
        title: title.to_string(),
        body: None,
        state: "closed".to_string(),
        url: format!("https://github.com/acme/web/pull/{}", number),
        created_at: "2024-03-01T09:00:00Z".to_string(),
        merged_at: Some("2024-03-02T09:00:00Z".to_string()),
        author: author.map(str::to_string),
        reviewers: Vec::new(),
        comments: Vec::new(),
        commits,
    }
}

pub fn repository(pull_requests: Vec<RawPullRequest>) -> RawRepository {
    RawRepository {
        full_name: "acme/web".to_string(),
        name: "web".to_string(),
        description: Some("Customer web app".to_string()),
        language: Some("TypeScript".to_string()),
        url: "https://github.com/acme/web".to_string(),
        topics: vec!["frontend".to_string()],
        pull_requests,
    }
}

/// mchill touches five React files in one commit; alice ships a WebSocket
/// change whose title mentions streaming.
pub fn sample_repository() -> RawRepository {
    let react_files = (1..=5)
        .map(|i| file(&format!("src/components/Panel{}.jsx", i), REACT_PATCH))
        .collect();
    repository(vec![
        pull_request(
            7,
            "Add streaming response support",
            Some("alice"),
            vec![commit(
                "c7a",
                "Open a socket for streamed tokens",
                vec![file("src/stream.js", WEBSOCKET_PATCH)],
            )],
        ),
        pull_request(
            8,
            "Refactor dashboard panels",
            Some("mchill"),
            vec![commit("c8a", "Convert panels to hooks", react_files)],
        ),
    ])
}

/// [`sample_repository`] plus a second alice PR touching React (which the
/// Docker signature also matches) and a PR with no author.
pub fn scoped_repository() -> RawRepository {
    let mut repo = sample_repository();
    repo.pull_requests.push(pull_request(
        9,
        "Build dashboard shell",
        Some("alice"),
        vec![commit(
            "c9a",
            "Scaffold the shell layout",
            vec![file("src/Shell.jsx", REACT_PATCH)],
        )],
    ));
    repo.pull_requests.push(pull_request(
        10,
        "Unowned cleanup",
        None,
        vec![commit(
            "c10a",
            "Remove dead sockets",
            vec![file("src/legacy.js", WEBSOCKET_PATCH)],
        )],
    ));
    repo
}

/// Users `u01`..`u12`; user `uNN` authors one PR of NN commits, each touching
/// one React file on day NN of March.
pub fn crowded_repository() -> RawRepository {
    let pulls = (1..=12u64)
        .map(|n| {
            let login = format!("u{:02}", n);
            let commits = (1..=n)
                .map(|day| {
                    let mut c = commit(
                        &format!("{}-{:02}", login, day),
                        &format!("{} change {:02}", login, day),
                        vec![file(&format!("src/{}/Part{:02}.jsx", login, day), REACT_PATCH)],
                    );
                    c.committed_at = Some(format!("2024-03-{:02}T10:00:00Z", day));
                    c
                })
                .collect();
            pull_request(100 + n, &format!("{} work", login), Some(&login), commits)
        })
        .collect();
    repository(pulls)
}

pub fn batch_of(repo: RawRepository) -> GraphBatch {
    let classifier = TechnologyClassifier::new().unwrap();
    build_graph(&[repo], &classifier)
}

pub fn sample_batch() -> GraphBatch {
    let classifier = TechnologyClassifier::new().unwrap();
    build_graph(&[sample_repository()], &classifier)
}

pub fn test_config(tmp: &TempDir) -> Config {
    let root = tmp.path();
    let content = format!(
        r#"[graph]
path = "{}/data/graph.sqlite"

[vectors]
path = "{}/data/vectors.sqlite"

[retrieval]
top_n = 5
store_timeout_secs = 5

[server]
bind = "127.0.0.1:0"
"#,
        root.display(),
        root.display()
    );
    config::parse_config(&content).unwrap()
}

pub async fn open_graph(path: &Path) -> SqliteGraphStore {
    SqliteGraphStore::open(path).await.unwrap()
}

/// Stores on disk loaded with [`sample_batch`] and fully indexed.
pub async fn loaded_context(tmp: &TempDir, chat: Arc<ScriptedChatModel>) -> AppContext {
    let cfg = test_config(tmp);
    let graph = open_graph(&cfg.graph.path).await;
    let vectors = SqliteVectorStore::open(&cfg.vectors.path).await.unwrap();
    let embedder = Arc::new(BagOfWordsEmbedder::new());

    let batch = sample_batch();
    graph.load(&batch).await.unwrap();
    index_nodes(&batch.nodes, embedder.as_ref(), &vectors, 16, false)
        .await
        .unwrap();

    AppContext::from_parts(cfg, Arc::new(graph), Arc::new(vectors), embedder, chat)
}
