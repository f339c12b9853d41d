//! End-to-end tests over real SQLite stores with scripted model doubles.
//!
//! Each test builds the graph from raw activity, loads it, indexes it, and
//! then exercises the query side (retrieval, analysis, routing) the way the
//! CLI and HTTP server do.

mod common;

use common::*;
use expertise_kb::classify::TechnologyClassifier;
use expertise_kb::error::{KbError, Service};
use expertise_kb::graph_builder::build_graph;
use expertise_kb::embedding::EmbeddingProvider;
use expertise_kb::graph_store::{no_experts_for, Evidence, GraphStore, EXPERT_LIMIT, NO_USER_DATA};
use expertise_kb::llm::ChatMessage;
use expertise_kb::models::{Edge, GraphBatch, Node, NodeLabel, Relationship};
use expertise_kb::retrieval::Retriever;
use expertise_kb::router::{Conversation, ToolInvocation, APOLOGY};
use expertise_kb::synthesize::NO_RELEVANT_INFORMATION;
use expertise_kb::vector_index::index_nodes;
use expertise_kb::vector_store::{SqliteVectorStore, VectorStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ─── Graph store ────────────────────────────────────────────────────

#[tokio::test]
async fn test_file_level_contributions_survive_load() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let graph = open_graph(&cfg.graph.path).await;

    graph.load(&sample_batch()).await.unwrap();

    let expertise = graph.user_expertise("mchill").await.unwrap();
    let react = expertise
        .technologies
        .iter()
        .find(|t| t.name == "React")
        .unwrap();
    assert_eq!(react.contributions, 5);
    assert!(expertise
        .evidence()
        .text()
        .contains("- React: 5 contributions\n"));
    assert_eq!(expertise.recent_commits, vec!["Convert panels to hooks"]);

    let experts = graph.technology_experts("react").await.unwrap();
    assert_eq!(experts.experts.len(), 1);
    assert_eq!(experts.experts[0].user, "mchill");
    assert_eq!(experts.experts[0].contributions, 5);
}

#[tokio::test]
async fn test_authorless_pull_request_contributes_nothing() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let graph = open_graph(&cfg.graph.path).await;

    let repo = repository(vec![pull_request(
        3,
        "Ghost change",
        None,
        vec![commit("g1", "Sockets", vec![file("src/live.js", WEBSOCKET_PATCH)])],
    )]);
    let batch = build_graph(&[repo], &TechnologyClassifier::new().unwrap());
    graph.load(&batch).await.unwrap();

    let stats = graph.stats().await.unwrap();
    assert_eq!(stats.nodes["User"], 0);
    assert_eq!(stats.nodes["Technology"], 1);
    assert_eq!(stats.edges["AUTHORED"], 0);
    assert_eq!(stats.edges["CONTRIBUTED_TO_TECHNOLOGY"], 0);

    let evidence = graph
        .technology_experts("WebSockets")
        .await
        .unwrap()
        .evidence();
    assert_eq!(evidence, Evidence::NotFound(no_experts_for("WebSockets")));
}

#[tokio::test]
async fn test_loading_twice_changes_nothing() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let graph = open_graph(&cfg.graph.path).await;
    let batch = sample_batch();

    let first = graph.load(&batch).await.unwrap();
    let before = graph.stats().await.unwrap();
    let second = graph.load(&batch).await.unwrap();
    let after = graph.stats().await.unwrap();

    assert_eq!(first.edges_inserted as usize, batch.edges.len());
    assert_eq!(second.edges_inserted, 0);
    assert_eq!(second.edges_existing as usize, batch.edges.len());
    assert_eq!(before, after);
    assert_eq!(
        after.edges["CONTRIBUTED_TO_TECHNOLOGY"] as usize,
        batch.count_relationship(Relationship::ContributedToTechnology)
    );
}

#[tokio::test]
async fn test_dangling_edge_rejects_whole_batch() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let graph = open_graph(&cfg.graph.path).await;

    let batch = GraphBatch {
        nodes: vec![Node::new("alice", NodeLabel::User, json!({ "login": "alice" }))],
        edges: vec![Edge::new("alice", "acme/web/pr/1", Relationship::Authored)],
    };
    let err = graph.load(&batch).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<KbError>(),
        Some(KbError::DanglingEdges { count: 1, .. })
    ));

    let stats = graph.stats().await.unwrap();
    assert_eq!(stats.nodes["User"], 0);
}

#[tokio::test]
async fn test_reset_empties_graph() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let graph = open_graph(&cfg.graph.path).await;

    graph.load(&sample_batch()).await.unwrap();
    graph.reset().await.unwrap();

    let stats = graph.stats().await.unwrap();
    assert!(stats.nodes.values().all(|&n| n == 0));
    assert!(stats.edges.values().all(|&n| n == 0));
}

#[tokio::test]
async fn test_expert_list_and_recent_commits_are_capped() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let graph = open_graph(&cfg.graph.path).await;
    graph.load(&batch_of(crowded_repository())).await.unwrap();

    let experts = graph.technology_experts("React").await.unwrap();
    assert_eq!(experts.experts.len(), EXPERT_LIMIT as usize);
    assert_eq!(experts.experts[0].user, "u12");
    assert_eq!(experts.experts[0].contributions, 12);
    assert_eq!(experts.experts[9].user, "u03");
    assert_eq!(experts.experts[9].contributions, 3);
    assert!(!experts.evidence().text().contains("u02"));

    let expertise = graph.user_expertise("u12").await.unwrap();
    assert_eq!(expertise.recent_commits.len(), 10);
    assert_eq!(expertise.recent_commits[0], "u12 change 12");
    assert_eq!(expertise.recent_commits[9], "u12 change 03");
}

#[tokio::test]
async fn test_enrichment_resolves_commits_and_drops_orphans() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let graph = open_graph(&cfg.graph.path).await;
    graph.load(&batch_of(scoped_repository())).await.unwrap();

    let ids: Vec<String> = ["orphan", "c7a", "acme/web/pr/9", "acme/web/pr/10"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let records = graph.enrich(&ids).await.unwrap();

    assert_eq!(records.len(), 2);

    let commit = &records[0];
    assert_eq!(commit.rank, 1);
    assert_eq!(commit.author, "alice");
    assert_eq!(commit.node_type, "Commit");
    assert_eq!(commit.content, "Open a socket for streamed tokens");
    assert_eq!(commit.pr_url, "https://github.com/acme/web/pull/7");
    assert_eq!(commit.technologies, vec!["WebSockets"]);

    let pull = &records[1];
    assert_eq!(pull.rank, 2);
    assert_eq!(pull.node_type, "PullRequest");
    assert_eq!(pull.content, "Build dashboard shell");
    assert_eq!(pull.technologies, vec!["Docker", "React"]);
}

// ─── Vector index ───────────────────────────────────────────────────

#[tokio::test]
async fn test_reindex_skips_unchanged_documents() {
    let tmp = TempDir::new().unwrap();
    let chat = Arc::new(ScriptedChatModel::new());
    let ctx = loaded_context(&tmp, chat).await;
    let embedder = BagOfWordsEmbedder::new();

    let batch = sample_batch();
    let report = index_nodes(&batch.nodes, &embedder, ctx.vectors.as_ref(), 16, false)
        .await
        .unwrap();

    // Two pull requests and two commits, all indexed already.
    assert_eq!(report.candidates, 4);
    assert_eq!(report.skipped, 4);
    assert_eq!(report.embedded, 0);
    assert_eq!(embedder.calls(), 0);
    assert_eq!(ctx.vectors.count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_embedding_outage_fails_the_run() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteVectorStore::open(&tmp.path().join("v.sqlite"))
        .await
        .unwrap();

    let err = index_nodes(&sample_batch().nodes, &FailingEmbedder::always(), &store, 16, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<KbError>(),
        Some(KbError::Upstream {
            service: Service::Embedding,
            ..
        })
    ));
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_batch_keeps_other_batches_and_recovers() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteVectorStore::open(&tmp.path().join("v.sqlite"))
        .await
        .unwrap();
    let nodes = sample_batch().nodes;

    let result = index_nodes(&nodes, &FailingEmbedder::on_text("streaming"), &store, 1, false).await;
    assert!(result.is_err());
    assert_eq!(store.count().await.unwrap(), 3);

    let embedder = BagOfWordsEmbedder::new();
    let report = index_nodes(&nodes, &embedder, &store, 1, false).await.unwrap();
    assert_eq!(report.skipped, 3);
    assert_eq!(report.embedded, 1);
    assert_eq!(store.count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_index_state_independent_of_batch_size() {
    let tmp = TempDir::new().unwrap();
    let one_by_one = SqliteVectorStore::open(&tmp.path().join("a.sqlite"))
        .await
        .unwrap();
    let all_at_once = SqliteVectorStore::open(&tmp.path().join("b.sqlite"))
        .await
        .unwrap();
    let nodes = batch_of(scoped_repository()).nodes;

    let small = BagOfWordsEmbedder::new();
    let large = BagOfWordsEmbedder::new();
    let a = index_nodes(&nodes, &small, &one_by_one, 1, false).await.unwrap();
    let b = index_nodes(&nodes, &large, &all_at_once, 100, false).await.unwrap();

    assert_eq!(a, b);
    assert_eq!(a.embedded, 8);
    assert_eq!(small.calls(), 8);
    assert_eq!(large.calls(), 1);
    assert_eq!(
        one_by_one.content_hashes("bag-of-words").await.unwrap(),
        all_at_once.content_hashes("bag-of-words").await.unwrap()
    );

    let query = BagOfWordsEmbedder::new()
        .embed(&["streaming dashboard shell".to_string()])
        .await
        .unwrap()
        .remove(0);
    let hits_a = one_by_one.query(&query, 20).await.unwrap();
    let hits_b = all_at_once.query(&query, 20).await.unwrap();
    assert_eq!(hits_a.len(), 8);
    assert_eq!(hits_a, hits_b);
}

// ─── Retrieval + synthesis ──────────────────────────────────────────

#[tokio::test]
async fn test_streaming_question_finds_websocket_author() {
    let tmp = TempDir::new().unwrap();
    let chat = Arc::new(ScriptedChatModel::new().reply_text("alice built the streaming support."));
    let ctx = loaded_context(&tmp, chat.clone()).await;

    let (answer, context) = ctx.ask("Add streaming response support").await.unwrap();

    assert!(
        context.starts_with(
            "- User 'alice' worked on a PullRequest with content: 'Add streaming response support'. \
             PR URL: https://github.com/acme/web/pull/7. Involved technologies: WebSockets.\n"
        ),
        "unexpected context: {}",
        context
    );
    assert_eq!(answer, "alice built the streaming support.");
    assert_eq!(chat.calls(), 1);

    let requests = chat.requests();
    let request = &requests[0];
    assert!(request.tools.is_empty());
    match &request.messages[1] {
        ChatMessage::User { content } => {
            assert!(content.contains("USER QUESTION: Add streaming response support"));
            assert!(content.contains("Involved technologies: WebSockets."));
        }
        other => panic!("expected user prompt, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_index_answers_without_model() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let graph = open_graph(&cfg.graph.path).await;
    let vectors = SqliteVectorStore::open(&cfg.vectors.path).await.unwrap();
    let chat = Arc::new(ScriptedChatModel::new());
    let ctx = expertise_kb::app::AppContext::from_parts(
        cfg,
        Arc::new(graph),
        Arc::new(vectors),
        Arc::new(BagOfWordsEmbedder::new()),
        chat.clone(),
    );

    let (answer, context) = ctx.ask("Who knows Kafka?").await.unwrap();
    assert_eq!(context, "");
    assert_eq!(answer, NO_RELEVANT_INFORMATION);
    assert_eq!(chat.calls(), 0);

    let output = ctx
        .router()
        .execute(&ToolInvocation::SemanticSearch {
            query_text: "Kafka".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(output, NO_RELEVANT_INFORMATION);
}

async fn scoped_retriever(tmp: &TempDir) -> (Retriever, Arc<CountingGraphStore>) {
    let cfg = test_config(tmp);
    let graph = Arc::new(CountingGraphStore::new(open_graph(&cfg.graph.path).await));
    let vectors = Arc::new(SqliteVectorStore::open(&cfg.vectors.path).await.unwrap());
    let embedder = Arc::new(BagOfWordsEmbedder::new());

    let batch = batch_of(scoped_repository());
    graph.load(&batch).await.unwrap();
    index_nodes(&batch.nodes, embedder.as_ref(), vectors.as_ref(), 16, false)
        .await
        .unwrap();

    let retriever = Retriever::new(embedder, vectors, graph.clone(), 10, Duration::from_secs(5));
    (retriever, graph)
}

#[tokio::test]
async fn test_context_lists_only_each_pull_requests_technologies() {
    let tmp = TempDir::new().unwrap();
    let (retriever, graph) = scoped_retriever(&tmp).await;

    let context = retriever
        .retrieve_context("streaming dashboard shell")
        .await
        .unwrap();
    let lines: Vec<&str> = context.lines().collect();

    // Eight indexed documents; the authorless PR and its commit drop out.
    assert_eq!(lines.len(), 6, "unexpected context: {}", context);
    assert!(!context.contains("/pull/10."));

    let for_pull = |n: u32| {
        let marker = format!("/pull/{}.", n);
        lines
            .iter()
            .copied()
            .filter(|l| l.contains(&marker))
            .collect::<Vec<_>>()
    };
    let streaming = for_pull(7);
    let shell = for_pull(9);
    assert_eq!(streaming.len(), 2);
    assert_eq!(shell.len(), 2);
    assert!(streaming
        .iter()
        .all(|l| l.starts_with("- User 'alice'") && l.ends_with("Involved technologies: WebSockets.")));
    assert!(shell
        .iter()
        .all(|l| l.starts_with("- User 'alice'") && l.ends_with("Involved technologies: Docker, React.")));

    assert_eq!(graph.enrich_calls(), 1);
}

#[tokio::test]
async fn test_no_vector_hits_skips_graph() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let graph = Arc::new(CountingGraphStore::new(open_graph(&cfg.graph.path).await));
    graph.load(&sample_batch()).await.unwrap();
    let vectors = Arc::new(SqliteVectorStore::open(&cfg.vectors.path).await.unwrap());

    let retriever = Retriever::new(
        Arc::new(BagOfWordsEmbedder::new()),
        vectors,
        graph.clone(),
        10,
        Duration::from_secs(5),
    );

    let context = retriever.retrieve_context("Who knows Kafka?").await.unwrap();
    assert_eq!(context, "");
    assert_eq!(graph.enrich_calls(), 0);
}

// ─── Graph analysis ─────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_user_gets_sentinel_without_model() {
    let tmp = TempDir::new().unwrap();
    let chat = Arc::new(ScriptedChatModel::new());
    let ctx = loaded_context(&tmp, chat.clone()).await;

    let analysis = ctx.analyzer().user_expertise("nobody").await.unwrap();
    assert_eq!(analysis.answer, NO_USER_DATA);
    assert!(!analysis.evidence.is_found());
    assert_eq!(chat.calls(), 0);
}

#[tokio::test]
async fn test_technology_experts_are_synthesized() {
    let tmp = TempDir::new().unwrap();
    let chat = Arc::new(ScriptedChatModel::new().reply_text("mchill leads React work."));
    let ctx = loaded_context(&tmp, chat.clone()).await;

    let analysis = ctx.analyzer().technology_experts("React").await.unwrap();
    assert_eq!(analysis.answer, "mchill leads React work.");
    assert_eq!(chat.calls(), 1);

    let requests = chat.requests();
    let request = &requests[0];
    match &request.messages[1] {
        ChatMessage::User { content } => {
            assert!(content.starts_with("You are an expert engineering analyst."));
            assert!(content.contains("- User: mchill, Contributions: 5\n"));
            assert!(content.contains(
                "QUESTION: Who are all the users who have expertise in technology 'React'?"
            ));
        }
        other => panic!("expected user prompt, got {:?}", other),
    }
}

// ─── Tool routing ───────────────────────────────────────────────────

#[tokio::test]
async fn test_router_answers_user_question_with_graph_tool() {
    let tmp = TempDir::new().unwrap();
    let chat = Arc::new(
        ScriptedChatModel::new()
            .reply_tool("get_user_expertise", r#"{"user_id":"mchill"}"#)
            .reply_text("mchill mostly works on React."),
    );
    let ctx = loaded_context(&tmp, chat.clone()).await;
    let router = ctx.router();
    let mut conversation = Conversation::new();

    let outcome = router
        .route(&mut conversation, "what does mchill work on?")
        .await
        .unwrap();

    assert_eq!(
        outcome.tool,
        Some(ToolInvocation::UserExpertise {
            user_id: "mchill".to_string()
        })
    );
    assert!(outcome
        .tool_output
        .as_deref()
        .unwrap()
        .contains("- React: 5 contributions"));
    assert_eq!(outcome.answer, "mchill mostly works on React.");

    // system, user, assistant tool call, tool result, final answer
    assert_eq!(conversation.len(), 5);
    assert!(matches!(
        conversation.messages()[3],
        ChatMessage::Tool { .. }
    ));

    let requests = chat.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 3);
    assert!(requests[1].tools.is_empty());
}

#[tokio::test]
async fn test_router_direct_answer_skips_tools() {
    let tmp = TempDir::new().unwrap();
    let chat = Arc::new(ScriptedChatModel::new().reply_text("Hello! Ask me about expertise."));
    let ctx = loaded_context(&tmp, chat.clone()).await;
    let mut conversation = Conversation::new();

    let outcome = ctx.router().route(&mut conversation, "hi").await.unwrap();

    assert_eq!(outcome.tool, None);
    assert_eq!(outcome.answer, "Hello! Ask me about expertise.");
    assert_eq!(conversation.len(), 3);
    assert_eq!(chat.calls(), 1);
}

#[tokio::test]
async fn test_router_blank_final_reply_becomes_apology() {
    let tmp = TempDir::new().unwrap();
    let chat = Arc::new(
        ScriptedChatModel::new()
            .reply_tool("get_experts_for_technology", r#"{"technology_name":"React"}"#)
            .reply_text("   "),
    );
    let ctx = loaded_context(&tmp, chat).await;
    let mut conversation = Conversation::new();

    let outcome = ctx
        .router()
        .route(&mut conversation, "who knows React?")
        .await
        .unwrap();
    assert_eq!(outcome.answer, APOLOGY);
}

#[tokio::test]
async fn test_router_failure_leaves_history_untouched() {
    let tmp = TempDir::new().unwrap();
    let chat = Arc::new(
        ScriptedChatModel::new()
            .reply_text("First answer.")
            .fail("model unavailable"),
    );
    let ctx = loaded_context(&tmp, chat).await;
    let router = ctx.router();
    let mut conversation = Conversation::new();

    router.route(&mut conversation, "hello").await.unwrap();
    let before = conversation.clone();

    let err = router.route(&mut conversation, "again").await;
    assert!(err.is_err());
    assert_eq!(conversation, before);
}

#[tokio::test]
async fn test_router_rejects_malformed_tool_arguments() {
    let tmp = TempDir::new().unwrap();
    let chat = Arc::new(ScriptedChatModel::new().reply_tool("get_user_expertise", "{not json"));
    let ctx = loaded_context(&tmp, chat).await;
    let mut conversation = Conversation::new();

    let err = ctx
        .router()
        .route(&mut conversation, "what does mchill do?")
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<KbError>(),
        Some(KbError::InvalidToolArguments { .. })
    ));
    assert_eq!(conversation.len(), 1);
}
