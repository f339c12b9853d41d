//! # Expertise KB
//!
//! An engineering-expertise knowledge base built from source-control
//! activity. Pull requests, commits, reviews, and patches are turned into a
//! property graph of who touched which technologies, indexed for semantic
//! search, and queried through a model-driven tool router.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │  GitHub  │──▶│ Graph Builder│──▶│ Graph Store   │
//! │ extract  │   │ + Classifier │   │ (SQLite)      │
//! └──────────┘   └──────┬───────┘   └──────┬───────┘
//!                       │                  │ enrich
//!                       ▼                  ▼
//!                ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//!                │ Vector Index │──▶│  Retrieval   │──▶│  Router  │
//!                │ (SQLite)     │   │  + Analyzer  │   │ + Synth  │
//!                └──────────────┘   └──────────────┘   └────┬─────┘
//!                                                           │
//!                                        ┌──────────────────┤
//!                                        ▼                  ▼
//!                                   ┌──────────┐       ┌──────────┐
//!                                   │   CLI    │       │   HTTP   │
//!                                   │  (ekb)   │       │  (axum)  │
//!                                   └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ekb init                          # create both stores
//! ekb extract --repo owner/name     # fetch raw activity
//! ekb build                         # raw JSON -> nodes.json / edges.json
//! ekb load                          # artifacts -> graph store
//! ekb embed                         # PR and commit text -> vector index
//! ekb chat                          # routed conversation
//! ekb serve                         # HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and timeout helper |
//! | [`models`] | Raw activity, graph nodes and edges |
//! | [`classify`] | Patch text → technology names |
//! | [`graph_builder`] | Raw activity → graph batch and artifacts |
//! | [`graph_store`] | Graph persistence and expertise queries |
//! | [`vector_store`] | Embedding persistence and nearest-neighbour search |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_index`] | Node text → vector index |
//! | [`llm`] | Chat model abstraction and message types |
//! | [`retrieval`] | Semantic search + graph enrichment |
//! | [`expertise`] | Graph-backed expertise analysis |
//! | [`synthesize`] | Grounded answer generation |
//! | [`router`] | Tool selection and conversation history |
//! | [`app`] | Shared application context |
//! | [`chat`] | Interactive sessions |
//! | [`github`] | Source-control extraction |
//! | [`server`] | HTTP API |
//! | [`stats`] | Load, stats, and reset commands |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod app;
pub mod chat;
pub mod classify;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod expertise;
pub mod github;
pub mod graph_builder;
pub mod graph_store;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod retrieval;
pub mod router;
pub mod server;
pub mod stats;
pub mod synthesize;
pub mod vector_index;
pub mod vector_store;
