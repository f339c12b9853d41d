//! # Expertise KB CLI (`ekb`)
//!
//! The `ekb` binary drives the whole pipeline: extraction from GitHub,
//! graph building, loading, embedding, and the query surfaces (one-shot
//! questions, expertise lookups, interactive chat, and the HTTP server).
//!
//! ## Usage
//!
//! ```bash
//! ekb --config ./config/ekb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ekb init` | Create both SQLite stores and their schemas |
//! | `ekb extract` | Fetch merged pull request activity into raw JSON |
//! | `ekb build` | Turn raw JSON into `nodes.json` / `edges.json` |
//! | `ekb load` | Load the artifacts into the graph store |
//! | `ekb embed` | Embed pull request and commit text |
//! | `ekb search "<text>"` | Nearest-neighbour search over the vector index |
//! | `ekb ask "<question>"` | Retrieval + synthesis for one question |
//! | `ekb expertise <user>` | Summarize one user's technology contributions |
//! | `ekb experts <technology>` | Rank contributors to one technology |
//! | `ekb chat` | Routed conversation on stdin |
//! | `ekb stats` | Node, edge, and vector counts |
//! | `ekb reset` | Empty the graph (and optionally the vectors) |
//! | `ekb serve` | Start the HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use expertise_kb::app::AppContext;
use expertise_kb::{chat, config, github, graph_builder, migrate, server, stats, vector_index};

/// Expertise KB: who knows what, from pull request history.
///
/// All commands except `build` read a TOML configuration file given by
/// `--config`. See `config/ekb.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ekb",
    about = "Expertise KB: an engineering-expertise knowledge base built from source-control activity",
    version,
    long_about = "Expertise KB extracts pull request activity, builds a property graph of users, \
    pull requests, commits, files, and technologies, indexes change text for semantic search, \
    and answers expertise questions through a tool-routing language model."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ekb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize both store schemas. Safe to run repeatedly.
    Init,

    /// Fetch merged pull requests from GitHub into the raw activity format.
    ///
    /// Reads `GITHUB_TOKEN` from the environment when present.
    Extract {
        /// Repository as `owner/name`; defaults to `[github].repo`.
        #[arg(long)]
        repo: Option<String>,

        #[arg(long, default_value = "data/github_data.json")]
        output: PathBuf,
    },

    /// Build graph artifacts from raw activity JSON.
    Build {
        #[arg(long, default_value = "data/github_data.json")]
        input: PathBuf,

        /// Directory that receives `nodes.json` and `edges.json`.
        #[arg(long, default_value = "data")]
        out: PathBuf,
    },

    /// Load graph artifacts into the graph store.
    Load {
        #[arg(long, default_value = "data")]
        artifacts: PathBuf,

        /// Empty the graph before loading.
        #[arg(long)]
        reset: bool,
    },

    /// Embed pull request titles/bodies and commit messages.
    ///
    /// Unchanged documents are skipped unless `--rebuild` is given.
    Embed {
        #[arg(long, default_value = "data")]
        artifacts: PathBuf,

        /// Clear the vector index and re-embed everything.
        #[arg(long)]
        rebuild: bool,

        /// Override the batch size from config (texts per provider call).
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Nearest-neighbour search over the vector index.
    Search {
        text: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer one question from semantic retrieval.
    Ask {
        question: String,

        /// Print the retrieved context before the answer.
        #[arg(long)]
        show_context: bool,
    },

    /// Summarize a user's expertise from the graph.
    Expertise { user: String },

    /// List the top contributors to a technology.
    Experts { technology: String },

    /// Interactive conversation; the model picks a tool per question.
    Chat {
        /// Print which tool answered each question.
        #[arg(long)]
        show_tools: bool,
    },

    /// Show store statistics.
    Stats,

    /// Remove all graph data.
    Reset {
        /// Also clear the vector index.
        #[arg(long)]
        vectors: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("expertise_kb=info"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Building artifacts is a pure transformation and needs no config.
    if let Commands::Build { input, out } = &cli.command {
        graph_builder::run_build(input, out)?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Stores initialized successfully.");
        }
        Commands::Extract { repo, output } => {
            github::run_extract(&cfg, repo.as_deref(), &output).await?;
        }
        Commands::Build { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
        Commands::Load { artifacts, reset } => {
            stats::run_load(&cfg, &artifacts, reset).await?;
        }
        Commands::Embed {
            artifacts,
            rebuild,
            batch_size,
        } => {
            vector_index::run_embed(&cfg, &artifacts, batch_size, rebuild).await?;
        }
        Commands::Search { text, limit } => {
            let ctx = AppContext::connect(cfg).await?;
            let limit = limit.unwrap_or(ctx.config.retrieval.top_n);
            let hits = ctx.retriever().semantic_search(&text, limit).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!("{}. [{:.4}] {}", i + 1, hit.distance, hit.id);
                println!("    {}", hit.document);
            }
        }
        Commands::Ask {
            question,
            show_context,
        } => {
            let ctx = AppContext::connect(cfg).await?;
            let (answer, context) = ctx.ask(&question).await?;
            if show_context {
                println!("Context:\n{}", context);
            }
            println!("{}", answer);
        }
        Commands::Expertise { user } => {
            let ctx = AppContext::connect(cfg).await?;
            let analysis = ctx.analyzer().user_expertise(&user).await?;
            println!("{}", analysis.answer);
        }
        Commands::Experts { technology } => {
            let ctx = AppContext::connect(cfg).await?;
            let analysis = ctx.analyzer().technology_experts(&technology).await?;
            println!("{}", analysis.answer);
        }
        Commands::Chat { show_tools } => {
            let ctx = AppContext::connect(cfg).await?;
            chat::run_chat(ctx.router(), show_tools).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Reset { vectors } => {
            stats::run_reset(&cfg, vectors).await?;
        }
        Commands::Serve => {
            let ctx = AppContext::connect(cfg).await?;
            server::run_server(ctx).await?;
        }
    }

    Ok(())
}
