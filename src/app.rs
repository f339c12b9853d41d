//! Process-wide collaborators, built once and shared by reference.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::expertise::GraphAnalyzer;
use crate::graph_store::{GraphStore, SqliteGraphStore};
use crate::llm::{self, ChatModel};
use crate::retrieval::Retriever;
use crate::router::ToolRouter;
use crate::synthesize::{AnswerSynthesizer, PromptTemplate};
use crate::vector_store::{SqliteVectorStore, VectorStore};

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub graph: Arc<dyn GraphStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub chat: Arc<dyn ChatModel>,
}

impl AppContext {
    /// Open both stores and construct the model clients.
    ///
    /// Fails before any request is served if a store cannot be opened or a
    /// required credential is missing.
    pub async fn connect(config: Config) -> Result<Self> {
        let graph = SqliteGraphStore::open(&config.graph.path).await?;
        let vectors = SqliteVectorStore::open(&config.vectors.path).await?;
        let embedder = embedding::create_provider(&config.embedding)?;
        let chat = llm::create_chat_model(&config.llm)?;

        info!(
            graph = %config.graph.path.display(),
            vectors = %config.vectors.path.display(),
            embedding = embedder.model_name(),
            llm = chat.model_name(),
            "application context ready"
        );

        Ok(Self::from_parts(
            config,
            Arc::new(graph),
            Arc::new(vectors),
            embedder,
            chat,
        ))
    }

    pub fn from_parts(
        config: Config,
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            graph,
            vectors,
            embedder,
            chat,
        }
    }

    pub fn retriever(&self) -> Retriever {
        Retriever::new(
            Arc::clone(&self.embedder),
            Arc::clone(&self.vectors),
            Arc::clone(&self.graph),
            self.config.retrieval.top_n,
            self.config.retrieval.store_timeout(),
        )
    }

    pub fn synthesizer(&self, template: PromptTemplate) -> AnswerSynthesizer {
        AnswerSynthesizer::new(
            Arc::clone(&self.chat),
            self.config.llm.temperature,
            template,
        )
    }

    pub fn analyzer(&self) -> GraphAnalyzer {
        GraphAnalyzer::new(
            Arc::clone(&self.graph),
            self.synthesizer(PromptTemplate::GraphAnalysis),
            self.config.retrieval.store_timeout(),
        )
    }

    pub fn router(&self) -> ToolRouter {
        ToolRouter::new(
            Arc::clone(&self.chat),
            self.retriever(),
            self.analyzer(),
            self.config.llm.temperature,
        )
    }

    /// Retrieval + synthesis for one question; returns `(answer, context)`.
    pub async fn ask(&self, question: &str) -> Result<(String, String)> {
        let context = self.retriever().retrieve_context(question).await?;
        let answer = self
            .synthesizer(PromptTemplate::Retrieval)
            .generate_answer(question, &context)
            .await?;
        Ok((answer, context))
    }
}
