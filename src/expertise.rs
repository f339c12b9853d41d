//! Direct graph questions: "what does this user know" and "who knows this
//! technology", answered with the analyst prompt.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{with_timeout, Service};
use crate::graph_store::{Evidence, GraphStore};
use crate::synthesize::AnswerSynthesizer;

pub struct GraphAnalyzer {
    graph: Arc<dyn GraphStore>,
    synthesizer: AnswerSynthesizer,
    timeout: Duration,
}

/// A synthesized answer together with the graph evidence behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub question: String,
    pub evidence: Evidence,
    pub answer: String,
}

pub fn user_question(user_id: &str) -> String {
    format!("What expertise does user '{}' have?", user_id)
}

pub fn technology_question(technology: &str) -> String {
    format!(
        "Who are all the users who have expertise in technology '{}'?",
        technology
    )
}

impl GraphAnalyzer {
    /// `synthesizer` should carry the graph-analysis template.
    pub fn new(graph: Arc<dyn GraphStore>, synthesizer: AnswerSynthesizer, timeout: Duration) -> Self {
        Self {
            graph,
            synthesizer,
            timeout,
        }
    }

    pub async fn user_evidence(&self, user_id: &str) -> Result<Evidence> {
        let expertise = with_timeout(
            Service::GraphStore,
            self.timeout,
            self.graph.user_expertise(user_id),
        )
        .await?;
        Ok(expertise.evidence())
    }

    pub async fn technology_evidence(&self, technology: &str) -> Result<Evidence> {
        let experts = with_timeout(
            Service::GraphStore,
            self.timeout,
            self.graph.technology_experts(technology),
        )
        .await?;
        Ok(experts.evidence())
    }

    pub async fn user_expertise(&self, user_id: &str) -> Result<Analysis> {
        info!(user_id, "analyzing user expertise");
        let evidence = self.user_evidence(user_id).await?;
        self.answer(user_question(user_id), evidence).await
    }

    pub async fn technology_experts(&self, technology: &str) -> Result<Analysis> {
        info!(technology, "finding technology experts");
        let evidence = self.technology_evidence(technology).await?;
        self.answer(technology_question(technology), evidence).await
    }

    /// Sentinel evidence is the answer; found evidence goes to the model.
    async fn answer(&self, question: String, evidence: Evidence) -> Result<Analysis> {
        let answer = match &evidence {
            Evidence::NotFound(text) => text.clone(),
            Evidence::Found(text) => self.synthesizer.generate_answer(&question, text).await?,
        };
        Ok(Analysis {
            question,
            evidence,
            answer,
        })
    }
}
