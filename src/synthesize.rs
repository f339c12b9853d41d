//! Evidence + question → grounded answer.
//!
//! An empty context never reaches the model: the synthesizer answers with a
//! fixed message instead, so an empty knowledge base costs zero model calls.

use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use crate::llm::{ChatMessage, ChatModel, ChatRequest};

pub const SYSTEM_PROMPT: &str = "You are a helpful engineering knowledge assistant.";

pub const NO_RELEVANT_INFORMATION: &str =
    "I couldn't find any relevant information in the knowledge base to answer your question.";

pub const NO_GRAPH_DATA: &str = "I could not find any data in the knowledge base for this query.";

/// Which grounding prompt to wrap the context in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    /// Expertise profile over semantic-search context.
    Retrieval,
    /// Summary over ranked graph evidence.
    GraphAnalysis,
}

impl PromptTemplate {
    pub fn empty_context_message(&self) -> &'static str {
        match self {
            PromptTemplate::Retrieval => NO_RELEVANT_INFORMATION,
            PromptTemplate::GraphAnalysis => NO_GRAPH_DATA,
        }
    }

    pub fn render(&self, question: &str, context: &str) -> String {
        match self {
            PromptTemplate::Retrieval => format!(
                "You are an AI assistant designed to provide expertise profiles from a GitHub knowledge base.\n\
                 Your goal is to answer the user's question based *only* on the provided context.\n\
                 Do not make up information. If the context doesn't contain the answer, say so.\n\
                 Summarize the findings and identify the key people related to the user's query.\n\
                 For each person you identify, cite the evidence from the context.\n\
                 \n\
                 CONTEXT:\n\
                 ---\n\
                 {context}\n\
                 ---\n\
                 \n\
                 USER QUESTION: {question}\n\
                 \n\
                 ANSWER:"
            ),
            PromptTemplate::GraphAnalysis => format!(
                "You are an expert engineering analyst. Based *only* on the provided context below, \
                 answer the user's question in a clear, concise summary.\n\
                 \n\
                 CONTEXT:\n\
                 ---\n\
                 {context}\n\
                 ---\n\
                 \n\
                 QUESTION: {question}\n\
                 \n\
                 ANSWER:"
            ),
        }
    }
}

pub struct AnswerSynthesizer {
    model: Arc<dyn ChatModel>,
    temperature: f32,
    template: PromptTemplate,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn ChatModel>, temperature: f32, template: PromptTemplate) -> Self {
        Self {
            model,
            temperature,
            template,
        }
    }

    /// Answer `question` from `context` alone.
    ///
    /// The model's reply is returned verbatim; a blank reply becomes an
    /// empty string.
    pub async fn generate_answer(&self, question: &str, context: &str) -> Result<String> {
        if context.trim().is_empty() {
            return Ok(self.template.empty_context_message().to_string());
        }

        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(self.template.render(question, context)),
            ],
            tools: Vec::new(),
            temperature: Some(self.temperature),
        };

        debug!(template = ?self.template, context_len = context.len(), "synthesizing answer");
        let reply = self.model.complete(request).await?;
        Ok(reply.content.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrieval_prompt_embeds_context_and_question() {
        let prompt = PromptTemplate::Retrieval.render("Who knows Redis?", "- User 'bob' ...");
        assert!(prompt.contains("CONTEXT:\n---\n- User 'bob' ...\n---"));
        assert!(prompt.contains("USER QUESTION: Who knows Redis?"));
        assert!(prompt.contains("cite the evidence"));
    }

    #[test]
    fn test_graph_prompt_uses_analyst_framing() {
        let prompt = PromptTemplate::GraphAnalysis.render("q", "ctx");
        assert!(prompt.starts_with("You are an expert engineering analyst."));
        assert!(prompt.contains("QUESTION: q"));
    }

    #[test]
    fn test_empty_messages_differ_per_template() {
        assert_eq!(
            PromptTemplate::Retrieval.empty_context_message(),
            NO_RELEVANT_INFORMATION
        );
        assert_eq!(
            PromptTemplate::GraphAnalysis.empty_context_message(),
            NO_GRAPH_DATA
        );
    }
}
