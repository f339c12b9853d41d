//! LLM-driven choice between the three retrieval strategies.
//!
//! | Tool                          | Argument          | Output                         |
//! |-------------------------------|-------------------|--------------------------------|
//! | `get_user_expertise`          | `user_id`         | ranked graph evidence          |
//! | `get_experts_for_technology`  | `technology_name` | ranked graph evidence          |
//! | `semantic_search_for_concept` | `query_text`      | retrieval context lines        |
//!
//! A turn makes at most two model calls: one with the tool catalog, and, if
//! a tool was chosen, one without tools to phrase the answer from the tool
//! output. New messages are committed to the [`Conversation`] only when the
//! whole turn succeeds.

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::error::KbError;
use crate::expertise::GraphAnalyzer;
use crate::llm::{ChatMessage, ChatModel, ChatRequest, ToolCall, ToolSpec};
use crate::retrieval::Retriever;
use crate::synthesize::{NO_RELEVANT_INFORMATION, SYSTEM_PROMPT};

pub const APOLOGY: &str = "I apologize, but I couldn't generate a response.";

pub const USER_EXPERTISE_TOOL: &str = "get_user_expertise";
pub const TECHNOLOGY_EXPERTS_TOOL: &str = "get_experts_for_technology";
pub const SEMANTIC_SEARCH_TOOL: &str = "semantic_search_for_concept";

/// A decoded tool selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    UserExpertise { user_id: String },
    TechnologyExperts { technology_name: String },
    SemanticSearch { query_text: String },
}

#[derive(Deserialize)]
struct UserExpertiseArgs {
    user_id: String,
}

#[derive(Deserialize)]
struct TechnologyExpertsArgs {
    technology_name: String,
}

#[derive(Deserialize)]
struct SemanticSearchArgs {
    query_text: String,
}

fn decode_args<T: for<'de> Deserialize<'de>>(tool: &str, arguments: &str) -> Result<T, KbError> {
    serde_json::from_str(arguments).map_err(|e| KbError::InvalidToolArguments {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

impl ToolInvocation {
    pub fn name(&self) -> &'static str {
        match self {
            ToolInvocation::UserExpertise { .. } => USER_EXPERTISE_TOOL,
            ToolInvocation::TechnologyExperts { .. } => TECHNOLOGY_EXPERTS_TOOL,
            ToolInvocation::SemanticSearch { .. } => SEMANTIC_SEARCH_TOOL,
        }
    }

    /// Decode a tool name and its JSON argument object.
    pub fn parse(name: &str, arguments: &str) -> Result<Self, KbError> {
        let invocation = match name {
            USER_EXPERTISE_TOOL => {
                let args: UserExpertiseArgs = decode_args(name, arguments)?;
                ToolInvocation::UserExpertise {
                    user_id: args.user_id,
                }
            }
            TECHNOLOGY_EXPERTS_TOOL => {
                let args: TechnologyExpertsArgs = decode_args(name, arguments)?;
                ToolInvocation::TechnologyExperts {
                    technology_name: args.technology_name,
                }
            }
            SEMANTIC_SEARCH_TOOL => {
                let args: SemanticSearchArgs = decode_args(name, arguments)?;
                ToolInvocation::SemanticSearch {
                    query_text: args.query_text,
                }
            }
            other => return Err(KbError::UnknownTool(other.to_string())),
        };

        let value = match &invocation {
            ToolInvocation::UserExpertise { user_id } => user_id,
            ToolInvocation::TechnologyExperts { technology_name } => technology_name,
            ToolInvocation::SemanticSearch { query_text } => query_text,
        };
        if value.trim().is_empty() {
            return Err(KbError::InvalidToolArguments {
                tool: name.to_string(),
                message: "argument must not be empty".to_string(),
            });
        }
        Ok(invocation)
    }

    pub fn from_call(call: &ToolCall) -> Result<Self, KbError> {
        Self::parse(&call.name, &call.arguments)
    }
}

fn string_param(name: &str, description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            name: {"type": "string", "description": description}
        },
        "required": [name],
    })
}

/// The tools offered to the model on the planning call.
pub fn tool_catalog() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: USER_EXPERTISE_TOOL.to_string(),
            description: "Get a summary of a specific user's skills, expertise, and contributions."
                .to_string(),
            parameters: string_param(
                "user_id",
                "The GitHub username of the user, e.g., 'mchill'.",
            ),
        },
        ToolSpec {
            name: TECHNOLOGY_EXPERTS_TOOL.to_string(),
            description: "Find a list of people experienced with a specific programming language, library, or technology."
                .to_string(),
            parameters: string_param(
                "technology_name",
                "The name of the technology, e.g., 'TypeScript', 'React'.",
            ),
        },
        ToolSpec {
            name: SEMANTIC_SEARCH_TOOL.to_string(),
            description: "Default tool for general, conceptual, or topic-based questions when a specific user or technology is not named."
                .to_string(),
            parameters: string_param(
                "query_text",
                "The user's full question or the concept to search for.",
            ),
        },
    ]
}

// ============ Conversation ============

/// Append-only history for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            messages: vec![ChatMessage::system(SYSTEM_PROMPT)],
        }
    }

    /// Resume from client-held history; a system message is prepended when
    /// the history lacks one.
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        let mut history = Vec::with_capacity(messages.len() + 1);
        if !matches!(messages.first(), Some(ChatMessage::System { .. })) {
            history.push(ChatMessage::system(SYSTEM_PROMPT));
        }
        history.extend(messages);
        Self { messages: history }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn extend(&mut self, messages: Vec<ChatMessage>) {
        self.messages.extend(messages);
    }
}

// ============ Router ============

#[derive(Debug, Clone, PartialEq)]
pub struct RouteOutcome {
    pub answer: String,
    pub tool: Option<ToolInvocation>,
    /// Raw text the tool returned to the model.
    pub tool_output: Option<String>,
}

pub struct ToolRouter {
    model: Arc<dyn ChatModel>,
    retriever: Retriever,
    analyzer: GraphAnalyzer,
    temperature: f32,
}

impl ToolRouter {
    pub fn new(
        model: Arc<dyn ChatModel>,
        retriever: Retriever,
        analyzer: GraphAnalyzer,
        temperature: f32,
    ) -> Self {
        Self {
            model,
            retriever,
            analyzer,
            temperature,
        }
    }

    /// Run one tool and return the text handed back to the model.
    pub async fn execute(&self, invocation: &ToolInvocation) -> Result<String> {
        match invocation {
            ToolInvocation::UserExpertise { user_id } => {
                Ok(self.analyzer.user_evidence(user_id).await?.into_text())
            }
            ToolInvocation::TechnologyExperts { technology_name } => Ok(self
                .analyzer
                .technology_evidence(technology_name)
                .await?
                .into_text()),
            ToolInvocation::SemanticSearch { query_text } => {
                let context = self.retriever.retrieve_context(query_text).await?;
                if context.is_empty() {
                    Ok(NO_RELEVANT_INFORMATION.to_string())
                } else {
                    Ok(context)
                }
            }
        }
    }

    /// Answer `question` in the context of `conversation`.
    ///
    /// On error the conversation is left exactly as it was.
    pub async fn route(&self, conversation: &mut Conversation, question: &str) -> Result<RouteOutcome> {
        let mut scratch = conversation.messages().to_vec();
        scratch.push(ChatMessage::user(question));
        let start = scratch.len() - 1;

        let plan = self
            .model
            .complete(ChatRequest {
                messages: scratch.clone(),
                tools: tool_catalog(),
                temperature: Some(self.temperature),
            })
            .await?;

        let call = match plan.tool_calls.first() {
            Some(call) => call.clone(),
            None => {
                let answer = plan.text().unwrap_or(APOLOGY).to_string();
                scratch.push(ChatMessage::assistant(answer.clone()));
                conversation.extend(scratch.split_off(start));
                return Ok(RouteOutcome {
                    answer,
                    tool: None,
                    tool_output: None,
                });
            }
        };

        let invocation = ToolInvocation::from_call(&call)?;
        info!(tool = invocation.name(), "tool selected");
        let output = self.execute(&invocation).await?;

        scratch.push(ChatMessage::Assistant {
            content: plan.content.clone(),
            tool_call: Some(call.clone()),
        });
        scratch.push(ChatMessage::tool_result(&call, output.clone()));

        let reply = self
            .model
            .complete(ChatRequest {
                messages: scratch.clone(),
                tools: Vec::new(),
                temperature: Some(self.temperature),
            })
            .await?;

        let answer = reply.text().unwrap_or(APOLOGY).to_string();
        scratch.push(ChatMessage::assistant(answer.clone()));
        conversation.extend(scratch.split_off(start));

        Ok(RouteOutcome {
            answer,
            tool: Some(invocation),
            tool_output: Some(output),
        })
    }
}
