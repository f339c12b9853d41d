//! Error taxonomy for the knowledge base.
//!
//! Most functions return [`anyhow::Result`]; the variants here are the
//! failures callers need to tell apart (timeouts, upstream outages, bad tool
//! calls from the model). Not-found has no variant: empty lookups degrade
//! to sentinel text instead of failing.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// External collaborator a call was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    GraphStore,
    VectorStore,
    Embedding,
    LanguageModel,
    SourceControl,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Service::GraphStore => "graph store",
            Service::VectorStore => "vector store",
            Service::Embedding => "embedding model",
            Service::LanguageModel => "language model",
            Service::SourceControl => "source-control API",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum KbError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{service} timed out after {secs}s")]
    Timeout { service: Service, secs: u64 },

    #[error("{service} unavailable: {message}")]
    Upstream { service: Service, message: String },

    #[error("rate limit still exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("model selected an unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for tool {tool}: {message}")]
    InvalidToolArguments { tool: String, message: String },

    #[error("{count} edges reference nodes missing from the batch (first: {first})")]
    DanglingEdges { count: usize, first: String },
}

impl KbError {
    pub fn upstream(service: Service, message: impl fmt::Display) -> Self {
        KbError::Upstream {
            service,
            message: message.to_string(),
        }
    }
}

/// Run `fut` with an upper bound on its duration.
///
/// Expiry becomes [`KbError::Timeout`]; the inner error is passed through
/// unchanged.
pub async fn with_timeout<T, F>(service: Service, limit: Duration, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(KbError::Timeout {
            service,
            secs: limit.as_secs(),
        }
        .into()),
    }
}
