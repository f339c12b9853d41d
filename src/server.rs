//! HTTP API over the knowledge base.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/tools/list` | The router's tool catalog with JSON schemas |
//! | `POST` | `/tools/{name}` | Run one tool; body is its argument object |
//! | `POST` | `/ask` | Semantic retrieval + synthesis for one question |
//! | `POST` | `/chat` | One routed turn over client-held history |
//!
//! The server keeps no session state: `/chat` receives the prior messages
//! and returns the extended history for the client to send back next turn.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500),
//! `upstream` (502), `configuration` (503), `timeout` (504).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::app::AppContext;
use crate::error::KbError;
use crate::llm::{ChatMessage, ToolSpec};
use crate::router::{tool_catalog, Conversation, ToolInvocation};

/// Build the axum router; exposed separately so tests can serve it on an
/// ephemeral port.
pub fn app(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/ask", post(handle_ask))
        .route("/chat", post(handle_chat))
        .layer(cors)
        .with_state(ctx)
}

/// `ekb serve`: bind `[server].bind` and serve until terminated.
pub async fn run_server(ctx: AppContext) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!(addr = %bind_addr, "server listening");
    println!("Server listening on http://{}", bind_addr);
    for tool in tool_catalog() {
        println!("  POST /tools/{}", tool.name);
    }

    axum::serve(listener, app(ctx)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"timeout"`).
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

/// Map a failure to the most specific status the error taxonomy allows.
fn classify_error(err: anyhow::Error) -> AppError {
    let message = format!("{:#}", err);
    match err.downcast_ref::<KbError>() {
        Some(KbError::Timeout { .. }) => {
            app_error(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
        }
        Some(KbError::UnknownTool(_)) => app_error(StatusCode::NOT_FOUND, "not_found", message),
        Some(KbError::InvalidToolArguments { .. }) => bad_request(message),
        Some(KbError::Config(_)) => {
            app_error(StatusCode::SERVICE_UNAVAILABLE, "configuration", message)
        }
        Some(KbError::Upstream { .. }) | Some(KbError::RateLimited { .. }) => {
            app_error(StatusCode::BAD_GATEWAY, "upstream", message)
        }
        _ => {
            error!(error = %message, "request failed");
            app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolSpec>,
}

async fn handle_list_tools() -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: tool_catalog(),
    })
}

// ============ POST /tools/{name} ============

async fn handle_tool_call(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let invocation = ToolInvocation::parse(&name, &params.to_string())
        .map_err(|e| classify_error(e.into()))?;

    let result = ctx
        .router()
        .execute(&invocation)
        .await
        .map_err(classify_error)?;

    Ok(Json(serde_json::json!({ "result": result })))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    include_context: bool,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<String>,
}

async fn handle_ask(
    State(ctx): State<AppContext>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let (answer, context) = ctx.ask(&req.question).await.map_err(classify_error)?;

    Ok(Json(AskResponse {
        answer,
        context: req.include_context.then_some(context),
    }))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequestBody {
    #[serde(default)]
    messages: Vec<ChatMessage>,
    message: String,
}

#[derive(Serialize)]
struct ToolUse {
    name: String,
    output: Option<String>,
}

#[derive(Serialize)]
struct ChatResponseBody {
    answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool: Option<ToolUse>,
    messages: Vec<ChatMessage>,
}

async fn handle_chat(
    State(ctx): State<AppContext>,
    Json(req): Json<ChatRequestBody>,
) -> Result<Json<ChatResponseBody>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let mut conversation = Conversation::from_messages(req.messages);
    let outcome = ctx
        .router()
        .route(&mut conversation, &req.message)
        .await
        .map_err(classify_error)?;

    Ok(Json(ChatResponseBody {
        answer: outcome.answer,
        tool: outcome.tool.map(|t| ToolUse {
            name: t.name().to_string(),
            output: outcome.tool_output,
        }),
        messages: conversation.messages().to_vec(),
    }))
}
