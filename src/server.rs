//! HTTP front end for call sessions.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service banner |
//! | `GET`  | `/health` | Health check (version, index readiness) |
//! | `POST` | `/api/new-session` | Start a call: new session id plus the greeting |
//! | `POST` | `/api/chat` | One text turn |
//! | `POST` | `/api/voice-response` | One turn with synthesized audio (base64) |
//! | `POST` | `/api/clear-session` | Forget a session's history |
//! | `GET`  | `/tools/list` | Registered tools with parameter schemas |
//! | `POST` | `/tools/{name}` | Call a tool directly |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "No message provided" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `embeddings_disabled` (400),
//! `tool_error` (500).
//!
//! Requests without a `session_id` use the session named `default`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::agent::SopAgent;
use crate::error::{as_sop_error, SopError};
use crate::session::SessionRegistry;
use crate::speech::{SpeechSynthesizer, UnavailableSpeech};
use crate::tools::ToolSpec;

const DEFAULT_SESSION: &str = "default";

/// Shared state for every route handler.
#[derive(Clone)]
pub struct AppState {
    agent: Arc<SopAgent>,
    sessions: Arc<SessionRegistry>,
    speech: Arc<dyn SpeechSynthesizer>,
}

impl AppState {
    pub fn new(agent: SopAgent) -> Self {
        Self {
            agent: Arc::new(agent),
            sessions: Arc::new(SessionRegistry::new()),
            speech: Arc::new(UnavailableSpeech),
        }
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = speech;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }
}

/// All routes, with permissive CORS for browser demo clients.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/api/new-session", post(handle_new_session))
        .route("/api/chat", post(handle_chat))
        .route("/api/voice-response", post(handle_voice_response))
        .route("/api/clear-session", post(handle_clear_session))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .layer(cors)
        .with_state(state)
}

/// Serve on `bind` until SIGINT or SIGTERM.
pub async fn run_server(bind: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %bind, "server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, shutting down"); }
        () = terminate => { tracing::info!("received SIGTERM, shutting down"); }
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

/// Map a tool failure to a status: argument problems are the caller's,
/// everything else is ours.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    match as_sop_error(&err) {
        Some(SopError::InvalidArgument(_)) => bad_request(format!("{}: {}", tool_name, err)),
        Some(SopError::UnknownTool(_)) => not_found(err.to_string()),
        _ => AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "tool_error",
            message: format!("{}: {:#}", tool_name, err),
        },
    }
}

// ============ GET / and /health ============

#[derive(Serialize)]
struct RootResponse {
    service: &'static str,
    version: &'static str,
    status: &'static str,
}

async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        service: "WellStreet Urgent Care voice assistant",
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    index_ready: bool,
    sessions: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let retriever = &state.agent.tool_context().retriever;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        index_ready: retriever.is_ready() && !retriever.is_empty(),
        sessions: state.sessions.len(),
    })
}

// ============ sessions ============

#[derive(Serialize)]
struct NewSessionResponse {
    session_id: String,
    greeting: String,
}

async fn handle_new_session(State(state): State<AppState>) -> Json<NewSessionResponse> {
    Json(NewSessionResponse {
        session_id: state.sessions.create(),
        greeting: state.agent.greet(),
    })
}

fn default_session() -> String {
    DEFAULT_SESSION.to_string()
}

#[derive(Deserialize)]
struct ClearRequest {
    #[serde(default = "default_session")]
    session_id: String,
}

#[derive(Serialize)]
struct ClearResponse {
    status: &'static str,
    session_id: String,
}

async fn handle_clear_session(
    State(state): State<AppState>,
    Json(req): Json<ClearRequest>,
) -> Json<ClearResponse> {
    state.sessions.clear(&req.session_id).await;
    Json(ClearResponse {
        status: "cleared",
        session_id: req.session_id,
    })
}

// ============ turns ============

#[derive(Deserialize)]
struct TurnRequest {
    #[serde(default)]
    message: String,
    #[serde(default = "default_session")]
    session_id: String,
}

/// Run one agent turn on the request's session. Returns the reply and the
/// new history length.
async fn run_turn(state: &AppState, req: &TurnRequest) -> Result<(String, usize), AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("No message provided"));
    }

    let agent = Arc::clone(&state.agent);
    let message = req.message.clone();
    let out = state
        .sessions
        .run_turn(&req.session_id, move |history| async move {
            let (response, updated) = agent.respond(&message, &history).await;
            let len = updated.len();
            ((response, len), updated)
        })
        .await;

    tracing::info!(session_id = %req.session_id, history = out.1, "turn served");
    Ok(out)
}

#[derive(Serialize)]
struct ChatResponse {
    message: String,
    response: String,
    session_id: String,
    history_length: usize,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<TurnRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let (response, history_length) = run_turn(&state, &req).await?;
    Ok(Json(ChatResponse {
        message: req.message,
        response,
        session_id: req.session_id,
        history_length,
    }))
}

#[derive(Serialize)]
struct VoiceResponse {
    text: String,
    audio: Option<String>,
    audio_format: String,
    session_id: String,
    history_length: usize,
    error: Option<String>,
}

async fn handle_voice_response(
    State(state): State<AppState>,
    Json(req): Json<TurnRequest>,
) -> Result<Json<VoiceResponse>, AppError> {
    let (text, history_length) = run_turn(&state, &req).await?;

    let (audio, error) = match state.speech.synthesize(&text).await {
        Ok(bytes) => (Some(STANDARD.encode(bytes)), None),
        Err(e) => {
            tracing::warn!(session_id = %req.session_id, error = %e, "speech synthesis failed");
            (None, Some(e.to_string()))
        }
    };

    Ok(Json(VoiceResponse {
        text,
        audio,
        audio_format: state.speech.audio_format().to_string(),
        session_id: req.session_id,
        history_length,
        error,
    }))
}

// ============ tools ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolSpec>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.agent.tools().specs(),
    })
}

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tool = state
        .agent
        .tools()
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let ctx = state.agent.tool_context();
    if !ctx.retriever.is_ready() {
        return Err(AppError {
            status: StatusCode::BAD_REQUEST,
            code: "embeddings_disabled",
            message: "embeddings are disabled; configure [embedding].provider".to_string(),
        });
    }

    let result = tool
        .execute(params, ctx)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}
