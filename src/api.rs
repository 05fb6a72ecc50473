//! REST API server for the banking research agent
//!
//! Exposes the turn API over HTTP for a frontend or voice host.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::agent::{Orchestrator, SessionState};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TurnRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Opaque host values passed through to the turn.
    #[serde(default)]
    pub session: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub chat_id: Option<String>,
    pub messages: Vec<ChatMessage>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Helpers
/// =============================

fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

/// Chat ids from the frontend may be arbitrary strings; audit sessions are
/// keyed by a UUID derived from them.
fn session_id_for_chat(chat_id: Option<&str>) -> String {
    match chat_id {
        Some(v) if !v.trim().is_empty() => Uuid::parse_str(v)
            .unwrap_or_else(|_| stable_uuid_from_string(v))
            .to_string(),
        _ => stable_uuid_from_string("anonymous-chat").to_string(),
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "audit_backend": state.orchestrator.audit_log().backend_name(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Turn Endpoint
/// =============================

async fn run_turn(
    State(state): State<ApiState>,
    Json(req): Json<TurnRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("message must not be empty".into())),
        );
    }

    let mut session: SessionState = req.session;
    if let Some(session_id) = req.session_id {
        session.insert("session_id".to_string(), Value::String(session_id));
    }

    info!(session_id = ?session.get("session_id"), "Received turn request");

    let outcome = state.orchestrator.run_turn(&req.message, &session).await;
    (StatusCode::OK, Json(ApiResponse::success(outcome)))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    // Only the latest user message is a turn; earlier ones were answered already.
    let Some(user_msg) = req.messages.iter().rev().find(|m| m.role == "user") else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("No user message found".into())),
        );
    };

    let session_id = session_id_for_chat(req.chat_id.as_deref());
    info!(session_id = %session_id, "chat_handler turn");

    let turn = TurnRequest {
        message: user_msg.content.clone(),
        session_id: Some(session_id.clone()),
        session: Map::new(),
    };

    let (status, Json(mut response)) = run_turn(State(state), Json(turn)).await;
    if response.success {
        if let Some(data) = response.data.as_mut() {
            data["chat_id"] = serde_json::json!(session_id);
        }
    }
    (status, Json(response))
}

/// =============================
/// Audit Endpoint
/// =============================

async fn get_audit(
    State(state): State<ApiState>,
    Path(audit_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    let audit_log = state.orchestrator.audit_log();

    match audit_log.get(audit_id).await {
        Ok(Some(record)) => {
            let integrity_ok = audit_log.verify_integrity(audit_id).await.unwrap_or(false);
            (
                StatusCode::OK,
                Json(ApiResponse::success(serde_json::json!({
                    "record": record,
                    "integrity_ok": integrity_ok,
                }))),
            )
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("No audit record {}", audit_id))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Audit lookup failed: {}", e))),
        ),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/turn", post(run_turn))
        .route("/api/chat", post(chat_handler))
        .route("/api/audit/:audit_id", get(get_audit))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
