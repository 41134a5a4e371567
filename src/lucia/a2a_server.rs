//! Inbound A2A surface: registry agents exposed over JSON-RPC 2.0.
//!
//! Only compiled with the `a2a-server` feature.  Each registered agent is
//! served at `/a2a/{agent-id}` with card discovery at
//! `/a2a/{agent-id}/.well-known/agent.json`.  Supported methods:
//! `message/send`, `message/stream` (a single-event SSE body), `tasks/get`,
//! and `tasks/cancel`.
//!
//! When a bearer token is configured, credentials are compared as SHA-256
//! digests in constant time.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};

use crate::lucia::a2a::A2aMessage;
use crate::lucia::dispatch::Dispatcher;
use crate::lucia::registry::AgentRegistry;

/// Settings for the inbound surface.
#[derive(Debug, Clone)]
pub struct A2aServerConfig {
    pub addr: SocketAddr,
    /// Optional bearer credential required on every request.
    pub bearer_token: Option<String>,
}

/// One tracked long-running task on this server.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskRecord {
    id: String,
    status: String,
    message: A2aMessage,
}

struct ServerState {
    registry: Arc<AgentRegistry>,
    dispatcher: Arc<Dispatcher>,
    tasks: RwLock<HashMap<String, TaskRecord>>,
    bearer_token: Option<String>,
}

/// Compare the presented credential against the expected one in constant time
/// over SHA-256 digests.
fn credential_matches(expected: &str, presented: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let presented = Sha256::digest(presented.as_bytes());
    expected.ct_eq(&presented).into()
}

fn authorized(state: &ServerState, headers: &HeaderMap) -> bool {
    let expected = match &state.bearer_token {
        Some(token) => token,
        None => return true,
    };
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|presented| credential_matches(expected, presented))
        .unwrap_or(false)
}

fn rpc_error(id: serde_json::Value, code: i64, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message},
    })
}

fn rpc_result(id: serde_json::Value, result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

async fn card_handler(
    State(state): State<Arc<ServerState>>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": "unauthorized"})))
            .into_response();
    }
    match state.registry.get(&agent_id).await {
        Some(entry) => Json(serde_json::to_value(&entry.card).unwrap_or_default()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("unknown agent: {}", agent_id)})),
        )
            .into_response(),
    }
}

async fn rpc_handler(
    State(state): State<Arc<ServerState>>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    Json(envelope): Json<serde_json::Value>,
) -> Response {
    if !authorized(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": "unauthorized"})))
            .into_response();
    }

    let rpc_id = envelope.get("id").cloned().unwrap_or(serde_json::Value::Null);
    let method = envelope.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let params = envelope.get("params").cloned().unwrap_or(serde_json::Value::Null);

    match method {
        "message/send" => {
            let body = handle_message_send(&state, &agent_id, rpc_id, params).await;
            Json(body).into_response()
        }
        "message/stream" => {
            // Streaming is served as one terminal SSE event carrying the full
            // reply; clients that need token streams talk to the agent's
            // provider directly.
            let body = handle_message_send(&state, &agent_id, rpc_id, params).await;
            let event = format!("data: {}\n\n", body);
            (
                StatusCode::OK,
                [("content-type", "text/event-stream")],
                event,
            )
                .into_response()
        }
        "tasks/get" => {
            let task_id = params.get("id").and_then(|i| i.as_str()).unwrap_or("");
            let tasks = state.tasks.read().await;
            let body = match tasks.get(task_id) {
                Some(record) => rpc_result(
                    rpc_id,
                    serde_json::to_value(record).unwrap_or_default(),
                ),
                None => rpc_error(rpc_id, -32001, "task not found"),
            };
            Json(body).into_response()
        }
        "tasks/cancel" => {
            let task_id = params.get("id").and_then(|i| i.as_str()).unwrap_or("");
            let mut tasks = state.tasks.write().await;
            let body = match tasks.get_mut(task_id) {
                Some(record) => {
                    record.status = "canceled".to_string();
                    rpc_result(rpc_id, serde_json::to_value(&*record).unwrap_or_default())
                }
                None => rpc_error(rpc_id, -32001, "task not found"),
            };
            Json(body).into_response()
        }
        _ => Json(rpc_error(rpc_id, -32601, "method not found")).into_response(),
    }
}

async fn handle_message_send(
    state: &Arc<ServerState>,
    agent_id: &str,
    rpc_id: serde_json::Value,
    params: serde_json::Value,
) -> serde_json::Value {
    let inbound: A2aMessage = match params
        .get("message")
        .cloned()
        .and_then(|m| serde_json::from_value(m).ok())
    {
        Some(message) => message,
        None => return rpc_error(rpc_id, -32602, "params.message is malformed"),
    };

    let text = inbound.text();
    let response = state
        .dispatcher
        .invoke_agent(agent_id, &text, &[], inbound.context_id.as_deref())
        .await;

    if !response.success {
        return rpc_error(
            rpc_id,
            -32000,
            response.error.as_deref().unwrap_or("agent invocation failed"),
        );
    }

    let reply = A2aMessage::agent_text(response.content, inbound.context_id.clone());
    state.tasks.write().await.insert(
        inbound.message_id.clone(),
        TaskRecord {
            id: inbound.message_id.clone(),
            status: "completed".to_string(),
            message: reply.clone(),
        },
    );

    rpc_result(rpc_id, serde_json::to_value(&reply).unwrap_or_default())
}

/// Start the inbound surface; resolves to the bound address.
pub async fn serve(
    registry: Arc<AgentRegistry>,
    dispatcher: Arc<Dispatcher>,
    config: A2aServerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SocketAddr, Box<dyn std::error::Error + Send + Sync>> {
    let state = Arc::new(ServerState {
        registry,
        dispatcher,
        tasks: RwLock::new(HashMap::new()),
        bearer_token: config.bearer_token,
    });

    let app = Router::new()
        .route("/a2a/{agent_id}", post(rpc_handler))
        .route("/a2a/{agent_id}/.well-known/agent.json", get(card_handler))
        .with_state(state);

    let listener = TcpListener::bind(config.addr).await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            })
            .await;
        if let Err(e) = result {
            log::error!("a2a_server: serve failed: {}", e);
        }
    });

    log::info!("a2a_server: listening on {}", addr);
    Ok(addr)
}
