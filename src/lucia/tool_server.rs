//! Tool-server connections: stdio child processes and remote HTTP/SSE endpoints.
//!
//! A [`ToolServerRecord`] describes where a set of tools lives; the
//! [`ToolServerRegistry`] owns one connection per server and exposes
//! `list_tools` / `call_tool` / `describe_tool` over it.  Connection state is an
//! explicit machine — `Disconnected → Connecting → Connected → Failed` — and the
//! tool list is cached only while `Connected`.
//!
//! Stdio servers are spawned as child processes and spoken to over
//! line-delimited JSON-RPC 2.0 on stdin/stdout (`tools/list`, `tools/call`),
//! with one writer and one reader task per child and automatic restart under
//! exponential backoff capped at 30 seconds.  Remote servers receive the same
//! JSON-RPC calls over a pooled HTTP connection with the record's headers
//! attached; SSE servers answer with an event stream whose first `data:`
//! payload carries the response.
//!
//! Failures never escape the registry as panics or raw errors: `call_tool`
//! yields a structured [`ToolCallError`] `{code, message}` that the invoking
//! agent folds into a tool result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};

use crate::lucia::clients::common::get_shared_http_client;
use crate::lucia::tool_protocol::{ToolCallError, ToolMetadata, ToolResult};

/// Transport used to reach a tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ToolServerTransport {
    /// Child process spoken to over stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Remote JSON-RPC endpoint answering plain JSON bodies.
    Http { url: String },
    /// Remote JSON-RPC endpoint answering server-sent events.
    Sse { url: String },
}

/// Persisted description of one tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolServerRecord {
    pub id: String,
    pub name: String,
    pub transport: ToolServerTransport,
    /// Request headers for remote transports (e.g. a bearer token).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub enabled: bool,
}

/// Connection lifecycle of one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const STDIO_RESTART_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// JSON-RPC request identifier and line pair queued for the stdio writer task.
struct OutboundLine {
    line: String,
}

/// Shared state of one stdio child session.
struct StdioShared {
    /// Writer-channel for the currently running child, if any.
    sender: Mutex<Option<mpsc::Sender<OutboundLine>>>,
    /// In-flight requests awaiting a response line, keyed by JSON-RPC id.
    pending: Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>,
    next_id: AtomicU64,
}

/// One connected (or connecting) tool server.
struct ServerHandle {
    record: ToolServerRecord,
    state: RwLock<ConnectionState>,
    /// Tool list cached while `Connected`.
    tools: RwLock<Option<Vec<ToolMetadata>>>,
    stdio: Option<Arc<StdioShared>>,
    shutdown: watch::Sender<bool>,
}

impl ServerHandle {
    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
        if state != ConnectionState::Connected {
            *self.tools.write().await = None;
        }
    }

    /// Issue one JSON-RPC request over whichever transport the record uses.
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ToolCallError> {
        match &self.record.transport {
            ToolServerTransport::Stdio { .. } => self.request_stdio(method, params).await,
            ToolServerTransport::Http { url } => {
                self.request_http(url, method, params, false).await
            }
            ToolServerTransport::Sse { url } => self.request_http(url, method, params, true).await,
        }
    }

    async fn request_stdio(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ToolCallError> {
        let shared = self
            .stdio
            .as_ref()
            .ok_or_else(|| ToolCallError::not_connected(&self.record.id))?;

        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        })
        .to_string();

        let (tx, rx) = oneshot::channel();
        shared.pending.lock().await.insert(id, tx);

        let sender = {
            let guard = shared.sender.lock().await;
            match guard.as_ref() {
                Some(s) => s.clone(),
                None => {
                    shared.pending.lock().await.remove(&id);
                    return Err(ToolCallError::not_connected(&self.record.id));
                }
            }
        };
        if sender.send(OutboundLine { line }).await.is_err() {
            shared.pending.lock().await.remove(&id);
            return Err(ToolCallError::not_connected(&self.record.id));
        }

        match tokio::time::timeout(Duration::from_secs(60), rx).await {
            Ok(Ok(value)) => unwrap_rpc_envelope(value),
            Ok(Err(_)) => Err(ToolCallError::transport("tool server closed mid-request")),
            Err(_) => {
                shared.pending.lock().await.remove(&id);
                Err(ToolCallError::transport("tool server request timed out"))
            }
        }
    }

    async fn request_http(
        &self,
        url: &str,
        method: &str,
        params: serde_json::Value,
        sse: bool,
    ) -> Result<serde_json::Value, ToolCallError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": method,
            "params": params,
        });

        let mut request = get_shared_http_client()
            .post(url)
            .timeout(Duration::from_secs(60))
            .json(&body);
        if sse {
            request = request.header("Accept", "text/event-stream");
        }
        for (name, value) in &self.record.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let resp = request
            .send()
            .await
            .map_err(|e| ToolCallError::transport(format!("{}", e)))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ToolCallError::transport(format!("{}", e)))?;
        if !status.is_success() {
            return Err(ToolCallError::transport(format!(
                "tool server returned HTTP {}",
                status
            )));
        }

        let payload = if sse { first_sse_data(&text) } else { text };
        let value: serde_json::Value = serde_json::from_str(&payload)
            .map_err(|e| ToolCallError::protocol(format!("malformed response: {}", e)))?;
        unwrap_rpc_envelope(value)
    }
}

/// Extract the first `data:` payload from an event-stream body.
fn first_sse_data(body: &str) -> String {
    for line in body.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            return rest.trim().to_string();
        }
    }
    body.to_string()
}

/// Pull `result` out of a JSON-RPC envelope, mapping `error` members through.
fn unwrap_rpc_envelope(value: serde_json::Value) -> Result<serde_json::Value, ToolCallError> {
    if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-32000);
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("tool server error")
            .to_string();
        return Err(ToolCallError { code, message });
    }
    match value.get("result") {
        Some(result) => Ok(result.clone()),
        None => Err(ToolCallError::protocol("response carried no result")),
    }
}

/// Registry owning every tool-server connection in the process.
///
/// The registry is a process-wide singleton built during application startup and
/// torn down on host stop; each server's send/recv is serialized by its own
/// transport state, so registry methods can be called from many tasks at once.
pub struct ToolServerRegistry {
    servers: RwLock<HashMap<String, Arc<ServerHandle>>>,
}

impl ToolServerRegistry {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
        }
    }

    /// Connect to a server and cache its initial tool list.
    ///
    /// Stdio transports spawn the child and keep respawning it under capped
    /// exponential backoff until [`disconnect`](Self::disconnect).  An existing
    /// connection under the same id is replaced.
    pub async fn connect(&self, record: ToolServerRecord) -> Result<(), ToolCallError> {
        if !record.enabled {
            return Err(ToolCallError::protocol(format!(
                "tool server {} is disabled",
                record.id
            )));
        }
        self.disconnect(&record.id).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stdio = match &record.transport {
            ToolServerTransport::Stdio { .. } => Some(Arc::new(StdioShared {
                sender: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            })),
            _ => None,
        };

        let handle = Arc::new(ServerHandle {
            record,
            state: RwLock::new(ConnectionState::Connecting),
            tools: RwLock::new(None),
            stdio,
            shutdown: shutdown_tx,
        });

        if handle.stdio.is_some() {
            tokio::spawn(run_stdio_supervisor(handle.clone(), shutdown_rx));
            // The supervisor flips the state once the child is up; wait for the
            // first transition so connect() reports an honest outcome.
            wait_for_settled_state(&handle).await;
        } else {
            match tokio::time::timeout(
                CONNECT_TIMEOUT,
                handle.request("tools/list", serde_json::json!({})),
            )
            .await
            {
                Ok(Ok(result)) => {
                    let tools = parse_tool_list(&handle.record.id, result);
                    *handle.tools.write().await = Some(tools);
                    handle.set_state(ConnectionState::Connected).await;
                }
                Ok(Err(e)) => {
                    handle.set_state(ConnectionState::Failed).await;
                    self.servers
                        .write()
                        .await
                        .insert(handle.record.id.clone(), handle.clone());
                    return Err(e);
                }
                Err(_) => {
                    handle.set_state(ConnectionState::Failed).await;
                    self.servers
                        .write()
                        .await
                        .insert(handle.record.id.clone(), handle.clone());
                    return Err(ToolCallError::transport("connect timed out"));
                }
            }
        }

        let id = handle.record.id.clone();
        self.servers.write().await.insert(id, handle);
        Ok(())
    }

    /// Drop a server's connection, killing its child process if any.
    pub async fn disconnect(&self, server_id: &str) {
        if let Some(handle) = self.servers.write().await.remove(server_id) {
            let _ = handle.shutdown.send(true);
            handle.set_state(ConnectionState::Disconnected).await;
        }
    }

    /// Current connection state; `Disconnected` for unknown ids.
    pub async fn state(&self, server_id: &str) -> ConnectionState {
        match self.servers.read().await.get(server_id) {
            Some(handle) => *handle.state.read().await,
            None => ConnectionState::Disconnected,
        }
    }

    async fn handle(&self, server_id: &str) -> Result<Arc<ServerHandle>, ToolCallError> {
        self.servers
            .read()
            .await
            .get(server_id)
            .cloned()
            .ok_or_else(|| ToolCallError::not_connected(server_id))
    }

    /// List a server's tools, re-querying it when `refresh` is set.
    ///
    /// Without `refresh` the cached list is returned; the cache exists only
    /// while the server is `Connected`.
    pub async fn list_tools(
        &self,
        server_id: &str,
        refresh: bool,
    ) -> Result<Vec<ToolMetadata>, ToolCallError> {
        let handle = self.handle(server_id).await?;
        if *handle.state.read().await != ConnectionState::Connected {
            return Err(ToolCallError::not_connected(server_id));
        }

        if !refresh {
            if let Some(tools) = handle.tools.read().await.as_ref() {
                return Ok(tools.clone());
            }
        }

        let result = handle.request("tools/list", serde_json::json!({})).await?;
        let tools = parse_tool_list(server_id, result);
        *handle.tools.write().await = Some(tools.clone());
        Ok(tools)
    }

    /// Describe one tool: `(description, input schema, output schema)`.
    pub async fn describe_tool(
        &self,
        server_id: &str,
        tool_name: &str,
    ) -> Result<ToolMetadata, ToolCallError> {
        let tools = self.list_tools(server_id, false).await?;
        tools
            .into_iter()
            .find(|t| t.name == tool_name)
            .ok_or_else(|| ToolCallError::not_found(tool_name))
    }

    /// Invoke a tool.  Transport and server failures come back as structured
    /// [`ToolCallError`]s; tool-level failures come back as unsuccessful
    /// [`ToolResult`]s.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolCallError> {
        let handle = self.handle(server_id).await?;
        if *handle.state.read().await != ConnectionState::Connected {
            return Err(ToolCallError::not_connected(server_id));
        }

        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });
        let result = handle.request("tools/call", params).await?;

        // Servers that follow our result convention round-trip cleanly; anything
        // else is treated as a bare success payload.
        let tool_result = match serde_json::from_value::<ToolResult>(result.clone()) {
            Ok(r) => r,
            Err(_) => ToolResult::success(result),
        };
        Ok(tool_result.with_metadata("serverId", serde_json::json!(server_id)))
    }

    /// Ids of all servers currently tracked.
    pub async fn server_ids(&self) -> Vec<String> {
        self.servers.read().await.keys().cloned().collect()
    }

    /// Disconnect everything; called on host shutdown.
    pub async fn shutdown(&self) {
        let ids = self.server_ids().await;
        for id in ids {
            self.disconnect(&id).await;
        }
    }
}

impl Default for ToolServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_tool_list(server_id: &str, result: serde_json::Value) -> Vec<ToolMetadata> {
    let items = result
        .get("tools")
        .and_then(|t| t.as_array())
        .cloned()
        .unwrap_or_default();
    let mut tools = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<ToolMetadata>(item) {
            Ok(tool) => tools.push(tool),
            Err(e) => {
                log::warn!(
                    "tool_server: skipping malformed tool from {}: {}",
                    server_id,
                    e
                );
            }
        }
    }
    tools
}

/// Block until the supervisor has either connected or failed the first attempt.
async fn wait_for_settled_state(handle: &Arc<ServerHandle>) {
    for _ in 0..100 {
        let state = *handle.state.read().await;
        if state != ConnectionState::Connecting {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Owns a stdio child for the life of the connection: spawn, pump, respawn.
async fn run_stdio_supervisor(handle: Arc<ServerHandle>, mut shutdown: watch::Receiver<bool>) {
    let (command, args, env) = match &handle.record.transport {
        ToolServerTransport::Stdio { command, args, env } => {
            (command.clone(), args.clone(), env.clone())
        }
        _ => return,
    };
    let shared = match handle.stdio.as_ref() {
        Some(s) => s.clone(),
        None => return,
    };

    let mut backoff = Duration::from_secs(1);
    loop {
        if *shutdown.borrow() {
            return;
        }
        handle.set_state(ConnectionState::Connecting).await;

        let mut child = match Command::new(&command)
            .args(&args)
            .envs(&env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                log::error!(
                    "tool_server: failed to spawn {} for {}: {}",
                    command,
                    handle.record.id,
                    e
                );
                handle.set_state(ConnectionState::Failed).await;
                if sleep_or_shutdown(&mut shutdown, backoff).await {
                    return;
                }
                backoff = (backoff * 2).min(STDIO_RESTART_BACKOFF_CAP);
                continue;
            }
        };

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (stdin, stdout) = match (stdin, stdout) {
            (Some(i), Some(o)) => (i, o),
            _ => {
                handle.set_state(ConnectionState::Failed).await;
                return;
            }
        };

        // Writer task: drain the outbound queue into the child's stdin.
        let (tx, mut rx) = mpsc::channel::<OutboundLine>(64);
        *shared.sender.lock().await = Some(tx);
        let writer = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(outbound) = rx.recv().await {
                if stdin
                    .write_all(format!("{}\n", outbound.line).as_bytes())
                    .await
                    .is_err()
                {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // Reader task: route response lines to their pending requests.
        let pending = shared.clone();
        let server_id = handle.record.id.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let value: serde_json::Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(_) => {
                        log::debug!("tool_server: non-JSON line from {}: {}", server_id, line);
                        continue;
                    }
                };
                if let Some(id) = value.get("id").and_then(|i| i.as_u64()) {
                    if let Some(waiter) = pending.pending.lock().await.remove(&id) {
                        let _ = waiter.send(value);
                    }
                }
            }
        });

        // Prime the tool cache; a child that cannot list tools counts as failed.
        match handle.request("tools/list", serde_json::json!({})).await {
            Ok(result) => {
                let tools = parse_tool_list(&handle.record.id, result);
                *handle.tools.write().await = Some(tools);
                handle.set_state(ConnectionState::Connected).await;
                backoff = Duration::from_secs(1);
            }
            Err(e) => {
                log::error!(
                    "tool_server: initial tools/list failed for {}: {}",
                    handle.record.id,
                    e
                );
            }
        }

        let mut shutdown_requested = false;
        tokio::select! {
            _ = child.wait() => {
                log::warn!("tool_server: child for {} exited; restarting", handle.record.id);
            }
            _ = shutdown.changed() => {
                shutdown_requested = true;
            }
        }

        *shared.sender.lock().await = None;
        writer.abort();
        reader.abort();
        shared.pending.lock().await.clear();

        if shutdown_requested {
            let _ = child.kill().await;
            handle.set_state(ConnectionState::Disconnected).await;
            return;
        }
        handle.set_state(ConnectionState::Failed).await;

        if sleep_or_shutdown(&mut shutdown, backoff).await {
            return;
        }
        backoff = (backoff * 2).min(STDIO_RESTART_BACKOFF_CAP);
    }
}

/// Sleep for `duration` unless shutdown arrives first; returns `true` on shutdown.
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.changed() => *shutdown.borrow(),
    }
}
