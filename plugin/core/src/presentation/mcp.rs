// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! MCP JSON-RPC Dispatcher
//!
//! Serves the subset of the Model Context Protocol the plugin speaks:
//! `initialize`, `tools/list`, and `tools/call` over HTTP POST, with
//! notification swallowing per JSON-RPC semantics. The dispatcher is
//! stateless per request — it holds only a reference to the externally
//! owned, read-mostly tool registry and never mutates it.
//!
//! URL convention: `POST /orgx/mcp` is the unscoped full-capability
//! endpoint; `POST /orgx/mcp/<domain>` restricts the visible tool set to a
//! static per-domain allowlist. A tool denied by scope answers exactly like
//! a tool that does not exist (`-32601`), so callers cannot probe for tools
//! outside their declared domain.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::infrastructure::activity_store::ActivityStore;
use crate::infrastructure::outbox_store::OutboxStore;

/// JSON-RPC error code for an unknown (or scope-denied) method/tool.
pub const CODE_METHOD_NOT_FOUND: i32 = -32601;

/// JSON-RPC error code for malformed call parameters.
pub const CODE_INVALID_PARAMS: i32 = -32602;

/// Identity echoed by `initialize`.
#[derive(Debug, Clone, Serialize)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
}

/// One content block of a tool result (text-only in this subset).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
}

/// A tool's own result, wrapped verbatim into the JSON-RPC response.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,

    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: true,
        }
    }
}

/// Executable side of a registry entry.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, call_id: &str, arguments: Value) -> anyhow::Result<ToolResult>;
}

/// One entry in the host-owned tool registry.
pub struct RegisteredTool {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments, served as `inputSchema`.
    pub parameters: Value,
    pub handler: Arc<dyn ToolHandler>,
}

/// Read-mostly tool registry, populated by the host at startup.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, tool: RegisteredTool) -> Self {
        self.index.insert(tool.name.clone(), self.tools.len());
        self.tools.push(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|index| &self.tools[*index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredTool> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Fixed set of scope domains carried in the URL suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpDomain {
    Engineering,
    Product,
    Design,
    Marketing,
    Sales,
    Operations,
    Orchestration,
}

impl McpDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            McpDomain::Engineering => "engineering",
            McpDomain::Product => "product",
            McpDomain::Design => "design",
            McpDomain::Marketing => "marketing",
            McpDomain::Sales => "sales",
            McpDomain::Operations => "operations",
            McpDomain::Orchestration => "orchestration",
        }
    }

    pub const ALL: [McpDomain; 7] = [
        McpDomain::Engineering,
        McpDomain::Product,
        McpDomain::Design,
        McpDomain::Marketing,
        McpDomain::Sales,
        McpDomain::Operations,
        McpDomain::Orchestration,
    ];
}

impl FromStr for McpDomain {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        McpDomain::ALL
            .iter()
            .copied()
            .find(|domain| domain.as_str() == value)
            .ok_or(())
    }
}

/// Static per-domain tool allowlist. The unscoped endpoint sees everything;
/// a scoped endpoint sees only its domain's entries. Scope enforcement is a
/// hard boundary: a denied tool is indistinguishable from a missing one.
#[derive(Debug, Clone, Default)]
pub struct ScopePolicy {
    allowlist: HashMap<McpDomain, HashSet<String>>,
}

impl ScopePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, domain: McpDomain, tool_name: impl Into<String>) -> Self {
        self.allowlist
            .entry(domain)
            .or_default()
            .insert(tool_name.into());
        self
    }

    /// Allow a tool in every domain (read-only convenience tools).
    pub fn allow_everywhere(mut self, tool_name: impl Into<String>) -> Self {
        let name = tool_name.into();
        for domain in McpDomain::ALL {
            self = self.allow(domain, name.clone());
        }
        self
    }

    pub fn permits(&self, scope: Option<McpDomain>, tool_name: &str) -> bool {
        match scope {
            None => true,
            Some(domain) => self
                .allowlist
                .get(&domain)
                .is_some_and(|allowed| allowed.contains(tool_name)),
        }
    }
}

/// Tolerant JSON-RPC request shape. Anything that does not even carry a
/// `method` string is not a JSON-RPC request and falls through unhandled.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

/// Dispatch outcome, mapped onto HTTP by the router layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpOutcome {
    /// Not a request this dispatcher owns; upstream routing may handle it.
    NotHandled,
    /// A notification was consumed; per JSON-RPC it gets no response body.
    NoContent,
    /// A full JSON-RPC response document.
    Response(Value),
}

pub struct McpDispatcher {
    identity: ServerIdentity,
    registry: ToolRegistry,
    policy: ScopePolicy,
}

impl McpDispatcher {
    pub fn new(identity: ServerIdentity, registry: ToolRegistry, policy: ScopePolicy) -> Self {
        Self {
            identity,
            registry,
            policy,
        }
    }

    /// Dispatch one JSON-RPC request body within an optional scope.
    pub async fn dispatch(&self, scope: Option<McpDomain>, body: Value) -> McpOutcome {
        let Ok(request) = serde_json::from_value::<JsonRpcRequest>(body) else {
            return McpOutcome::NotHandled;
        };

        // Notifications never receive a response body, whatever the method.
        let Some(id) = request.id else {
            debug!(method = %request.method, "Swallowed JSON-RPC notification");
            return McpOutcome::NoContent;
        };

        match request.method.as_str() {
            "initialize" => McpOutcome::Response(result_response(
                id,
                json!({
                    "serverInfo": {
                        "name": self.identity.name,
                        "version": self.identity.version,
                    },
                    "capabilities": { "tools": {} },
                }),
            )),
            "tools/list" => {
                let tools: Vec<Value> = self
                    .registry
                    .iter()
                    .filter(|tool| self.policy.permits(scope, &tool.name))
                    .map(|tool| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "inputSchema": tool.parameters,
                        })
                    })
                    .collect();
                McpOutcome::Response(result_response(id, json!({ "tools": tools })))
            }
            "tools/call" => self.dispatch_tool_call(scope, id, request.params).await,
            _ => McpOutcome::NotHandled,
        }
    }

    async fn dispatch_tool_call(
        &self,
        scope: Option<McpDomain>,
        id: Value,
        params: Option<Value>,
    ) -> McpOutcome {
        let params = params.unwrap_or(Value::Null);
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return McpOutcome::Response(error_response(
                id,
                CODE_INVALID_PARAMS,
                "tools/call requires a tool name",
            ));
        };

        // Scope denial deliberately reads as "no such tool".
        if !self.policy.permits(scope, name) {
            warn!(
                tool = name,
                scope = scope.map(|domain| domain.as_str()).unwrap_or("unscoped"),
                "Tool call denied by scope"
            );
            return McpOutcome::Response(error_response(
                id,
                CODE_METHOD_NOT_FOUND,
                &format!("Tool not found: {name}"),
            ));
        }
        let Some(tool) = self.registry.get(name) else {
            return McpOutcome::Response(error_response(
                id,
                CODE_METHOD_NOT_FOUND,
                &format!("Tool not found: {name}"),
            ));
        };

        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(Value::Object(Default::default()));
        let call_id = match &id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        // The call succeeded even when the tool fails: tool-level errors
        // become `isError: true` content, never a protocol error.
        let result = match tool.handler.execute(&call_id, arguments).await {
            Ok(result) => result,
            Err(error) => {
                warn!(tool = name, %error, "Tool execution failed");
                ToolResult::error_text(error.to_string())
            }
        };

        match serde_json::to_value(&result) {
            Ok(value) => McpOutcome::Response(result_response(id, value)),
            Err(error) => McpOutcome::Response(error_response(
                id,
                CODE_INVALID_PARAMS,
                &format!("Tool result not serializable: {error}"),
            )),
        }
    }
}

fn result_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Value, code: i32, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

/// Shared state for the HTTP surface.
pub struct AppState {
    pub dispatcher: McpDispatcher,
    pub activity_store: Arc<ActivityStore>,
    pub outbox: Arc<OutboxStore>,
}

/// Build the plugin's HTTP router: the scoped/unscoped MCP endpoints plus a
/// health surface over the local stores.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/orgx/mcp", post(handle_unscoped))
        .route("/orgx/mcp/{domain}", post(handle_scoped))
        .route("/orgx/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_unscoped(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    outcome_to_response(state.dispatcher.dispatch(None, body).await)
}

async fn handle_scoped(
    State(state): State<Arc<AppState>>,
    Path(domain): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    // An unknown domain segment is an unroutable path, not an MCP error.
    let Ok(scope) = McpDomain::from_str(&domain) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    outcome_to_response(state.dispatcher.dispatch(Some(scope), body).await)
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    let stats = state.activity_store.stats();
    let outbox = match state.outbox.summary().await {
        Ok(summary) => serde_json::to_value(summary).unwrap_or(Value::Null),
        Err(error) => {
            warn!(%error, "Outbox summary failed during health check");
            Value::Null
        }
    };

    Json(json!({
        "status": "ok",
        "activity": stats,
        "outbox": outbox,
    }))
    .into_response()
}

fn outcome_to_response(outcome: McpOutcome) -> Response {
    match outcome {
        // Sentinel for upstream routing; surfaces as 404 when nothing else
        // claims the request.
        McpOutcome::NotHandled => StatusCode::NOT_FOUND.into_response(),
        McpOutcome::NoContent => StatusCode::NO_CONTENT.into_response(),
        McpOutcome::Response(body) => Json(body).into_response(),
    }
}
