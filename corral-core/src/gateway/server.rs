//! Tool gateway dispatch
//!
//! Parses a raw request body, resolves the target tool server and answers
//! the four supported methods. Tool failures are reported inside a
//! successful response as `isError` results; only framing, routing and
//! unknown methods produce protocol errors.

use super::handlers::{HandlerSet, HttpHandler, MockHandler, ScriptHandler, ToolHandler};
use super::protocol::*;
use crate::config::{GatewaySettings, ScriptSettings};
use crate::model::{CredentialSet, ToolServer};
use crate::store::{PlaintextCipher, SecretCipher, ToolStore};
use crate::template::TemplateEngine;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// JSON-RPC front end over a [`ToolStore`]
#[derive(Clone)]
pub struct ToolGateway {
    store: Arc<dyn ToolStore>,
    cipher: Arc<dyn SecretCipher>,
    handlers: HandlerSet,
}

impl std::fmt::Debug for ToolGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolGateway")
            .field("handlers", &self.handlers)
            .finish()
    }
}

impl ToolGateway {
    /// Create a new gateway builder
    pub fn builder(store: Arc<dyn ToolStore>) -> ToolGatewayBuilder {
        ToolGatewayBuilder::new(store)
    }

    /// Handle one request body addressed to `server_id`
    pub async fn handle(&self, server_id: &str, body: &[u8]) -> JsonRpcResponse {
        let raw: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                debug!(server_id, error = %e, "unparseable request body");
                return JsonRpcResponse::error(RequestId::Null, JsonRpcError::parse_error());
            }
        };

        let request: JsonRpcRequest = match serde_json::from_value(raw.clone()) {
            Ok(request) => request,
            Err(e) => {
                return JsonRpcResponse::error(
                    RequestId::from_raw(&raw),
                    JsonRpcError::invalid_request(format!("Invalid request: {}", e)),
                );
            }
        };

        if request.jsonrpc != JSONRPC_VERSION {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::invalid_request(format!(
                    "Unsupported jsonrpc version '{}'",
                    request.jsonrpc
                )),
            );
        }

        let server = match self.store.get_server(server_id).await {
            Ok(Some(server)) => server,
            Ok(None) => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::invalid_request(format!("Unknown server '{}'", server_id)),
                );
            }
            Err(e) => {
                warn!(server_id, error = %e, "tool server lookup failed");
                let error = JsonRpcError::internal_error(e.to_string());
                return JsonRpcResponse::error(request.id, error);
            }
        };

        self.dispatch(&server, request).await
    }

    async fn dispatch(&self, server: &ToolServer, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!(server_id = %server.id, method = %request.method, "gateway request");
        match request.method.as_str() {
            "initialize" => self.handle_initialize(server, request),
            "notifications/initialized" | "initialized" => {
                JsonRpcResponse::success(request.id, Value::Object(Default::default()))
            }
            "tools/list" => self.handle_tools_list(server, request).await,
            "tools/call" => self.handle_tools_call(server, request).await,
            other => {
                let error = JsonRpcError::method_not_found(other);
                JsonRpcResponse::error(request.id, error)
            }
        }
    }

    fn handle_initialize(&self, server: &ToolServer, request: JsonRpcRequest) -> JsonRpcResponse {
        let name = if server.name.is_empty() {
            server.id.clone()
        } else {
            server.name.clone()
        };

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name,
                version: crate::VERSION.to_string(),
                description: server.description.clone(),
            },
        };

        success(request.id, &result)
    }

    async fn handle_tools_list(
        &self,
        server: &ToolServer,
        request: JsonRpcRequest,
    ) -> JsonRpcResponse {
        let tools = match self.store.list_tools(&server.id).await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(server_id = %server.id, error = %e, "listing tools failed");
                let error = JsonRpcError::internal_error(e.to_string());
                return JsonRpcResponse::error(request.id, error);
            }
        };

        let result = ToolsListResult {
            tools: tools
                .into_iter()
                .filter(|tool| tool.enabled)
                .map(|tool| ToolInfo {
                    name: tool.name,
                    description: tool.description,
                    input_schema: tool.input_schema,
                })
                .collect(),
        };

        success(request.id, &result)
    }

    async fn handle_tools_call(
        &self,
        server: &ToolServer,
        request: JsonRpcRequest,
    ) -> JsonRpcResponse {
        let params: ToolCallParams = match request.params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::invalid_params(format!("Invalid tool call params: {}", e)),
                    );
                }
            },
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::invalid_params("Missing tool call params"),
                );
            }
        };

        let result = self.call_tool(server, &params).await;
        success(request.id, &result)
    }

    async fn call_tool(&self, server: &ToolServer, params: &ToolCallParams) -> ToolCallResult {
        let tool = match self.store.find_tool(&server.id, &params.name).await {
            Ok(Some(tool)) => tool,
            Ok(None) => {
                return ToolCallResult::error(format!("Tool '{}' not found", params.name));
            }
            Err(e) => {
                warn!(
                    server_id = %server.id,
                    tool = %params.name,
                    error = %e,
                    "tool lookup failed"
                );
                return ToolCallResult::error(e.to_string());
            }
        };

        if !tool.enabled {
            return ToolCallResult::error(format!("Tool '{}' is disabled", tool.name));
        }

        let credentials = match self.credentials(server) {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(server_id = %server.id, error = %e, "credential decryption failed");
                return ToolCallResult::error(e.to_string());
            }
        };

        let handler = self.handlers.for_tool(&tool);
        let arguments = match &params.arguments {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };

        match handler.execute(&tool, &arguments, &credentials).await {
            Ok(text) => {
                info!(
                    server_id = %server.id,
                    tool = %tool.name,
                    handler = handler.kind(),
                    "tool call succeeded"
                );
                ToolCallResult::text(text)
            }
            Err(e) => {
                info!(
                    server_id = %server.id,
                    tool = %tool.name,
                    handler = handler.kind(),
                    error = %e,
                    "tool call failed"
                );
                ToolCallResult::error(e.to_string())
            }
        }
    }

    fn credentials(&self, server: &ToolServer) -> crate::Result<CredentialSet> {
        server
            .env
            .iter()
            .map(|(key, encrypted)| -> crate::Result<(String, String)> {
                Ok((key.clone(), self.cipher.decrypt(encrypted)?))
            })
            .collect()
    }
}

fn success<T: Serialize>(id: RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, JsonRpcError::internal_error(e.to_string())),
    }
}

/// Builder for [`ToolGateway`]
pub struct ToolGatewayBuilder {
    store: Arc<dyn ToolStore>,
    cipher: Arc<dyn SecretCipher>,
    engine: TemplateEngine,
    gateway: GatewaySettings,
    script: ScriptSettings,
    mock: Option<Arc<dyn ToolHandler>>,
    http: Option<Arc<dyn ToolHandler>>,
    javascript: Option<Arc<dyn ToolHandler>>,
}

impl ToolGatewayBuilder {
    pub fn new(store: Arc<dyn ToolStore>) -> Self {
        Self {
            store,
            cipher: Arc::new(PlaintextCipher),
            engine: TemplateEngine::lenient(),
            gateway: GatewaySettings::default(),
            script: ScriptSettings::default(),
            mock: None,
            http: None,
            javascript: None,
        }
    }

    pub fn cipher(mut self, cipher: Arc<dyn SecretCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    /// Apply gateway settings; `strict_templates` picks the engine mode
    pub fn gateway_settings(mut self, settings: GatewaySettings) -> Self {
        self.engine = if settings.strict_templates {
            TemplateEngine::strict()
        } else {
            TemplateEngine::lenient()
        };
        self.gateway = settings;
        self
    }

    pub fn script_settings(mut self, settings: ScriptSettings) -> Self {
        self.script = settings;
        self
    }

    pub fn mock_handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.mock = Some(handler);
        self
    }

    pub fn http_handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.http = Some(handler);
        self
    }

    pub fn script_handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.javascript = Some(handler);
        self
    }

    pub fn build(self) -> ToolGateway {
        let engine = self.engine;
        let http_timeout = self.gateway.http_timeout;
        let script = self.script;

        ToolGateway {
            store: self.store,
            cipher: self.cipher,
            handlers: HandlerSet {
                mock: self
                    .mock
                    .unwrap_or_else(|| Arc::new(MockHandler::new(engine))),
                http: self
                    .http
                    .unwrap_or_else(|| Arc::new(HttpHandler::new(engine, http_timeout))),
                script: self
                    .javascript
                    .unwrap_or_else(|| Arc::new(ScriptHandler::new(script))),
            },
        }
    }
}
