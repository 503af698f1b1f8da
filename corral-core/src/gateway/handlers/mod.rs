//! Tool handler strategies
//!
//! Each [`ToolDefinition`] is executed by exactly one strategy, chosen by its
//! `handler_type`: [`MockHandler`], [`HttpHandler`] or [`ScriptHandler`].
//! Handlers report failures as [`HandlerError`]; the gateway turns those into
//! tool-error results, never into protocol errors.

mod http;
mod mock;
mod script;

pub use http::HttpHandler;
pub use mock::MockHandler;
pub use script::{ScriptHandler, find_forbidden_token};

use crate::model::{CredentialSet, ToolDefinition};
use crate::template::TemplateError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Failure of a single tool execution
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("Script rejected: forbidden token '{0}'")]
    ScriptRejected(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Tool '{tool}' timed out after {after:?}")]
    Timeout { tool: String, after: Duration },

    #[error("Handler '{handler}' cannot run a '{kind}' tool")]
    Mismatch {
        handler: &'static str,
        kind: &'static str,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// One execution strategy
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Strategy name, matching `handler_type`
    fn kind(&self) -> &'static str;

    /// Execute `tool` and return its text output
    async fn execute(
        &self,
        tool: &ToolDefinition,
        arguments: &Value,
        credentials: &CredentialSet,
    ) -> Result<String, HandlerError>;
}

/// The three strategies, selected per call by `handler_type`
#[derive(Clone)]
pub struct HandlerSet {
    pub mock: Arc<dyn ToolHandler>,
    pub http: Arc<dyn ToolHandler>,
    pub script: Arc<dyn ToolHandler>,
}

impl HandlerSet {
    pub fn for_tool(&self, tool: &ToolDefinition) -> &Arc<dyn ToolHandler> {
        match tool.handler {
            crate::model::ToolHandlerSpec::Mock { .. } => &self.mock,
            crate::model::ToolHandlerSpec::Http { .. } => &self.http,
            crate::model::ToolHandlerSpec::Javascript { .. } => &self.script,
        }
    }
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSet")
            .field("mock", &self.mock.kind())
            .field("http", &self.http.kind())
            .field("script", &self.script.kind())
            .finish()
    }
}

/// Text form of a handler's result value: strings verbatim, anything else
/// as pretty-printed JSON.
pub(crate) fn output_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
