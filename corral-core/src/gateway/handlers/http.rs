//! Proxied HTTP calls

use super::{HandlerError, ToolHandler};
use crate::model::{CredentialSet, HttpTemplate, ToolDefinition, ToolHandlerSpec};
use crate::template::TemplateEngine;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

static CREDENTIAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*credential\.([A-Za-z0-9_\-]+)\s*\}\}").expect("valid regex")
});

/// A fully rendered outbound request
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PreparedRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Renders `{url, headers, body}` against the call arguments and issues the
/// request. Non-2xx responses and transport failures become tool errors.
#[derive(Debug, Clone)]
pub struct HttpHandler {
    client: reqwest::Client,
    engine: TemplateEngine,
    timeout: Duration,
}

impl HttpHandler {
    pub fn new(engine: TemplateEngine, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            engine,
            timeout,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub(crate) fn prepare(
        &self,
        template: &HttpTemplate,
        arguments: &Value,
        credentials: &CredentialSet,
    ) -> Result<PreparedRequest, HandlerError> {
        let method = reqwest::Method::from_bytes(template.method.to_uppercase().as_bytes())
            .map_err(|_| {
                HandlerError::Request(format!("invalid HTTP method '{}'", template.method))
            })?;

        let url = self.engine.render_text(&template.url, arguments)?;

        let mut headers = Vec::with_capacity(template.headers.len());
        for (name, value) in &template.headers {
            let rendered = self.engine.render_text(value, arguments)?;
            headers.push((name.clone(), substitute_credentials(&rendered, credentials)));
        }

        let body = template
            .body
            .as_ref()
            .map(|body| self.engine.render(body, arguments))
            .transpose()?
            .filter(|body| !body.is_null());

        Ok(PreparedRequest {
            method,
            url,
            headers,
            body,
        })
    }
}

/// Replace `{{credential.KEY}}` references with values from `credentials`.
/// Unknown keys become empty strings.
pub(crate) fn substitute_credentials(input: &str, credentials: &CredentialSet) -> String {
    CREDENTIAL_RE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            match credentials.get(key) {
                Some(value) => value.to_string(),
                None => {
                    warn!(key, "credential referenced by header is not set");
                    String::new()
                }
            }
        })
        .into_owned()
}

async fn send(client: reqwest::Client, request: PreparedRequest) -> Result<String, HandlerError> {
    let mut builder = client.request(request.method, &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder = match request.body {
        Some(Value::String(text)) => builder.body(text),
        Some(other) => builder.json(&other),
        None => builder,
    };

    let response = builder
        .send()
        .await
        .map_err(|e| HandlerError::Request(e.to_string()))?;
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| HandlerError::Request(e.to_string()))?;

    if !status.is_success() {
        return Err(HandlerError::HttpStatus {
            status: status.as_u16(),
            body: text,
        });
    }
    Ok(text)
}

#[async_trait]
impl ToolHandler for HttpHandler {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn execute(
        &self,
        tool: &ToolDefinition,
        arguments: &Value,
        credentials: &CredentialSet,
    ) -> Result<String, HandlerError> {
        let ToolHandlerSpec::Http { http_config } = &tool.handler else {
            return Err(HandlerError::Mismatch {
                handler: self.kind(),
                kind: tool.handler.kind(),
            });
        };

        let request = self.prepare(http_config, arguments, credentials)?;
        debug!(tool = %tool.name, method = %request.method, url = %request.url, "http tool call");

        // The request keeps running if the caller gives up; its result is dropped.
        let task = tokio::spawn(send(self.client.clone(), request));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(HandlerError::Internal(join_err.to_string())),
            Err(_) => Err(HandlerError::Timeout {
                tool: tool.name.clone(),
                after: self.timeout,
            }),
        }
    }
}
