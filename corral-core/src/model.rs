//! Fleet data model: workers, tool servers, tool definitions, skills

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Persisted worker status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    #[default]
    Stopped,
    Running,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Stopped => write!(f, "stopped"),
            WorkerStatus::Running => write!(f, "running"),
        }
    }
}

/// Why a worker moved to `stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit stop request
    Manual,
    /// Stopped as the first half of a restart
    Restart,
    /// Process exited with a non-zero code or a signal
    Crashed,
    /// Process exited on its own with code 0
    Exited,
    /// Process never became healthy
    HealthCheckFailed,
    /// Boot-time recovery could not bring it back
    RestoreFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Manual => "manual",
            StopReason::Restart => "restart",
            StopReason::Crashed => "crashed",
            StopReason::Exited => "exited",
            StopReason::HealthCheckFailed => "health_check_failed",
            StopReason::RestoreFailed => "restore_failed",
        };
        f.write_str(s)
    }
}

/// A configured agent worker, owned by the external store.
///
/// `id` never changes. `status`, `stop_reason`, `port` and `auth_token` are
/// written only by the supervisor; once `port` is set it stays fixed for the
/// lifetime of the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Feature flags forwarded verbatim to the worker's config document
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    /// Tool servers the worker may call through the gateway
    #[serde(default)]
    pub tool_server_ids: Vec<String>,
    #[serde(default)]
    pub skill_ids: Vec<String>,
    /// Encrypted credential the supervisor presents to the worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl WorkerDescriptor {
    /// Create a stopped worker with no port assigned
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            status: WorkerStatus::Stopped,
            stop_reason: None,
            port: None,
            provider: provider.into(),
            model: model.into(),
            system_prompt: None,
            features: BTreeMap::new(),
            tool_server_ids: Vec::new(),
            skill_ids: Vec::new(),
            auth_token: None,
        }
    }
}

/// A scoped tool server exposed through the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServer {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Stored environment variables, values encrypted
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Port for servers that run as their own subprocess
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// HTTP request template used by the `http` handler strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTemplate {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Execution strategy of a tool, carrying exactly the payload it needs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "handler_type", rename_all = "lowercase")]
pub enum ToolHandlerSpec {
    Mock { mock_response: Value },
    Http { http_config: HttpTemplate },
    Javascript { code: String },
}

impl ToolHandlerSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolHandlerSpec::Mock { .. } => "mock",
            ToolHandlerSpec::Http { .. } => "http",
            ToolHandlerSpec::Javascript { .. } => "javascript",
        }
    }
}

/// A dynamically defined tool, unique by `(server_id, name)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub server_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_input_schema")]
    pub input_schema: Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub handler: ToolHandlerSpec,
}

fn default_input_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

fn default_enabled() -> bool {
    true
}

/// A skill pushed to workers after startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
}

/// Decrypted per-server secrets handed to handlers at call time.
///
/// `Debug` lists key names only.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialSet(BTreeMap<String, String>);

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CredentialSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_definition_selects_payload_by_handler_type() {
        let tool: ToolDefinition = serde_json::from_value(json!({
            "server_id": "srv",
            "name": "weather",
            "handler_type": "http",
            "http_config": { "url": "https://example.test/{{args.city}}" }
        }))
        .unwrap();

        assert!(tool.enabled);
        match tool.handler {
            ToolHandlerSpec::Http { http_config } => {
                assert_eq!(http_config.method, "GET");
                assert!(http_config.headers.is_empty());
            }
            other => panic!("unexpected handler {}", other.kind()),
        }
    }

    #[test]
    fn tool_definition_rejects_unknown_handler() {
        let result: std::result::Result<ToolDefinition, _> = serde_json::from_value(json!({
            "server_id": "srv",
            "name": "x",
            "handler_type": "python",
            "code": "print(1)"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn credential_debug_hides_values() {
        let creds: CredentialSet = [("API_KEY", "sk-secret")].into_iter().collect();
        let printed = format!("{:?}", creds);
        assert!(printed.contains("API_KEY"));
        assert!(!printed.contains("sk-secret"));
    }

    #[test]
    fn stop_reason_serializes_snake_case() {
        let value = serde_json::to_value(StopReason::HealthCheckFailed).unwrap();
        assert_eq!(value, "health_check_failed");
        assert_eq!(StopReason::Crashed.to_string(), "crashed");
    }
}
