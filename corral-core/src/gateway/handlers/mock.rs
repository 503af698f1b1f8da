//! Templated mock responses

use super::{HandlerError, ToolHandler, output_text};
use crate::model::{CredentialSet, ToolDefinition, ToolHandlerSpec};
use crate::template::TemplateEngine;
use async_trait::async_trait;
use serde_json::Value;

/// Renders the stored response template against the call arguments.
/// No external effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockHandler {
    engine: TemplateEngine,
}

impl MockHandler {
    pub fn new(engine: TemplateEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ToolHandler for MockHandler {
    fn kind(&self) -> &'static str {
        "mock"
    }

    async fn execute(
        &self,
        tool: &ToolDefinition,
        arguments: &Value,
        _credentials: &CredentialSet,
    ) -> Result<String, HandlerError> {
        let ToolHandlerSpec::Mock { mock_response } = &tool.handler else {
            return Err(HandlerError::Mismatch {
                handler: self.kind(),
                kind: tool.handler.kind(),
            });
        };
        let rendered = self.engine.render(mock_response, arguments)?;
        Ok(output_text(&rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mock_tool(response: Value) -> ToolDefinition {
        serde_json::from_value(json!({
            "server_id": "srv",
            "name": "echo",
            "handler_type": "mock",
            "mock_response": response
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn renders_structured_response_as_json_text() {
        let tool = mock_tool(json!({ "echo": "{{args.text}}", "n": "{{args.n}}" }));
        let out = MockHandler::default()
            .execute(&tool, &json!({ "text": "hi", "n": 2 }), &CredentialSet::new())
            .await
            .unwrap();

        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed, json!({ "echo": "hi", "n": 2 }));
    }

    #[tokio::test]
    async fn string_response_returned_verbatim() {
        let tool = mock_tool(json!("Hello {{args.name}}"));
        let out = MockHandler::default()
            .execute(&tool, &json!({ "name": "Bo" }), &CredentialSet::new())
            .await
            .unwrap();
        assert_eq!(out, "Hello Bo");
    }

    #[tokio::test]
    async fn malformed_template_surfaces_render_error() {
        let tool = mock_tool(json!("broken {{args.name"));
        let err = MockHandler::default()
            .execute(&tool, &json!({}), &CredentialSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Template(_)));
        assert!(err.to_string().starts_with("Template error:"));
    }
}
