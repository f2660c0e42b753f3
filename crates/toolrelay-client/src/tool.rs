//! Agent-facing tool wrapper
//!
//! The agent runtime never sees a [`ToolClientError`]: every outcome of a
//! remote call, failures included, becomes a [`ToolOutput`] it can hand back
//! to the model as a tool result.

use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

use crate::Result;
use crate::client::ToolClient;
use crate::error::ToolClientError;
use crate::transport::{CatalogTool, ContentBlock, ToolCallResult};

/// Tool result payload handed to the agent runtime
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Value>,
    #[serde(rename = "isError", skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolOutput {
    /// Convert a tool result
    ///
    /// Text blocks are joined; images and resources are summarized, not
    /// inlined.
    pub fn from_result(result: ToolCallResult) -> Self {
        let mut text_parts = Vec::new();
        let mut images = Vec::new();
        let mut resources = Vec::new();

        for block in result.content {
            match block {
                ContentBlock::Text { text } => text_parts.push(text),
                ContentBlock::Image { data, mime_type } => images.push(json!({
                    "type": "image",
                    "mimeType": mime_type,
                    "dataLength": data.len(),
                })),
                ContentBlock::Resource { uri, mime_type } => resources.push(json!({
                    "type": "resource",
                    "uri": uri,
                    "mimeType": mime_type,
                })),
                ContentBlock::Unsupported => {}
            }
        }

        Self {
            text: text_parts.join("\n"),
            images,
            resources,
            is_error: result.is_error,
        }
    }

    /// Error payload carrying the error's message
    pub fn from_error(error: &ToolClientError) -> Self {
        let text = match error {
            ToolClientError::CircuitOpen { server, .. } => {
                format!("Tool server '{server}' is temporarily unavailable: {error}")
            }
            _ => format!("Error: {error}"),
        };

        Self {
            text,
            images: Vec::new(),
            resources: Vec::new(),
            is_error: true,
        }
    }

    pub fn from_outcome(outcome: Result<ToolCallResult>) -> Self {
        match outcome {
            Ok(result) => Self::from_result(result),
            Err(e) => {
                warn!("Tool call failed: {}", e);
                Self::from_error(&e)
            }
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({"text": self.text}))
    }
}

/// One remote tool as the agent runtime sees it
pub struct RemoteTool {
    definition: CatalogTool,
    client: Arc<ToolClient>,
}

impl RemoteTool {
    pub fn new(definition: CatalogTool, client: Arc<ToolClient>) -> Self {
        Self { definition, client }
    }

    /// Wrap every tool of the merged catalog
    pub fn from_catalog(client: &Arc<ToolClient>) -> Result<Vec<Self>> {
        let catalog = client.get_all_tools_cached()?;
        Ok(catalog
            .into_iter()
            .map(|definition| Self::new(definition, Arc::clone(client)))
            .collect())
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn description(&self) -> &str {
        if self.definition.description.is_empty() {
            "No description available"
        } else {
            &self.definition.description
        }
    }

    pub fn input_schema(&self) -> &Value {
        &self.definition.parameters
    }

    /// Invoke the tool; never fails, errors become an error payload
    pub fn execute(&self, params: Value, credential: Option<&str>) -> ToolOutput {
        ToolOutput::from_outcome(self.client.invoke(&self.definition.name, params, credential))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryServerStore;
    use crate::testing::{ScriptedFactory, ScriptedTransport, remote, test_settings};
    use std::time::Duration;

    #[test]
    fn test_convert_text_only() {
        let output = ToolOutput::from_result(ToolCallResult::text("Hello, world!"));

        assert_eq!(output.text, "Hello, world!");
        let value = output.to_value();
        assert!(value.get("images").is_none());
        assert!(value.get("isError").is_none());
    }

    #[test]
    fn test_convert_mixed_content() {
        let result = ToolCallResult {
            content: vec![
                ContentBlock::Text {
                    text: "First".to_string(),
                },
                ContentBlock::Image {
                    data: "base64data".to_string(),
                    mime_type: "image/png".to_string(),
                },
                ContentBlock::Resource {
                    uri: Some("file:///test.txt".to_string()),
                    mime_type: Some("text/plain".to_string()),
                },
                ContentBlock::Unsupported,
                ContentBlock::Text {
                    text: "Second".to_string(),
                },
            ],
            is_error: false,
        };

        let output = ToolOutput::from_result(result);

        assert_eq!(output.text, "First\nSecond");
        assert_eq!(output.images.len(), 1);
        assert_eq!(output.images[0]["dataLength"], 10);
        assert_eq!(output.resources[0]["uri"], "file:///test.txt");
    }

    #[test]
    fn test_error_result_flag_is_kept() {
        let mut result = ToolCallResult::text("doctype not permitted");
        result.is_error = true;

        let output = ToolOutput::from_result(result);
        assert!(output.is_error);
        assert_eq!(output.to_value()["isError"], true);
    }

    #[test]
    fn test_errors_become_payloads() {
        let output = ToolOutput::from_outcome(Err(ToolClientError::CircuitOpen {
            server: "b".to_string(),
            retry_after: Duration::from_secs(30),
        }));
        assert!(output.is_error);
        assert!(output.text.contains("temporarily unavailable"));

        let output = ToolOutput::from_error(&ToolClientError::ToolNotFound("x".to_string()));
        assert_eq!(output.text, "Error: Tool not found: x");
    }

    #[test]
    fn test_remote_tools_from_catalog() {
        let factory = ScriptedFactory::default()
            .with("a", ScriptedTransport::serving(&["create_document"]))
            .with("b", ScriptedTransport::unreachable());
        let store = Arc::new(MemoryServerStore::with_servers([remote("a"), remote("b")]));
        let client = Arc::new(
            ToolClient::builder(store)
                .settings(test_settings())
                .transport_factory(Arc::new(factory))
                .build(),
        );

        let tools = RemoteTool::from_catalog(&client).unwrap();
        assert_eq!(tools.len(), 1);

        let tool = &tools[0];
        assert_eq!(tool.name(), "create_document");
        assert_eq!(tool.description(), "create_document tool");
        assert!(tool.input_schema().is_object());

        let output = tool.execute(json!({"doctype": "Note"}), None);
        assert!(!output.is_error);
        assert!(output.text.contains("Note"));

        // Validation failures come back as payloads, not panics
        let output = tool.execute(json!({}), None);
        assert!(output.is_error);
        assert!(output.text.contains("doctype"));
    }

    #[test]
    fn test_missing_description_placeholder() {
        let factory = ScriptedFactory::default();
        let store = Arc::new(MemoryServerStore::new());
        let client = Arc::new(
            ToolClient::builder(store)
                .transport_factory(Arc::new(factory))
                .build(),
        );

        let tool = RemoteTool::new(
            CatalogTool {
                name: "bare".to_string(),
                description: String::new(),
                parameters: json!({}),
            },
            client,
        );
        assert_eq!(tool.description(), "No description available");
    }
}
