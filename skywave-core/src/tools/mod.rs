//! Tool registry — named, schema-described operations the LLM may call.

pub mod executor;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SkywaveError};

/// Advertised description of one tool, in the shape chat endpoints expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the accepted arguments object.
    pub parameters: serde_json::Value,
}

/// One call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Result of executing one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub success: bool,
    pub content: String,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            content: String::new(),
            error: Some(message),
        }
    }

    /// The string appended to the conversation as the tool-role message.
    pub fn into_message_content(self) -> String {
        if self.success {
            self.content
        } else {
            format!("Error: {}", self.error.unwrap_or_else(|| "unknown".into()))
        }
    }
}

/// A callable tool. Implementations must be cheap to share and are invoked
/// from executor worker threads.
pub trait Tool: Send + Sync + 'static {
    fn definition(&self) -> ToolDefinition;
    fn execute(&self, arguments: &serde_json::Value) -> ToolOutcome;
}

/// Name-unique map of tools.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// `SkywaveError::Tool` on a duplicate name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.definition().name;
        if self.tools.contains_key(&name) {
            return Err(SkywaveError::Tool {
                name: name.clone(),
                message: "duplicate tool name".into(),
            });
        }
        info!(tool = name.as_str(), "tool registered");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Aggregate definitions for advertising to the LLM, name-sorted so the
    /// request body is stable.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

/// Built-in clock tool so a tools-enabled station answers "what time is it"
/// without a network round trip.
pub struct CurrentTimeTool;

impl Tool for CurrentTimeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "current_time".into(),
            description: "Returns the current date and time in UTC.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        }
    }

    fn execute(&self, _arguments: &serde_json::Value) -> ToolOutcome {
        ToolOutcome::ok(chrono::Utc::now().format("%Y-%m-%d %H:%M UTC").to_string())
    }
}
