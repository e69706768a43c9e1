use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A tool invocation requested by a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: HashMap<String, serde_json::Value>,
}

impl ToolCall {
    pub fn new(tool_name: &str) -> Self {
        Self {
            call_id: uuid::Uuid::new_v4().to_string(),
            tool_name: tool_name.to_owned(),
            arguments: HashMap::new(),
        }
    }

    pub fn arg(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.arguments.insert(key.to_owned(), value.into());
        self
    }
}
