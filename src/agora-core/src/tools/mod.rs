//! Tools that a model may call while composing its answer.
//!
//! Tools are registered explicitly in a [`ToolRegistry`]; only a
//! [`ToolAgent`](crate::agent::ToolAgent) ever invokes them.

mod directory;
mod search;

pub use directory::ListDirectoryTool;
pub use search::{SearchHit, WebSearchTool};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ToolsConfig;
use crate::error::ToolError;

/// A capability a model can invoke by name.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// One-line description shown to the model.
    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn input_schema(&self) -> Value;

    async fn invoke(&self, args: Value) -> Result<String, ToolError>;
}

/// Name-indexed set of tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry of every tool the configuration enables.
    pub fn from_config(config: &ToolsConfig) -> Result<Self, ToolError> {
        let mut registry = Self::new();
        if let Some(endpoint) = &config.search_endpoint {
            let api_key = std::env::var("SEARCH_API_KEY").ok();
            registry.register(Arc::new(WebSearchTool::new(
                endpoint.clone(),
                api_key,
                config.search_max_results,
            )))?;
        }
        if let Some(root) = &config.sandbox_dir {
            registry.register(Arc::new(ListDirectoryTool::new(root.clone())))?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// A registry holding only the named tools, in the order of this registry.
    pub fn subset(&self, names: &[String]) -> Result<Self, ToolError> {
        let mut subset = Self::new();
        for name in names {
            let tool = self
                .get(name)
                .ok_or_else(|| ToolError::UnknownTool(name.clone()))?;
            subset.register(tool)?;
        }
        Ok(subset)
    }

    /// Tool catalogue rendered for a prompt.
    pub fn describe(&self) -> String {
        self.tools
            .values()
            .map(|tool| {
                format!(
                    "- {}: {}\n  arguments schema: {}",
                    tool.name(),
                    tool.description(),
                    tool.input_schema()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn invoke(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.invoke(args).await
    }
}

/// Pull a required string argument out of a tool's arguments object.
pub(crate) fn string_arg(tool: &str, args: &Value, key: &str) -> Result<String, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool.to_string(),
            message: format!("missing string field '{}'", key),
        })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Echoes its `text` argument back, upper-cased.
    pub struct ShoutTool;

    #[async_trait]
    impl Tool for ShoutTool {
        fn name(&self) -> &str {
            "shout"
        }

        fn description(&self) -> &str {
            "Upper-cases the given text."
        }

        fn input_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }

        async fn invoke(&self, args: Value) -> Result<String, ToolError> {
            Ok(string_arg("shout", &args, "text")?.to_uppercase())
        }
    }
}
