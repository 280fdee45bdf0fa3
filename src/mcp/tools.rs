//! Static registry of the tools this server advertises

use serde_json::json;

use super::protocol::ToolDefinition;

pub const GROK_SEARCH_TOOL: &str = "grok_search";

/// Built once at startup, read-only afterwards.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: vec![grok_search_tool()],
        }
    }

    pub fn list(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn grok_search_tool() -> ToolDefinition {
    ToolDefinition {
        name: GROK_SEARCH_TOOL.to_string(),
        description: "Search the web or X using Grok's real-time search capability.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query / research task."
                }
            },
            "required": ["query"],
            "additionalProperties": false
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lists_grok_search() {
        let registry = ToolRegistry::new();
        let tools = registry.list();

        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, GROK_SEARCH_TOOL);
        assert_eq!(tools[0].input_schema["required"][0], "query");
        assert_eq!(tools[0].input_schema["properties"]["query"]["type"], "string");
        assert!(registry.contains("grok_search"));
        assert!(!registry.contains("semantic_search"));
    }
}
