pub mod delegate;
pub mod search;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use rig::completion::ToolDefinition;

/// Trait for tools callable by a reasoning-oracle turn.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;
    async fn execute(&self, params: serde_json::Value) -> Result<String>;
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions for a completion request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, params: serde_json::Value) -> Result<String> {
        match self.tools.get(name) {
            Some(tool) => {
                let errors = validate_params(&params, &tool.parameters_schema());
                if !errors.is_empty() {
                    return Ok(format!(
                        "Error: Invalid parameters for tool '{}': {}",
                        name,
                        errors.join("; ")
                    ));
                }
                tool.execute(params).await
            }
            None => anyhow::bail!("unknown tool: {name}"),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate tool parameters against a JSON schema.
/// Returns a list of validation error strings (empty if valid).
fn validate_params(params: &serde_json::Value, schema: &serde_json::Value) -> Vec<String> {
    let mut errors = Vec::new();

    if let Some(expected_type) = schema.get("type").and_then(|t| t.as_str()) {
        let type_ok = match expected_type {
            "object" => params.is_object(),
            "string" => params.is_string(),
            "integer" => params.is_i64() || params.is_u64(),
            "number" => params.is_number(),
            "boolean" => params.is_boolean(),
            _ => true,
        };
        if !type_ok {
            errors.push(format!("expected type '{expected_type}'"));
            return errors;
        }
    }

    let Some(obj) = params.as_object() else {
        return errors;
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for req in required.iter().filter_map(|r| r.as_str()) {
            if !obj.contains_key(req) {
                errors.push(format!("{req}: required field missing"));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, prop_schema) in props {
            let Some(val) = obj.get(key) else { continue };
            if let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str()) {
                let ok = match expected {
                    "string" => val.is_string(),
                    "integer" => val.is_i64() || val.is_u64(),
                    "number" => val.is_number(),
                    "boolean" => val.is_boolean(),
                    "object" => val.is_object(),
                    "array" => val.is_array(),
                    _ => true,
                };
                if !ok {
                    errors.push(format!("{key}: expected type '{expected}'"));
                    continue;
                }
            }
            if let Some(allowed) = prop_schema.get("enum").and_then(|e| e.as_array()) {
                if !allowed.contains(val) {
                    errors.push(format!("{key}: value not in allowed enum"));
                }
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"}
            },
            "required": ["query"]
        })
    }

    #[test]
    fn valid_params_pass() {
        let params = serde_json::json!({"query": "test"});
        assert!(validate_params(&params, &query_schema()).is_empty());
    }

    #[test]
    fn missing_required_field_reported() {
        let params = serde_json::json!({});
        let errors = validate_params(&params, &query_schema());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("required field missing"));
    }

    #[test]
    fn wrong_type_reported() {
        let params = serde_json::json!({"query": 7});
        let errors = validate_params(&params, &query_schema());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("expected type 'string'"));
    }

    #[test]
    fn enum_violation_reported() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "route": {"type": "string", "enum": ["data_scientist", "business_analyst", "end"]}
            },
            "required": ["route"]
        });
        let params = serde_json::json!({"route": "manager"});
        let errors = validate_params(&params, &schema);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("enum"));
    }

    #[test]
    fn extra_fields_ignored() {
        let params = serde_json::json!({"query": "test", "extra": true});
        assert!(validate_params(&params, &query_schema()).is_empty());
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back."
        }
        fn parameters_schema(&self) -> serde_json::Value {
            query_schema()
        }
        async fn execute(&self, params: serde_json::Value) -> Result<String> {
            Ok(params["query"].as_str().unwrap_or_default().to_string())
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let out = registry
            .execute("echo", serde_json::json!({"query": "hello"}))
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn invalid_params_become_observation_not_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let out = registry.execute("echo", serde_json::json!({})).await.unwrap();
        assert!(out.starts_with("Error: Invalid parameters"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let registry = ToolRegistry::new();
        assert!(registry
            .execute("nope", serde_json::json!({}))
            .await
            .is_err());
    }
}
