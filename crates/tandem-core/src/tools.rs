use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::ThreadId;

/// Type and meaning of one tool parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

impl ParameterSpec {
    pub fn new(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
        }
    }
}

/// Name, description and parameter schema of a callable tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: &str, spec: ParameterSpec, required: bool) -> Self {
        if required && !self.required.iter().any(|r| r == name) {
            self.required.push(name.to_string());
        }
        self.parameters.insert(name.to_string(), spec);
        self
    }

    /// JSON-schema object describing the arguments.
    pub fn json_schema(&self) -> serde_json::Value {
        let properties: serde_json::Map<String, serde_json::Value> = self
            .parameters
            .iter()
            .map(|(name, spec)| {
                (
                    name.clone(),
                    serde_json::json!({ "type": spec.kind, "description": spec.description }),
                )
            })
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }

    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: self.json_schema(),
        }
    }
}

/// Tool definition sent to the model alongside a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Context available to a tool while it runs.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub thread_id: ThreadId,
    pub agent_name: String,
    pub iteration: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl ToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            duration: Duration::ZERO,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            duration: Duration::ZERO,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// A capability an agent can call during its tool loop.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult, ToolError>;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn to_definition(&self) -> ToolDefinition {
        self.descriptor().to_definition()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("denied: {0}")]
    Denied(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_lists_properties_and_required() {
        let descriptor = ToolDescriptor::new("list_buckets", "List S3 buckets")
            .with_parameter("region", ParameterSpec::new("string", "AWS region"), true)
            .with_parameter("limit", ParameterSpec::new("integer", "Max results"), false);

        let schema = descriptor.json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["region"]["type"], "string");
        assert_eq!(schema["properties"]["limit"]["description"], "Max results");
        assert_eq!(schema["required"], serde_json::json!(["region"]));
    }

    #[test]
    fn required_is_not_duplicated() {
        let descriptor = ToolDescriptor::new("t", "d")
            .with_parameter("a", ParameterSpec::new("string", ""), true)
            .with_parameter("a", ParameterSpec::new("string", "again"), true);
        assert_eq!(descriptor.required, vec!["a".to_string()]);
        assert_eq!(descriptor.parameters["a"].description, "again");
    }

    #[test]
    fn parameter_spec_uses_type_key() {
        let spec: ParameterSpec = serde_json::from_str(r#"{"type": "number"}"#).unwrap();
        assert_eq!(spec.kind, "number");
        assert!(spec.description.is_empty());
    }

    #[test]
    fn tool_result_duration_serializes_as_ms() {
        let result = ToolResult::text("ok").with_duration(Duration::from_millis(1500));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["duration"], 1500);
        assert_eq!(json["is_error"], false);
    }
}
