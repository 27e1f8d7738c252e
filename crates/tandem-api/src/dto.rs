//! JSON shapes exchanged at the service boundary.

use serde::{Deserialize, Serialize};

use tandem_core::ids::{SynthesisSessionId, ThreadId};
use tandem_core::messages::{ThreadEntry, ThreadStatus};
use tandem_core::tools::ToolDefinition;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartRequest {
    pub message: String,
    /// Continue an existing thread instead of opening a new one.
    #[serde(default)]
    pub session_id: Option<ThreadId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: ThreadId,
    pub status: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusRequest {
    pub thread_id: ThreadId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: ThreadStatus,
    /// Messages with iteration markers interleaved.
    pub messages: Vec<ThreadEntry>,
    pub iterations: u32,
}

/// A tool the caller says the agent already has.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl From<&ExistingTool> for ToolDefinition {
    fn from(tool: &ExistingTool) -> Self {
        ToolDefinition {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerateToolRequest {
    pub query: String,
    pub agent_id: String,
    #[serde(default)]
    pub existing_tools: Option<Vec<ExistingTool>>,
    #[serde(default)]
    pub session_id: Option<SynthesisSessionId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub feedback: String,
    pub session_id: SynthesisSessionId,
    pub agent_id: String,
    #[serde(default)]
    pub existing_tools: Option<Vec<ExistingTool>>,
    /// The original requirement, when the caller still has it.
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApproveToolRequest {
    pub agent_id: String,
    pub code: String,
    pub function_name: String,
    pub session_id: SynthesisSessionId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tools: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentsResponse {
    pub agents: Vec<AgentInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_default() {
        let req: GenerateToolRequest =
            serde_json::from_str(r#"{"query": "count words", "agent_id": "text"}"#).unwrap();
        assert!(req.existing_tools.is_none());
        assert!(req.session_id.is_none());

        let req: FeedbackRequest = serde_json::from_str(
            r#"{"feedback": "faster", "session_id": "synth_1", "agent_id": "text",
                "existing_tools": [{"name": "upper"}]}"#,
        )
        .unwrap();
        assert_eq!(req.session_id.as_str(), "synth_1");
        assert_eq!(req.existing_tools.unwrap()[0].description, "");
    }

    #[test]
    fn start_response_shape() {
        let resp = StartResponse {
            session_id: ThreadId::from_raw("thread_1"),
            status: "started".into(),
        };
        assert_eq!(
            serde_json::to_value(resp).unwrap(),
            serde_json::json!({"session_id": "thread_1", "status": "started"})
        );
    }
}
