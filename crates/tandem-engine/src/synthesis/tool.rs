use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use tandem_core::events::OrchestrationEvent;
use tandem_core::tools::{ParameterSpec, Tool, ToolContext, ToolDescriptor, ToolError, ToolResult};

use super::loader::{ArtifactLoader, ToolArtifact};
use super::pipeline::{AgentProfile, ToolSynthesizer};
use super::SynthesisError;
use crate::toolset::{ToolSet, ToolSource};

pub const GENERATE_TOOL_NAME: &str = "generate_dynamic_tool_tool";

/// Built-in tool that lets an agent extend its own tool set.
pub struct GenerateToolTool {
    descriptor: ToolDescriptor,
    agent_name: String,
    agent_description: String,
    tools: Weak<RwLock<ToolSet>>,
    synthesizer: Arc<ToolSynthesizer>,
    loader: Arc<ArtifactLoader>,
    events: Option<broadcast::Sender<OrchestrationEvent>>,
}

impl GenerateToolTool {
    pub fn new(
        agent_name: &str,
        agent_description: &str,
        tools: Weak<RwLock<ToolSet>>,
        synthesizer: Arc<ToolSynthesizer>,
        loader: Arc<ArtifactLoader>,
        events: Option<broadcast::Sender<OrchestrationEvent>>,
    ) -> Self {
        let descriptor = ToolDescriptor::new(
            GENERATE_TOOL_NAME,
            "Create a new tool when none of your existing tools can perform the task. \
             Describe precisely what the tool should do, its inputs and its output.",
        )
        .with_parameter(
            "requirement",
            ParameterSpec::new("string", "What the new tool must do"),
            true,
        );
        Self {
            descriptor,
            agent_name: agent_name.to_string(),
            agent_description: agent_description.to_string(),
            tools,
            synthesizer,
            loader,
            events,
        }
    }

    /// Draft, load, register and approve in one step.
    async fn synthesize(&self, requirement: &str, tools: &RwLock<ToolSet>) -> Result<(String, String), SynthesisError> {
        let existing = tools.read().definitions();
        let profile = AgentProfile {
            name: &self.agent_name,
            description: &self.agent_description,
            existing_tools: &existing,
        };
        let draft = self.synthesizer.generate(requirement, profile, None).await?;
        let session_id = draft.session_id.clone();

        let loaded = draft
            .function_name
            .clone()
            .ok_or(SynthesisError::MissingFunctionName)
            .and_then(|function_name| {
                let artifact = ToolArtifact {
                    code: draft.code.clone(),
                    function_name,
                };
                self.loader.load(&artifact, &session_id)
            });
        let tool = match loaded {
            Ok(tool) => tool,
            Err(e) => {
                self.synthesizer.discard(&session_id);
                return Err(e);
            }
        };

        let name = tool.descriptor().name.clone();
        let description = tool.descriptor().description.clone();
        let function_name = tool.artifact().function_name.clone();
        let replaced = tools.write().register(
            Arc::new(tool),
            ToolSource::Synthesized {
                session_id: session_id.clone(),
            },
        );
        if replaced.is_some() {
            debug!(tool = %name, "replaced existing tool");
        }
        self.synthesizer.approve(&session_id, &draft.code, &function_name);
        info!(agent = %self.agent_name, tool = %name, session_id = %session_id, "tool synthesized");

        if let Some(events) = &self.events {
            let _ = events.send(OrchestrationEvent::ToolSynthesized {
                agent: self.agent_name.clone(),
                tool_name: name.clone(),
                session_id,
            });
        }
        Ok((name, description))
    }
}

#[async_trait]
impl Tool for GenerateToolTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    #[instrument(skip_all, fields(agent = %self.agent_name))]
    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let requirement = args
            .get("requirement")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("requirement is required".into()))?;

        let Some(tools) = self.tools.upgrade() else {
            return Ok(ToolResult::error("Failed to generate tool: agent is no longer available"));
        };

        match self.synthesize(requirement, &tools).await {
            Ok((name, description)) => Ok(ToolResult::text(format!(
                "Successfully created and registered a new tool: {name} - {description}"
            ))),
            Err(e) => {
                warn!(error = %e, "tool synthesis failed");
                Ok(ToolResult::error(format!("Failed to generate tool: {e}")))
            }
        }
    }
}
