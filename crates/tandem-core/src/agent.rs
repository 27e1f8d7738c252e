use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::ids::ThreadId;
use crate::tools::{ToolDefinition, ToolError};

/// Per-invocation context handed to an agent by the dispatcher.
#[derive(Clone, Debug)]
pub struct AgentContext {
    pub thread_id: ThreadId,
    /// 1-based round number.
    pub iteration: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("model error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("exceeded {0} tool rounds without a final answer")]
    MaxToolRounds(u32),

    #[error("{0}")]
    Failed(String),
}

/// Public view of a registered agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub description: String,
    pub tools: Vec<ToolDefinition>,
}

/// A named, specialized task handler.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Capability description shown to the classifier.
    fn description(&self) -> &str;

    /// Tools currently available to this agent.
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    async fn handle_message(&self, message: &str, ctx: &AgentContext) -> Result<String, AgentError>;

    fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            tools: self.tool_definitions(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Agent for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Repeats the message"
        }
        async fn handle_message(&self, message: &str, _ctx: &AgentContext) -> Result<String, AgentError> {
            Ok(message.to_string())
        }
    }

    #[tokio::test]
    async fn descriptor_reflects_agent() {
        let echo = Echo;
        let d = echo.descriptor();
        assert_eq!(d.name, "echo");
        assert_eq!(d.description, "Repeats the message");
        assert!(d.tools.is_empty());

        let ctx = AgentContext {
            thread_id: ThreadId::from_raw("t"),
            iteration: 1,
        };
        assert_eq!(echo.handle_message("ping", &ctx).await.unwrap(), "ping");
    }

    #[test]
    fn failed_displays_bare_message() {
        assert_eq!(AgentError::Failed("boom".into()).to_string(), "boom");
        assert_eq!(
            AgentError::MaxToolRounds(8).to_string(),
            "exceeded 8 tool rounds without a final answer"
        );
    }
}
