use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::broadcast;
use tracing::{debug, error, instrument, warn};

use tandem_core::agent::{Agent, AgentContext, AgentError};
use tandem_core::events::OrchestrationEvent;
use tandem_core::provider::{ChatMessage, CompletionOptions, CompletionRequest, LanguageModel, ToolCall};
use tandem_core::tools::{Tool, ToolContext, ToolDefinition};

use crate::synthesis::{ArtifactLoader, GenerateToolTool, ToolSynthesizer};
use crate::toolset::{SharedToolSet, ToolSet, ToolSource};

const DEFAULT_MAX_TOOL_ROUNDS: u32 = 8;
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

const SYNTHESIS_INSTRUCTION: &str = "If none of your tools can perform the task, call \
generate_dynamic_tool_tool with a precise requirement to create a new tool, then answer \
with what you learned.";

/// An agent backed by a language model and its own private tools.
pub struct LlmAgent {
    name: String,
    description: String,
    system_prompt: String,
    model: Arc<dyn LanguageModel>,
    tools: SharedToolSet,
    options: CompletionOptions,
    max_tool_rounds: u32,
    tool_timeout: Duration,
}

impl LlmAgent {
    pub fn new(name: impl Into<String>, description: impl Into<String>, model: Arc<dyn LanguageModel>) -> Self {
        let name = name.into();
        let description = description.into();
        Self {
            system_prompt: format!("You are {name}. {description}"),
            name,
            description,
            model,
            tools: ToolSet::new().into_shared(),
            options: CompletionOptions::default(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_limits(mut self, max_tool_rounds: u32, tool_timeout: Duration) -> Self {
        self.max_tool_rounds = max_tool_rounds.max(1);
        self.tool_timeout = tool_timeout;
        self
    }

    pub fn with_tool(self, tool: Arc<dyn Tool>) -> Self {
        self.tools.write().register(tool, ToolSource::BuiltIn);
        self
    }

    /// Give this agent the built-in tool-generation capability.
    ///
    /// Tools it creates land in this agent's set only.
    pub fn with_tool_synthesis(
        mut self,
        synthesizer: Arc<ToolSynthesizer>,
        loader: Arc<ArtifactLoader>,
        events: Option<broadcast::Sender<OrchestrationEvent>>,
    ) -> Self {
        let tool = GenerateToolTool::new(
            &self.name,
            &self.description,
            Arc::downgrade(&self.tools),
            synthesizer,
            loader,
            events,
        );
        self.tools.write().register(Arc::new(tool), ToolSource::BuiltIn);
        self.system_prompt = format!("{}\n\n{SYNTHESIS_INSTRUCTION}", self.system_prompt);
        self
    }

    pub fn tools(&self) -> SharedToolSet {
        Arc::clone(&self.tools)
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.read().definitions()
    }

    #[instrument(skip_all, fields(agent = %self.name, thread_id = %ctx.thread_id, iteration = ctx.iteration))]
    async fn handle_message(&self, message: &str, ctx: &AgentContext) -> Result<String, AgentError> {
        // Tools added while this call runs are picked up on the next call.
        let tools = self.tools.read().clone();
        let definitions = tools.definitions();
        let tool_ctx = ToolContext {
            thread_id: ctx.thread_id.clone(),
            agent_name: self.name.clone(),
            iteration: ctx.iteration,
        };

        let mut messages = vec![ChatMessage::user(message)];
        for round in 0..self.max_tool_rounds {
            let request = CompletionRequest {
                system: Some(self.system_prompt.clone()),
                messages: messages.clone(),
                tools: definitions.clone(),
                options: self.options.clone(),
            };
            let completion = self.model.complete(&request).await?;
            if !completion.has_tool_calls() {
                return Ok(completion.text);
            }

            debug!(round, calls = completion.tool_calls.len(), "executing tool calls");
            let results = execute_tools(&tools, &completion.tool_calls, &tool_ctx, self.tool_timeout).await;
            messages.push(ChatMessage::Assistant {
                content: completion.text,
                tool_calls: completion.tool_calls,
            });
            messages.extend(results);
        }

        Err(AgentError::MaxToolRounds(self.max_tool_rounds))
    }
}

/// Run tool calls concurrently, returning results in call order.
async fn execute_tools(tools: &ToolSet, calls: &[ToolCall], ctx: &ToolContext, timeout: Duration) -> Vec<ChatMessage> {
    let mut handles = Vec::with_capacity(calls.len());
    for call in calls {
        let Some(tool) = tools.get(&call.name) else {
            handles.push(None);
            continue;
        };
        let call = call.clone();
        let ctx = ctx.clone();
        handles.push(Some(tokio::spawn(async move {
            let start = Instant::now();
            let result = tokio::time::timeout(
                timeout,
                AssertUnwindSafe(tool.execute(call.arguments.clone(), &ctx)).catch_unwind(),
            )
            .await;

            let content = match result {
                Ok(Ok(Ok(r))) if r.is_error => format!("[error] {}", r.content),
                Ok(Ok(Ok(r))) => r.content,
                Ok(Ok(Err(e))) => format!("[error] {e}"),
                Ok(Err(_)) => {
                    error!(tool = %call.name, "tool panicked during execution");
                    "[error] Internal error: tool crashed".to_string()
                }
                Err(_) => {
                    warn!(tool = %call.name, timeout_secs = timeout.as_secs(), "tool timed out");
                    format!("[error] Tool timed out after {}s", timeout.as_secs())
                }
            };
            debug!(tool = %call.name, duration_ms = start.elapsed().as_millis() as u64, "tool finished");
            content
        })));
    }

    let mut results = Vec::with_capacity(calls.len());
    for (call, handle) in calls.iter().zip(handles) {
        let content = match handle {
            None => format!("[error] Unknown tool: {}", call.name),
            Some(handle) => match handle.await {
                Ok(content) => content,
                Err(join_err) => {
                    error!(tool = %call.name, error = %join_err, "tool task failed");
                    "[error] Tool execution failed".to_string()
                }
            },
        };
        results.push(ChatMessage::tool_result(call.id.clone(), content));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::ids::ThreadId;
    use tandem_core::tools::{ParameterSpec, ToolDescriptor, ToolError, ToolResult};
    use tandem_llm::mock::{ScriptedModel, ScriptedResponse};

    struct Upper {
        descriptor: ToolDescriptor,
    }

    impl Upper {
        fn new() -> Self {
            Self {
                descriptor: ToolDescriptor::new("upper", "Uppercase text").with_parameter(
                    "text",
                    ParameterSpec::new("string", "Input"),
                    true,
                ),
            }
        }
    }

    #[async_trait]
    impl Tool for Upper {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }
        async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            let text = args["text"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("text is required".into()))?;
            Ok(ToolResult::text(text.to_uppercase()))
        }
    }

    fn ctx() -> AgentContext {
        AgentContext {
            thread_id: ThreadId::from_raw("t"),
            iteration: 1,
        }
    }

    #[tokio::test]
    async fn plain_answer_without_tools() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptedResponse::text("42 instances")]));
        let agent = LlmAgent::new("ec2", "EC2 specialist", model.clone());
        assert_eq!(agent.handle_message("count", &ctx()).await.unwrap(), "42 instances");
        assert_eq!(
            model.requests()[0].system.as_deref(),
            Some("You are ec2. EC2 specialist")
        );
    }

    #[tokio::test]
    async fn tool_loop_feeds_results_back() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedResponse::tool_call("upper", serde_json::json!({"text": "hi"})),
            ScriptedResponse::text("done"),
        ]));
        let agent = LlmAgent::new("fmt", "Formatter", model.clone()).with_tool(Arc::new(Upper::new()));

        assert_eq!(agent.handle_message("shout hi", &ctx()).await.unwrap(), "done");
        let requests = model.requests();
        assert_eq!(requests[0].tools.len(), 1);
        match requests[1].messages.last().unwrap() {
            ChatMessage::Tool { content, .. } => assert_eq!(content, "HI"),
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_errors_are_reported_to_model() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedResponse::Reply(tandem_core::provider::Completion {
                text: String::new(),
                tool_calls: vec![
                    ToolCall {
                        id: tandem_core::ids::ToolCallId::from_raw("c1"),
                        name: "upper".into(),
                        arguments: serde_json::json!({}),
                    },
                    ToolCall {
                        id: tandem_core::ids::ToolCallId::from_raw("c2"),
                        name: "missing".into(),
                        arguments: serde_json::json!({}),
                    },
                ],
            }),
            ScriptedResponse::text("recovered"),
        ]));
        let agent = LlmAgent::new("fmt", "Formatter", model.clone()).with_tool(Arc::new(Upper::new()));
        agent.handle_message("x", &ctx()).await.unwrap();

        let requests = model.requests();
        let tool_msgs: Vec<&ChatMessage> = requests[1]
            .messages
            .iter()
            .filter(|m| matches!(m, ChatMessage::Tool { .. }))
            .collect();
        assert_eq!(
            tool_msgs,
            vec![
                &ChatMessage::tool_result("c1".into(), "[error] invalid arguments: text is required"),
                &ChatMessage::tool_result("c2".into(), "[error] Unknown tool: missing"),
            ]
        );
    }

    #[tokio::test]
    async fn tool_round_cap() {
        let model = Arc::new(ScriptedModel::from_fn(|_| {
            ScriptedResponse::tool_call("upper", serde_json::json!({"text": "again"}))
        }));
        let agent = LlmAgent::new("fmt", "Formatter", model)
            .with_tool(Arc::new(Upper::new()))
            .with_limits(2, Duration::from_secs(5));
        let err = agent.handle_message("loop", &ctx()).await.unwrap_err();
        assert!(matches!(err, AgentError::MaxToolRounds(2)));
    }

    #[tokio::test]
    async fn model_error_surfaces_as_agent_error() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptedResponse::Error(
            tandem_core::errors::GatewayError::ProviderOverloaded,
        )]));
        let agent = LlmAgent::new("ec2", "EC2", model);
        assert!(matches!(
            agent.handle_message("x", &ctx()).await,
            Err(AgentError::Gateway(_))
        ));
    }
}
