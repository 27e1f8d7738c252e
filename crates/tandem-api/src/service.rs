use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use tandem_core::events::OrchestrationEvent;
use tandem_core::ids::ThreadId;
use tandem_core::messages::{ThreadStatus, SYSTEM_SENDER};
use tandem_core::tools::{Tool, ToolDefinition};
use tandem_engine::synthesis::{
    AgentProfile, ApprovalReceipt, ArtifactLoader, SynthesisDraft, ToolArtifact, ToolSynthesizer,
};
use tandem_engine::{Orchestrator, ToolSource};

use crate::dto::{
    AgentInfo, AgentsResponse, ApproveToolRequest, ExistingTool, FeedbackRequest, GenerateToolRequest, StartRequest,
    StartResponse, StatusRequest, StatusResponse,
};
use crate::error::ApiError;

/// Request handlers over a running engine.
///
/// Every handler answers with a value; failures become `{error}` bodies in
/// [`TandemService::dispatch`].
pub struct TandemService {
    orchestrator: Arc<Orchestrator>,
    synthesizer: Arc<ToolSynthesizer>,
    loader: Arc<ArtifactLoader>,
    /// Background runs still in flight, counted per thread.
    launched: Arc<DashMap<ThreadId, usize>>,
}

impl TandemService {
    pub fn new(orchestrator: Arc<Orchestrator>, synthesizer: Arc<ToolSynthesizer>, loader: Arc<ArtifactLoader>) -> Self {
        Self {
            orchestrator,
            synthesizer,
            loader,
            launched: Arc::new(DashMap::new()),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn synthesizer(&self) -> &Arc<ToolSynthesizer> {
        &self.synthesizer
    }

    /// Route a method call to its handler.
    pub async fn dispatch(&self, method: &str, params: Value) -> Value {
        let result = match method {
            "start" => parse(params).and_then(|req| respond(self.start(req))),
            "status" => parse(params).and_then(|req| self.status(&req)).and_then(respond),
            "generate-tool" => match parse(params) {
                Ok(req) => self.generate_tool(req).await.and_then(respond),
                Err(e) => Err(e),
            },
            "feedback" => match parse(params) {
                Ok(req) => self.feedback(req).await.and_then(respond),
                Err(e) => Err(e),
            },
            "approve-tool" => parse(params).and_then(|req| self.approve_tool(req)).and_then(respond),
            "agents" => respond(self.list_agents()),
            other => Err(ApiError::UnknownMethod(other.to_string())),
        };
        match result {
            Ok(value) => value,
            Err(e) => {
                if e.is_not_found() {
                    debug!(method, error = %e, "request named an unknown resource");
                } else {
                    warn!(method, error = %e, "request failed");
                }
                serde_json::to_value(e.to_body()).unwrap_or(Value::Null)
            }
        }
    }

    /// Launch an orchestration in the background and return at once.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip_all)]
    pub fn start(&self, req: StartRequest) -> StartResponse {
        let thread_id = req.session_id.unwrap_or_default();
        *self.launched.entry(thread_id.clone()).or_insert(0) += 1;

        let orchestrator = Arc::clone(&self.orchestrator);
        let id = thread_id.clone();
        let handle = tokio::spawn(async move { orchestrator.orchestrate(&id, &req.message).await });

        let memory = Arc::clone(self.orchestrator.memory());
        let launched = Arc::clone(&self.launched);
        let id = thread_id.clone();
        tokio::spawn(async move {
            match handle.await {
                Ok(outcome) => {
                    debug!(thread_id = %id, termination = ?outcome.termination, "background orchestration finished");
                }
                Err(e) => {
                    error!(thread_id = %id, error = %e, "background orchestration aborted");
                    let text = format!("Error processing request: {e}");
                    if let Err(e) = memory.store(&id, SYSTEM_SENDER, &text) {
                        warn!(error = %e, "failed to store error message");
                    }
                    if let Err(e) = memory.set_status(&id, ThreadStatus::Error) {
                        warn!(error = %e, "failed to update thread status");
                    }
                }
            }
            launched.remove_if_mut(&id, |_, runs| {
                *runs -= 1;
                *runs == 0
            });
        });

        info!(thread_id = %thread_id, "orchestration launched");
        StartResponse {
            session_id: thread_id,
            status: "started".into(),
        }
    }

    /// A thread with a background run in flight reports running, whatever
    /// status an earlier run on it left behind.
    pub fn status(&self, req: &StatusRequest) -> Result<StatusResponse, ApiError> {
        let in_flight = self.launched.contains_key(&req.thread_id);
        match self.orchestrator.memory().thread(&req.thread_id) {
            Some(thread) => Ok(StatusResponse {
                status: if in_flight { ThreadStatus::Running } else { thread.status },
                messages: thread.entries,
                iterations: thread.iterations,
            }),
            None if in_flight => Ok(StatusResponse {
                status: ThreadStatus::Running,
                messages: Vec::new(),
                iterations: 0,
            }),
            None => Err(ApiError::ThreadNotFound),
        }
    }

    #[instrument(skip_all, fields(agent = %req.agent_id))]
    pub async fn generate_tool(&self, req: GenerateToolRequest) -> Result<SynthesisDraft, ApiError> {
        let (description, existing) = self.agent_profile(&req.agent_id, req.existing_tools.as_deref())?;
        let profile = AgentProfile {
            name: &req.agent_id,
            description: &description,
            existing_tools: &existing,
        };
        Ok(self.synthesizer.generate(&req.query, profile, req.session_id).await?)
    }

    #[instrument(skip_all, fields(agent = %req.agent_id, session_id = %req.session_id))]
    pub async fn feedback(&self, req: FeedbackRequest) -> Result<SynthesisDraft, ApiError> {
        let (description, existing) = self.agent_profile(&req.agent_id, req.existing_tools.as_deref())?;
        let profile = AgentProfile {
            name: &req.agent_id,
            description: &description,
            existing_tools: &existing,
        };
        Ok(self
            .synthesizer
            .feedback(&req.feedback, &req.session_id, profile, req.query.as_deref())
            .await?)
    }

    /// Load an approved artifact into the agent's tool set and close its session.
    #[instrument(skip_all, fields(agent = %req.agent_id, session_id = %req.session_id))]
    pub fn approve_tool(&self, req: ApproveToolRequest) -> Result<ApprovalReceipt, ApiError> {
        if req.function_name.trim().is_empty() {
            return Ok(self.synthesizer.approve(&req.session_id, &req.code, &req.function_name));
        }
        let registry = self.orchestrator.registry();
        if !registry.contains(&req.agent_id) {
            return Err(ApiError::AgentNotFound(req.agent_id));
        }
        let tools = registry
            .tools(&req.agent_id)
            .ok_or_else(|| ApiError::NoToolSet(req.agent_id.clone()))?;

        let artifact = ToolArtifact {
            code: req.code.clone(),
            function_name: req.function_name.clone(),
        };
        let tool = self.loader.load(&artifact, &req.session_id)?;
        let tool_name = tool.descriptor().name.clone();
        tools.write().register(
            Arc::new(tool),
            ToolSource::Synthesized {
                session_id: req.session_id.clone(),
            },
        );

        let receipt = self.synthesizer.approve(&req.session_id, &req.code, &req.function_name);
        let _ = self.orchestrator.events().send(OrchestrationEvent::ToolSynthesized {
            agent: req.agent_id.clone(),
            tool_name: tool_name.clone(),
            session_id: req.session_id,
        });
        info!(tool = %tool_name, "tool added to agent");
        Ok(ApprovalReceipt {
            success: receipt.success,
            message: format!("Tool {tool_name} added to toolkit for agent {}", req.agent_id),
        })
    }

    pub fn list_agents(&self) -> AgentsResponse {
        let agents = self
            .orchestrator
            .registry()
            .descriptors()
            .into_iter()
            .map(|d| AgentInfo {
                id: d.name.clone(),
                name: d.name,
                description: d.description,
                tools: d.tools.into_iter().map(|t| t.name).collect(),
            })
            .collect();
        AgentsResponse { agents }
    }

    /// Description and tool list for an agent, preferring caller-supplied tools.
    fn agent_profile(
        &self,
        agent_id: &str,
        supplied: Option<&[ExistingTool]>,
    ) -> Result<(String, Vec<ToolDefinition>), ApiError> {
        let descriptor = self
            .orchestrator
            .registry()
            .descriptor(agent_id)
            .ok_or_else(|| ApiError::AgentNotFound(agent_id.to_string()))?;
        let tools = match supplied {
            Some(tools) => tools.iter().map(ToolDefinition::from).collect(),
            None => descriptor.tools,
        };
        Ok((descriptor.description, tools))
    }
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, ApiError> {
    serde_json::from_value(params).map_err(|e| ApiError::InvalidParams(e.to_string()))
}

fn respond<T: Serialize>(value: T) -> Result<Value, ApiError> {
    Ok(serde_json::to_value(value)?)
}
