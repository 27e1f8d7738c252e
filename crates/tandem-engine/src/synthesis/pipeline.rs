use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use tandem_core::ids::SynthesisSessionId;
use tandem_core::provider::LanguageModel;
use tandem_core::tools::ToolDefinition;
use tandem_store::{SynthesisSessionStore, SynthesisTurn, TurnKind};

use super::extract::{extract_code, extract_function_name};
use super::loader::DEFAULT_ALLOWED_MODULES;
use super::prompt::{feedback_request, requirement_request, PromptContext};
use super::SynthesisError;

/// One generated version of a tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisDraft {
    pub code: String,
    /// `None` when no function could be found in the code.
    pub function_name: Option<String>,
    pub session_id: SynthesisSessionId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalReceipt {
    pub success: bool,
    pub message: String,
}

/// Who the tool is for and what it already has.
#[derive(Clone, Copy, Debug)]
pub struct AgentProfile<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub existing_tools: &'a [ToolDefinition],
}

/// Drives draft, revise and approve over a session store.
pub struct ToolSynthesizer {
    model: Arc<dyn LanguageModel>,
    sessions: Arc<SynthesisSessionStore>,
    allowed_modules: Vec<String>,
}

impl ToolSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, sessions: Arc<SynthesisSessionStore>) -> Self {
        Self {
            model,
            sessions,
            allowed_modules: DEFAULT_ALLOWED_MODULES.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Modules named to the generator as importable.
    pub fn with_allowed_modules(mut self, modules: Vec<String>) -> Self {
        self.allowed_modules = modules;
        self
    }

    pub fn sessions(&self) -> &Arc<SynthesisSessionStore> {
        &self.sessions
    }

    /// Draft a tool for `requirement`, opening a session when needed.
    #[instrument(skip_all, fields(agent = profile.name))]
    pub async fn generate(
        &self,
        requirement: &str,
        profile: AgentProfile<'_>,
        session_id: Option<SynthesisSessionId>,
    ) -> Result<SynthesisDraft, SynthesisError> {
        self.sessions.purge_expired();
        let session_id = session_id.unwrap_or_default();
        let session = self.sessions.get_or_create(&session_id);

        let ctx = self.context(profile, &session.turns);
        let completion = self.model.complete(&requirement_request(&ctx, requirement)).await?;
        let draft = self.record(&session_id, TurnKind::Requirement, requirement, &completion.text)?;
        info!(session_id = %session_id, function = ?draft.function_name, "tool drafted");
        Ok(draft)
    }

    /// Revise the latest draft in a live session.
    ///
    /// Without an explicit original requirement the session's first one is used.
    #[instrument(skip_all, fields(agent = profile.name, session_id = %session_id))]
    pub async fn feedback(
        &self,
        feedback: &str,
        session_id: &SynthesisSessionId,
        profile: AgentProfile<'_>,
        original_requirement: Option<&str>,
    ) -> Result<SynthesisDraft, SynthesisError> {
        self.sessions.purge_expired();
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| SynthesisError::SessionNotFound(session_id.clone()))?;
        let original = original_requirement
            .map(str::to_string)
            .or_else(|| session.original_requirement().map(str::to_string));

        let ctx = self.context(profile, &session.turns);
        let request = feedback_request(&ctx, feedback, original.as_deref());
        let completion = self.model.complete(&request).await?;
        let draft = self.record(session_id, TurnKind::Feedback, feedback, &completion.text)?;
        info!(function = ?draft.function_name, turns = session.turns.len() + 1, "tool revised");
        Ok(draft)
    }

    /// Accept an artifact and close its session.
    ///
    /// Approving an id with no live session still succeeds.
    pub fn approve(&self, session_id: &SynthesisSessionId, code: &str, function_name: &str) -> ApprovalReceipt {
        if function_name.trim().is_empty() {
            warn!(session_id = %session_id, "approval rejected: empty function name");
            return ApprovalReceipt {
                success: false,
                message: "Function name is required".into(),
            };
        }
        let closed = self.sessions.approve(session_id).is_some();
        info!(session_id = %session_id, function = function_name, closed, code_len = code.len(), "tool approved");
        ApprovalReceipt {
            success: true,
            message: format!("Tool {function_name} approved"),
        }
    }

    /// Drop a session whose draft will not be approved.
    pub fn discard(&self, session_id: &SynthesisSessionId) -> bool {
        self.sessions.remove(session_id)
    }

    fn context<'a>(&'a self, profile: AgentProfile<'a>, history: &'a [SynthesisTurn]) -> PromptContext<'a> {
        PromptContext {
            agent_name: profile.name,
            agent_description: profile.description,
            existing_tools: profile.existing_tools,
            history,
            allowed_modules: &self.allowed_modules,
        }
    }

    fn record(
        &self,
        session_id: &SynthesisSessionId,
        kind: TurnKind,
        input: &str,
        reply: &str,
    ) -> Result<SynthesisDraft, SynthesisError> {
        let code = extract_code(reply);
        let function_name = extract_function_name(&code);
        self.sessions
            .append_turn(
                session_id,
                SynthesisTurn {
                    kind,
                    input: input.to_string(),
                    code: code.clone(),
                },
            )
            .map_err(|_| SynthesisError::SessionNotFound(session_id.clone()))?;
        Ok(SynthesisDraft {
            code,
            function_name,
            session_id: session_id.clone(),
        })
    }
}
