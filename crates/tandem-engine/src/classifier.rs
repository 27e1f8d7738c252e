use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use tandem_core::agent::AgentDescriptor;
use tandem_core::errors::GatewayError;
use tandem_core::ids::ThreadId;
use tandem_core::provider::{CompletionOptions, CompletionRequest, LanguageModel};

#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("classifier model failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("unparseable classifier output: {0:?}")]
    Malformed(String),
}

/// Chooses which agents take a round.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Ordered, de-duplicated names drawn from `available`. May be empty.
    async fn classify(
        &self,
        message: &str,
        thread_id: &ThreadId,
        available: &[AgentDescriptor],
    ) -> Result<Vec<String>, ClassificationError>;
}

/// Asks a language model for a comma-separated list of agent names.
pub struct LlmClassifier {
    model: Arc<dyn LanguageModel>,
    instructions: String,
}

impl LlmClassifier {
    pub fn new(model: Arc<dyn LanguageModel>, instructions: impl Into<String>) -> Self {
        Self {
            model,
            instructions: instructions.into(),
        }
    }

    fn prompt(&self, message: &str, available: &[AgentDescriptor]) -> CompletionRequest {
        let mut body = String::from("Available agents:\n");
        for agent in available {
            body.push_str(&format!("- {}: {}\n", agent.name, agent.description));
        }
        body.push_str("\nMessage:\n");
        body.push_str(message);
        CompletionRequest::prompt(Some(self.instructions.clone()), body).with_options(CompletionOptions {
            temperature: Some(0.0),
            max_tokens: None,
        })
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    #[instrument(skip_all, fields(thread_id = %thread_id, candidates = available.len()))]
    async fn classify(
        &self,
        message: &str,
        thread_id: &ThreadId,
        available: &[AgentDescriptor],
    ) -> Result<Vec<String>, ClassificationError> {
        if available.is_empty() {
            return Ok(Vec::new());
        }
        let completion = self.model.complete(&self.prompt(message, available)).await?;
        let selected = parse_selection(&completion.text, available)?;
        debug!(selected = ?selected, "classified");
        Ok(selected)
    }
}

/// Parse a model reply like `"ec2, s3"` into known agent names.
///
/// Unknown names and tokens that are not plain identifiers are dropped.
/// Blank output or `none` selects nothing. The reply is malformed only when
/// no token at all looks like a name.
pub fn parse_selection(raw: &str, available: &[AgentDescriptor]) -> Result<Vec<String>, ClassificationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        return Ok(Vec::new());
    }

    let mut selected: Vec<String> = Vec::new();
    let mut usable = false;
    let mut skipped = false;
    for token in trimmed.split([',', '\n']) {
        let name = clean_token(token);
        if name.is_empty() || name.eq_ignore_ascii_case("none") {
            continue;
        }
        if !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
            debug!(token = name, "classifier token is not an agent name");
            skipped = true;
            continue;
        }
        usable = true;
        let known = available
            .iter()
            .find(|a| a.name == name)
            .or_else(|| available.iter().find(|a| a.name.eq_ignore_ascii_case(name)));
        match known {
            Some(agent) if !selected.contains(&agent.name) => selected.push(agent.name.clone()),
            Some(_) => {}
            None => debug!(name, "classifier named an unknown agent"),
        }
    }
    if skipped && !usable {
        return Err(ClassificationError::Malformed(raw.to_string()));
    }
    Ok(selected)
}

fn clean_token(token: &str) -> &str {
    token
        .trim()
        .trim_start_matches(['-', '*'])
        .trim()
        .trim_end_matches('.')
        .trim_matches(['"', '\'', '`'])
        .trim_end_matches('.')
        .trim()
}
