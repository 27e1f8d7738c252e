//! Tool synthesis: generate tool code with a model, revise it with
//! feedback, then load the approved artifact as an untrusted plugin.

mod extract;
mod literal;
mod loader;
mod pipeline;
mod prompt;
mod runtime;
mod tool;

use tandem_core::errors::GatewayError;
use tandem_core::ids::SynthesisSessionId;

pub use extract::{extract_code, extract_function_name};
pub use loader::{ArtifactLoader, CapabilityPolicy, SynthesizedTool, ToolArtifact, DEFAULT_ALLOWED_MODULES};
pub use pipeline::{AgentProfile, ApprovalReceipt, SynthesisDraft, ToolSynthesizer};
pub use runtime::{PythonRuntime, ToolRuntime};
pub use tool::{GenerateToolTool, GENERATE_TOOL_NAME};

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("session not found")]
    SessionNotFound(SynthesisSessionId),

    #[error("could not find a function name in the generated code")]
    MissingFunctionName,

    #[error("code generation failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("invalid tool artifact: {0}")]
    InvalidArtifact(String),

    #[error("capability denied: {0}")]
    CapabilityDenied(String),
}

impl SynthesisError {
    pub fn is_session_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_))
    }
}
