use tandem_engine::synthesis::SynthesisError;
use tandem_engine::EngineError;

use crate::dto::ErrorBody;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("thread not found")]
    ThreadNotFound,

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("agent {0} has no tool set")]
    NoToolSet(String),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("model backend unavailable: {0}")]
    Backend(String),

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
        }
    }

    /// True when the caller named something that does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ThreadNotFound | Self::AgentNotFound(_) => true,
            Self::Synthesis(e) => e.is_session_not_found(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::ids::SynthesisSessionId;

    #[test]
    fn bodies_carry_plain_messages() {
        assert_eq!(ApiError::ThreadNotFound.to_body().error, "thread not found");
        let err = ApiError::from(SynthesisError::SessionNotFound(SynthesisSessionId::from_raw("s")));
        assert_eq!(err.to_body().error, "session not found");
        assert!(err.is_not_found());
        assert!(!ApiError::InvalidParams("x".into()).is_not_found());
    }
}
