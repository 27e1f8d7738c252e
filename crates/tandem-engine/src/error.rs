#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("agent already registered: {0}")]
    DuplicateAgent(String),
}
