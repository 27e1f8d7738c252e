//! The orchestration engine: agent registry, classification, concurrent
//! dispatch, the iteration state machine and tool synthesis.

pub mod agent;
pub mod classifier;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod synthesis;
pub mod toolset;

pub use agent::LlmAgent;
pub use classifier::{ClassificationError, Classifier, LlmClassifier};
pub use controller::{
    ContinuationPolicy, ControllerConfig, IterationController, MarkerPolicy, OrchestrationOutcome, RoundAction,
    RoundDecision,
};
pub use dispatcher::{AgentOutcome, Dispatcher, RoundResult};
pub use error::EngineError;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use registry::AgentRegistry;
pub use toolset::{SharedToolSet, ToolSet, ToolSource};
