use serde::{Deserialize, Serialize};

use crate::ids::{SynthesisSessionId, ThreadId};

/// How a single agent's part of a round ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
    TimedOut,
    /// The agent's task ended without reporting, or the agent is unknown.
    Missing,
}

impl OutcomeStatus {
    pub fn is_success(self) -> bool {
        self == Self::Completed
    }
}

/// Why an orchestration stopped iterating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// A round emitted the stop marker.
    Stopped,
    /// A round emitted no continuation marker.
    NaturalEnd,
    /// No registered agent could take the round.
    NoAgents,
    /// The round cap was reached.
    MaxIterations,
    /// The run aborted on an internal failure.
    Failed,
}

/// Orchestration lifecycle events, broadcast to any subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    RoundStarted {
        thread_id: ThreadId,
        iteration: u32,
        agents: Vec<String>,
    },
    AgentFinished {
        thread_id: ThreadId,
        iteration: u32,
        agent: String,
        status: OutcomeStatus,
        duration_ms: u64,
    },
    RoundCompleted {
        thread_id: ThreadId,
        iteration: u32,
        continues: bool,
    },
    OrchestrationFinished {
        thread_id: ThreadId,
        iterations: u32,
        termination: Termination,
    },
    ToolSynthesized {
        agent: String,
        tool_name: String,
        session_id: SynthesisSessionId,
    },
}
