//! Settings type definitions.
//!
//! Every section is `camelCase` on the wire and `#[serde(default)]`, so a
//! settings file only needs the fields it wants to change.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TandemSettings {
    pub provider: ProviderSettings,
    pub retry: RetrySettings,
    pub orchestrator: OrchestratorSettings,
    pub classifier: ClassifierSettings,
    pub agent_runtime: AgentRuntimeSettings,
    pub memory: MemorySettings,
    pub synthesis: SynthesisSettings,
    pub logging: LoggingSettings,
    /// Agents registered at startup, in registration order.
    pub agents: Vec<AgentSettings>,
}

/// OpenAI-compatible chat-completions endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.2,
            request_timeout_secs: 120,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Hard cap on classify/dispatch rounds per request.
    pub max_iterations: u32,
    /// Per-agent deadline within a round; `null` disables it.
    pub agent_timeout_secs: Option<u64>,
    /// Agent used when classification yields nothing.
    pub default_agent: Option<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            agent_timeout_secs: Some(120),
            default_agent: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassifierSettings {
    pub instructions: String,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            instructions: "You route user requests to specialized agents. Reply with a \
                comma-separated list of the agent names that should handle the message, \
                or `none` if no agent applies. Reply with names only."
                .to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentRuntimeSettings {
    pub max_tool_rounds: u32,
    pub tool_timeout_secs: u64,
}

impl Default for AgentRuntimeSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            tool_timeout_secs: 120,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemorySettings {
    pub summary_max_messages: usize,
    pub summary_max_chars: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            summary_max_messages: 20,
            summary_max_chars: 2_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SynthesisSettings {
    pub interpreter: String,
    /// Modules a generated tool may import.
    pub allowed_modules: Vec<String>,
    pub tool_timeout_secs: u64,
    /// Idle synthesis sessions older than this are purged.
    pub session_ttl_secs: u64,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            allowed_modules: [
                "json",
                "math",
                "re",
                "datetime",
                "statistics",
                "collections",
                "itertools",
                "functools",
                "string",
                "decimal",
                "random",
                "typing",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
            tool_timeout_secs: 30,
            session_ttl_secs: 3_600,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Per-target overrides, e.g. `{"tandem_engine": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            module_levels: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    /// Give this agent the built-in tool-generation capability.
    pub tool_synthesis: bool,
}

impl TandemSettings {
    /// Correct out-of-range values in place, warning about each change.
    pub fn validate(&mut self) {
        if self.orchestrator.max_iterations == 0 {
            tracing::warn!("maxIterations must be at least 1, using 1");
            self.orchestrator.max_iterations = 1;
        }
        if self.orchestrator.agent_timeout_secs == Some(0) {
            tracing::warn!("agentTimeoutSecs of 0 disables the per-agent timeout");
            self.orchestrator.agent_timeout_secs = None;
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            let clamped = self.retry.jitter_factor.clamp(0.0, 1.0);
            tracing::warn!("jitterFactor out of range ({}), clamped to {clamped}", self.retry.jitter_factor);
            self.retry.jitter_factor = clamped;
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            let clamped = self.provider.temperature.clamp(0.0, 2.0);
            tracing::warn!("temperature out of range ({}), clamped to {clamped}", self.provider.temperature);
            self.provider.temperature = clamped;
        }
        if self.memory.summary_max_messages == 0 {
            tracing::warn!("summaryMaxMessages must be at least 1, using 1");
            self.memory.summary_max_messages = 1;
        }
        if self.agent_runtime.max_tool_rounds == 0 {
            tracing::warn!("maxToolRounds must be at least 1, using 1");
            self.agent_runtime.max_tool_rounds = 1;
        }
        if let Some(default) = &self.orchestrator.default_agent {
            if !self.agents.is_empty() && !self.agents.iter().any(|a| &a.name == default) {
                tracing::warn!(default_agent = %default, "defaultAgent is not among the configured agents");
            }
        }
    }
}
