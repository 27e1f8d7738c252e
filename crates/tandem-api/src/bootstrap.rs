//! Wire an engine together from resolved settings.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::broadcast;
use tracing::{info, warn};

use tandem_core::provider::LanguageModel;
use tandem_engine::synthesis::{ArtifactLoader, CapabilityPolicy, PythonRuntime, ToolSynthesizer};
use tandem_engine::{AgentRegistry, ControllerConfig, LlmAgent, LlmClassifier, Orchestrator};
use tandem_llm::{OpenAiConfig, OpenAiModel, ReliableConfig, ReliableModel};
use tandem_settings::{AgentSettings, TandemSettings};
use tandem_store::{EphemeralMemory, SummaryPolicy, SynthesisSessionStore};

use crate::error::ApiError;
use crate::service::TandemService;

const EVENT_CAPACITY: usize = 256;

/// Build a service backed by the configured OpenAI-compatible endpoint.
pub fn build_service(settings: &TandemSettings) -> Result<TandemService, ApiError> {
    let provider = &settings.provider;
    let api_key = std::env::var(&provider.api_key_env)
        .ok()
        .filter(|k| !k.is_empty())
        .map(SecretString::from);
    if api_key.is_none() {
        warn!(env = %provider.api_key_env, "no API key set, sending unauthenticated requests");
    }
    let model = OpenAiModel::new(OpenAiConfig {
        base_url: provider.base_url.clone(),
        model: provider.model.clone(),
        api_key,
        temperature: Some(provider.temperature),
        request_timeout: Duration::from_secs(provider.request_timeout_secs),
        connect_timeout: Duration::from_secs(provider.connect_timeout_secs),
    })
    .map_err(|e| ApiError::Backend(e.to_string()))?;

    let retry = &settings.retry;
    let model = ReliableModel::new(
        model,
        ReliableConfig {
            max_retries: retry.max_retries,
            base_delay: Duration::from_millis(retry.base_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms),
            jitter_factor: retry.jitter_factor,
            circuit_breaker_threshold: retry.circuit_breaker_threshold,
            circuit_breaker_cooldown: Duration::from_secs(retry.circuit_breaker_cooldown_secs),
        },
    );
    build_with_model(settings, Arc::new(model))
}

/// Build a service around an already constructed model.
pub fn build_with_model(settings: &TandemSettings, model: Arc<dyn LanguageModel>) -> Result<TandemService, ApiError> {
    let memory = Arc::new(EphemeralMemory::new(SummaryPolicy {
        max_messages: settings.memory.summary_max_messages,
        max_chars: settings.memory.summary_max_chars,
    }));
    let sessions = Arc::new(SynthesisSessionStore::new(Duration::from_secs(
        settings.synthesis.session_ttl_secs,
    )));
    let synthesizer = Arc::new(
        ToolSynthesizer::new(Arc::clone(&model), sessions).with_allowed_modules(settings.synthesis.allowed_modules.clone()),
    );
    let loader = Arc::new(ArtifactLoader::new(
        CapabilityPolicy::new(settings.synthesis.allowed_modules.iter()),
        Arc::new(PythonRuntime::new(settings.synthesis.interpreter.clone())),
        Duration::from_secs(settings.synthesis.tool_timeout_secs),
    ));
    let (events, _) = broadcast::channel(EVENT_CAPACITY);

    let registry = Arc::new(AgentRegistry::new());
    let fallback;
    let agents = if settings.agents.is_empty() {
        warn!("no agents configured, registering a general assistant");
        fallback = [AgentSettings {
            name: "assistant".into(),
            description: "General-purpose assistant for any request".into(),
            system_prompt: String::new(),
            tool_synthesis: true,
        }];
        &fallback[..]
    } else {
        &settings.agents[..]
    };
    for spec in agents {
        let mut agent = LlmAgent::new(&spec.name, &spec.description, Arc::clone(&model)).with_limits(
            settings.agent_runtime.max_tool_rounds,
            Duration::from_secs(settings.agent_runtime.tool_timeout_secs),
        );
        if !spec.system_prompt.is_empty() {
            agent = agent.with_system_prompt(&spec.system_prompt);
        }
        if spec.tool_synthesis {
            agent = agent.with_tool_synthesis(Arc::clone(&synthesizer), Arc::clone(&loader), Some(events.clone()));
        }
        let tools = agent.tools();
        registry.register_with_tools(Arc::new(agent), tools)?;
    }

    let classifier = Arc::new(LlmClassifier::new(Arc::clone(&model), &settings.classifier.instructions));
    let orchestrator = Orchestrator::builder(Arc::clone(&registry), classifier, memory)
        .config(ControllerConfig {
            max_iterations: settings.orchestrator.max_iterations,
            default_agent: settings.orchestrator.default_agent.clone(),
        })
        .agent_timeout(settings.orchestrator.agent_timeout_secs.map(Duration::from_secs))
        .events(events)
        .build();
    info!(agents = registry.len(), model = model.model(), "engine ready");

    Ok(TandemService::new(Arc::new(orchestrator), synthesizer, loader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_engine::synthesis::GENERATE_TOOL_NAME;
    use tandem_llm::ScriptedModel;

    #[test]
    fn empty_agent_list_gets_an_assistant() {
        let service = build_with_model(&TandemSettings::default(), Arc::new(ScriptedModel::new(Vec::new()))).unwrap();
        let agents = service.list_agents().agents;
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].name, "assistant");
        assert_eq!(agents[0].tools, vec![GENERATE_TOOL_NAME.to_string()]);
    }

    #[test]
    fn duplicate_agent_names_fail() {
        let mut settings = TandemSettings::default();
        let agent = AgentSettings {
            name: "ec2".into(),
            description: "Instances".into(),
            ..Default::default()
        };
        settings.agents = vec![agent.clone(), agent];
        let err = build_with_model(&settings, Arc::new(ScriptedModel::new(Vec::new()))).err().unwrap();
        assert_eq!(err.to_string(), "agent already registered: ec2");
    }
}
