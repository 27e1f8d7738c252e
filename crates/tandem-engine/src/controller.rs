use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use tandem_core::events::{OrchestrationEvent, Termination};
use tandem_core::ids::ThreadId;
use tandem_core::messages::ORCHESTRATOR_SENDER;
use tandem_store::ConversationMemory;

use crate::classifier::Classifier;
use crate::dispatcher::{Dispatcher, RoundResult};
use crate::registry::AgentRegistry;

pub const STOP_MARKER: &str = "STOP";
pub const NEXT_STEP_MARKER: &str = "NEXT_STEP";
pub const CONTINUE_MARKER: &str = "CONTINUE";
pub const NEXT_MESSAGE_MARKER: &str = "NEXT_MESSAGE:";

const NO_AGENT_FOR_MESSAGE: &str = "[No suitable agent found to handle message.]";
const NO_AGENT_FOR_NEXT_STEP: &str = "[No suitable agent found for next step.]";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundAction {
    /// Run another round.
    Continue,
    /// A round asked to stop.
    Stop,
    /// Nothing asked to continue.
    Finish,
}

/// What to do after a round, and with which input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundDecision {
    pub action: RoundAction,
    pub next_input: Option<String>,
}

impl RoundDecision {
    pub fn stop() -> Self {
        Self {
            action: RoundAction::Stop,
            next_input: None,
        }
    }

    pub fn finish() -> Self {
        Self {
            action: RoundAction::Finish,
            next_input: None,
        }
    }

    pub fn continue_with(next_input: String) -> Self {
        Self {
            action: RoundAction::Continue,
            next_input: Some(next_input),
        }
    }
}

/// Turns a round's combined text into a decision.
pub trait ContinuationPolicy: Send + Sync {
    fn evaluate(&self, combined_text: &str) -> RoundDecision;
}

/// Literal, case-sensitive marker scanning.
///
/// `STOP` beats `NEXT_STEP`/`CONTINUE`. The next input is the rest of the
/// line after `NEXT_MESSAGE:`, or the whole round wrapped in a generic
/// continuation prompt.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarkerPolicy;

impl MarkerPolicy {
    pub fn next_input(combined_text: &str) -> String {
        if let Some(idx) = combined_text.find(NEXT_MESSAGE_MARKER) {
            let rest = &combined_text[idx + NEXT_MESSAGE_MARKER.len()..];
            let line = rest.lines().next().unwrap_or_default().trim();
            if !line.is_empty() {
                return line.to_string();
            }
        }
        Self::wrap(combined_text)
    }

    pub fn wrap(combined_text: &str) -> String {
        format!("Continue processing based on these results:\n{combined_text}")
    }
}

impl ContinuationPolicy for MarkerPolicy {
    fn evaluate(&self, combined_text: &str) -> RoundDecision {
        if combined_text.contains(STOP_MARKER) {
            RoundDecision::stop()
        } else if combined_text.contains(NEXT_STEP_MARKER) || combined_text.contains(CONTINUE_MARKER) {
            RoundDecision::continue_with(Self::next_input(combined_text))
        } else {
            RoundDecision::finish()
        }
    }
}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub max_iterations: u32,
    pub default_agent: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            default_agent: None,
        }
    }
}

/// Result of one orchestration.
#[derive(Clone, Debug)]
pub struct OrchestrationOutcome {
    /// Every round's combined text, blank-line separated.
    pub output: String,
    pub termination: Termination,
    pub iterations: u32,
    pub rounds: Vec<RoundResult>,
}

enum State {
    Selecting { input: String },
    Dispatching { input: String, agents: Vec<String> },
    Evaluating { round: RoundResult },
    Done(Termination),
}

/// Drives classify, dispatch, evaluate until a terminal state.
pub struct IterationController {
    registry: Arc<AgentRegistry>,
    classifier: Arc<dyn Classifier>,
    dispatcher: Dispatcher,
    policy: Arc<dyn ContinuationPolicy>,
    memory: Arc<dyn ConversationMemory>,
    config: ControllerConfig,
    events: broadcast::Sender<OrchestrationEvent>,
}

impl IterationController {
    pub fn new(
        registry: Arc<AgentRegistry>,
        classifier: Arc<dyn Classifier>,
        dispatcher: Dispatcher,
        policy: Arc<dyn ContinuationPolicy>,
        memory: Arc<dyn ConversationMemory>,
        config: ControllerConfig,
        events: broadcast::Sender<OrchestrationEvent>,
    ) -> Self {
        Self {
            registry,
            classifier,
            dispatcher,
            policy,
            memory,
            config,
            events,
        }
    }

    #[instrument(skip_all, fields(thread_id = %thread_id))]
    pub async fn run(&self, thread_id: &ThreadId, message: &str) -> OrchestrationOutcome {
        let mut state = State::Selecting {
            input: message.to_string(),
        };
        let mut iteration = 0u32;
        let mut outputs: Vec<String> = Vec::new();
        let mut rounds: Vec<RoundResult> = Vec::new();

        let termination = loop {
            state = match state {
                State::Selecting { input } => {
                    let agents = self.select(&input, thread_id).await;
                    if agents.is_empty() {
                        let sentinel = if rounds.is_empty() {
                            NO_AGENT_FOR_MESSAGE
                        } else {
                            NO_AGENT_FOR_NEXT_STEP
                        };
                        outputs.push(sentinel.to_string());
                        State::Done(Termination::NoAgents)
                    } else {
                        State::Dispatching { input, agents }
                    }
                }
                State::Dispatching { input, agents } => {
                    iteration += 1;
                    info!(iteration, agents = ?agents, "round started");
                    self.emit(OrchestrationEvent::RoundStarted {
                        thread_id: thread_id.clone(),
                        iteration,
                        agents: agents.clone(),
                    });
                    let round = self.dispatcher.dispatch(&agents, &input, thread_id, iteration).await;
                    self.record_round(thread_id, iteration, &round);
                    State::Evaluating { round }
                }
                State::Evaluating { round } => {
                    let combined = round.combined_text();
                    let decision = self.policy.evaluate(&combined);
                    self.emit(OrchestrationEvent::RoundCompleted {
                        thread_id: thread_id.clone(),
                        iteration,
                        continues: decision.action == RoundAction::Continue,
                    });
                    let next = match decision.action {
                        RoundAction::Stop => State::Done(Termination::Stopped),
                        RoundAction::Finish => State::Done(Termination::NaturalEnd),
                        RoundAction::Continue if iteration >= self.config.max_iterations => {
                            warn!(iteration, "round cap reached with continuation requested");
                            State::Done(Termination::MaxIterations)
                        }
                        RoundAction::Continue => State::Selecting {
                            input: decision
                                .next_input
                                .unwrap_or_else(|| MarkerPolicy::wrap(&combined)),
                        },
                    };
                    outputs.push(combined);
                    rounds.push(round);
                    next
                }
                State::Done(termination) => break termination,
            };
        };

        let output = outputs.join("\n\n");
        if let Err(e) = self.memory.store(thread_id, ORCHESTRATOR_SENDER, &output) {
            warn!(error = %e, "failed to persist orchestration output");
        }
        info!(iterations = iteration, termination = ?termination, "orchestration finished");
        self.emit(OrchestrationEvent::OrchestrationFinished {
            thread_id: thread_id.clone(),
            iterations: iteration,
            termination,
        });

        OrchestrationOutcome {
            output,
            termination,
            iterations: iteration,
            rounds,
        }
    }

    /// Classifier choice restricted to registered agents, else the default agent.
    async fn select(&self, input: &str, thread_id: &ThreadId) -> Vec<String> {
        let available = self.registry.descriptors();
        let mut chosen = match self.classifier.classify(input, thread_id, &available).await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "classification failed, falling back to default agent");
                Vec::new()
            }
        };
        chosen.retain(|name| self.registry.contains(name));

        if chosen.is_empty() {
            if let Some(default) = &self.config.default_agent {
                if self.registry.contains(default) {
                    debug!(agent = %default, "using default agent");
                    chosen.push(default.clone());
                }
            }
        }
        chosen
    }

    fn record_round(&self, thread_id: &ThreadId, iteration: u32, round: &RoundResult) {
        for outcome in round.entries() {
            if let Err(e) = self
                .memory
                .store_in_iteration(thread_id, &outcome.agent, &outcome.text, iteration)
            {
                warn!(agent = %outcome.agent, error = %e, "failed to record agent output");
            }
        }
        if let Err(e) = self.memory.mark_iteration(thread_id, iteration) {
            warn!(error = %e, "failed to record iteration marker");
        }
    }

    fn emit(&self, event: OrchestrationEvent) {
        if self.events.send(event).is_err() {
            debug!("no event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_beats_continuation() {
        let d = MarkerPolicy.evaluate("[a] NEXT_STEP\n\n[b] all done, STOP");
        assert_eq!(d, RoundDecision::stop());
    }

    #[test]
    fn continuation_markers() {
        assert_eq!(MarkerPolicy.evaluate("[a] NEXT_STEP").action, RoundAction::Continue);
        assert_eq!(MarkerPolicy.evaluate("[a] CONTINUE please").action, RoundAction::Continue);
        assert_eq!(MarkerPolicy.evaluate("[a] continue").action, RoundAction::Finish);
        assert_eq!(MarkerPolicy.evaluate("[a] here you go").action, RoundAction::Finish);
    }

    #[test]
    fn next_message_takes_rest_of_line() {
        let d = MarkerPolicy.evaluate("[a] CONTINUE NEXT_MESSAGE: check billing\nmore text");
        assert_eq!(d.next_input.as_deref(), Some("check billing"));
        assert_eq!(MarkerPolicy::next_input("NEXT_MESSAGE: check billing\r\nmore"), "check billing");
    }

    #[test]
    fn empty_or_absent_next_message_wraps_round() {
        let text = "[a] NEXT_STEP NEXT_MESSAGE:   \nrest";
        assert_eq!(
            MarkerPolicy.evaluate(text).next_input.unwrap(),
            format!("Continue processing based on these results:\n{text}")
        );
        assert_eq!(
            MarkerPolicy::next_input("[a] NEXT_STEP"),
            "Continue processing based on these results:\n[a] NEXT_STEP"
        );
    }

    #[test]
    fn first_next_message_wins() {
        let text = "NEXT_MESSAGE: first\nNEXT_MESSAGE: second";
        assert_eq!(MarkerPolicy::next_input(text), "first");
    }
}
