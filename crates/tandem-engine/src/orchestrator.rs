use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, instrument, warn};

use tandem_core::events::{OrchestrationEvent, Termination};
use tandem_core::ids::ThreadId;
use tandem_core::messages::{ThreadStatus, SYSTEM_SENDER, USER_SENDER};
use tandem_store::ConversationMemory;

use crate::classifier::Classifier;
use crate::controller::{ContinuationPolicy, ControllerConfig, IterationController, MarkerPolicy, OrchestrationOutcome};
use crate::dispatcher::{panic_message, Dispatcher};
use crate::registry::AgentRegistry;

const EVENT_CAPACITY: usize = 256;

/// Assembles an [`Orchestrator`] from its injected services.
pub struct OrchestratorBuilder {
    registry: Arc<AgentRegistry>,
    classifier: Arc<dyn Classifier>,
    memory: Arc<dyn ConversationMemory>,
    policy: Arc<dyn ContinuationPolicy>,
    config: ControllerConfig,
    agent_timeout: Option<Duration>,
    events: Option<broadcast::Sender<OrchestrationEvent>>,
}

impl OrchestratorBuilder {
    pub fn new(
        registry: Arc<AgentRegistry>,
        classifier: Arc<dyn Classifier>,
        memory: Arc<dyn ConversationMemory>,
    ) -> Self {
        Self {
            registry,
            classifier,
            memory,
            policy: Arc::new(MarkerPolicy),
            config: ControllerConfig::default(),
            agent_timeout: None,
            events: None,
        }
    }

    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn policy(mut self, policy: Arc<dyn ContinuationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Per-agent limit for one round. `None` waits indefinitely.
    pub fn agent_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.agent_timeout = timeout;
        self
    }

    /// Share an existing event channel, e.g. one synthesis tools also publish on.
    pub fn events(mut self, events: broadcast::Sender<OrchestrationEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Orchestrator {
        let events = self
            .events
            .unwrap_or_else(|| broadcast::channel(EVENT_CAPACITY).0);
        let dispatcher = Dispatcher::new(Arc::clone(&self.registry), self.agent_timeout, events.clone());
        let controller = IterationController::new(
            Arc::clone(&self.registry),
            self.classifier,
            dispatcher,
            self.policy,
            Arc::clone(&self.memory),
            self.config,
            events.clone(),
        );
        Orchestrator {
            controller,
            registry: self.registry,
            memory: self.memory,
            locks: DashMap::new(),
            events,
        }
    }
}

/// Public entry point: one user message in, one outcome out.
pub struct Orchestrator {
    controller: IterationController,
    registry: Arc<AgentRegistry>,
    memory: Arc<dyn ConversationMemory>,
    locks: DashMap<ThreadId, Arc<Mutex<()>>>,
    events: broadcast::Sender<OrchestrationEvent>,
}

impl Orchestrator {
    pub fn builder(
        registry: Arc<AgentRegistry>,
        classifier: Arc<dyn Classifier>,
        memory: Arc<dyn ConversationMemory>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder::new(registry, classifier, memory)
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn memory(&self) -> &Arc<dyn ConversationMemory> {
        &self.memory
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &broadcast::Sender<OrchestrationEvent> {
        &self.events
    }

    /// Handle one user message on a thread.
    ///
    /// Calls on the same thread run one after another. Never fails: a
    /// crash inside the round loop marks the thread as errored and is
    /// reported as [`Termination::Failed`].
    #[instrument(skip_all, fields(thread_id = %thread_id))]
    pub async fn orchestrate(&self, thread_id: &ThreadId, message: &str) -> OrchestrationOutcome {
        let lock = self.thread_lock(thread_id);
        let _guard = lock.lock().await;

        let summary = self.memory.summarize(thread_id);
        let input = if summary.is_empty() {
            message.to_string()
        } else {
            format!("{summary}\nCurrent user message: {message}")
        };

        if let Err(e) = self.memory.store(thread_id, USER_SENDER, message) {
            warn!(error = %e, "failed to store user message");
        }
        self.set_status(thread_id, ThreadStatus::Running);
        info!(message_len = message.len(), has_history = !summary.is_empty(), "orchestration started");

        match AssertUnwindSafe(self.controller.run(thread_id, &input)).catch_unwind().await {
            Ok(outcome) => {
                self.set_status(thread_id, ThreadStatus::Complete);
                outcome
            }
            Err(panic) => {
                let reason = panic_message(&panic);
                error!(panic = %reason, "orchestration crashed");
                let text = format!("Error processing request: {reason}");
                if let Err(e) = self.memory.store(thread_id, SYSTEM_SENDER, &text) {
                    warn!(error = %e, "failed to store error message");
                }
                self.set_status(thread_id, ThreadStatus::Error);
                OrchestrationOutcome {
                    output: text,
                    termination: Termination::Failed,
                    iterations: 0,
                    rounds: Vec::new(),
                }
            }
        }
    }

    fn thread_lock(&self, thread_id: &ThreadId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(thread_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    fn set_status(&self, thread_id: &ThreadId, status: ThreadStatus) {
        if let Err(e) = self.memory.set_status(thread_id, status) {
            warn!(error = %e, ?status, "failed to update thread status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tandem_core::agent::AgentDescriptor;
    use tandem_core::messages::Role;
    use tandem_store::{EphemeralMemory, SummaryPolicy};

    use crate::classifier::ClassificationError;

    struct PanickingClassifier;

    #[async_trait]
    impl Classifier for PanickingClassifier {
        async fn classify(
            &self,
            _message: &str,
            _thread_id: &ThreadId,
            _available: &[AgentDescriptor],
        ) -> Result<Vec<String>, ClassificationError> {
            panic!("classifier blew up")
        }
    }

    /// Selects nobody and remembers what it was asked.
    #[derive(Default)]
    struct Nobody {
        seen: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Classifier for Nobody {
        async fn classify(
            &self,
            message: &str,
            _thread_id: &ThreadId,
            _available: &[AgentDescriptor],
        ) -> Result<Vec<String>, ClassificationError> {
            self.seen.lock().push(message.to_string());
            Ok(Vec::new())
        }
    }

    fn memory() -> Arc<EphemeralMemory> {
        Arc::new(EphemeralMemory::new(SummaryPolicy::default()))
    }

    #[tokio::test]
    async fn crash_marks_thread_errored() {
        let memory = memory();
        let orchestrator =
            Orchestrator::builder(Arc::new(AgentRegistry::new()), Arc::new(PanickingClassifier), memory.clone()).build();
        let thread = ThreadId::from_raw("t1");

        let outcome = orchestrator.orchestrate(&thread, "hello").await;
        assert_eq!(outcome.termination, Termination::Failed);
        assert_eq!(outcome.output, "Error processing request: classifier blew up");

        let stored = memory.thread(&thread).unwrap();
        assert_eq!(stored.status, ThreadStatus::Error);
        let last = stored.messages().last().cloned().unwrap();
        assert_eq!(last.role, Role::System);
        assert_eq!(last.content, "Error processing request: classifier blew up");
    }

    #[tokio::test]
    async fn second_message_sees_summary() {
        let memory = memory();
        let classifier = Arc::new(Nobody::default());
        let orchestrator =
            Orchestrator::builder(Arc::new(AgentRegistry::new()), classifier.clone(), memory.clone()).build();
        let thread = ThreadId::from_raw("t2");

        let first = orchestrator.orchestrate(&thread, "first question").await;
        assert_eq!(first.termination, Termination::NoAgents);
        assert_eq!(first.output, "[No suitable agent found to handle message.]");

        orchestrator.orchestrate(&thread, "second question").await;
        let stored = memory.thread(&thread).unwrap();
        assert_eq!(stored.status, ThreadStatus::Complete);
        let senders: Vec<&str> = stored.messages().map(|m| m.agent.as_str()).collect();
        assert_eq!(senders, vec!["user", "orchestrator", "user", "orchestrator"]);

        let seen = classifier.seen.lock().clone();
        assert_eq!(seen[0], "first question");
        assert!(seen[1].starts_with("Conversation summary (2 messages):
user: first question"));
        assert!(seen[1].ends_with("
Current user message: second question"));
    }
}
