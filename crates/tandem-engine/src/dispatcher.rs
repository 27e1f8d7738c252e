use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use tandem_core::agent::{AgentContext, AgentError};
use tandem_core::events::{OrchestrationEvent, OutcomeStatus};
use tandem_core::ids::ThreadId;

use crate::registry::AgentRegistry;

/// One agent's contribution to a round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentOutcome {
    pub agent: String,
    /// Already prefixed with `[agent]`.
    pub text: String,
    pub status: OutcomeStatus,
    pub duration: Duration,
}

/// All outcomes of a round, in selection order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundResult {
    entries: Vec<AgentOutcome>,
}

impl RoundResult {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.agent.as_str())
    }

    pub fn get(&self, agent: &str) -> Option<&AgentOutcome> {
        self.entries.iter().find(|e| e.agent == agent)
    }

    pub fn entries(&self) -> &[AgentOutcome] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Texts joined by a blank line.
    pub fn combined_text(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

enum RunEnd {
    Finished(Result<String, AgentError>),
    TimedOut(Duration),
    Panicked(String),
}

/// Agent tasks of one round. Dropping the round cancels whatever still runs.
struct AbortOnDrop<T>(Vec<Option<JoinHandle<T>>>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        for handle in self.0.iter().flatten() {
            handle.abort();
        }
    }
}

/// Fans a message out to agents and waits for every one of them.
pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    agent_timeout: Option<Duration>,
    events: broadcast::Sender<OrchestrationEvent>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<AgentRegistry>,
        agent_timeout: Option<Duration>,
        events: broadcast::Sender<OrchestrationEvent>,
    ) -> Self {
        Self {
            registry,
            agent_timeout,
            events,
        }
    }

    /// Run each named agent in its own task.
    ///
    /// The result has exactly one entry per distinct name. A failing,
    /// panicking, slow or unknown agent never affects its siblings.
    pub async fn dispatch(
        &self,
        agent_names: &[String],
        message: &str,
        thread_id: &ThreadId,
        iteration: u32,
    ) -> RoundResult {
        let mut names: Vec<&String> = Vec::with_capacity(agent_names.len());
        for name in agent_names {
            if !names.contains(&name) {
                names.push(name);
            }
        }

        let mut tasks = AbortOnDrop(
            names
                .iter()
                .map(|name| {
                    let agent = self.registry.get(name)?;
                    let message = message.to_string();
                    let ctx = AgentContext {
                        thread_id: thread_id.clone(),
                        iteration,
                    };
                    let timeout = self.agent_timeout;
                    Some(tokio::spawn(async move {
                        let start = Instant::now();
                        let run = AssertUnwindSafe(agent.handle_message(&message, &ctx)).catch_unwind();
                        let end = match timeout {
                            Some(limit) => match tokio::time::timeout(limit, run).await {
                                Ok(result) => settle(result),
                                Err(_) => RunEnd::TimedOut(limit),
                            },
                            None => settle(run.await),
                        };
                        (end, start.elapsed())
                    }))
                })
                .collect(),
        );
        let joined = join_all(tasks.0.iter_mut().map(|handle| async move { Some(handle.as_mut()?.await) })).await;

        let mut entries = Vec::with_capacity(names.len());
        for (name, joined) in names.into_iter().zip(joined) {
            let outcome = match joined {
                None => AgentOutcome {
                    agent: name.clone(),
                    text: format!("[{name}] Error processing request: agent not registered"),
                    status: OutcomeStatus::Failed,
                    duration: Duration::ZERO,
                },
                Some(Ok((end, duration))) => outcome_for(name, end, duration),
                Some(Err(join_err)) => {
                    error!(agent = %name, error = %join_err, "agent task failed");
                    missing(name, Duration::ZERO)
                }
            };
            self.emit(OrchestrationEvent::AgentFinished {
                thread_id: thread_id.clone(),
                iteration,
                agent: outcome.agent.clone(),
                status: outcome.status,
                duration_ms: outcome.duration.as_millis() as u64,
            });
            entries.push(outcome);
        }

        RoundResult { entries }
    }

    fn emit(&self, event: OrchestrationEvent) {
        if self.events.send(event).is_err() {
            debug!("no event subscribers");
        }
    }
}

fn settle(result: std::thread::Result<Result<String, AgentError>>) -> RunEnd {
    match result {
        Ok(inner) => RunEnd::Finished(inner),
        Err(panic) => RunEnd::Panicked(panic_message(&panic)),
    }
}

fn outcome_for(name: &str, end: RunEnd, duration: Duration) -> AgentOutcome {
    let (text, status) = match end {
        RunEnd::Finished(Ok(text)) => (format!("[{name}] {text}"), OutcomeStatus::Completed),
        RunEnd::Finished(Err(e)) => {
            warn!(agent = %name, error = %e, "agent failed");
            (format!("[{name}] Error processing request: {e}"), OutcomeStatus::Failed)
        }
        RunEnd::TimedOut(limit) => {
            warn!(agent = %name, timeout_secs = limit.as_secs(), "agent timed out");
            (
                format!("[{name}] Error processing request: timed out after {}s", limit.as_secs()),
                OutcomeStatus::TimedOut,
            )
        }
        RunEnd::Panicked(msg) => {
            error!(agent = %name, panic = %msg, "agent panicked");
            return missing(name, duration);
        }
    };
    AgentOutcome {
        agent: name.to_string(),
        text,
        status,
        duration,
    }
}

fn missing(name: &str, duration: Duration) -> AgentOutcome {
    AgentOutcome {
        agent: name.to_string(),
        text: format!("[{name}] Failed to generate a response."),
        status: OutcomeStatus::Missing,
        duration,
    }
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
