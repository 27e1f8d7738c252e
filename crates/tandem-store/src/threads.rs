use dashmap::DashMap;

use tandem_core::ids::ThreadId;
use tandem_core::messages::{Message, Thread, ThreadStatus};

use crate::error::StoreError;

/// How much history a summary carries.
#[derive(Clone, Debug)]
pub struct SummaryPolicy {
    pub max_messages: usize,
    pub max_chars: usize,
}

impl Default for SummaryPolicy {
    fn default() -> Self {
        Self {
            max_messages: 20,
            max_chars: 2_000,
        }
    }
}

/// Per-thread append-only message log.
pub trait ConversationMemory: Send + Sync {
    /// Append outside any round. Creates the thread on first use.
    fn store(&self, thread_id: &ThreadId, sender: &str, content: &str) -> Result<Message, StoreError> {
        self.store_in_iteration(thread_id, sender, content, 0)
    }

    fn store_in_iteration(
        &self,
        thread_id: &ThreadId,
        sender: &str,
        content: &str,
        iteration: u32,
    ) -> Result<Message, StoreError>;

    /// Record the end of a round.
    fn mark_iteration(&self, thread_id: &ThreadId, iteration: u32) -> Result<(), StoreError>;

    fn set_status(&self, thread_id: &ThreadId, status: ThreadStatus) -> Result<(), StoreError>;

    fn thread(&self, thread_id: &ThreadId) -> Option<Thread>;

    fn contains(&self, thread_id: &ThreadId) -> bool {
        self.thread(thread_id).is_some()
    }

    /// Deterministic text digest of recent history; empty for unknown threads.
    fn summarize(&self, thread_id: &ThreadId) -> String;
}

/// Memory kept in a concurrent map for the life of the process.
#[derive(Default)]
pub struct EphemeralMemory {
    threads: DashMap<ThreadId, Thread>,
    policy: SummaryPolicy,
}

impl EphemeralMemory {
    pub fn new(policy: SummaryPolicy) -> Self {
        Self {
            threads: DashMap::new(),
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

impl ConversationMemory for EphemeralMemory {
    fn store_in_iteration(
        &self,
        thread_id: &ThreadId,
        sender: &str,
        content: &str,
        iteration: u32,
    ) -> Result<Message, StoreError> {
        let mut thread = self
            .threads
            .entry(thread_id.clone())
            .or_insert_with(|| Thread::new(thread_id.clone()));
        Ok(thread.push_message(sender, content, iteration))
    }

    fn mark_iteration(&self, thread_id: &ThreadId, iteration: u32) -> Result<(), StoreError> {
        self.threads
            .entry(thread_id.clone())
            .or_insert_with(|| Thread::new(thread_id.clone()))
            .push_marker(iteration);
        Ok(())
    }

    fn set_status(&self, thread_id: &ThreadId, status: ThreadStatus) -> Result<(), StoreError> {
        let mut thread = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::NotFound(format!("thread {thread_id}")))?;
        thread.status = status;
        Ok(())
    }

    fn thread(&self, thread_id: &ThreadId) -> Option<Thread> {
        self.threads.get(thread_id).map(|t| t.clone())
    }

    fn contains(&self, thread_id: &ThreadId) -> bool {
        self.threads.contains_key(thread_id)
    }

    fn summarize(&self, thread_id: &ThreadId) -> String {
        let Some(thread) = self.threads.get(thread_id) else {
            return String::new();
        };
        let total = thread.message_count();
        if total == 0 {
            return String::new();
        }

        let skip = total.saturating_sub(self.policy.max_messages);
        let recent: Vec<&Message> = thread.messages().skip(skip).collect();
        let mut summary = format!("Conversation summary ({} messages):", recent.len());
        for message in recent {
            summary.push('\n');
            summary.push_str(&message.agent);
            summary.push_str(": ");
            summary.push_str(&truncate_chars(&message.content, self.policy.max_chars));
        }
        summary
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(s: &str) -> ThreadId {
        ThreadId::from_raw(s)
    }

    #[test]
    fn store_auto_creates_thread() {
        let memory = EphemeralMemory::default();
        assert!(!memory.contains(&tid("new")));
        let msg = memory.store(&tid("new"), "user", "hello").unwrap();
        assert_eq!(msg.id, "user-1");
        assert!(memory.contains(&tid("new")));
        assert_eq!(memory.thread(&tid("new")).unwrap().status, ThreadStatus::Running);
    }

    #[test]
    fn markers_interleave_with_messages() {
        let memory = EphemeralMemory::default();
        let t = tid("t");
        memory.store(&t, "user", "q").unwrap();
        memory.store_in_iteration(&t, "ec2", "a", 1).unwrap();
        memory.mark_iteration(&t, 1).unwrap();
        memory.store_in_iteration(&t, "s3", "b", 2).unwrap();
        memory.mark_iteration(&t, 2).unwrap();

        let thread = memory.thread(&t).unwrap();
        assert_eq!(thread.entries.len(), 5);
        assert_eq!(thread.iterations, 2);
        assert_eq!(thread.message_count(), 3);
    }

    #[test]
    fn set_status_requires_thread() {
        let memory = EphemeralMemory::default();
        assert!(matches!(
            memory.set_status(&tid("ghost"), ThreadStatus::Complete),
            Err(StoreError::NotFound(_))
        ));
        memory.store(&tid("t"), "user", "x").unwrap();
        memory.set_status(&tid("t"), ThreadStatus::Error).unwrap();
        assert_eq!(memory.thread(&tid("t")).unwrap().status, ThreadStatus::Error);
    }

    #[test]
    fn summary_of_unknown_or_empty_thread_is_empty() {
        let memory = EphemeralMemory::default();
        assert_eq!(memory.summarize(&tid("none")), "");
        memory.mark_iteration(&tid("markers-only"), 1).unwrap();
        assert_eq!(memory.summarize(&tid("markers-only")), "");
    }

    #[test]
    fn summary_keeps_recent_messages_and_truncates() {
        let memory = EphemeralMemory::new(SummaryPolicy {
            max_messages: 2,
            max_chars: 5,
        });
        let t = tid("t");
        memory.store(&t, "user", "first question").unwrap();
        memory.store(&t, "ec2", "short").unwrap();
        memory.store(&t, "orchestrator", "a long final answer").unwrap();

        let summary = memory.summarize(&t);
        assert_eq!(summary, "Conversation summary (2 messages):\nec2: short\norchestrator: a lon…");
        assert_eq!(summary, memory.summarize(&t));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 7), "héllo w…");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }
}
