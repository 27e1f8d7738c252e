use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ThreadId;

/// Sender tag used for messages typed by the person driving a thread.
pub const USER_SENDER: &str = "user";
/// Sender tag used for notices raised by the engine itself.
pub const SYSTEM_SENDER: &str = "system";
/// Sender tag used for the aggregated output of a whole orchestration.
pub const ORCHESTRATOR_SENDER: &str = "orchestrator";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Derive the role from a sender tag. Agent names map to `Assistant`.
    pub fn from_sender(sender: &str) -> Self {
        match sender {
            USER_SENDER => Self::User,
            SYSTEM_SENDER => Self::System,
            _ => Self::Assistant,
        }
    }
}

/// One immutable entry of a conversation thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// `<sender>-<sequence>`, unique within the thread.
    pub id: String,
    pub role: Role,
    pub agent: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub iteration: u32,
}

/// A thread is a sequence of messages interleaved with round boundaries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadEntry {
    Message(Message),
    Iteration { iteration: u32 },
}

impl ThreadEntry {
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(m) => Some(m),
            Self::Iteration { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    #[default]
    Running,
    Complete,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub entries: Vec<ThreadEntry>,
    pub status: ThreadStatus,
    pub iterations: u32,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(id: ThreadId) -> Self {
        Self {
            id,
            entries: Vec::new(),
            status: ThreadStatus::Running,
            iterations: 0,
            created_at: Utc::now(),
        }
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().filter_map(ThreadEntry::as_message)
    }

    pub fn message_count(&self) -> usize {
        self.messages().count()
    }

    /// Append a message and return a copy of it.
    pub fn push_message(&mut self, sender: &str, content: &str, iteration: u32) -> Message {
        let message = Message {
            id: format!("{sender}-{}", self.message_count() + 1),
            role: Role::from_sender(sender),
            agent: sender.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            iteration,
        };
        self.entries.push(ThreadEntry::Message(message.clone()));
        message
    }

    pub fn push_marker(&mut self, iteration: u32) {
        self.entries.push(ThreadEntry::Iteration { iteration });
        self.iterations = self.iterations.max(iteration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_follows_sender() {
        assert_eq!(Role::from_sender("user"), Role::User);
        assert_eq!(Role::from_sender("system"), Role::System);
        assert_eq!(Role::from_sender("billing"), Role::Assistant);
        assert_eq!(Role::from_sender("orchestrator"), Role::Assistant);
    }

    #[test]
    fn message_ids_are_sequential_per_thread() {
        let mut thread = Thread::new(ThreadId::from_raw("t"));
        let a = thread.push_message("user", "hi", 0);
        thread.push_marker(1);
        let b = thread.push_message("ec2", "found 3 instances", 1);
        assert_eq!(a.id, "user-1");
        assert_eq!(b.id, "ec2-2");
        assert_eq!(thread.message_count(), 2);
        assert_eq!(thread.entries.len(), 3);
        assert_eq!(thread.iterations, 1);
    }

    #[test]
    fn iteration_marker_wire_shape() {
        let json = serde_json::to_value(ThreadEntry::Iteration { iteration: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "iteration", "iteration": 2}));
    }

    #[test]
    fn message_entry_wire_shape() {
        let mut thread = Thread::new(ThreadId::from_raw("t"));
        thread.push_message("s3", "2 buckets", 1);
        let json = serde_json::to_value(&thread.entries[0]).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["agent"], "s3");
        assert_eq!(json["iteration"], 1);
        let back: ThreadEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, thread.entries[0]);
    }
}
