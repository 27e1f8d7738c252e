//! In-process stores for conversation threads and tool-synthesis sessions.
//!
//! Both are plain values owned by whoever builds the engine and shared by
//! `Arc`; nothing here is global.

pub mod error;
pub mod synthesis;
pub mod threads;

pub use error::StoreError;
pub use synthesis::{SynthesisSession, SynthesisSessionStore, SynthesisState, SynthesisTurn, TurnKind};
pub use threads::{ConversationMemory, EphemeralMemory, SummaryPolicy};
