//! Shared vocabulary for the tandem orchestration engine: identifiers,
//! thread messages, tool and agent contracts, the language-model seam and
//! lifecycle events.

pub mod agent;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod tools;
