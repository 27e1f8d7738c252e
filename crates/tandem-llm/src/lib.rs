pub mod openai;
pub mod reliable;

pub mod mock;

pub use mock::{ScriptedModel, ScriptedResponse};
pub use openai::{OpenAiConfig, OpenAiModel};
pub use reliable::{ReliableConfig, ReliableModel};
