//! Service boundary: JSON request handlers over the orchestration engine.
//!
//! Transport is left to the embedder; [`TandemService::dispatch`] takes a
//! method name and JSON params and always answers with JSON.

pub mod bootstrap;
pub mod dto;
pub mod error;
pub mod service;

pub use bootstrap::{build_service, build_with_model};
pub use error::ApiError;
pub use service::TandemService;
