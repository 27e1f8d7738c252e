//! # tandem-settings
//!
//! Settings are resolved from three layers, lowest priority first:
//! 1. compiled defaults ([`TandemSettings::default()`])
//! 2. a JSON file, deep-merged over the defaults
//! 3. `TANDEM_*` environment variables
//!
//! The result is validated and handed to the components that need it.
//! There is no process-wide cache; callers own their settings value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, load_with_env, settings_path};
pub use types::*;
