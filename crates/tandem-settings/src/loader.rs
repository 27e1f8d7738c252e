use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::TandemSettings;

/// Settings file location: `$TANDEM_CONFIG`, else `./tandem.json`.
pub fn settings_path() -> PathBuf {
    std::env::var_os("TANDEM_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tandem.json"))
}

/// Load from [`settings_path`] with process environment overrides.
pub fn load_settings() -> Result<TandemSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from a specific file with process environment overrides.
///
/// A missing file is not an error; defaults are used.
pub fn load_settings_from_path(path: &Path) -> Result<TandemSettings> {
    load_with_env(path, |key| std::env::var(key).ok())
}

/// Defaults, then the file deep-merged over them, then `env` overrides.
pub fn load_with_env<F>(path: &Path, env: F) -> Result<TandemSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(TandemSettings::default())?;
    let merged = if path.exists() {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: Value = serde_json::from_str(&raw)?;
        deep_merge(defaults, file)
    } else {
        tracing::debug!(?path, "no settings file, using defaults");
        defaults
    };

    let mut settings: TandemSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env)?;
    settings.validate();
    Ok(settings)
}

/// Recursively merge `overlay` into `base`. Objects merge key by key;
/// any other overlay value replaces the base value.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

fn apply_env_overrides<F>(settings: &mut TandemSettings, env: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = env("TANDEM_MODEL") {
        settings.provider.model = v;
    }
    if let Some(v) = env("TANDEM_BASE_URL") {
        settings.provider.base_url = v;
    }
    if let Some(v) = env("TANDEM_MAX_ITERATIONS") {
        settings.orchestrator.max_iterations = parse_env("TANDEM_MAX_ITERATIONS", &v)?;
    }
    if let Some(v) = env("TANDEM_AGENT_TIMEOUT_SECS") {
        settings.orchestrator.agent_timeout_secs = Some(parse_env("TANDEM_AGENT_TIMEOUT_SECS", &v)?);
    }
    if let Some(v) = env("TANDEM_DEFAULT_AGENT") {
        settings.orchestrator.default_agent = (!v.is_empty()).then_some(v);
    }
    if let Some(v) = env("TANDEM_LOG_LEVEL") {
        settings.logging.level = v;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| SettingsError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn deep_merge_nested_objects() {
        let base = serde_json::json!({"a": {"x": 1, "y": 2}, "b": [1, 2]});
        let overlay = serde_json::json!({"a": {"y": 3}, "b": [9]});
        let merged = deep_merge(base, overlay);
        assert_eq!(merged, serde_json::json!({"a": {"x": 1, "y": 3}, "b": [9]}));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_with_env(&dir.path().join("absent.json"), no_env).unwrap();
        assert_eq!(s.orchestrator.max_iterations, 5);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tandem.json");
        std::fs::write(
            &path,
            r#"{"orchestrator": {"defaultAgent": "general"}, "memory": {"summaryMaxChars": 80}}"#,
        )
        .unwrap();
        let s = load_with_env(&path, no_env).unwrap();
        assert_eq!(s.orchestrator.default_agent.as_deref(), Some("general"));
        assert_eq!(s.orchestrator.max_iterations, 5);
        assert_eq!(s.memory.summary_max_chars, 80);
        assert_eq!(s.memory.summary_max_messages, 20);
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tandem.json");
        std::fs::write(&path, r#"{"orchestrator": {"maxIterations": 2}}"#).unwrap();
        let env: HashMap<&str, &str> = [("TANDEM_MAX_ITERATIONS", "7"), ("TANDEM_MODEL", "local-llama")].into();
        let s = load_with_env(&path, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(s.orchestrator.max_iterations, 7);
        assert_eq!(s.provider.model, "local-llama");
    }

    #[test]
    fn bad_env_value_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_with_env(&dir.path().join("x.json"), |k| {
            (k == "TANDEM_AGENT_TIMEOUT_SECS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidEnv { .. }), "{err}");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tandem.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_with_env(&path, no_env), Err(SettingsError::Json(_))));
    }

    #[test]
    fn loaded_values_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tandem.json");
        std::fs::write(&path, r#"{"orchestrator": {"maxIterations": 0}}"#).unwrap();
        let s = load_with_env(&path, no_env).unwrap();
        assert_eq!(s.orchestrator.max_iterations, 1);
    }
}
