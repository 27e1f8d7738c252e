use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG.
    pub log_level: Level,
    /// Per-target overrides (e.g. "tandem_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: true,
        }
    }
}

impl TelemetryConfig {
    /// Build from string levels, ignoring unparseable entries.
    pub fn from_levels<'a>(
        level: &str,
        modules: impl IntoIterator<Item = (&'a String, &'a String)>,
        json: bool,
    ) -> Self {
        let log_level = level.parse().unwrap_or(Level::INFO);
        let module_levels = modules
            .into_iter()
            .filter_map(|(module, lvl)| lvl.parse().ok().map(|l| (module.clone(), l)))
            .collect();
        Self {
            log_level,
            module_levels,
            json,
        }
    }

    fn directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid filter directives: {0}")]
    Filter(String),
    #[error("log filter is no longer installed")]
    Detached,
}

/// Handle for adjusting the active filter after startup.
pub struct TelemetryGuard {
    handle: reload::Handle<EnvFilter, Registry>,
    config: Arc<RwLock<TelemetryConfig>>,
}

impl TelemetryGuard {
    /// Change the log level for one target at runtime.
    pub fn set_module_level(&self, module: &str, level: Level) -> Result<(), TelemetryError> {
        let directives = {
            let mut config = self.config.write();
            match config.module_levels.iter_mut().find(|(m, _)| m == module) {
                Some(entry) => entry.1 = level,
                None => config.module_levels.push((module.to_string(), level)),
            }
            config.directives()
        };
        let filter = EnvFilter::try_new(&directives).map_err(|e| TelemetryError::Filter(e.to_string()))?;
        self.handle.reload(filter).map_err(|_| TelemetryError::Detached)
    }

    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.config.read().module_levels.clone()
    }
}

/// Install the global subscriber. Call once at startup.
///
/// If a subscriber is already installed the existing one stays active and
/// the returned guard's reloads have no effect on it.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let directives = config.directives();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));
    let (filter_layer, handle) = reload::Layer::new(env_filter);

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    let installed = tracing_subscriber::registry()
        .with(filter_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init();
    if let Err(e) = installed {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }

    TelemetryGuard {
        handle,
        config: Arc::new(RwLock::new(config)),
    }
}
