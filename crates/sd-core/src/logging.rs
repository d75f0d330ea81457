//! Logging setup
//!
//! Library code only emits `tracing` events; installing a subscriber is
//! left to the host. `init_logging` is the convenience used by tests,
//! benches and embedding binaries.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Configuration for StatDeck's logging setup.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level for the host application
    pub level: Level,
    /// Log level for the `sd_core` / `sd_models` targets
    pub engine_level: Level,
    /// Whether to use JSON output format
    pub json_format: bool,
    /// Environment filter override (same syntax as `RUST_LOG`)
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            engine_level: Level::INFO,
            json_format: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Debug output for every engine step
    pub fn verbose() -> Self {
        Self {
            level: Level::INFO,
            engine_level: Level::DEBUG,
            ..Self::default()
        }
    }

    /// Structured JSON output at warning level
    pub fn production() -> Self {
        Self {
            level: Level::WARN,
            engine_level: Level::WARN,
            json_format: true,
            env_filter: None,
        }
    }

    /// Filter directive built from the levels, unless overridden
    pub fn filter_directive(&self) -> String {
        match &self.env_filter {
            Some(filter) => filter.clone(),
            None => format!(
                "{},sd_core={},sd_models={}",
                self.level, self.engine_level, self.engine_level
            )
            .to_lowercase(),
        }
    }
}

/// Install a global subscriber; returns `false` when one was already set.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_new(config.filter_directive())
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string().to_lowercase()));

    if config.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok()
    }
}
