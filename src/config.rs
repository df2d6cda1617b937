//! Engine-wide configuration (§6 "Environment/configuration keys").
//!
//! Grouped settings with preset constructors for common deployment
//! profiles, a fluent builder, cross-field validation, and JSON persistence
//! so an admin surface can tune retry/cache/storage knobs without a
//! redeploy.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::{AgentKey, MaxAttempts};

/// Failure validating or (de)serializing an `OrchestratorConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field's value is out of its allowed range or contradicts another
    /// field.
    #[error("invalid configuration: {field} - {reason}")]
    Validation {
        /// The offending field.
        field: String,
        /// Why it's invalid.
        reason: String,
    },

    /// Reading or writing the config file failed.
    #[error("config file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file's contents could not be parsed.
    #[error("config serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Routing and loop-bound settings (§5 backpressure caps, §8 invariant 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSettings {
    /// Hard cap on orchestrator routing passes per turn.
    pub max_routing_attempts: MaxAttempts,
    /// Hard cap on supervisor re-route requests per turn.
    pub max_supervisor_retries: MaxAttempts,
    /// Hard cap on absorbed worker/engine errors per turn.
    pub max_errors: MaxAttempts,
    /// The agent key the greeting worker is registered under; it alone
    /// skips the supervisor and ends the turn directly (§4.11).
    pub greeting_agent: AgentKey,
    /// The agent key the farewell worker is registered under; its
    /// response always forces `is_complete` (§4.9 point 6).
    pub farewell_agent: AgentKey,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            max_routing_attempts: MaxAttempts::try_new(3).expect("3 <= 3"),
            max_supervisor_retries: MaxAttempts::try_new(3).expect("3 <= 3"),
            max_errors: MaxAttempts::try_new(3).expect("3 <= 3"),
            greeting_agent: AgentKey::try_new("greeting_agent").expect("literal is valid"),
            farewell_agent: AgentKey::try_new("farewell_agent").expect("literal is valid"),
        }
    }
}

/// Per-call and per-turn timeout budgets (§5 "Suspension points").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Whole-turn budget; exceeding it yields an apology and a handoff.
    pub turn_timeout_ms: u64,
    /// Per-LLM-call budget inside the LLM intent analyzer.
    pub llm_call_timeout_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            turn_timeout_ms: 90_000,
            llm_call_timeout_ms: 60_000,
        }
    }
}

/// Intent cache sizing (C2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Maximum number of cached intent results.
    pub intent_cache_max_size: usize,
    /// Per-entry time-to-live, in seconds.
    pub intent_cache_ttl_secs: u64,
    /// Warm context-cache time-to-live, in seconds.
    pub hot_context_cache_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            intent_cache_max_size: 1_000,
            intent_cache_ttl_secs: 60,
            hot_context_cache_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Durable/warm storage connection settings (C1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite connection string for the durable context store.
    pub database_url: String,
    /// Optional Redis connection string for the warm cache tier; absent
    /// means reads fall through hot -> durable directly.
    pub redis_url: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            redis_url: None,
        }
    }
}

/// Supervisor tuning (C10).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// Overall-score threshold above which a response is accepted outright.
    pub quality_threshold: f64,
    /// Whether the optional response enhancer runs at all.
    pub enable_response_enhancement: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            quality_threshold: 0.7,
            enable_response_enhancement: false,
        }
    }
}

/// Logging/tracing verbosity knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    /// Whether per-candidate analyzer scoring is logged at `debug!`.
    pub enable_detailed_logs: bool,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            enable_detailed_logs: false,
        }
    }
}

/// Complete engine configuration, grouped by concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Loop bounds and the two agent keys the engine treats specially.
    pub routing: RoutingSettings,
    /// Per-call and per-turn timeout budgets.
    pub timeouts: TimeoutSettings,
    /// Intent and context cache sizing.
    pub cache: CacheSettings,
    /// Durable/warm storage connection settings.
    pub storage: StorageSettings,
    /// Supervisor tuning.
    pub supervisor: SupervisorSettings,
    /// Logging/tracing verbosity.
    pub observability: ObservabilitySettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::development()
    }
}

impl OrchestratorConfig {
    /// A configuration tuned for local development: short TTLs, an
    /// in-memory database, verbose logging.
    #[must_use]
    pub fn development() -> Self {
        Self {
            routing: RoutingSettings::default(),
            timeouts: TimeoutSettings::default(),
            cache: CacheSettings {
                intent_cache_max_size: 200,
                intent_cache_ttl_secs: 30,
                hot_context_cache_ttl_secs: 300,
            },
            storage: StorageSettings::default(),
            supervisor: SupervisorSettings::default(),
            observability: ObservabilitySettings {
                enable_detailed_logs: true,
            },
        }
    }

    /// A configuration tuned for production: larger caches, longer TTLs,
    /// quieter logging.
    #[must_use]
    pub fn production() -> Self {
        Self {
            routing: RoutingSettings::default(),
            timeouts: TimeoutSettings::default(),
            cache: CacheSettings::default(),
            storage: StorageSettings {
                database_url: "sqlite://conversant.db".to_string(),
                redis_url: None,
            },
            supervisor: SupervisorSettings::default(),
            observability: ObservabilitySettings {
                enable_detailed_logs: false,
            },
        }
    }

    /// A configuration for integration tests: tiny caches and short
    /// timeouts, so a hung test fails fast instead of hitting the default
    /// 90s turn budget.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            routing: RoutingSettings::default(),
            timeouts: TimeoutSettings {
                turn_timeout_ms: 5_000,
                llm_call_timeout_ms: 2_000,
            },
            cache: CacheSettings {
                intent_cache_max_size: 16,
                intent_cache_ttl_secs: 5,
                hot_context_cache_ttl_secs: 5,
            },
            storage: StorageSettings::default(),
            supervisor: SupervisorSettings::default(),
            observability: ObservabilitySettings {
                enable_detailed_logs: true,
            },
        }
    }

    /// Starts a builder seeded with development defaults.
    #[must_use]
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::new()
    }

    /// Cross-field consistency checks beyond what the domain types already
    /// enforce at construction (e.g. `MaxAttempts <= 3`).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeouts.llm_call_timeout_ms > self.timeouts.turn_timeout_ms {
            return Err(ConfigError::Validation {
                field: "timeouts.llm_call_timeout_ms".to_string(),
                reason: "must not exceed timeouts.turn_timeout_ms".to_string(),
            });
        }
        if self.cache.intent_cache_max_size == 0 {
            return Err(ConfigError::Validation {
                field: "cache.intent_cache_max_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.supervisor.quality_threshold) {
            return Err(ConfigError::Validation {
                field: "supervisor.quality_threshold".to_string(),
                reason: "must be in [0.0, 1.0]".to_string(),
            });
        }
        if self.routing.greeting_agent == self.routing.farewell_agent {
            return Err(ConfigError::Validation {
                field: "routing.farewell_agent".to_string(),
                reason: "must differ from routing.greeting_agent".to_string(),
            });
        }
        Ok(())
    }

    /// Serializes this configuration to `path` as JSON, for an admin
    /// surface that persists tuning across restarts.
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Loads a configuration previously written by
    /// [`OrchestratorConfig::save_to_file`], validating it before returning.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays environment variables onto `self`, matching §6's named
    /// configuration keys. Unset variables leave the current value alone.
    #[must_use]
    pub fn overlay_env(mut self) -> Self {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.storage.database_url = url;
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.storage.redis_url = Some(url);
        }
        if let Some(ms) = std::env::var("TURN_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()) {
            self.timeouts.turn_timeout_ms = ms;
        }
        if let Some(ms) = std::env::var("LLM_CALL_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()) {
            self.timeouts.llm_call_timeout_ms = ms;
        }
        self
    }

    /// Builds a configuration starting from [`OrchestratorConfig::production`]
    /// and overlaying environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::production().overlay_env()
    }
}

/// Fluent builder over [`OrchestratorConfig`]'s most commonly-tuned fields.
#[derive(Debug, Clone)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl Default for OrchestratorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorConfigBuilder {
    /// Starts from development defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::development(),
        }
    }

    /// Overrides the database connection string.
    #[must_use]
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.storage.database_url = url.into();
        self
    }

    /// Overrides the Redis connection string.
    #[must_use]
    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.config.storage.redis_url = Some(url.into());
        self
    }

    /// Overrides the whole-turn timeout, in milliseconds.
    #[must_use]
    pub fn turn_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.turn_timeout_ms = ms;
        self
    }

    /// Overrides the max routing attempts per turn.
    #[must_use]
    pub fn max_routing_attempts(mut self, max: MaxAttempts) -> Self {
        self.config.routing.max_routing_attempts = max;
        self
    }

    /// Overrides the intent cache's maximum size.
    #[must_use]
    pub fn intent_cache_max_size(mut self, size: usize) -> Self {
        self.config.cache.intent_cache_max_size = size;
        self
    }

    /// Enables or disables the optional response enhancer.
    #[must_use]
    pub fn enable_response_enhancement(mut self, enable: bool) -> Self {
        self.config.supervisor.enable_response_enhancement = enable;
        self
    }

    /// Enables or disables verbose per-candidate logging.
    #[must_use]
    pub fn enable_detailed_logs(mut self, enable: bool) -> Self {
        self.config.observability.enable_detailed_logs = enable;
        self
    }

    /// Validates and returns the built configuration.
    pub fn build(self) -> Result<OrchestratorConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_and_production_presets_validate() {
        OrchestratorConfig::development().validate().unwrap();
        OrchestratorConfig::production().validate().unwrap();
        OrchestratorConfig::testing().validate().unwrap();
    }

    #[test]
    fn llm_timeout_exceeding_turn_timeout_is_rejected() {
        let config = OrchestratorConfig::builder().turn_timeout_ms(1_000).build().unwrap_err();
        assert!(matches!(config, ConfigError::Validation { .. }));
    }

    #[test]
    fn zero_cache_size_is_rejected() {
        let result = OrchestratorConfig::builder().intent_cache_max_size(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_overrides_apply() {
        let config = OrchestratorConfig::builder()
            .database_url("sqlite://test.db")
            .enable_response_enhancement(true)
            .build()
            .unwrap();
        assert_eq!(config.storage.database_url, "sqlite://test.db");
        assert!(config.supervisor.enable_response_enhancement);
    }

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = OrchestratorConfig::production();
        config.save_to_file(&path).unwrap();
        let loaded = OrchestratorConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.storage.database_url, config.storage.database_url);
    }
}
