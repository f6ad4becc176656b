//! Event bus configuration

use crate::error::{EventError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for an [`EventBus`](crate::EventBus)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventBusConfig {
    /// Bus identifier, used in logs and as `DeadEvent::source`
    pub identifier: String,

    /// Async worker pool sizing
    pub pool: PoolConfig,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            identifier: "default".to_string(),
            pool: PoolConfig::default(),
        }
    }
}

impl EventBusConfig {
    /// Default configuration with the given identifier
    pub fn named(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for inconsistent values
    pub fn validate(&self) -> Result<()> {
        if self.identifier.trim().is_empty() {
            return Err(EventError::Config(
                "Bus identifier cannot be empty".to_string(),
            ));
        }
        self.pool.validate()
    }
}

/// Sizing of the bounded worker pool used by `ThreadMode::Async`
///
/// Core workers start with the bus and live until shutdown. When the queue
/// is full, extra workers are spawned up to `max_workers`; they retire after
/// `keep_alive_secs` without work. Once at `max_workers` with a full queue,
/// the submitting thread runs the task itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    /// Workers started eagerly
    pub core_workers: usize,

    /// Upper bound on live workers
    pub max_workers: usize,

    /// Capacity of the task queue
    pub queue_capacity: usize,

    /// Idle time before an extra worker exits, in seconds
    pub keep_alive_secs: u64,

    /// Worker thread name prefix
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let core_workers = 4;
        Self {
            core_workers,
            max_workers: num_cpus::get().max(core_workers),
            queue_capacity: 10_000,
            keep_alive_secs: 60,
            thread_name_prefix: "EventBus".to_string(),
        }
    }
}

impl PoolConfig {
    /// Idle timeout for extra workers
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Check the pool sizing
    pub fn validate(&self) -> Result<()> {
        if self.core_workers == 0 {
            return Err(EventError::Config(
                "Pool needs at least one core worker".to_string(),
            ));
        }
        if self.max_workers < self.core_workers {
            return Err(EventError::Config(format!(
                "Pool max_workers ({}) is below core_workers ({})",
                self.max_workers, self.core_workers
            )));
        }
        if self.queue_capacity == 0 {
            return Err(EventError::Config(
                "Pool queue capacity must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EventBusConfig::default();
        assert_eq!(config.identifier, "default");
        assert_eq!(config.pool.core_workers, 4);
        assert!(config.pool.max_workers >= 4);
        assert_eq!(config.pool.queue_capacity, 10_000);
        assert_eq!(config.pool.keep_alive(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = EventBusConfig::from_json(
            r#"{"identifier": "orders", "pool": {"coreWorkers": 2, "maxWorkers": 3}}"#,
        )
        .unwrap();
        assert_eq!(config.identifier, "orders");
        assert_eq!(config.pool.core_workers, 2);
        assert_eq!(config.pool.max_workers, 3);
        assert_eq!(config.pool.queue_capacity, 10_000);
        assert_eq!(config.pool.thread_name_prefix, "EventBus");
    }

    #[test]
    fn test_from_json_empty_object() {
        let config = EventBusConfig::from_json("{}").unwrap();
        assert_eq!(config, EventBusConfig::default());
    }

    #[test]
    fn test_from_json_malformed() {
        let err = EventBusConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, EventError::Serialization(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EventBusConfig::named("  ");
        assert!(matches!(config.validate(), Err(EventError::Config(_))));

        config.identifier = "ok".to_string();
        config.pool.core_workers = 0;
        assert!(config.validate().is_err());

        config.pool.core_workers = 4;
        config.pool.max_workers = 2;
        assert!(config.validate().is_err());

        config.pool.max_workers = 4;
        config.pool.queue_capacity = 0;
        assert!(config.validate().is_err());
    }
}
