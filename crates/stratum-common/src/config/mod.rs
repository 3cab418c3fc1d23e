//! Database configuration structures.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{IsolationLevel, TxMode};

/// Top-level configuration for a database instance.
///
/// # Example
///
/// ```rust
/// use stratum_common::config::DatabaseConfig;
///
/// let config = DatabaseConfig::default();
/// assert_eq!(config.result_memory_row_count, 10_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Initial concurrency control mode.
    pub tx_mode: TxMode,

    /// Default isolation level for new sessions.
    pub default_isolation: IsolationLevel,

    /// Row count at which a hybrid store promotes to the data cache.
    /// Zero disables promotion; stores stay in memory.
    pub result_memory_row_count: usize,

    /// Under MVCC, a write-write conflict aborts the transaction instead
    /// of waiting for the holder.
    pub tx_conflict_rollback: bool,

    /// A thread interrupt during a lock wait aborts the transaction
    /// instead of being swallowed.
    pub tx_interrupt_rollback: bool,

    /// Granularity of the statement-timeout poller.
    #[serde(with = "duration_millis")]
    pub timeout_tick: Duration,

    /// Name of the default schema created at bootstrap.
    pub default_schema: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            tx_mode: TxMode::Locks,
            default_isolation: IsolationLevel::ReadCommitted,
            result_memory_row_count: 10_000,
            tx_conflict_rollback: true,
            tx_interrupt_rollback: false,
            timeout_tick: Duration::from_millis(100),
            default_schema: "PUBLIC".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Creates a configuration suitable for tests: a small promotion
    /// threshold and a fast timeout tick.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            result_memory_row_count: 8,
            timeout_tick: Duration::from_millis(10),
            ..Default::default()
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_tick.is_zero() {
            return Err("timeout_tick must be non-zero".to_string());
        }

        if self.default_schema.is_empty() {
            return Err("default_schema must be non-empty".to_string());
        }

        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(DatabaseConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_tick() {
        let config = DatabaseConfig {
            timeout_tick: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = DatabaseConfig::for_testing();
        let json = serde_json::to_string(&config).unwrap();
        let back: DatabaseConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.result_memory_row_count, 8);
        assert_eq!(back.timeout_tick, Duration::from_millis(10));
    }
}
