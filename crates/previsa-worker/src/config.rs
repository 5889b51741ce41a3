//! Process-level settings read from the environment.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DATABASE_URL` | `postgres://localhost/previsa` | Connection string |
//! | `RUN_MIGRATIONS` | `true` | Apply pending migrations at startup |
//! | `DB_MAX_CONNECTIONS` | `10` | Pool upper bound |
//! | `DB_MIN_CONNECTIONS` | `1` | Idle connections kept warm |
//! | `STATS_INTERVAL_SECS` | `60` | Period of the queue/pool stats log |
//!
//! Queue, generator, embedder and webhook settings are read by their own
//! crates.

use std::time::Duration;

use previsa_core::defaults::{DB_MAX_CONNECTIONS, DB_MIN_CONNECTIONS};
use previsa_db::PoolConfig;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/previsa";
const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub database_url: String,
    pub run_migrations: bool,
    pub pool: PoolConfig,
    pub stats_interval: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse_u32 = |key: &str, default: u32| {
            lookup(key)
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(default)
        };

        let run_migrations = lookup("RUN_MIGRATIONS")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        let stats_secs = lookup("STATS_INTERVAL_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_STATS_INTERVAL_SECS)
            .max(1);

        Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            run_migrations,
            pool: PoolConfig::with_bounds(
                parse_u32("DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS),
                parse_u32("DB_MIN_CONNECTIONS", DB_MIN_CONNECTIONS),
            ),
            stats_interval: Duration::from_secs(stats_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> WorkerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_vars(&[]);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert!(config.run_migrations);
        assert_eq!(config.pool, PoolConfig::default());
        assert_eq!(config.stats_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_pool_bounds_from_env() {
        let config = from_vars(&[("DB_MAX_CONNECTIONS", "4"), ("DB_MIN_CONNECTIONS", "9")]);
        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.pool.min_connections, 4);

        let config = from_vars(&[("DB_MAX_CONNECTIONS", "lots")]);
        assert_eq!(config.pool.max_connections, DB_MAX_CONNECTIONS);
    }

    #[test]
    fn test_migrations_can_be_disabled() {
        assert!(!from_vars(&[("RUN_MIGRATIONS", "false")]).run_migrations);
        assert!(!from_vars(&[("RUN_MIGRATIONS", "0")]).run_migrations);
        assert!(from_vars(&[("RUN_MIGRATIONS", "yes")]).run_migrations);
    }
}
