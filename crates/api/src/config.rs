//! Application configuration loaded from environment variables.

use std::time::Duration;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Process configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json` (default `text`)
/// - `DATABASE_URL`: PostgreSQL DSN; in-memory storage when unset
/// - `DB_MAX_CONNECTIONS` (20), `DB_CONNECT_ATTEMPTS` (5)
/// - `ORDER_TOPIC` (`order.created`), `CONSUMER_GROUP` (`payment-settlement`)
/// - `CHANNEL_PARTITIONS` (3), `PUBLISH_MAX_RETRIES` (5)
/// - `CALL_TIMEOUT_SECS` (10)
/// - `RECONCILE_INTERVAL_SECS` (60, `0` disables), `RECONCILE_AFTER_SECS` (300)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_connect_attempts: u32,
    pub order_topic: String,
    pub consumer_group: String,
    pub channel_partitions: u32,
    pub publish_max_retries: u32,
    pub call_timeout: Duration,
    pub reconcile_interval: Duration,
    pub reconcile_after: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`. Unparsable values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let secs = |key: &str, default: Duration| parsed(key).map_or(default, Duration::from_secs);
        let count = |key: &str, default: u32| {
            parsed(key)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            db_max_connections: count("DB_MAX_CONNECTIONS", defaults.db_max_connections).max(1),
            db_connect_attempts: count("DB_CONNECT_ATTEMPTS", defaults.db_connect_attempts).max(1),
            order_topic: lookup("ORDER_TOPIC").unwrap_or(defaults.order_topic),
            consumer_group: lookup("CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            channel_partitions: count("CHANNEL_PARTITIONS", defaults.channel_partitions).max(1),
            publish_max_retries: count("PUBLISH_MAX_RETRIES", defaults.publish_max_retries),
            call_timeout: secs("CALL_TIMEOUT_SECS", defaults.call_timeout),
            reconcile_interval: secs("RECONCILE_INTERVAL_SECS", defaults.reconcile_interval),
            reconcile_after: secs("RECONCILE_AFTER_SECS", defaults.reconcile_after),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            db_max_connections: 20,
            db_connect_attempts: 5,
            order_topic: fulfillment::DEFAULT_ORDER_TOPIC.to_string(),
            consumer_group: "payment-settlement".to_string(),
            channel_partitions: channel::DEFAULT_PARTITIONS,
            publish_max_retries: 5,
            call_timeout: common::DEFAULT_CALL_TIMEOUT,
            reconcile_interval: Duration::from_secs(60),
            reconcile_after: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = from_pairs(&[]);
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.database_url, None);
        assert_eq!(config.db_max_connections, 20);
        assert_eq!(config.db_connect_attempts, 5);
        assert_eq!(config.order_topic, "order.created");
        assert_eq!(config.consumer_group, "payment-settlement");
        assert_eq!(config.channel_partitions, 3);
        assert_eq!(config.publish_max_retries, 5);
        assert_eq!(config.call_timeout, Duration::from_secs(10));
        assert_eq!(config.reconcile_interval, Duration::from_secs(60));
        assert_eq!(config.reconcile_after, Duration::from_secs(300));
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/shop"),
            ("CALL_TIMEOUT_SECS", "2"),
            ("RECONCILE_INTERVAL_SECS", "0"),
            ("CHANNEL_PARTITIONS", "6"),
        ]);
        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/shop")
        );
        assert_eq!(config.call_timeout, Duration::from_secs(2));
        assert!(config.reconcile_interval.is_zero());
        assert_eq!(config.channel_partitions, 6);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "http"),
            ("CALL_TIMEOUT_SECS", "-1"),
            ("CHANNEL_PARTITIONS", "0"),
            ("DATABASE_URL", "  "),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.call_timeout, Duration::from_secs(10));
        assert_eq!(config.channel_partitions, 1);
        assert_eq!(config.database_url, None);
    }
}
