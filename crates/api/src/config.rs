//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::fulfillment;
use saga::{CompensationRetryPolicy, OrchestratorConfig};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — PostgreSQL connection string (default: unset, in-memory store)
/// - `SAGA_REMINDER_DUE_SECS` — delay before the first recovery tick (default: `60`)
/// - `SAGA_REMINDER_PERIOD_SECS` — interval between recovery ticks (default: `60`)
/// - `SAGA_COMPENSATION_RETRY_DELAY_MS` — pause between compensation retries (default: `5000`)
/// - `SAGA_COMPENSATION_MAX_ATTEMPTS` — give up after this many failures (default: unset, retry forever)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub reminder_due: Duration,
    pub reminder_period: Duration,
    pub compensation_retry_delay: Duration,
    pub compensation_max_attempts: Option<u32>,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT").unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            reminder_due: env_parse("SAGA_REMINDER_DUE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reminder_due),
            reminder_period: env_parse("SAGA_REMINDER_PERIOD_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reminder_period),
            compensation_retry_delay: env_parse("SAGA_COMPENSATION_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.compensation_retry_delay),
            compensation_max_attempts: env_parse("SAGA_COMPENSATION_MAX_ATTEMPTS"),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the orchestrator settings for fulfillment sagas.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let retry = match self.compensation_max_attempts {
            Some(max) => CompensationRetryPolicy::bounded(self.compensation_retry_delay, max),
            None => CompensationRetryPolicy::unbounded(self.compensation_retry_delay),
        };
        fulfillment::orchestrator_config()
            .with_reminder_schedule(self.reminder_due, self.reminder_period)
            .with_compensation_retry(retry)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            reminder_due: Duration::from_secs(60),
            reminder_period: Duration::from_secs(60),
            compensation_retry_delay: Duration::from_millis(5000),
            compensation_max_attempts: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(config.database_url.is_none());
        assert_eq!(config.reminder_due, Duration::from_secs(60));
        assert_eq!(config.compensation_retry_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_addr_default() {
        let config = Config::default();
        assert_eq!(config.addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_orchestrator_config_defaults_to_unbounded_retry() {
        let orchestrator = Config::default().orchestrator_config();
        assert_eq!(orchestrator.saga_type, "OrderFulfillment");
        assert_eq!(orchestrator.compensation_retry.max_attempts, None);
        assert_eq!(orchestrator.reminder_period, Duration::from_secs(60));
    }

    #[test]
    fn test_orchestrator_config_with_bounded_retry() {
        let config = Config {
            compensation_max_attempts: Some(4),
            compensation_retry_delay: Duration::from_millis(250),
            ..Config::default()
        };
        let retry = config.orchestrator_config().compensation_retry;
        assert_eq!(retry.max_attempts, Some(4));
        assert_eq!(retry.delay, Duration::from_millis(250));
    }
}
