//! Configuration loading from environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration.
#[derive(Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub gateway_url: String,
    pub gateway_timeout: Duration,
    pub gateway_secret: Option<String>,
    pub gateway_connect_retries: u32,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub rate_limit_per_minute: u32,
    pub reconcile_interval: Duration,
    pub stale_pending_after: Duration,
    pub alert_webhook_url: Option<String>,
    pub alert_webhook_secret: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            optional(key)
                .ok_or_else(|| anyhow::anyhow!("{} environment variable is required", key))
        };

        let gateway_timeout_ms: u64 = parse_or(&lookup, "GATEWAY_TIMEOUT_MS", 10_000)?;
        if gateway_timeout_ms == 0 {
            anyhow::bail!("GATEWAY_TIMEOUT_MS must be greater than zero");
        }

        let reconcile_interval_secs: u64 = parse_or(&lookup, "RECONCILE_INTERVAL_SECS", 60)?;
        if reconcile_interval_secs == 0 {
            anyhow::bail!("RECONCILE_INTERVAL_SECS must be greater than zero");
        }

        let gateway_timeout = Duration::from_millis(gateway_timeout_ms);
        let stale_pending_after =
            Duration::from_secs(parse_or(&lookup, "STALE_PENDING_AFTER_SECS", 300)?);
        if stale_pending_after <= gateway_timeout {
            anyhow::bail!(
                "STALE_PENDING_AFTER_SECS ({}s) must exceed the gateway timeout ({}ms)",
                stale_pending_after.as_secs(),
                gateway_timeout_ms
            );
        }

        Ok(Self {
            port: parse_or(&lookup, "PORT", 3000)?,
            database_url: required("DATABASE_URL")?,
            gateway_url: required("GATEWAY_URL")?,
            gateway_timeout,
            gateway_secret: optional("GATEWAY_SECRET"),
            gateway_connect_retries: parse_or(&lookup, "GATEWAY_CONNECT_RETRIES", 0)?,
            jwt_secret: required("JWT_SECRET")?,
            jwt_issuer: optional("JWT_ISSUER"),
            rate_limit_per_minute: parse_or(&lookup, "RATE_LIMIT_PER_MINUTE", 100)?,
            reconcile_interval: Duration::from_secs(reconcile_interval_secs),
            stale_pending_after,
            alert_webhook_url: optional("ALERT_WEBHOOK_URL"),
            alert_webhook_secret: optional("ALERT_WEBHOOK_SECRET"),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", key, e)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("DATABASE_URL", "sqlite::memory:"),
        ("GATEWAY_URL", "http://localhost:8001"),
        ("JWT_SECRET", "secret"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&REQUIRED).unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.gateway_timeout, Duration::from_secs(10));
        assert_eq!(config.gateway_connect_retries, 0);
        assert_eq!(config.rate_limit_per_minute, 100);
        assert_eq!(config.reconcile_interval, Duration::from_secs(60));
        assert_eq!(config.stale_pending_after, Duration::from_secs(300));
        assert!(config.gateway_secret.is_none());
        assert!(config.alert_webhook_url.is_none());
    }

    #[test]
    fn test_missing_required_variable() {
        let err = load(&REQUIRED[..2]).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("GATEWAY_TIMEOUT_MS", "0"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_stale_threshold_must_exceed_timeout() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("GATEWAY_TIMEOUT_MS", "30000"));
        vars.push(("STALE_PENDING_AFTER_SECS", "30"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_invalid_number() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("PORT", "http"));
        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
