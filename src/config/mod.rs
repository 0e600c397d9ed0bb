//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on values that do not parse.
//! Everything has a default; nothing is required.

use crate::error::{Error, Result};
use crate::queue::{DEFAULT_LEASE, lease_from_secs};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Lease for claims that do not ask for one (`WORKQ_LEASE_SECS`).
    pub lease: Duration,
    /// Sleep between empty polls (`WORKQ_POLL_INTERVAL_MS`).
    pub poll_interval: Duration,
    /// Claims before a failing item is dropped (`WORKQ_MAX_ATTEMPTS`).
    pub max_attempts: u32,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lease: DEFAULT_LEASE,
            poll_interval: Duration::from_millis(5000),
            max_attempts: 5,
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let lease = match optional_var::<i64>("WORKQ_LEASE_SECS")? {
            Some(secs) => lease_from_secs(secs)
                .map_err(|e| Error::Config(format!("WORKQ_LEASE_SECS: {e}")))?,
            None => defaults.lease,
        };
        let poll_interval = optional_var::<u64>("WORKQ_POLL_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        let max_attempts = match optional_var::<u32>("WORKQ_MAX_ATTEMPTS")? {
            Some(0) => {
                return Err(Error::Config(
                    "WORKQ_MAX_ATTEMPTS must be at least 1".to_string(),
                ));
            }
            Some(n) => n,
            None => defaults.max_attempts,
        };

        Ok(Self {
            lease,
            poll_interval,
            max_attempts,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }
}

fn optional_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw:?} is not valid: {e}"))),
        Err(_) => Ok(None),
    }
}
