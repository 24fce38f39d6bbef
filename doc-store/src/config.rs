//! Store configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;
use crate::retry::{DEFAULT_ATTEMPTS, DEFAULT_DELAYS, RetryPolicy};

/// Environment variable holding the connection string.
pub const CONNECTION_STRING_VAR: &str = "connection_string";

const DEFAULT_SCAN_COUNT: usize = 100;

/// Connection and retry settings shared by every persistence layer.
///
/// `connection_string` is either a `redis://` / `rediss://` URL or the
/// `host:port[,option=value...]` form, whose options are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub connection_string: String,
    pub retry_attempts: u32,
    pub retry_delays_ms: Vec<u64>,
    /// `COUNT` hint passed to each `SCAN` call.
    pub scan_count: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connection_string: "localhost:6379".to_string(),
            retry_attempts: DEFAULT_ATTEMPTS,
            retry_delays_ms: DEFAULT_DELAYS
                .iter()
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .collect(),
            scan_count: DEFAULT_SCAN_COUNT,
        }
    }
}

impl StoreConfig {
    /// Reads the connection string from the `connection_string` variable.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let connection_string = lookup(CONNECTION_STRING_VAR)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::invalid(format!("{CONNECTION_STRING_VAR} is not set")))?;
        Ok(Self {
            connection_string,
            ..Self::default()
        })
    }

    /// The connection string as a URL the Redis client accepts.
    pub fn redis_url(&self) -> Result<String, Error> {
        let raw = self.connection_string.trim();
        if raw.starts_with("redis://")
            || raw.starts_with("rediss://")
            || raw.starts_with("redis+unix://")
        {
            return Ok(raw.to_string());
        }

        let endpoint = raw.split(',').next().unwrap_or_default().trim();
        if endpoint.is_empty() || endpoint.contains('=') {
            return Err(Error::invalid(format!(
                "connection string {raw:?} has no endpoint"
            )));
        }
        Ok(format!("redis://{endpoint}"))
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, Error> {
        RetryPolicy::new(
            self.retry_attempts,
            self.retry_delays_ms
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        )
    }
}
