//! Declarative client configuration, loadable from TOML.
//!
//! ```toml
//! secure = true
//! pool_size = 8
//! user_agent = "pricing-feed/2.1"
//!
//! [timeouts]
//! connect_ms = 2000
//! read_ms = 5000
//!
//! [retry]
//! base_delay_ms = 50
//! max_attempts = 4
//! retry_on = [429, 503]
//!
//! [redirects]
//! max_hops = 2
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::netcap::Timeouts;
use crate::retries::{
    BackoffStrategy, RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_DELAY_CEILING, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_RETRY_STATUSES,
};
use crate::wire::simple_http::client::{
    HttpClientError, HttpClientResult, RedirectPolicy, DEFAULT_POOL_SIZE,
};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_ms: u64,
    pub read_ms: u64,
    pub write_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let defaults = Timeouts::default();
        let millis = |value: Option<Duration>| {
            value.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        };
        Self {
            connect_ms: millis(defaults.connect),
            read_ms: millis(defaults.read),
            write_ms: millis(defaults.write),
        }
    }
}

impl TimeoutConfig {
    /// Zero means no timeout.
    #[must_use]
    pub fn to_timeouts(&self) -> Timeouts {
        let duration = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        Timeouts {
            connect: duration(self.connect_ms),
            read: duration(self.read_ms),
            write: duration(self.write_ms),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub delay_ceiling_ms: u64,
    pub strategy: BackoffStrategy,
    pub max_attempts: u32,
    pub retry_on: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: u64::try_from(DEFAULT_BASE_DELAY.as_millis()).unwrap_or(100),
            delay_ceiling_ms: u64::try_from(DEFAULT_DELAY_CEILING.as_millis()).unwrap_or(1000),
            strategy: BackoffStrategy::Exponential,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_on: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.delay_ceiling_ms),
            self.strategy,
            self.max_attempts,
            self.retry_on.iter().copied(),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Forces TLS on or off. When absent, TLS is used for port 443.
    pub secure: Option<bool>,
    pub pool_size: usize,
    pub user_agent: Option<String>,
    pub timeouts: TimeoutConfig,
    pub retry: RetryConfig,
    pub redirects: RedirectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            secure: None,
            pool_size: DEFAULT_POOL_SIZE,
            user_agent: None,
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            redirects: RedirectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Parses and validates a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// [`HttpClientError::Config`] for invalid TOML or types, and
    /// [`HttpClientError::InvalidConfig`] for inconsistent values.
    pub fn from_toml_str(text: &str) -> HttpClientResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// [`HttpClientError::InvalidConfig`] describing the first bad value.
    pub fn validate(&self) -> HttpClientResult<()> {
        if self.pool_size == 0 {
            return Err(HttpClientError::InvalidConfig(
                "pool_size must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(HttpClientError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.delay_ceiling_ms < self.retry.base_delay_ms {
            return Err(HttpClientError::InvalidConfig(
                "retry.delay_ceiling_ms must not be below retry.base_delay_ms".to_string(),
            ));
        }
        if let Some(code) = self.retry.retry_on.iter().find(|code| !(100..=599).contains(*code)) {
            return Err(HttpClientError::InvalidConfig(format!(
                "retry.retry_on holds {code}, which is not an HTTP status"
            )));
        }
        Ok(())
    }

    /// Whether a target on `port` uses TLS under this configuration.
    #[must_use]
    pub fn is_secure_for(&self, port: u16) -> bool {
        self.secure.unwrap_or(port == 443)
    }
}
