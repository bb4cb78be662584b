//! Dispatcher configuration
//!
//! Built in code with the `with_*` builders, or loaded from environment
//! variables with [`DispatcherConfig::from_env`].

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::rate_limit::{PausePolicy, RateLimit};

/// Configuration for a [`Dispatcher`](crate::Dispatcher)
///
/// # Example
///
/// ```
/// use fanout_dispatch::{DispatcherConfig, RateLimit};
/// use std::time::Duration;
///
/// let config = DispatcherConfig::default()
///     .with_max_concurrency(3)
///     .with_unit_timeout(Duration::from_secs(30))
///     .with_rate_limit(RateLimit::new(Duration::from_millis(500)));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum number of units executing at once
    pub max_concurrency: usize,

    /// Per-unit time limit (None = unbounded)
    #[serde(default, with = "option_duration_millis")]
    pub unit_timeout: Option<Duration>,

    /// Chunked execution with a pause between chunks (None = one pass)
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,

    /// On cancellation, drop in-flight units instead of letting them finish
    #[serde(default)]
    pub abort_in_flight_on_cancel: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            unit_timeout: None,
            rate_limit: None,
            abort_in_flight_on_cancel: false,
        }
    }
}

impl DispatcherConfig {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `FANOUT_MAX_CONCURRENCY`: maximum in-flight units (default: 4)
    /// - `FANOUT_UNIT_TIMEOUT_MS`: per-unit timeout in milliseconds
    /// - `FANOUT_BATCH_DELAY_MS`: pause between chunks in milliseconds
    /// - `FANOUT_PAUSE_POLICY`: `always` (default) or `skip_after_failure`
    /// - `FANOUT_ABORT_IN_FLIGHT`: `true` to drop in-flight units on cancel
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidEnv`] for values that do not parse,
    /// and any error from [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let max_concurrency =
            parse_var("FANOUT_MAX_CONCURRENCY")?.unwrap_or(defaults.max_concurrency);
        let unit_timeout =
            parse_var::<u64>("FANOUT_UNIT_TIMEOUT_MS")?.map(Duration::from_millis);

        let pause = match env::var("FANOUT_PAUSE_POLICY") {
            Ok(value) => value.parse::<PausePolicy>()?,
            Err(_) => PausePolicy::default(),
        };
        let rate_limit = parse_var::<u64>("FANOUT_BATCH_DELAY_MS")?
            .map(|ms| RateLimit::new(Duration::from_millis(ms)).with_pause_policy(pause));

        let abort_in_flight_on_cancel = env::var("FANOUT_ABORT_IN_FLIGHT")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        let config = Self {
            max_concurrency,
            unit_timeout,
            rate_limit,
            abort_in_flight_on_cancel,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout = Some(timeout);
        self
    }

    pub fn without_unit_timeout(mut self) -> Self {
        self.unit_timeout = None;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_abort_in_flight_on_cancel(mut self, abort: bool) -> Self {
        self.abort_in_flight_on_cancel = abort;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(DispatchError::InvalidCapacity(self.max_concurrency));
        }
        if self.unit_timeout.is_some_and(|t| t.is_zero()) {
            return Err(DispatchError::InvalidTimeout);
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    let Ok(value) = env::var(name) else {
        return Ok(None);
    };
    let parsed = value.trim().parse::<T>();
    match parsed {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err(DispatchError::InvalidEnv {
            name: name.to_string(),
            value,
        }),
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde support for Option<Duration> as milliseconds
mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
