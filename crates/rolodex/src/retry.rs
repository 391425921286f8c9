//! Backoff policies for outbound CRM calls.
//!
//! The policy only computes delays; the call loop in [`crate::client`] owns
//! the attempts. Two independent budgets exist because a CRM that is
//! throttling us and a CRM we cannot reach deserve different patience.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

/// Initial delay after a rate-limit response.
pub const RATE_LIMIT_INITIAL_BACKOFF_MS: u64 = 1_000;

/// Maximum delay after a rate-limit response.
pub const RATE_LIMIT_MAX_BACKOFF_MS: u64 = 30_000;

/// Retries after a rate-limit response before giving up.
pub const RATE_LIMIT_MAX_RETRIES: usize = 5;

/// Initial delay after a network failure.
pub const NETWORK_INITIAL_BACKOFF_MS: u64 = 500;

/// Maximum delay after a network failure.
pub const NETWORK_MAX_BACKOFF_MS: u64 = 5_000;

/// Retries after a network failure before giving up.
pub const NETWORK_MAX_RETRIES: usize = 2;

/// Configuration for one retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Minimum delay between retries.
    pub min_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Maximum number of retry attempts.
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::rate_limit()
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            with_jitter: true,
        }
    }

    /// Budget applied to HTTP 429 responses.
    #[must_use]
    pub fn rate_limit() -> Self {
        Self::new(
            Duration::from_millis(RATE_LIMIT_INITIAL_BACKOFF_MS),
            Duration::from_millis(RATE_LIMIT_MAX_BACKOFF_MS),
            RATE_LIMIT_MAX_RETRIES,
        )
    }

    /// Budget applied to transport failures and timeouts.
    #[must_use]
    pub fn network() -> Self {
        Self::new(
            Duration::from_millis(NETWORK_INITIAL_BACKOFF_MS),
            Duration::from_millis(NETWORK_MAX_BACKOFF_MS),
            NETWORK_MAX_RETRIES,
        )
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Build an exponential backoff strategy from this configuration.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }

    /// Start a fresh sequence of delays for one logical request.
    #[must_use]
    pub fn delays(&self) -> Delays {
        Delays {
            inner: Box::new(self.clone().into_backoff().build()),
            max_delay: self.max_delay,
        }
    }
}

/// The delay sequence of one retry budget.
///
/// Yields `None` once the budget is spent.
pub struct Delays {
    inner: Box<dyn Iterator<Item = Duration> + Send>,
    max_delay: Duration,
}

impl Delays {
    /// Next delay, stretched to honour a server-provided `Retry-After`.
    ///
    /// The hint can lengthen the delay but never beyond the configured maximum.
    pub fn next_delay(&mut self, retry_after: Option<Duration>) -> Option<Duration> {
        let delay = self.inner.next()?;
        Some(match retry_after {
            Some(hint) => delay.max(hint.min(self.max_delay)),
            None => delay,
        })
    }
}

/// Both retry budgets used by the CRM client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Applied to HTTP 429.
    pub rate_limit: RetryConfig,
    /// Applied to transport errors and per-request timeouts.
    pub network: RetryConfig,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(rate_limit: RetryConfig, network: RetryConfig) -> Self {
        Self {
            rate_limit,
            network,
        }
    }

    /// Standard budgets (see the module constants).
    #[must_use]
    pub fn standard() -> Self {
        Self::new(RetryConfig::rate_limit(), RetryConfig::network())
    }
}

/// Parse a `Retry-After` header given in seconds.
///
/// HTTP-date values are ignored; the exponential delay applies instead.
#[must_use]
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value?.trim().parse::<u64>().ok().map(Duration::from_secs)
}
