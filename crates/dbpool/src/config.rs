//! Pool configuration.

use std::time::Duration;

use rand::Rng;

use crate::error::PoolError;

/// How the pool reacts when `init()` opens fewer than `min_connections`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitPolicy {
    /// Fail initialization and close whatever was opened.
    Strict,
    /// Log the shortfall and continue with the connections that were opened.
    #[default]
    Lenient,
}

/// When idle connections beyond `min_connections` are closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pruning {
    /// Never close idle connections.
    Disabled,
    /// Check for stale idle connections on every acquisition.
    OnAcquire,
    /// Check for stale idle connections from a background task at the given
    /// interval.
    Interval(Duration),
}

/// Growth of the delay between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// Delay grows by `base` with every retry.
    Linear,
    /// Delay is multiplied by the given factor with every retry.
    Exponential {
        /// Growth factor, at least 1.0.
        multiplier: f64,
    },
}

/// Delay policy between retry attempts of [`Pool::exec`](crate::Pool::exec).
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// How the delay grows.
    pub strategy: BackoffStrategy,
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
    /// Whether to randomize each delay between half and all of its value.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(100))
    }
}

impl From<Duration> for Backoff {
    fn from(delay: Duration) -> Self {
        Self::fixed(delay)
    }
}

impl Backoff {
    /// The same delay before every retry.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base: delay,
            max: delay,
            jitter: false,
        }
    }

    /// Delay growing linearly: `step`, `2 * step`, `3 * step`, ...
    #[must_use]
    pub fn linear(step: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Linear,
            base: step,
            max: Duration::from_secs(10),
            jitter: false,
        }
    }

    /// Delay doubling from `initial`: `initial`, `2 * initial`, ...
    #[must_use]
    pub fn exponential(initial: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential { multiplier: 2.0 },
            base: initial,
            max: Duration::from_secs(10),
            jitter: false,
        }
    }

    /// No delay between retries.
    #[must_use]
    pub fn none() -> Self {
        Self::fixed(Duration::ZERO)
    }

    /// Set the upper bound on a single delay.
    #[must_use]
    pub fn max_delay(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Set the growth factor. Only meaningful for exponential backoff.
    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        if let BackoffStrategy::Exponential { .. } = self.strategy {
            self.strategy = BackoffStrategy::Exponential { multiplier };
        }
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Calculate the delay before the given retry (1-based).
    ///
    /// Retry `0` is the initial attempt and never waits.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base = self.base.as_nanos() as f64;
        let raw = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base * f64::from(retry),
            BackoffStrategy::Exponential { multiplier } => {
                base * multiplier.powi(retry.saturating_sub(1).min(i32::MAX as u32) as i32)
            }
        };
        let capped = raw.min(self.max.as_nanos() as f64).max(0.0);

        let nanos = if self.jitter && capped > 0.0 {
            capped / 2.0 + rand::thread_rng().gen_range(0.0..=capped / 2.0)
        } else {
            capped
        };

        Duration::from_nanos(nanos.round() as u64)
    }
}

/// Configuration for the connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Number of connections opened by `init()` and kept open by pruning.
    pub min_connections: usize,

    /// Maximum number of connections allowed, including those being opened.
    pub max_connections: usize,

    /// Number of times `exec` retries after a transient failure.
    pub max_retries: u32,

    /// Time allowed for opening a single connection.
    pub connect_timeout: Duration,

    /// Idle time after which a connection is pinged before being leased.
    pub idle_timeout: Duration,

    /// Delay policy between `exec` retries.
    pub retry_backoff: Backoff,

    /// Time to wait for a free connection. `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,

    /// Maximum lifetime of a connection. `None` keeps connections forever.
    pub max_lifetime: Option<Duration>,

    /// Whether to ping connections idle longer than `idle_timeout` on
    /// checkout.
    pub test_on_checkout: bool,

    /// Behaviour when `init()` cannot reach `min_connections`.
    pub init_policy: InitPolicy,

    /// Extra attempts per connection during `init()` on transient errors.
    ///
    /// Useful when the application starts together with its database and
    /// the server needs some time before it accepts connections.
    pub connect_retries: u32,

    /// Delay between `init()` connection attempts.
    pub connect_retry_delay: Duration,

    /// When idle connections beyond `min_connections` are closed.
    pub pruning: Pruning,

    /// Idle time after which a connection beyond `min_connections` is closed.
    pub max_idle: Duration,

    /// Time `close()` waits for leased connections to come back.
    pub close_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 6,
            max_retries: 3,
            connect_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(30),
            retry_backoff: Backoff::default(),
            acquire_timeout: None,
            max_lifetime: None,
            test_on_checkout: true,
            init_policy: InitPolicy::Lenient,
            connect_retries: 20,
            connect_retry_delay: Duration::from_secs(2),
            pruning: Pruning::Interval(Duration::from_secs(5)),
            max_idle: Duration::from_secs(120),
            close_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: usize) -> Self {
        self.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: usize) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the number of retries after transient failures.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the connection establishment timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the idle time after which connections are validated on checkout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the retry backoff policy. A plain [`Duration`] means a fixed delay.
    #[must_use]
    pub fn retry_backoff(mut self, backoff: impl Into<Backoff>) -> Self {
        self.retry_backoff = backoff.into();
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Enable or disable ping validation on checkout.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Set the initialization policy.
    #[must_use]
    pub fn init_policy(mut self, policy: InitPolicy) -> Self {
        self.init_policy = policy;
        self
    }

    /// Set the number of extra connection attempts during `init()`.
    #[must_use]
    pub fn connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }

    /// Set the delay between `init()` connection attempts.
    #[must_use]
    pub fn connect_retry_delay(mut self, delay: Duration) -> Self {
        self.connect_retry_delay = delay;
        self
    }

    /// Set the idle pruning policy.
    #[must_use]
    pub fn pruning(mut self, pruning: Pruning) -> Self {
        self.pruning = pruning;
        self
    }

    /// Set the idle time after which surplus connections are closed.
    #[must_use]
    pub fn max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Set how long `close()` waits for leased connections.
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Configuration(
                "min_connections cannot be greater than max_connections".into(),
            ));
        }
        if let BackoffStrategy::Exponential { multiplier } = self.retry_backoff.strategy {
            if !(multiplier >= 1.0 && multiplier.is_finite()) {
                return Err(PoolError::Configuration(
                    "backoff multiplier must be a finite value of at least 1.0".into(),
                ));
            }
        }
        if self.pruning == Pruning::Interval(Duration::ZERO) {
            return Err(PoolError::Configuration(
                "pruning interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 6);
        assert_eq!(config.max_retries, 3);
        assert!(config.test_on_checkout);
        assert_eq!(config.init_policy, InitPolicy::Lenient);
        assert_eq!(config.acquire_timeout, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder_methods() {
        let config = PoolConfig::new()
            .min_connections(5)
            .max_connections(50)
            .max_retries(7)
            .connect_timeout(Duration::from_secs(60))
            .idle_timeout(Duration::from_secs(120))
            .retry_backoff(Duration::from_millis(250))
            .acquire_timeout(Some(Duration::from_secs(3)))
            .max_lifetime(Some(Duration::from_secs(3600)))
            .test_on_checkout(false)
            .init_policy(InitPolicy::Strict)
            .pruning(Pruning::OnAcquire)
            .close_timeout(Duration::from_secs(1));

        assert_eq!(config.min_connections, 5);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.connect_timeout, Duration::from_secs(60));
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.retry_backoff, Backoff::fixed(Duration::from_millis(250)));
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.max_lifetime, Some(Duration::from_secs(3600)));
        assert!(!config.test_on_checkout);
        assert_eq!(config.init_policy, InitPolicy::Strict);
        assert_eq!(config.pruning, Pruning::OnAcquire);
        assert_eq!(config.close_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_config_validation_min_greater_than_max() {
        let config = PoolConfig::new().min_connections(20).max_connections(10);

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("min_connections cannot be greater than max_connections")
        );
    }

    #[test]
    fn test_config_validation_zero_max() {
        let config = PoolConfig::new().min_connections(0).max_connections(0);

        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("max_connections must be greater than 0")
        );
    }

    #[test]
    fn test_config_validation_bad_multiplier() {
        let config = PoolConfig::new()
            .retry_backoff(Backoff::exponential(Duration::from_millis(10)).multiplier(0.5));

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_equal_min_max() {
        let config = PoolConfig::new().min_connections(5).max_connections(5);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::fixed(Duration::from_millis(50));
        assert_eq!(backoff.delay_for(0), Duration::ZERO);
        assert_eq!(backoff.delay_for(1), Duration::from_millis(50));
        assert_eq!(backoff.delay_for(9), Duration::from_millis(50));
    }

    #[test]
    fn test_linear_backoff() {
        let backoff = Backoff::linear(Duration::from_millis(100)).max_delay(Duration::from_millis(250));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(250));
    }

    #[test]
    fn test_exponential_backoff() {
        let backoff = Backoff::exponential(Duration::from_millis(100))
            .max_delay(Duration::from_secs(10));

        assert_eq!(backoff.delay_for(0), Duration::ZERO);
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let backoff = Backoff::exponential(Duration::from_secs(1))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(5));

        assert_eq!(backoff.delay_for(3), Duration::from_secs(5));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = Backoff::fixed(Duration::from_millis(100)).jitter(true);
        for _ in 0..100 {
            let delay = backoff.delay_for(1);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(100));
        }
    }
}
