//! Test fixture utilities.

use std::time::Duration;

use dbpool::{Backoff, Pool, PoolConfig, Pruning};

use crate::mock::MockConnector;

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A pool configuration suited to tests.
///
/// Retries and backoff are short, pruning is off and validation only pings
/// connections that sat idle for a minute, so tests control every background
/// event explicitly.
#[must_use]
pub fn test_config() -> PoolConfig {
    PoolConfig::new()
        .min_connections(2)
        .max_connections(4)
        .max_retries(3)
        .connect_timeout(Duration::from_secs(1))
        .idle_timeout(Duration::from_secs(60))
        .retry_backoff(Backoff::fixed(Duration::from_millis(10)))
        .connect_retries(0)
        .connect_retry_delay(Duration::from_millis(10))
        .pruning(Pruning::Disabled)
        .close_timeout(Duration::from_secs(1))
}

/// Create and initialize a pool over `connector`.
///
/// # Panics
///
/// Panics if the configuration is invalid or initialization fails.
#[allow(clippy::expect_used)]
pub async fn init_pool(connector: &MockConnector, config: PoolConfig) -> Pool<MockConnector> {
    init_tracing();
    let pool = Pool::new(connector.clone(), config).expect("valid pool config");
    pool.init().await.expect("pool initialization");
    pool
}
