//! Connection pool implementation.

use std::fmt;
use std::sync::Arc;

use crate::config::{PoolConfig, Pruning};
use crate::connection::Connector;
use crate::error::{InitError, PoolError};
use crate::inner::{Checkout, Grant, PoolInner, Reservation};
use crate::lifecycle::Lifecycle;
use crate::pooled::PooledConnection;

/// A database connection pool.
///
/// The pool keeps between `min_connections` and `max_connections` sessions
/// open, leases them to callers one at a time, queues callers FIFO when every
/// connection is busy, and replaces connections that break.
///
/// `Pool` is cheap to clone; clones share the same connections.
pub struct Pool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> Pool<C> {
    /// Create an uninitialized pool.
    ///
    /// No connections are opened until [`init`](Self::init) is called.
    pub fn new(connector: C, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            inner: PoolInner::new(connector, config),
        })
    }

    /// Create a new pool builder.
    #[must_use]
    pub fn builder() -> PoolBuilder<C> {
        PoolBuilder::new()
    }

    /// Open `min_connections` connections and start serving acquisitions.
    ///
    /// Transient connect failures are retried `connect_retries` times,
    /// `connect_retry_delay` apart. If not a single connection can be opened
    /// this fails with [`InitError::NoConnections`]. If only some can, the
    /// result depends on [`InitPolicy`](crate::InitPolicy).
    pub async fn init(&self) -> Result<(), InitError> {
        self.inner.init().await
    }

    /// Get a connection from the pool.
    ///
    /// Returns the most recently used idle connection, or opens a new one if
    /// the pool is below `max_connections`. Otherwise waits, in FIFO order
    /// with other callers, until a connection is returned. The wait is bounded
    /// by `acquire_timeout` when one is configured.
    ///
    /// Dropping the returned future removes the caller from the queue.
    pub async fn acquire(&self) -> Result<PooledConnection<C>, PoolError> {
        tracing::trace!("acquiring connection from pool");

        match self.inner.config.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.acquire_inner())
                .await
                .map_err(|_| {
                    tracing::debug!(?timeout, "timed out acquiring connection");
                    PoolError::AcquisitionTimeout(timeout)
                })?,
            None => self.acquire_inner().await,
        }
    }

    async fn acquire_inner(&self) -> Result<PooledConnection<C>, PoolError> {
        if self.inner.config.pruning == Pruning::OnAcquire {
            self.inner.prune_in_background();
        }

        let mut resume = false;
        loop {
            let lease = match self.inner.checkout(resume)? {
                Checkout::Lease(lease) => lease,
                Checkout::Connect(reservation) => reservation.open().await?,
                Checkout::Wait(waiter) => match waiter.wait().await? {
                    Grant::Lease(lease) => lease,
                    Grant::Capacity => Reservation::adopt(Arc::clone(&self.inner)).open().await?,
                },
            };

            let conn = PooledConnection::new(&self.inner, lease);
            if let Some(conn) = self.validate(conn).await {
                tracing::trace!(slot = conn.id(), "acquired connection");
                return Ok(conn);
            }
            resume = true;
        }
    }

    /// Lease an idle connection without waiting.
    ///
    /// Returns `Ok(None)` when no connection is idle or other callers are
    /// already queued. Never opens a connection and never pings: idle
    /// connections past `max_lifetime` are retired, and with
    /// `test_on_checkout` set, connections idle longer than `idle_timeout`
    /// are skipped and left for [`acquire`](Self::acquire) to validate.
    pub fn try_acquire(&self) -> Result<Option<PooledConnection<C>>, PoolError> {
        let lease = self.inner.try_checkout()?;
        Ok(lease.map(|lease| PooledConnection::new(&self.inner, lease)))
    }

    /// Check a reused connection before handing it out.
    ///
    /// Connections past `max_lifetime` are retired. Connections idle longer
    /// than `idle_timeout` are pinged when `test_on_checkout` is set. Both
    /// cases send the connection back as broken so it gets replaced.
    async fn validate(&self, mut conn: PooledConnection<C>) -> Option<PooledConnection<C>> {
        let config = &self.inner.config;
        let Some(idle_for) = conn.idle_for() else {
            return Some(conn);
        };

        if let Some(max_lifetime) = config.max_lifetime {
            if conn.metadata().is_some_and(|m| m.is_expired(max_lifetime)) {
                tracing::debug!(slot = conn.id(), "connection exceeded max lifetime");
                conn.mark_broken();
                return None;
            }
        }

        if config.test_on_checkout && idle_for > config.idle_timeout {
            if let Err(e) = conn.ping().await {
                tracing::warn!(slot = conn.id(), error = %e, "connection failed health check");
                return None;
            }
        }

        Some(conn)
    }

    /// Shut the pool down.
    ///
    /// New acquisitions fail with [`PoolError::PoolClosed`] and queued callers
    /// are woken with the same error. Leased connections are waited for up to
    /// `close_timeout`, then every idle connection is closed. Calling `close`
    /// again, or on a pool that was never initialized, returns `Ok(())`.
    pub async fn close(&self) -> Result<(), PoolError> {
        self.inner.close().await
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.inner.status()
    }

    /// Get the pool lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle()
    }

    /// Check if the pool is closed or closing.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lifecycle().is_closing()
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl<C: Connector> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("lifecycle", &self.lifecycle())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: usize,
    /// Number of connections currently leased.
    pub in_use: usize,
    /// Number of broken connections awaiting replacement.
    pub broken: usize,
    /// Number of connections being closed.
    pub closing: usize,
    /// Number of connections being opened.
    pub connecting: usize,
    /// Number of callers waiting for a connection.
    pub waiting: usize,
    /// Total number of connections, including those being opened.
    pub total: usize,
    /// Maximum allowed connections.
    pub max: usize,
}

impl PoolStatus {
    /// Get the pool utilization as a percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if every connection the pool may hold is leased.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.in_use >= self.max
    }
}

/// Builder for creating a connection pool.
pub struct PoolBuilder<C: Connector> {
    connector: Option<C>,
    config: PoolConfig,
}

impl<C: Connector> PoolBuilder<C> {
    /// Create a new pool builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connector: None,
            config: PoolConfig::default(),
        }
    }

    /// Set the connector used to open connections.
    #[must_use]
    pub fn connector(mut self, connector: C) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the whole pool configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: usize) -> Self {
        self.config = self.config.min_connections(count);
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config = self.config.max_connections(count);
        self
    }

    /// Set the number of retries for transient query failures.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config = self.config.max_retries(retries);
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config = self.config.connect_timeout(timeout);
        self
    }

    /// Set the idle timeout after which reused connections are pinged.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config = self.config.idle_timeout(timeout);
        self
    }

    /// Set the retry backoff policy.
    #[must_use]
    pub fn retry_backoff(mut self, backoff: impl Into<crate::Backoff>) -> Self {
        self.config = self.config.retry_backoff(backoff);
        self
    }

    /// Set the acquire timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config = self.config.acquire_timeout(Some(timeout));
        self
    }

    /// Build and initialize the pool.
    pub async fn build(self) -> Result<Pool<C>, InitError> {
        let connector = self
            .connector
            .ok_or_else(|| InitError::Configuration("no connector configured".into()))?;
        let pool = Pool::new(connector, self.config).map_err(|e| match e {
            PoolError::Configuration(msg) => InitError::Configuration(msg),
            other => InitError::Configuration(other.to_string()),
        })?;
        pool.init().await?;
        Ok(pool)
    }
}

impl<C: Connector> Default for PoolBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            available: 5,
            in_use: 5,
            broken: 0,
            closing: 0,
            connecting: 0,
            waiting: 0,
            total: 10,
            max: 20,
        };
        assert!((status.utilization() - 25.0).abs() < 0.01);
        assert!(!status.is_exhausted());
    }

    #[test]
    fn test_pool_status_exhausted() {
        let status = PoolStatus {
            available: 0,
            in_use: 4,
            broken: 0,
            closing: 0,
            connecting: 0,
            waiting: 3,
            total: 4,
            max: 4,
        };
        assert!(status.is_exhausted());
        assert!((status.utilization() - 100.0).abs() < 0.01);
    }
}
