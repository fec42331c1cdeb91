//! Leased connections.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::connection::{Connection, Connector};
use crate::error::DriverError;
use crate::inner::{Conn, Lease, PoolInner};
use crate::lifecycle::ConnectionMetadata;
use crate::value::{Rows, Value};

const LEASE_MSG: &str = "PooledConnection used after release";

/// A connection retrieved from the pool.
///
/// The connection is leased to exactly one holder. When the holder drops it,
/// through normal scope exit, an early return, a panic, or cancellation of
/// the enclosing future, it is returned to the pool exactly once.
///
/// Call [`mark_broken`](Self::mark_broken) after a connection-level failure
/// so the pool closes the session and opens a replacement instead of handing
/// it to the next caller.
pub struct PooledConnection<C: Connector> {
    pool: Weak<PoolInner<C>>,
    lease: Option<Lease<Conn<C>>>,
    broken: bool,
}

impl<C: Connector> PooledConnection<C> {
    pub(crate) fn new(pool: &Arc<PoolInner<C>>, lease: Lease<Conn<C>>) -> Self {
        Self {
            pool: Arc::downgrade(pool),
            lease: Some(lease),
            broken: false,
        }
    }

    /// Identifier of the pool slot this connection occupies.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.lease.as_ref().map_or(0, |l| l.meta.id)
    }

    /// Bookkeeping for this connection at the time it was checked out.
    ///
    /// This is a snapshot taken at checkout and is not updated while the
    /// lease is held: `state` always reads [`SlotState::Leased`] and
    /// `last_used_at` is the checkout instant. Returns `None` only after the
    /// connection has been released or detached.
    ///
    /// [`SlotState::Leased`]: crate::SlotState::Leased
    #[must_use]
    pub fn metadata(&self) -> Option<&ConnectionMetadata> {
        self.lease.as_ref().map(|l| &l.meta)
    }

    /// How long the connection sat idle before this checkout.
    ///
    /// `None` for a connection opened for this lease.
    pub(crate) fn idle_for(&self) -> Option<Duration> {
        self.lease.as_ref().and_then(|l| l.idle_for)
    }

    /// Mark the connection as broken.
    ///
    /// It will be closed and replaced when it is returned to the pool.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Check if the connection has been marked broken.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Execute a statement on this connection.
    ///
    /// A transient driver error marks the connection broken. So does
    /// cancelling the call before it completes, since the session may be
    /// left mid-exchange.
    pub async fn execute(&mut self, query: &str, params: &[Value]) -> Result<Rows, DriverError> {
        let was_broken = std::mem::replace(&mut self.broken, true);
        let result = self.deref_mut().execute(query, params).await;
        match &result {
            Err(e) if e.is_transient() => {}
            _ => self.broken = was_broken,
        }
        result
    }

    /// Check that the connection is alive.
    ///
    /// A failed or cancelled ping marks the connection broken.
    pub async fn ping(&mut self) -> Result<(), DriverError> {
        let was_broken = std::mem::replace(&mut self.broken, true);
        let result = self.deref_mut().ping().await;
        if result.is_ok() {
            self.broken = was_broken;
        }
        result
    }

    /// Return the connection to the pool now.
    ///
    /// Equivalent to dropping the handle.
    pub fn release(self) {
        drop(self);
    }

    /// Take the connection out of the pool.
    ///
    /// The pool forgets the connection and frees its slot. The caller owns
    /// the session and is responsible for closing it.
    #[must_use]
    pub fn detach(mut self) -> C::Connection {
        #[allow(clippy::expect_used)]
        let lease = self.lease.take().expect(LEASE_MSG);
        if let Some(pool) = self.pool.upgrade() {
            pool.detach(lease.meta.id);
        }
        lease.conn
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Self::Target {
        &self.lease.as_ref().expect(LEASE_MSG).conn
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.lease.as_mut().expect(LEASE_MSG).conn
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) => pool.release(lease, !self.broken),
            None => tracing::trace!(slot = lease.meta.id, "pool dropped, discarding connection"),
        }
    }
}

impl<C: Connector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id())
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}
