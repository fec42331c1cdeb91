//! Connection and pool lifecycle state.
//!
//! This module defines the states a pooled connection moves through, the
//! bookkeeping the pool keeps for each connection, and the lifecycle of the
//! pool itself. Timestamps use the tokio clock so that paused-time tests
//! observe idle and lifetime limits.

use std::time::Duration;

use tokio::time::Instant;

/// Lifecycle of the pool as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created but not yet initialized.
    Uninitialized,
    /// Serving acquisitions.
    Running,
    /// Rejecting new acquisitions while leased connections are returned.
    Draining,
    /// All connections closed.
    Closed,
}

impl Lifecycle {
    /// Check if the pool accepts acquisitions.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if the pool is shutting down or shut down.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Draining | Self::Closed)
    }
}

/// Connection state tracked by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Connection is idle and available for use.
    Idle,
    /// Connection is leased to exactly one caller.
    Leased,
    /// Connection failed and is being replaced.
    Broken,
    /// Connection is being closed.
    Closing,
}

impl SlotState {
    /// Check if the connection is available for checkout.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Check if the connection is held outside the idle set.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Leased | Self::Broken)
    }
}

/// Metadata about a pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Unique identifier for this connection slot.
    pub id: u64,
    /// When the current connection was opened.
    pub created_at: Instant,
    /// When the connection was last checked out or returned.
    pub last_used_at: Instant,
    /// Number of times the connection has been checked out.
    pub checkout_count: u64,
    /// Current state of the connection.
    pub state: SlotState,
}

impl ConnectionMetadata {
    /// Create metadata for a freshly opened connection.
    pub fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
            state: SlotState::Idle,
        }
    }

    /// Check if the connection has exceeded its maximum lifetime.
    #[must_use]
    pub fn is_expired(&self, max_lifetime: Duration) -> bool {
        self.created_at.elapsed() > max_lifetime
    }

    /// Check if the connection has been idle longer than `limit`.
    #[must_use]
    pub fn is_idle_longer_than(&self, limit: Duration) -> bool {
        self.last_used_at.elapsed() > limit
    }

    /// Mark the connection as checked out.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
        self.state = SlotState::Leased;
    }

    /// Mark the connection as returned to idle.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
        self.state = SlotState::Idle;
    }

    /// Mark the connection as broken.
    pub fn mark_broken(&mut self) {
        self.state = SlotState::Broken;
    }

    /// Record that the slot now holds a newly opened connection.
    pub fn mark_reconnected(&mut self) {
        let now = Instant::now();
        self.created_at = now;
        self.last_used_at = now;
    }
}
