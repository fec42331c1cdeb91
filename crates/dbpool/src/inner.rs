//! Shared pool state and the slot state machine.
//!
//! All slot and waiter bookkeeping happens under one `parking_lot` mutex that
//! is never held across an `.await`. Connections leave the mutex while they
//! are leased and travel inside the lease; the slot stays registered as
//! `Leased` until the lease comes back.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{InitPolicy, PoolConfig, Pruning};
use crate::connection::{Connection, Connector};
use crate::error::{DriverError, InitError, PoolError};
use crate::lifecycle::{ConnectionMetadata, Lifecycle, SlotState};
use crate::pool::PoolStatus;

/// Upper bound on a single graceful `Connection::close()`.
const GRACEFUL_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) type Conn<C> = <C as Connector>::Connection;

/// A connection checked out of its slot.
pub(crate) struct Lease<T> {
    pub(crate) meta: ConnectionMetadata,
    pub(crate) conn: T,
    /// How long the connection sat idle before checkout; `None` if it was
    /// opened for this lease.
    pub(crate) idle_for: Option<Duration>,
}

/// What a queued acquirer is handed.
pub(crate) enum Grant<T> {
    /// A connection, already marked leased.
    Lease(Lease<T>),
    /// Permission to open a new connection; the capacity is reserved.
    Capacity,
}

/// Result of a checkout attempt that did not fail outright.
pub(crate) enum Checkout<C: Connector> {
    Lease(Lease<Conn<C>>),
    Connect(Reservation<C>),
    Wait(WaitGuard<C>),
}

struct Slot<T> {
    meta: ConnectionMetadata,
    conn: Option<T>,
}

struct WaitEntry<T> {
    id: u64,
    tx: oneshot::Sender<Grant<T>>,
}

struct PoolState<T> {
    lifecycle: Lifecycle,
    initializing: bool,
    slots: Vec<Slot<T>>,
    waiters: VecDeque<WaitEntry<T>>,
    /// Connections being opened; they count against `max_connections`.
    connecting: usize,
    reaper: Option<JoinHandle<()>>,
}

impl<T> PoolState<T> {
    fn count(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|s| s.meta.state == state).count()
    }

    fn total(&self) -> usize {
        self.slots.len() + self.connecting
    }

    fn outstanding(&self) -> usize {
        self.slots.iter().filter(|s| s.meta.state.is_busy()).count() + self.connecting
    }

    fn position(&self, id: u64) -> Option<usize> {
        self.slots.iter().position(|s| s.meta.id == id)
    }

    /// The most recently used idle slot.
    fn best_idle(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.meta.state == SlotState::Idle && s.conn.is_some())
            .max_by_key(|(_, s)| s.meta.last_used_at)
            .map(|(idx, _)| idx)
    }

    /// The most recently used idle slot that has been idle for at most
    /// `limit`.
    fn best_idle_within(&self, limit: Duration) -> Option<usize> {
        self.best_idle().filter(|&idx| {
            self.slots
                .get(idx)
                .is_some_and(|s| !s.meta.is_idle_longer_than(limit))
        })
    }

    /// Mark idle slots older than `max_lifetime` as broken and take their
    /// connections.
    fn take_expired(&mut self, max_lifetime: Duration) -> Vec<(u64, T)> {
        self.slots
            .iter_mut()
            .filter(|s| s.meta.state == SlotState::Idle && s.meta.is_expired(max_lifetime))
            .filter_map(|s| {
                s.meta.mark_broken();
                s.conn.take().map(|conn| (s.meta.id, conn))
            })
            .collect()
    }

    fn take_lease(&mut self, idx: usize) -> Option<Lease<T>> {
        let slot = self.slots.get_mut(idx)?;
        let conn = slot.conn.take()?;
        let idle_for = slot.meta.last_used_at.elapsed();
        slot.meta.mark_checkout();
        Some(Lease {
            meta: slot.meta.clone(),
            conn,
            idle_for: Some(idle_for),
        })
    }

    /// Put a lease back into its slot as idle.
    fn restore(&mut self, lease: Lease<T>) -> Result<(), T> {
        match self.position(lease.meta.id).and_then(|idx| self.slots.get_mut(idx)) {
            Some(slot) => {
                slot.conn = Some(lease.conn);
                slot.meta.mark_checkin();
                Ok(())
            }
            None => Err(lease.conn),
        }
    }

    fn remove(&mut self, id: u64) {
        if let Some(idx) = self.position(id) {
            self.slots.remove(idx);
        }
    }

    /// Mark every idle slot as closing and take its connection.
    fn take_idle(&mut self) -> Vec<(u64, T)> {
        self.slots
            .iter_mut()
            .filter(|s| s.meta.state == SlotState::Idle)
            .filter_map(|s| {
                s.meta.state = SlotState::Closing;
                s.conn.take().map(|conn| (s.meta.id, conn))
            })
            .collect()
    }

    /// Take idle connections unused for longer than `max_idle`, oldest first,
    /// without dropping below `min` live connections.
    fn take_stale(&mut self, min: usize, max_idle: Duration) -> Vec<(u64, T)> {
        let live = self.total() - self.count(SlotState::Closing);
        let surplus = live.saturating_sub(min);
        if surplus == 0 {
            return Vec::new();
        }

        let mut stale: Vec<(usize, tokio::time::Instant)> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                s.meta.state == SlotState::Idle && s.meta.is_idle_longer_than(max_idle)
            })
            .map(|(idx, s)| (idx, s.meta.last_used_at))
            .collect();
        stale.sort_by_key(|(_, last_used)| *last_used);
        stale.truncate(surplus);

        stale
            .into_iter()
            .filter_map(|(idx, _)| {
                let slot = self.slots.get_mut(idx)?;
                slot.meta.state = SlotState::Closing;
                slot.conn.take().map(|conn| (slot.meta.id, conn))
            })
            .collect()
    }
}

/// Mutex guard that publishes the outstanding-connection count on release,
/// so `close()` can wait for it to reach zero.
struct StateGuard<'a, C: Connector> {
    inner: &'a PoolInner<C>,
    guard: MutexGuard<'a, PoolState<Conn<C>>>,
}

impl<C: Connector> Deref for StateGuard<'_, C> {
    type Target = PoolState<Conn<C>>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<C: Connector> DerefMut for StateGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<C: Connector> Drop for StateGuard<'_, C> {
    fn drop(&mut self) {
        let outstanding = self.guard.outstanding();
        self.inner.outstanding.send_if_modified(|current| {
            if *current == outstanding {
                false
            } else {
                *current = outstanding;
                true
            }
        });
    }
}

pub(crate) struct PoolInner<C: Connector> {
    pub(crate) config: PoolConfig,
    connector: C,
    state: Mutex<PoolState<Conn<C>>>,
    outstanding: watch::Sender<usize>,
    next_slot_id: AtomicU64,
    next_waiter_id: AtomicU64,
}

impl<C: Connector> PoolInner<C> {
    pub(crate) fn new(connector: C, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            connector,
            state: Mutex::new(PoolState {
                lifecycle: Lifecycle::Uninitialized,
                initializing: false,
                slots: Vec::new(),
                waiters: VecDeque::new(),
                connecting: 0,
                reaper: None,
            }),
            outstanding: watch::channel(0).0,
            next_slot_id: AtomicU64::new(1),
            next_waiter_id: AtomicU64::new(1),
        })
    }

    fn lock(&self) -> StateGuard<'_, C> {
        StateGuard {
            inner: self,
            guard: self.state.lock(),
        }
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle
    }

    pub(crate) fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            available: state.count(SlotState::Idle),
            in_use: state.count(SlotState::Leased),
            broken: state.count(SlotState::Broken),
            closing: state.count(SlotState::Closing),
            connecting: state.connecting,
            waiting: state.waiters.len(),
            total: state.total(),
            max: self.config.max_connections,
        }
    }

    /// Hand idle slots and free capacity to queued acquirers, oldest first.
    fn dispatch(&self, state: &mut PoolState<Conn<C>>) {
        if !state.lifecycle.is_running() {
            return;
        }

        while !state.waiters.is_empty() {
            let grant = if let Some(lease) = state.best_idle().and_then(|idx| state.take_lease(idx)) {
                Grant::Lease(lease)
            } else if state.total() < self.config.max_connections {
                state.connecting += 1;
                Grant::Capacity
            } else {
                break;
            };

            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };

            tracing::trace!(waiter = waiter.id, "handing connection to waiting acquirer");
            if let Err(grant) = waiter.tx.send(grant) {
                match grant {
                    Grant::Lease(lease) => {
                        let _ = state.restore(lease);
                    }
                    Grant::Capacity => state.connecting -= 1,
                }
            }
        }
    }

    // =========================================================================
    // Connection establishment
    // =========================================================================

    async fn open(&self) -> Result<Conn<C>, DriverError> {
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, self.connector.connect()).await {
            Ok(Ok(conn)) => {
                tracing::debug!("opened new database connection");
                Ok(conn)
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "failed to open database connection");
                Err(e)
            }
            Err(_) => {
                tracing::debug!(?timeout, "timed out opening database connection");
                Err(DriverError::Timeout(timeout))
            }
        }
    }

    async fn open_with_retries(&self) -> Result<Conn<C>, DriverError> {
        let mut retries = 0;
        loop {
            match self.open().await {
                Ok(conn) => return Ok(conn),
                Err(e) if e.is_transient() && retries < self.config.connect_retries => {
                    retries += 1;
                    tracing::info!(
                        retry = retries,
                        max = self.config.connect_retries,
                        error = %e,
                        "failed to connect to the database server, will retry"
                    );
                    tokio::time::sleep(self.config.connect_retry_delay).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to connect to the database server");
                    return Err(e);
                }
            }
        }
    }

    fn new_slot_id(&self) -> u64 {
        self.next_slot_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a freshly opened connection as a leased slot.
    fn register_leased(&self, conn: Conn<C>) -> Result<Lease<Conn<C>>, Conn<C>> {
        let mut state = self.lock();
        state.connecting -= 1;
        if !state.lifecycle.is_running() {
            return Err(conn);
        }

        let mut meta = ConnectionMetadata::new(self.new_slot_id());
        meta.mark_checkout();
        state.slots.push(Slot {
            meta: meta.clone(),
            conn: None,
        });

        Ok(Lease {
            meta,
            conn,
            idle_for: None,
        })
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    pub(crate) async fn init(self: &Arc<Self>) -> Result<(), InitError> {
        {
            let mut state = self.lock();
            if state.lifecycle != Lifecycle::Uninitialized || state.initializing {
                return Err(InitError::InvalidState(state.lifecycle));
            }
            state.initializing = true;
        }
        let _initializing = InitializingGuard(self);

        let required = self.config.min_connections;
        tracing::debug!(
            min = required,
            max = self.config.max_connections,
            "initializing connection pool"
        );

        let mut opened = Vec::with_capacity(required);
        let mut last_error = None;
        while opened.len() < required {
            match self.open_with_retries().await {
                Ok(conn) => opened.push(conn),
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        let established = opened.len();
        if established < required {
            if established == 0 {
                if let Some(source) = last_error {
                    return Err(InitError::NoConnections { source });
                }
            }
            if self.config.init_policy == InitPolicy::Strict {
                for mut conn in opened {
                    close_quietly(&mut conn).await;
                }
                return Err(InitError::Partial {
                    established,
                    required,
                });
            }
            tracing::warn!(
                established,
                required,
                "connection pool started with fewer than min_connections"
            );
        }

        let rejected = {
            let mut state = self.lock();
            if state.lifecycle == Lifecycle::Uninitialized {
                for conn in opened.drain(..) {
                    state.slots.push(Slot {
                        meta: ConnectionMetadata::new(self.new_slot_id()),
                        conn: Some(conn),
                    });
                }
                state.lifecycle = Lifecycle::Running;
                if let Pruning::Interval(every) = self.config.pruning {
                    state.reaper = Some(tokio::spawn(reap(Arc::downgrade(self), every)));
                }
                None
            } else {
                Some(state.lifecycle)
            }
        };

        match rejected {
            None => {
                tracing::info!(connections = established, "connection pool initialized");
                Ok(())
            }
            Some(lifecycle) => {
                for mut conn in opened {
                    close_quietly(&mut conn).await;
                }
                Err(InitError::InvalidState(lifecycle))
            }
        }
    }

    // =========================================================================
    // Checkout and release
    // =========================================================================

    /// Lease a connection, reserve capacity to open one, or join the queue.
    ///
    /// `resume` is set when the caller already had its turn and was handed a
    /// connection that failed validation. Such a caller keeps its place ahead
    /// of everyone who queued after it.
    pub(crate) fn checkout(self: &Arc<Self>, resume: bool) -> Result<Checkout<C>, PoolError> {
        let mut state = self.lock();
        match state.lifecycle {
            Lifecycle::Running => {}
            Lifecycle::Uninitialized => return Err(PoolError::NotInitialized),
            Lifecycle::Draining | Lifecycle::Closed => return Err(PoolError::PoolClosed),
        }

        if !resume {
            self.dispatch(&mut state);
        }

        if resume || state.waiters.is_empty() {
            if let Some(lease) = state.best_idle().and_then(|idx| state.take_lease(idx)) {
                return Ok(Checkout::Lease(lease));
            }
            if state.total() < self.config.max_connections {
                state.connecting += 1;
                return Ok(Checkout::Connect(Reservation {
                    inner: Arc::clone(self),
                    armed: true,
                }));
            }
        }

        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        if resume {
            state.waiters.push_front(WaitEntry { id, tx });
        } else {
            state.waiters.push_back(WaitEntry { id, tx });
        }
        tracing::trace!(
            waiter = id,
            queued = state.waiters.len(),
            "pool exhausted, waiting for a connection"
        );

        Ok(Checkout::Wait(WaitGuard {
            inner: Arc::clone(self),
            id,
            rx: Some(rx),
        }))
    }

    /// Lease an idle connection that needs no validation.
    ///
    /// Idle connections past `max_lifetime` are retired and replaced in the
    /// background. With `test_on_checkout`, connections idle longer than
    /// `idle_timeout` would need a ping first, so they are left for
    /// [`checkout`](Self::checkout).
    pub(crate) fn try_checkout(self: &Arc<Self>) -> Result<Option<Lease<Conn<C>>>, PoolError> {
        let (lease, expired) = {
            let mut state = self.lock();
            match state.lifecycle {
                Lifecycle::Running => {}
                Lifecycle::Uninitialized => return Err(PoolError::NotInitialized),
                Lifecycle::Draining | Lifecycle::Closed => return Err(PoolError::PoolClosed),
            }

            self.dispatch(&mut state);
            if !state.waiters.is_empty() {
                return Ok(None);
            }

            let expired = match self.config.max_lifetime {
                Some(max_lifetime) => state.take_expired(max_lifetime),
                None => Vec::new(),
            };
            let candidate = if self.config.test_on_checkout {
                state.best_idle_within(self.config.idle_timeout)
            } else {
                state.best_idle()
            };
            (candidate.and_then(|idx| state.take_lease(idx)), expired)
        };

        for (id, conn) in expired {
            tracing::debug!(slot = id, "connection exceeded max lifetime");
            self.dispose(id, Some(conn), true);
        }

        Ok(lease)
    }

    /// Return a lease to the pool.
    ///
    /// Healthy connections go to the longest waiter or back to idle. Broken
    /// connections are closed and, while the pool is running, replaced in the
    /// background.
    pub(crate) fn release(self: &Arc<Self>, lease: Lease<Conn<C>>, healthy: bool) {
        let id = lease.meta.id;
        let mut dispose = None;
        let mut replace = false;

        {
            let mut state = self.lock();
            let lifecycle = state.lifecycle;
            match (state.position(id), healthy, lifecycle) {
                (Some(idx), true, Lifecycle::Running | Lifecycle::Draining) => {
                    if let Some(slot) = state.slots.get_mut(idx) {
                        slot.conn = Some(lease.conn);
                        slot.meta.mark_checkin();
                    }
                    self.dispatch(&mut state);
                }
                (Some(idx), false, Lifecycle::Running) => {
                    if let Some(slot) = state.slots.get_mut(idx) {
                        slot.meta.mark_broken();
                    }
                    dispose = Some(lease.conn);
                    replace = true;
                }
                (_, _, _) => {
                    state.remove(id);
                    dispose = Some(lease.conn);
                    self.dispatch(&mut state);
                }
            }
        }

        tracing::trace!(slot = id, healthy, "returned connection to pool");

        if dispose.is_some() {
            self.dispose(id, dispose, replace);
        }
    }

    /// Give back a grant that was sent to an acquirer that went away.
    fn give_back(self: &Arc<Self>, grant: Grant<Conn<C>>) {
        match grant {
            Grant::Lease(lease) => self.release(lease, true),
            Grant::Capacity => self.release_capacity(),
        }
    }

    fn release_capacity(&self) {
        let mut state = self.lock();
        state.connecting -= 1;
        self.dispatch(&mut state);
    }

    /// Remove a slot whose connection has been taken out of the pool.
    pub(crate) fn detach(&self, id: u64) {
        let mut state = self.lock();
        state.remove(id);
        self.dispatch(&mut state);
        tracing::debug!(slot = id, "detached connection from pool");
    }

    /// Close a connection in the background and optionally open a
    /// replacement for its slot.
    fn dispose(self: &Arc<Self>, id: u64, conn: Option<Conn<C>>, replace: bool) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::clone(self);
                runtime.spawn(async move {
                    if let Some(mut conn) = conn {
                        close_quietly(&mut conn).await;
                    }
                    if replace {
                        inner.replace(id).await;
                    }
                });
            }
            Err(_) => {
                tracing::warn!(slot = id, "no async runtime available, dropping connection");
                drop(conn);
                if replace {
                    self.detach(id);
                }
            }
        }
    }

    async fn replace(self: Arc<Self>, id: u64) {
        let result = self.open().await;

        let orphan = {
            let mut state = self.lock();
            let running = state.lifecycle.is_running();
            match (state.position(id), result) {
                (Some(idx), Ok(conn)) if running => {
                    if let Some(slot) = state.slots.get_mut(idx) {
                        slot.conn = Some(conn);
                        slot.meta.mark_reconnected();
                        slot.meta.mark_checkin();
                    }
                    tracing::debug!(slot = id, "replaced broken connection");
                    self.dispatch(&mut state);
                    None
                }
                (_, result) => {
                    state.remove(id);
                    if let Err(e) = &result {
                        tracing::warn!(slot = id, error = %e, "failed to replace broken connection");
                    }
                    self.dispatch(&mut state);
                    result.ok()
                }
            }
        };

        if let Some(mut conn) = orphan {
            close_quietly(&mut conn).await;
        }
    }

    // =========================================================================
    // Idle pruning
    // =========================================================================

    /// Close idle connections beyond `min_connections` that exceeded
    /// `max_idle`.
    pub(crate) async fn prune(&self) {
        let victims = {
            let mut state = self.lock();
            if !state.lifecycle.is_running() {
                return;
            }
            state.take_stale(self.config.min_connections, self.config.max_idle)
        };

        if victims.is_empty() {
            return;
        }

        tracing::debug!(count = victims.len(), "closing idle connections");
        for (id, mut conn) in victims {
            close_quietly(&mut conn).await;
            self.detach(id);
        }
    }

    /// Start pruning from a background task if anything is stale.
    pub(crate) fn prune_in_background(self: &Arc<Self>) {
        let victims = {
            let mut state = self.lock();
            if !state.lifecycle.is_running() {
                return;
            }
            state.take_stale(self.config.min_connections, self.config.max_idle)
        };

        if victims.is_empty() {
            return;
        }

        tracing::debug!(count = victims.len(), "closing idle connections");
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            for (id, mut conn) in victims {
                close_quietly(&mut conn).await;
                inner.detach(id);
            }
        });
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    pub(crate) async fn close(&self) -> Result<(), PoolError> {
        {
            let mut state = self.lock();
            match state.lifecycle {
                Lifecycle::Closed => return Ok(()),
                Lifecycle::Uninitialized => {
                    state.lifecycle = Lifecycle::Closed;
                    tracing::debug!("closed uninitialized connection pool");
                    return Ok(());
                }
                Lifecycle::Running => {
                    tracing::debug!(
                        waiting = state.waiters.len(),
                        "draining connection pool"
                    );
                    state.lifecycle = Lifecycle::Draining;
                    // Dropping the senders fails every queued acquire.
                    state.waiters.clear();
                    if let Some(reaper) = state.reaper.take() {
                        reaper.abort();
                    }
                }
                Lifecycle::Draining => {}
            }
        }

        let mut outstanding = self.outstanding.subscribe();
        let drained = tokio::time::timeout(
            self.config.close_timeout,
            outstanding.wait_for(|count| *count == 0),
        )
        .await
        .is_ok();

        let (victims, leaked) = {
            let mut state = self.lock();
            (state.take_idle(), state.outstanding())
        };

        tracing::debug!(count = victims.len(), "closing database connections");
        for (_, mut conn) in victims {
            close_quietly(&mut conn).await;
        }

        {
            let mut state = self.lock();
            state.slots.retain(|s| s.meta.state != SlotState::Closing);
            state.lifecycle = Lifecycle::Closed;
        }

        if drained {
            tracing::info!("connection pool closed");
            Ok(())
        } else {
            tracing::warn!(
                outstanding = leaked,
                timeout = ?self.config.close_timeout,
                "connection pool closed with leased connections outstanding"
            );
            Err(PoolError::CloseTimeout {
                outstanding: leaked,
            })
        }
    }
}

/// Clears the `initializing` flag however `init()` exits.
struct InitializingGuard<'a, C: Connector>(&'a PoolInner<C>);

impl<C: Connector> Drop for InitializingGuard<'_, C> {
    fn drop(&mut self) {
        self.0.state.lock().initializing = false;
    }
}

/// Capacity reserved for a connection that is being opened.
///
/// Dropping an armed reservation gives the capacity back to the pool.
pub(crate) struct Reservation<C: Connector> {
    inner: Arc<PoolInner<C>>,
    armed: bool,
}

impl<C: Connector> Reservation<C> {
    /// Take over capacity that was granted to a waiter.
    pub(crate) fn adopt(inner: Arc<PoolInner<C>>) -> Self {
        Self { inner, armed: true }
    }

    /// Open a connection and register it as leased.
    pub(crate) async fn open(mut self) -> Result<Lease<Conn<C>>, PoolError> {
        let conn = self.inner.open().await.map_err(PoolError::Connect)?;

        self.armed = false;
        match self.inner.register_leased(conn) {
            Ok(lease) => Ok(lease),
            Err(mut conn) => {
                close_quietly(&mut conn).await;
                Err(PoolError::PoolClosed)
            }
        }
    }
}

impl<C: Connector> Drop for Reservation<C> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.release_capacity();
        }
    }
}

/// A place in the waiter queue.
///
/// Dropping the guard before a grant arrives removes the entry from the
/// queue. A grant that arrived concurrently is given back to the pool.
pub(crate) struct WaitGuard<C: Connector> {
    inner: Arc<PoolInner<C>>,
    id: u64,
    rx: Option<oneshot::Receiver<Grant<Conn<C>>>>,
}

impl<C: Connector> WaitGuard<C> {
    pub(crate) async fn wait(mut self) -> Result<Grant<Conn<C>>, PoolError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(PoolError::PoolClosed);
        };
        let result = rx.await;
        self.rx = None;
        result.map_err(|_| PoolError::PoolClosed)
    }
}

impl<C: Connector> Drop for WaitGuard<C> {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };

        {
            let mut state = self.inner.lock();
            state.waiters.retain(|w| w.id != self.id);
        }

        rx.close();
        if let Ok(grant) = rx.try_recv() {
            self.inner.give_back(grant);
        }
    }
}

async fn close_quietly<T: Connection>(conn: &mut T) {
    match tokio::time::timeout(GRACEFUL_CLOSE_TIMEOUT, conn.close()).await {
        Ok(Ok(())) => tracing::debug!("closed database connection"),
        Ok(Err(e)) => tracing::debug!(error = %e, "error while closing database connection"),
        Err(_) => tracing::debug!("timed out closing database connection"),
    }
}

async fn reap<C: Connector>(pool: Weak<PoolInner<C>>, every: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = pool.upgrade() else {
            break;
        };
        if !inner.lifecycle().is_running() {
            break;
        }
        inner.prune().await;
    }
}
