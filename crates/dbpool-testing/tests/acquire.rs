//! Acquire and release behavior.
//!
//! These tests drive the pool with the in-memory mock driver:
//!
//! ```bash
//! cargo test -p dbpool-testing --test acquire
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dbpool::{Pool, PoolError, Pruning, SlotState};
use dbpool_testing::fixtures::{init_pool, init_tracing, test_config};
use dbpool_testing::mock::{MockConnector, MockError};
use futures_util::future::join_all;
use tokio_test::{assert_pending, assert_ready, task};

// =============================================================================
// Reuse and bounds
// =============================================================================

#[tokio::test]
async fn test_acquire_reuses_idle_connections() {
    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config()).await;
    assert_eq!(connector.connects(), 2);

    let conn = pool.acquire().await.unwrap();
    let first = conn.connection_id();
    drop(conn);

    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.connection_id(), first, "most recently used connection is reused");
    assert_eq!(connector.connects(), 2, "no new connection opened");

    let status = pool.status();
    assert_eq!(status.in_use, 1);
    assert_eq!(status.available, 1);
    assert_eq!(status.total, 2);
}

#[tokio::test]
async fn test_acquire_opens_up_to_max_connections() {
    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config()).await;

    let mut held = Vec::new();
    for _ in 0..4 {
        held.push(pool.acquire().await.unwrap());
    }

    assert_eq!(connector.connects(), 4);
    let status = pool.status();
    assert_eq!(status.in_use, 4);
    assert_eq!(status.total, 4);
    assert!(status.is_exhausted());
    assert!(pool.try_acquire().unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_leased_connections_never_exceed_max() {
    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config()).await;

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks = (0..20).map(|i| {
        let pool = pool.clone();
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        async move {
            let conn = pool.acquire().await.unwrap();
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10 + i % 3)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            drop(conn);
        }
    });
    join_all(tasks).await;

    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert!(connector.connects() <= 4);

    let status = pool.status();
    assert_eq!(status.in_use, 0, "every lease returned");
    assert_eq!(status.waiting, 0);
    assert_eq!(status.available, status.total);
}

// =============================================================================
// Waiting and fairness
// =============================================================================

#[tokio::test]
async fn test_acquire_waits_until_release() {
    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config().min_connections(1).max_connections(1)).await;

    let conn = pool.acquire().await.unwrap();
    let id = conn.connection_id();

    let mut waiter = task::spawn(pool.acquire());
    assert_pending!(waiter.poll());
    assert_eq!(pool.status().waiting, 1);

    drop(conn);
    assert!(waiter.is_woken());
    let conn = assert_ready!(waiter.poll()).unwrap();
    assert_eq!(conn.connection_id(), id, "released connection handed to waiter");
    assert_eq!(pool.status().waiting, 0);
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_waiters_are_served_in_fifo_order() {
    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config().min_connections(1).max_connections(1)).await;

    let conn = pool.acquire().await.unwrap();

    let mut first = task::spawn(pool.acquire());
    let mut second = task::spawn(pool.acquire());
    let mut third = task::spawn(pool.acquire());
    assert_pending!(first.poll());
    assert_pending!(second.poll());
    assert_pending!(third.poll());
    assert_eq!(pool.status().waiting, 3);

    drop(conn);
    assert_pending!(third.poll());
    assert_pending!(second.poll());
    let conn = assert_ready!(first.poll()).unwrap();

    drop(conn);
    assert_pending!(third.poll());
    let conn = assert_ready!(second.poll()).unwrap();

    drop(conn);
    assert_ready!(third.poll()).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_waiter_keeps_its_place_after_failed_validation() {
    let connector = MockConnector::new();
    let config = test_config()
        .min_connections(1)
        .max_connections(1)
        .max_lifetime(Some(Duration::from_secs(60)));
    let pool = init_pool(&connector, config).await;

    let conn = pool.acquire().await.unwrap();
    let mut first = task::spawn(pool.acquire());
    let mut second = task::spawn(pool.acquire());
    assert_pending!(first.poll());
    assert_pending!(second.poll());

    tokio::time::advance(Duration::from_secs(61)).await;
    drop(conn);

    // The connection handed to the first waiter is past its lifetime.
    assert_pending!(first.poll());
    assert_eq!(pool.status().waiting, 2);

    // Its replacement still goes to the first waiter.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_pending!(second.poll());
    let conn = assert_ready!(first.poll()).unwrap();
    assert_eq!(conn.connection_id(), 2);

    drop(conn);
    assert_ready!(second.poll()).unwrap();
}

#[tokio::test]
async fn test_new_acquire_does_not_overtake_waiters() {
    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config().min_connections(1).max_connections(1)).await;

    let conn = pool.acquire().await.unwrap();
    let mut waiter = task::spawn(pool.acquire());
    assert_pending!(waiter.poll());

    drop(conn);
    assert!(pool.try_acquire().unwrap().is_none(), "connection belongs to the waiter");
    assert_ready!(waiter.poll()).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_acquire_timeout() {
    let connector = MockConnector::new();
    let config = test_config()
        .min_connections(1)
        .max_connections(1)
        .acquire_timeout(Some(Duration::from_millis(100)));
    let pool = init_pool(&connector, config).await;

    let _conn = pool.acquire().await.unwrap();

    let start = tokio::time::Instant::now();
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, PoolError::AcquisitionTimeout(t) if t == Duration::from_millis(100)));
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(pool.status().waiting, 0, "timed out waiter left the queue");
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancelled_acquire_leaves_the_queue() {
    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config().min_connections(1).max_connections(1)).await;

    let conn = pool.acquire().await.unwrap();
    let mut waiter = task::spawn(pool.acquire());
    assert_pending!(waiter.poll());
    assert_eq!(pool.status().waiting, 1);

    drop(waiter);
    assert_eq!(pool.status().waiting, 0);

    drop(conn);
    let status = pool.status();
    assert_eq!(status.available, 1);
    assert_eq!(status.in_use, 0);
}

#[tokio::test]
async fn test_cancelled_waiter_gives_back_handed_over_connection() {
    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config().min_connections(1).max_connections(1)).await;

    let conn = pool.acquire().await.unwrap();
    let mut waiter = task::spawn(pool.acquire());
    assert_pending!(waiter.poll());

    // The connection is handed to the waiter, which is cancelled before it
    // observes it.
    drop(conn);
    assert!(waiter.is_woken());
    drop(waiter);

    let status = pool.status();
    assert_eq!(status.available, 1);
    assert_eq!(status.in_use, 0);
    assert!(pool.try_acquire().unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_connect_frees_capacity() {
    let connector = MockConnector::builder()
        .with_connect_delay(Duration::from_millis(500))
        .build();
    let config = test_config().min_connections(0).max_connections(1);
    let pool = init_pool(&connector, config).await;

    let result = tokio::time::timeout(Duration::from_millis(100), pool.acquire()).await;
    assert!(result.is_err());
    assert_eq!(pool.status().connecting, 0);
    assert_eq!(pool.status().total, 0);

    connector.set_connect_delay(None);
    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.metadata().unwrap().state, SlotState::Leased);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_execute_breaks_connection() {
    let connector = MockConnector::builder()
        .with_execute_delay(Duration::from_secs(1))
        .build();
    let pool = init_pool(&connector, test_config()).await;

    let result = tokio::time::timeout(Duration::from_millis(10), async {
        let mut conn = pool.acquire().await.unwrap();
        conn.execute("SELECT 1", &[]).await
    })
    .await;
    assert!(result.is_err());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(connector.closes(), 1, "interrupted session is closed");
    assert_eq!(connector.connects(), 3, "and replaced");
    let status = pool.status();
    assert_eq!(status.available, 2);
    assert_eq!(status.broken, 0);
}

// =============================================================================
// Exactly-once release
// =============================================================================

#[tokio::test]
async fn test_release_on_panic() {
    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config()).await;

    let task_pool = pool.clone();
    let result = tokio::spawn(async move {
        let _conn = task_pool.acquire().await.unwrap();
        panic!("caller failed while holding a connection");
    })
    .await;
    assert!(result.unwrap_err().is_panic());

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 2);
}

#[tokio::test]
async fn test_release_on_early_return() {
    async fn fails_midway(pool: &Pool<MockConnector>) -> Result<(), PoolError> {
        let _conn = pool.acquire().await?;
        Err(PoolError::Configuration("bail out".into()))
    }

    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config()).await;

    assert!(fails_midway(&pool).await.is_err());
    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 2);
}

#[tokio::test]
async fn test_explicit_release() {
    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config()).await;

    let conn = pool.acquire().await.unwrap();
    assert_eq!(pool.status().in_use, 1);
    conn.release();
    assert_eq!(pool.status().in_use, 0);
    assert_eq!(pool.status().available, 2);
}

#[tokio::test]
async fn test_try_acquire() {
    let connector = MockConnector::new();
    let pool = Pool::new(connector.clone(), test_config().min_connections(1).max_connections(1))
        .unwrap();
    assert!(matches!(pool.try_acquire(), Err(PoolError::NotInitialized)));

    pool.init().await.unwrap();
    let conn = pool.try_acquire().unwrap().expect("idle connection");
    assert!(pool.try_acquire().unwrap().is_none());
    drop(conn);
    assert!(pool.try_acquire().unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_try_acquire_skips_connections_needing_a_ping() {
    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config().idle_timeout(Duration::from_secs(30))).await;

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(pool.try_acquire().unwrap().is_none());
    assert_eq!(connector.pings(), 0);
    assert_eq!(pool.status().available, 2);

    let conn = pool.acquire().await.unwrap();
    assert_eq!(connector.pings(), 1);
    drop(conn);

    let _conn = pool.try_acquire().unwrap().expect("recently used connection");
    assert_eq!(connector.pings(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_try_acquire_retires_expired_connections() {
    let connector = MockConnector::new();
    let config = test_config().max_lifetime(Some(Duration::from_secs(60)));
    let pool = init_pool(&connector, config).await;
    connector.set_ping_failing(true);

    tokio::time::advance(Duration::from_secs(120)).await;
    assert!(pool.try_acquire().unwrap().is_none());
    assert_eq!(connector.pings(), 0);
    assert_eq!(pool.status().broken, 2);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(connector.closes(), 2);
    assert_eq!(connector.connects(), 4);

    let conn = pool.try_acquire().unwrap().expect("replacement connection");
    assert!(conn.connection_id() > 2);
    assert_eq!(connector.pings(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_metadata_is_a_checkout_snapshot() {
    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config().min_connections(1)).await;

    let mut conn = pool.acquire().await.unwrap();
    let checked_out_at = conn.metadata().unwrap().last_used_at;

    tokio::time::advance(Duration::from_secs(5)).await;
    conn.execute("SELECT 1", &[]).await.unwrap();

    let meta = conn.metadata().unwrap();
    assert_eq!(meta.state, SlotState::Leased);
    assert_eq!(meta.last_used_at, checked_out_at);
    assert_eq!(meta.checkout_count, 1);
}

#[tokio::test]
async fn test_detach_frees_slot() {
    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config().max_connections(2)).await;

    let conn = pool.acquire().await.unwrap();
    let detached = conn.detach();
    assert!(!detached.is_closed());
    assert_eq!(pool.status().total, 1);

    let _a = pool.acquire().await.unwrap();
    let _b = pool.acquire().await.unwrap();
    assert_eq!(connector.connects(), 3, "detached slot was reusable capacity");
    assert_eq!(connector.closes(), 0);
    drop(detached);
    assert_eq!(connector.drops(), 1);
}

// =============================================================================
// Broken connections
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_broken_connection_is_replaced() {
    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config()).await;

    let mut conn = pool.acquire().await.unwrap();
    conn.mark_broken();
    assert!(conn.is_broken());
    drop(conn);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(connector.closes(), 1);
    assert_eq!(connector.connects(), 3);

    let status = pool.status();
    assert_eq!(status.broken, 0);
    assert_eq!(status.available, 2);
    assert_eq!(status.total, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_replacement_frees_capacity() {
    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config().min_connections(1).max_connections(1)).await;

    let mut conn = pool.acquire().await.unwrap();
    connector.set_connect_failing(Some(MockError::ConnectionRefused));
    conn.mark_broken();
    drop(conn);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.status().total, 0);
    assert_eq!(connector.live(), 0);

    connector.set_connect_failing(None);
    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.connection_id(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_served_after_broken_release() {
    let connector = MockConnector::new();
    let pool = init_pool(&connector, test_config().min_connections(1).max_connections(1)).await;

    let mut conn = pool.acquire().await.unwrap();
    let mut waiter = task::spawn(pool.acquire());
    assert_pending!(waiter.poll());

    conn.mark_broken();
    drop(conn);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(waiter.is_woken());
    let conn = assert_ready!(waiter.poll()).unwrap();
    assert_eq!(conn.connection_id(), 2, "waiter gets the replacement");
}

// =============================================================================
// Validation on checkout
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_idle_connection_pinged_on_checkout() {
    init_tracing();
    let connector = MockConnector::new();
    let config = test_config().idle_timeout(Duration::from_secs(30));
    let pool = init_pool(&connector, config).await;

    let conn = pool.acquire().await.unwrap();
    assert_eq!(connector.pings(), 0, "recently used connections are not pinged");
    drop(conn);

    tokio::time::advance(Duration::from_secs(31)).await;
    let conn = pool.acquire().await.unwrap();
    assert_eq!(connector.pings(), 1);
    drop(conn);

    // Both idle connections fail their health check, so a new one is opened.
    connector.set_ping_failing(true);
    tokio::time::advance(Duration::from_secs(31)).await;
    let conn = pool.acquire().await.unwrap();
    assert_eq!(connector.pings(), 3);
    assert_eq!(conn.connection_id(), 3);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.status().broken, 0);
    assert_eq!(connector.closes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_validation_disabled() {
    let connector = MockConnector::new();
    let config = test_config()
        .idle_timeout(Duration::from_secs(30))
        .test_on_checkout(false);
    let pool = init_pool(&connector, config).await;

    tokio::time::advance(Duration::from_secs(31)).await;
    let _conn = pool.acquire().await.unwrap();
    assert_eq!(connector.pings(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_connection_is_retired() {
    let connector = MockConnector::new();
    let config = test_config().max_lifetime(Some(Duration::from_secs(60)));
    let pool = init_pool(&connector, config).await;

    tokio::time::advance(Duration::from_secs(61)).await;
    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.connection_id(), 3);
    assert_eq!(connector.pings(), 0);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(connector.closes(), 2);
    assert_eq!(pool.status().total, 3);
}

// =============================================================================
// Idle pruning
// =============================================================================

async fn grow_to(pool: &Pool<MockConnector>, count: usize) {
    let mut held = Vec::new();
    for _ in 0..count {
        held.push(pool.acquire().await.unwrap());
    }
}

#[tokio::test(start_paused = true)]
async fn test_idle_connections_pruned_on_acquire() {
    let connector = MockConnector::new();
    let config = test_config()
        .min_connections(1)
        .max_idle(Duration::from_secs(10))
        .pruning(Pruning::OnAcquire);
    let pool = init_pool(&connector, config).await;

    grow_to(&pool, 3).await;
    assert_eq!(pool.status().total, 3);

    tokio::time::advance(Duration::from_secs(11)).await;
    let conn = pool.acquire().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(connector.closes(), 2);
    let status = pool.status();
    assert_eq!(status.total, 1);
    assert_eq!(status.in_use, 1);
    drop(conn);
}

#[tokio::test(start_paused = true)]
async fn test_reaper_prunes_idle_connections() {
    let connector = MockConnector::new();
    let config = test_config()
        .min_connections(1)
        .max_idle(Duration::from_secs(10))
        .pruning(Pruning::Interval(Duration::from_secs(5)));
    let pool = init_pool(&connector, config).await;

    grow_to(&pool, 3).await;
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(connector.closes(), 2);
    assert_eq!(pool.status().total, 1, "never prunes below min_connections");
}

#[tokio::test(start_paused = true)]
async fn test_pruning_disabled_keeps_connections() {
    let connector = MockConnector::new();
    let config = test_config()
        .min_connections(1)
        .max_idle(Duration::from_secs(10));
    let pool = init_pool(&connector, config).await;

    grow_to(&pool, 3).await;
    tokio::time::sleep(Duration::from_secs(20)).await;
    let _conn = pool.acquire().await.unwrap();

    assert_eq!(connector.closes(), 0);
    assert_eq!(pool.status().total, 3);
}
