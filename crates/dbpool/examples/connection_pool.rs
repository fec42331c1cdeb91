//! Connection pooling example.
//!
//! This example runs the pool against a small in-process driver that simulates
//! query latency and the occasional dropped connection, and shows how retries,
//! replacement and pool status look from the outside.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=debug cargo run -p dbpool --example connection_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dbpool::{
    Backoff, Connection, ConnectOptions, Connector, DriverError, Pool, PoolConfig, PoolStatus,
    Rows, Value, async_trait,
};
use tokio::time::Instant;

/// Simulated driver: every 7th statement loses its connection.
struct SimConnector {
    options: ConnectOptions,
    statements: Arc<AtomicU64>,
}

struct SimConnection {
    statements: Arc<AtomicU64>,
}

#[async_trait]
impl Connector for SimConnector {
    type Connection = SimConnection;

    async fn connect(&self) -> Result<SimConnection, DriverError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        tracing::debug!(address = %self.options.address(), "connected");
        Ok(SimConnection {
            statements: Arc::clone(&self.statements),
        })
    }
}

#[async_trait]
impl Connection for SimConnection {
    async fn execute(&mut self, _query: &str, params: &[Value]) -> Result<Rows, DriverError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let n = self.statements.fetch_add(1, Ordering::Relaxed) + 1;
        if n % 7 == 0 {
            return Err(DriverError::ConnectionReset("simulated network failure".into()));
        }
        Ok(Rows::affected(params.len() as u64))
    }

    async fn ping(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let options = ConnectOptions::from_connection_string(
        "Server=localhost,3306;Database=app;User Id=app;Password=secret",
    )?;

    println!("=== Connection Pool Example ===\n");

    let pool_config = PoolConfig::new()
        .min_connections(2)
        .max_connections(6)
        .max_retries(3)
        .retry_backoff(Backoff::exponential(Duration::from_millis(50)).jitter(true))
        .idle_timeout(Duration::from_secs(30));

    println!("Pool configuration:");
    println!("  Min connections: {}", pool_config.min_connections);
    println!("  Max connections: {}", pool_config.max_connections);
    println!("  Max retries: {}", pool_config.max_retries);
    println!();

    let connector = SimConnector {
        options,
        statements: Arc::new(AtomicU64::new(0)),
    };
    let pool = Pool::new(connector, pool_config)?;
    pool.init().await?;
    print_pool_status(&pool.status());

    // Example 1: Scoped lease
    println!("\n1. Scoped lease:");
    {
        let mut conn = pool.acquire().await?;
        let rows = conn.execute("SELECT 1", &[]).await?;
        println!("  Slot {} answered, {} row(s) affected", conn.id(), rows.rows_affected());
        // Connection is automatically returned to pool when dropped
    }

    // Example 2: Concurrent statements with transparent retry
    println!("\n2. Concurrent statements (30 parallel, every 7th fails):");
    let start = Instant::now();
    let mut handles = vec![];
    for i in 0..30 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.exec("UPDATE counters SET n = n + 1 WHERE id = ?", (i,))
                .await
        }));
    }

    let mut completed = 0;
    for handle in handles {
        if handle.await?.is_ok() {
            completed += 1;
        }
    }
    println!("  Completed {} statements in {:?}", completed, start.elapsed());

    // Example 3: Pool health
    println!("\n3. Pool health monitoring:");
    let status = pool.status();
    let utilization = status.utilization();
    let health_status = if utilization < 70.0 {
        "HEALTHY"
    } else if utilization < 90.0 {
        "WARNING"
    } else {
        "CRITICAL"
    };
    println!("  Pool health: {}", health_status);
    print_pool_status(&status);

    // Example 4: Graceful shutdown
    println!("\n4. Closing pool...");
    pool.close().await?;
    println!("  Pool closed: {}", pool.is_closed());

    println!("\n=== Example Complete ===");
    Ok(())
}

fn print_pool_status(status: &PoolStatus) {
    println!("Pool status:");
    println!("  Available: {}", status.available);
    println!("  In use: {}", status.in_use);
    println!("  Broken: {}", status.broken);
    println!("  Total: {}/{}", status.total, status.max);
    println!("  Utilization: {:.1}%", status.utilization());
}
