//! # dbpool
//!
//! Async connection pool for database drivers with scoped leases and
//! transparent retry of transient failures.
//!
//! The pool is driver-agnostic: a driver implements [`Connector`] and
//! [`Connection`], and the pool takes care of keeping sessions open, leasing
//! them to one caller at a time, and shutting them down.
//!
//! ## Features
//!
//! - Configurable min/max pool sizes with FIFO fairness for waiting callers
//! - Leases returned exactly once on drop, including on panic and cancellation
//! - Broken connections closed and replaced in the background
//! - Health checks for connections that sat idle, and a maximum lifetime
//! - Retry of transient failures with fixed, linear or exponential backoff
//! - Pruning of idle connections beyond the minimum
//! - Graceful shutdown that drains leased connections within a deadline
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbpool::{Pool, PoolConfig};
//!
//! let config = PoolConfig::new()
//!     .min_connections(2)
//!     .max_connections(10)
//!     .idle_timeout(Duration::from_secs(30));
//!
//! let pool = Pool::new(connector, config)?;
//! pool.init().await?;
//!
//! let rows = pool.exec("SELECT name FROM users WHERE id = ?", (42,)).await?;
//!
//! let mut conn = pool.acquire().await?;
//! conn.execute("UPDATE users SET seen = 1", &[]).await?;
//! // Connection automatically returned to pool on drop
//!
//! pool.close().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
mod exec;
mod inner;
pub mod lifecycle;
pub mod options;
pub mod pool;
pub mod pooled;
pub mod value;

pub use config::{Backoff, BackoffStrategy, InitPolicy, PoolConfig, Pruning};
pub use connection::{Connection, Connector};
pub use error::{DriverError, ErrorKind, ExecError, InitError, PoolError};
pub use lifecycle::{ConnectionMetadata, Lifecycle, SlotState};
pub use options::{ConnectOptions, TlsMode};
pub use pool::{Pool, PoolBuilder, PoolStatus};
pub use pooled::PooledConnection;
pub use value::{Params, Row, Rows, Value};

/// Re-export of `async_trait` for implementing [`Connector`] and
/// [`Connection`].
pub use async_trait::async_trait;
