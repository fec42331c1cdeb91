//! # dbpool-testing
//!
//! Test infrastructure for the `dbpool` connection pool.
//!
//! ## Features
//!
//! - In-memory mock driver (no database server required)
//! - Scripted query responses, connect failures and ping failures
//! - Call counters for connects, statements, pings and closes
//! - Fixtures for test pool configuration and log capture
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbpool_testing::fixtures::{init_pool, test_config};
//! use dbpool_testing::mock::{MockConnector, MockError, MockResponse};
//!
//! #[tokio::test]
//! async fn test_retry() {
//!     let connector = MockConnector::new();
//!     let pool = init_pool(&connector, test_config()).await;
//!
//!     connector.push_response(MockResponse::error(MockError::ConnectionReset));
//!     pool.query("SELECT 1").await.unwrap();
//!     assert_eq!(connector.executes(), 2);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock;

pub use mock::{MockConnection, MockConnector, MockError, MockResponse};
