//! In-memory mock driver.
//!
//! [`MockConnector`] implements [`Connector`] without any network I/O. Query
//! responses, connect failures and ping failures are scripted up front or
//! changed while a test runs, and every call is counted so tests can assert
//! how the pool used the driver.
//!
//! ```rust,ignore
//! use dbpool_testing::mock::{MockConnector, MockError, MockResponse};
//!
//! let connector = MockConnector::builder()
//!     .with_response("SELECT 1", MockResponse::scalar(1))
//!     .with_default_response(MockResponse::affected(0))
//!     .build();
//!
//! connector.push_response(MockResponse::error(MockError::ConnectionReset));
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dbpool::{Connection, Connector, DriverError, Row, Rows, Value};
use parking_lot::Mutex;

/// A scripted driver failure.
///
/// [`DriverError`] is not `Clone`, so responses carry this description and
/// build a fresh error each time one is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockError {
    /// The server reset the connection (transient).
    ConnectionReset,
    /// The connection was refused (transient).
    ConnectionRefused,
    /// Writing to the socket failed (transient).
    BrokenPipe,
    /// The server did not answer in time (transient).
    Timeout,
    /// The statement was rejected by the server (fatal).
    Syntax(String),
    /// A unique constraint was violated (fatal).
    Duplicate(String),
    /// Login failed (fatal).
    Authentication(String),
}

impl MockError {
    /// Build the driver error this failure stands for.
    #[must_use]
    pub fn to_driver_error(&self) -> DriverError {
        match self {
            Self::ConnectionReset => DriverError::ConnectionReset("reset by peer".into()),
            Self::ConnectionRefused => DriverError::ConnectionRefused("connection refused".into()),
            Self::BrokenPipe => DriverError::BrokenPipe,
            Self::Timeout => DriverError::Timeout(Duration::from_secs(30)),
            Self::Syntax(msg) => DriverError::Server {
                code: 1064,
                message: msg.clone(),
            },
            Self::Duplicate(msg) => DriverError::Duplicate(msg.clone()),
            Self::Authentication(msg) => DriverError::Authentication(msg.clone()),
        }
    }
}

/// Mock response configuration.
#[derive(Clone)]
pub enum MockResponse {
    /// Return rows with named columns.
    Rows {
        /// Column names.
        columns: Vec<String>,
        /// Row data.
        rows: Vec<Vec<Value>>,
    },

    /// Return rows affected count (for INSERT/UPDATE/DELETE).
    RowsAffected(u64),

    /// Return an error.
    Error(MockError),

    /// Compute the response from the query and its parameters.
    Custom(Arc<dyn Fn(&str, &[Value]) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", columns)
                .field("rows", rows)
                .finish(),
            Self::RowsAffected(n) => f.debug_tuple("RowsAffected").field(n).finish(),
            Self::Error(e) => f.debug_tuple("Error").field(e).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// Create a single-column, single-row response.
    pub fn scalar(value: impl Into<Value>) -> Self {
        Self::Rows {
            columns: vec!["value".into()],
            rows: vec![vec![value.into()]],
        }
    }

    /// Create an empty result response.
    pub fn empty() -> Self {
        Self::RowsAffected(0)
    }

    /// Create a rows affected response.
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// Create an error response.
    pub fn error(error: MockError) -> Self {
        Self::Error(error)
    }

    /// Create a multi-row response.
    pub fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        Self::Rows {
            columns: columns.iter().map(|c| (*c).to_owned()).collect(),
            rows,
        }
    }

    /// Create a response computed by `f`.
    pub fn custom(f: impl Fn(&str, &[Value]) -> MockResponse + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    fn resolve(&self, query: &str, params: &[Value]) -> Result<Rows, DriverError> {
        match self {
            Self::Rows { columns, rows } => Ok(Rows::new(
                columns.clone(),
                rows.iter().cloned().map(Row::from).collect(),
            )),
            Self::RowsAffected(n) => Ok(Rows::affected(*n)),
            Self::Error(e) => Err(e.to_driver_error()),
            Self::Custom(f) => f(query, params).resolve(query, params),
        }
    }
}

/// Call counters and scripted behavior shared by a connector and its
/// connections.
struct MockState {
    responses: HashMap<String, MockResponse>,
    default_response: MockResponse,
    scripted: Mutex<VecDeque<MockResponse>>,
    connect_failures: Mutex<VecDeque<MockError>>,
    connect_failing: Mutex<Option<MockError>>,
    connect_delay: Mutex<Option<Duration>>,
    execute_delay: Mutex<Option<Duration>>,
    server_limit: Mutex<Option<usize>>,
    ping_failing: AtomicBool,
    queries: Mutex<Vec<String>>,
    connect_attempts: AtomicUsize,
    connects: AtomicUsize,
    executes: AtomicUsize,
    pings: AtomicUsize,
    closes: AtomicUsize,
    drops: AtomicUsize,
    live: AtomicUsize,
}

/// Builder for [`MockConnector`].
pub struct MockConnectorBuilder {
    responses: HashMap<String, MockResponse>,
    default_response: MockResponse,
    connect_failures: VecDeque<MockError>,
    connect_delay: Option<Duration>,
    execute_delay: Option<Duration>,
    server_limit: Option<usize>,
}

impl MockConnectorBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            default_response: MockResponse::empty(),
            connect_failures: VecDeque::new(),
            connect_delay: None,
            execute_delay: None,
            server_limit: None,
        }
    }

    /// Add a response for a specific query.
    pub fn with_response(mut self, query: impl Into<String>, response: MockResponse) -> Self {
        self.responses.insert(query.into(), response);
        self
    }

    /// Set the default response for unmatched queries.
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.default_response = response;
        self
    }

    /// Fail the next `count` connect attempts with `error`.
    pub fn with_connect_failures(mut self, count: usize, error: MockError) -> Self {
        self.connect_failures
            .extend(std::iter::repeat_n(error, count));
        self
    }

    /// Delay every connect attempt.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Delay every statement.
    pub fn with_execute_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = Some(delay);
        self
    }

    /// Refuse connections while `limit` connections are live, like a server
    /// at its connection cap.
    pub fn with_server_limit(mut self, limit: usize) -> Self {
        self.server_limit = Some(limit);
        self
    }

    /// Build the connector.
    pub fn build(self) -> MockConnector {
        MockConnector {
            state: Arc::new(MockState {
                responses: self.responses,
                default_response: self.default_response,
                scripted: Mutex::new(VecDeque::new()),
                connect_failures: Mutex::new(self.connect_failures),
                connect_failing: Mutex::new(None),
                connect_delay: Mutex::new(self.connect_delay),
                execute_delay: Mutex::new(self.execute_delay),
                server_limit: Mutex::new(self.server_limit),
                ping_failing: AtomicBool::new(false),
                queries: Mutex::new(Vec::new()),
                connect_attempts: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                executes: AtomicUsize::new(0),
                pings: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                drops: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
            }),
        }
    }
}

impl Default for MockConnectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connector producing [`MockConnection`]s.
///
/// Clones share scripting and counters, so a test can keep one clone and hand
/// the other to the pool.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    /// Create a new builder for the mock connector.
    pub fn builder() -> MockConnectorBuilder {
        MockConnectorBuilder::new()
    }

    /// Create a connector that answers every query with an empty result.
    pub fn new() -> Self {
        MockConnectorBuilder::new().build()
    }

    /// Queue a response for the next statement on any connection.
    ///
    /// Queued responses are consumed in order before per-query and default
    /// responses apply.
    pub fn push_response(&self, response: MockResponse) {
        self.state.scripted.lock().push_back(response);
    }

    /// Queue `count` copies of a response.
    pub fn push_responses(&self, count: usize, response: MockResponse) {
        self.state
            .scripted
            .lock()
            .extend(std::iter::repeat_n(response, count));
    }

    /// Fail the next `count` connect attempts with `error`.
    pub fn fail_next_connects(&self, count: usize, error: MockError) {
        self.state
            .connect_failures
            .lock()
            .extend(std::iter::repeat_n(error, count));
    }

    /// Fail every connect attempt with `error` until cleared with `None`.
    pub fn set_connect_failing(&self, error: Option<MockError>) {
        *self.state.connect_failing.lock() = error;
    }

    /// Set or clear the delay applied to every connect attempt.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *self.state.connect_delay.lock() = delay;
    }

    /// Set or clear the delay applied to every statement.
    pub fn set_execute_delay(&self, delay: Option<Duration>) {
        *self.state.execute_delay.lock() = delay;
    }

    /// Set or clear the live connection cap.
    pub fn set_server_limit(&self, limit: Option<usize>) {
        *self.state.server_limit.lock() = limit;
    }

    /// Make every ping fail until reset.
    pub fn set_ping_failing(&self, failing: bool) {
        self.state.ping_failing.store(failing, Ordering::SeqCst);
    }

    /// Number of connect attempts, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// Number of connections opened.
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Number of statements executed, including failed ones.
    pub fn executes(&self) -> usize {
        self.state.executes.load(Ordering::SeqCst)
    }

    /// Number of pings.
    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    /// Number of connections closed through [`Connection::close`].
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Number of connections dropped without being closed.
    pub fn drops(&self) -> usize {
        self.state.drops.load(Ordering::SeqCst)
    }

    /// Number of connections opened and not yet closed or dropped.
    pub fn live(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Every statement executed so far, in order.
    pub fn queries(&self) -> Vec<String> {
        self.state.queries.lock().clone()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnector")
            .field("connects", &self.connects())
            .field("closes", &self.closes())
            .field("live", &self.live())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection, DriverError> {
        let attempt = self.state.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = *self.state.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .state
            .connect_failures
            .lock()
            .pop_front()
            .or_else(|| self.state.connect_failing.lock().clone());
        if let Some(error) = failure {
            tracing::debug!(attempt, ?error, "mock connect failed");
            return Err(error.to_driver_error());
        }

        let limit = *self.state.server_limit.lock();
        if limit.is_some_and(|limit| self.state.live.load(Ordering::SeqCst) >= limit) {
            tracing::debug!(attempt, "mock server at connection limit");
            return Err(DriverError::ConnectionRefused("too many connections".into()));
        }

        let id = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.live.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(connection = id, "mock connection opened");

        Ok(MockConnection {
            id,
            state: Arc::clone(&self.state),
            closed: false,
        })
    }
}

/// A connection produced by [`MockConnector`].
pub struct MockConnection {
    id: usize,
    state: Arc<MockState>,
    closed: bool,
}

impl MockConnection {
    /// Sequence number of this connection, starting at 1.
    pub fn connection_id(&self) -> usize {
        self.id
    }

    /// Check if [`Connection::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, query: &str, params: &[Value]) -> Result<Rows, DriverError> {
        if self.closed {
            return Err(DriverError::ConnectionClosed);
        }

        self.state.executes.fetch_add(1, Ordering::SeqCst);
        self.state.queries.lock().push(query.to_owned());

        let delay = *self.state.execute_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.state.scripted.lock().pop_front();
        let response = scripted
            .as_ref()
            .or_else(|| self.state.responses.get(query))
            .unwrap_or(&self.state.default_response);
        response.resolve(query, params)
    }

    async fn ping(&mut self) -> Result<(), DriverError> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if self.closed {
            return Err(DriverError::ConnectionClosed);
        }
        if self.state.ping_failing.load(Ordering::SeqCst) {
            return Err(DriverError::ConnectionReset("ping failed".into()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.state.live.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection = self.id, "mock connection closed");
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if !self.closed {
            self.state.drops.fetch_add(1, Ordering::SeqCst);
            self.state.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
