//! Query execution with transparent retries.

use crate::connection::Connector;
use crate::error::{DriverError, ExecError, PoolError};
use crate::pool::Pool;
use crate::value::{Params, Rows};

impl<C: Connector> Pool<C> {
    /// Execute a statement on a pooled connection.
    ///
    /// Transient failures (a dropped socket, a timeout, a reset connection)
    /// mark the connection broken and the statement is retried on another
    /// connection, up to `max_retries` times with the configured backoff
    /// between attempts. When every attempt fails the last error is returned
    /// as [`ExecError::RetriesExhausted`].
    ///
    /// Fatal failures such as syntax errors or duplicate keys are returned
    /// immediately as [`ExecError::Fatal`]; the connection stays in the pool.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// pool.exec("INSERT INTO users (id, name) VALUES (?, ?)", (42, "ann")).await?;
    /// let rows = pool.exec("SELECT name FROM users WHERE id = ?", [Value::from(42)]).await?;
    /// ```
    pub async fn exec(&self, query: &str, params: impl Params) -> Result<Rows, ExecError> {
        let params = params.into_params();
        let max_retries = self.config().max_retries;
        let mut retries = 0;

        tracing::trace!(query, params = params.len(), "executing statement");

        loop {
            let error = match self.attempt(query, &params).await {
                Ok(rows) => return Ok(rows),
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Transient(e)) => e,
            };

            if retries >= max_retries {
                tracing::warn!(
                    attempts = retries + 1,
                    error = %error,
                    "statement failed, retries exhausted"
                );
                return Err(ExecError::RetriesExhausted {
                    attempts: retries + 1,
                    source: error,
                });
            }

            retries += 1;
            let delay = self.config().retry_backoff.delay_for(retries);
            tracing::debug!(
                retry = retries,
                max = max_retries,
                ?delay,
                error = %error,
                "transient failure, retrying statement"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Execute a statement without parameters.
    pub async fn query(&self, query: &str) -> Result<Rows, ExecError> {
        self.exec(query, ()).await
    }

    async fn attempt(&self, query: &str, params: &[crate::Value]) -> Result<Rows, Attempt> {
        let mut conn = match self.acquire().await {
            Ok(conn) => conn,
            Err(PoolError::Connect(e)) if e.is_transient() => return Err(Attempt::Transient(e)),
            Err(e) => return Err(Attempt::Fatal(e.into())),
        };

        // The handle is dropped before any backoff sleep so the connection is
        // back in the pool while this caller waits.
        match conn.execute(query, params).await {
            Ok(rows) => Ok(rows),
            Err(e) if e.is_transient() => Err(Attempt::Transient(e)),
            Err(e) => {
                tracing::debug!(slot = conn.id(), error = %e, "statement failed");
                Err(Attempt::Fatal(ExecError::Fatal(e)))
            }
        }
    }
}

/// Outcome of a single failed attempt.
enum Attempt {
    Transient(DriverError),
    Fatal(ExecError),
}
