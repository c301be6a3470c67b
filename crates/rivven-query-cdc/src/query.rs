//! Query execution seam
//!
//! - [`QueryEngine`]: opens a session scoped to a project
//! - [`QuerySession`]: submits a query and waits for it to finish
//! - [`RowCursor`]: forward-only, single-pass iteration over the result
//!
//! The orchestrator owns the session for the whole run and closes it on
//! every exit path.

use async_trait::async_trait;

use crate::error::Result;
use crate::schema::{Row, Schema};

/// An analytical engine that runs SQL
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Open a connection scoped to `project_id`.
    async fn open_session(&self, project_id: &str) -> Result<Box<dyn QuerySession>>;
}

/// A connection to the engine, valid for one pipeline run
#[async_trait]
pub trait QuerySession: Send {
    /// Submit `sql`, block until the job reaches a terminal state, and
    /// return a cursor over its result.
    ///
    /// An engine-side failure is `QueryExecutionFailed`.
    async fn execute(&mut self, sql: &str) -> Result<Box<dyn RowCursor>>;

    /// Release the connection.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Forward-only cursor over a result set
#[async_trait]
pub trait RowCursor: Send {
    /// Schema shared by every row of this result
    fn schema(&self) -> &Schema;

    /// Next row, or `None` once the result is exhausted.
    ///
    /// Any failure other than exhaustion is `RowReadFailed`.
    async fn next_row(&mut self) -> Result<Option<Row>>;
}
