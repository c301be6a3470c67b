//! Query-to-event pipeline
//!
//! One run walks `Idle → Validating → Executing → Streaming → Done`, or stops
//! in `Failed` on the first error. Rows are transformed and published one at
//! a time in cursor order; each publish is acknowledged before the next row
//! is read. Rows published before a failure stay published.
//!
//! ```text
//! request ──▶ validate ──▶ open session ──▶ execute ──▶ resolve topic
//!                                                          │
//!              ┌───────────────────────────────────────────┘
//!              ▼
//!          next_row ──▶ encode_event ──▶ publish (await ack) ──┐
//!              ▲                                               │
//!              └───────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::error::{ErrorKind, Result};
use crate::event::encode_event;
use crate::publisher::{Broker, TopicHandle};
use crate::query::{QueryEngine, QuerySession, RowCursor};
use crate::request::{OperationRequest, ValidatedRequest};

/// State of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Validating,
    Executing,
    Streaming,
    Done,
    Failed(ErrorKind),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Validating => write!(f, "validating"),
            Self::Executing => write!(f, "executing"),
            Self::Streaming => write!(f, "streaming"),
            Self::Done => write!(f, "done"),
            Self::Failed(kind) => write!(f, "failed({})", kind),
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Events acknowledged by the broker
    pub rows_published: u64,
    pub state: PipelineState,
    pub elapsed: Duration,
}

/// Tracks state transitions of one run
#[derive(Debug)]
struct RunTracker {
    state: PipelineState,
    rows_published: u64,
    started_at: Instant,
}

impl RunTracker {
    fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            rows_published: 0,
            started_at: Instant::now(),
        }
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(from = %self.state, to = %next, "Pipeline state transition");
        self.state = next;
    }
}

/// Composes validation, query execution, transformation and publishing
///
/// A `Pipeline` holds no per-run state; concurrent calls to [`Pipeline::run`]
/// are independent and each acquires its own session and topic handle.
#[derive(Clone)]
pub struct Pipeline {
    engine: Arc<dyn QueryEngine>,
    broker: Arc<dyn Broker>,
}

impl Pipeline {
    pub fn new(engine: Arc<dyn QueryEngine>, broker: Arc<dyn Broker>) -> Self {
        Self { engine, broker }
    }

    /// Run one request to completion.
    ///
    /// Returns the first error encountered; later rows are never attempted.
    pub async fn run(&self, request: &OperationRequest) -> Result<RunSummary> {
        let mut tracker = RunTracker::new();

        match self.run_tracked(request, &mut tracker).await {
            Ok(()) => {
                tracker.transition(PipelineState::Done);
                let summary = RunSummary {
                    rows_published: tracker.rows_published,
                    state: tracker.state,
                    elapsed: tracker.started_at.elapsed(),
                };
                info!(
                    rows_published = summary.rows_published,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "Pipeline run completed"
                );
                Ok(summary)
            }
            Err(e) => {
                tracker.transition(PipelineState::Failed(e.kind()));
                error!(
                    kind = %e.kind(),
                    rows_published = tracker.rows_published,
                    "Pipeline run failed: {}",
                    e
                );
                Err(e)
            }
        }
    }

    async fn run_tracked(&self, request: &OperationRequest, tracker: &mut RunTracker) -> Result<()> {
        tracker.transition(PipelineState::Validating);
        let request = request.validate()?;

        tracker.transition(PipelineState::Executing);
        let mut session = self.engine.open_session(&request.job_project_id).await?;

        let result = self.execute(session.as_mut(), &request, tracker).await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close query session");
        }
        result
    }

    async fn execute(
        &self,
        session: &mut dyn QuerySession,
        request: &ValidatedRequest,
        tracker: &mut RunTracker,
    ) -> Result<()> {
        let mut cursor = session.execute(&request.query).await?;
        tracker.transition(PipelineState::Streaming);

        let mut topic = self.broker.resolve(&request.topic).await?;
        let result = stream_rows(cursor.as_mut(), topic.as_mut(), request, tracker).await;
        topic.shutdown().await;
        result
    }
}

async fn stream_rows(
    cursor: &mut dyn RowCursor,
    topic: &mut dyn TopicHandle,
    request: &ValidatedRequest,
    tracker: &mut RunTracker,
) -> Result<()> {
    while let Some(row) = cursor.next_row().await? {
        let payload = encode_event(&row, cursor.schema(), request.change_type)?;
        let message_id = topic.publish(payload).await?;
        tracker.rows_published += 1;
        info!(
            message_id = %message_id,
            topic = %request.topic,
            "Published message"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Schema, Value};
    use crate::testing::{MemoryBroker, MemoryQueryEngine};

    const TOPIC: &str = "projects/p/topics/t";

    fn pipeline(engine: &MemoryQueryEngine, broker: &MemoryBroker) -> Pipeline {
        Pipeline::new(Arc::new(engine.clone()), Arc::new(broker.clone()))
    }

    fn engine_with_rows(count: i64) -> MemoryQueryEngine {
        MemoryQueryEngine::new(
            Schema::from_names(["id"]),
            (1..=count).map(|i| vec![Value::Int64(i)]).collect(),
        )
    }

    #[tokio::test]
    async fn test_run_publishes_every_row() {
        let engine = engine_with_rows(3);
        let broker = MemoryBroker::new();

        let summary = pipeline(&engine, &broker)
            .run(&OperationRequest::new("job", "SELECT id", TOPIC, "upsert"))
            .await
            .unwrap();

        assert_eq!(summary.rows_published, 3);
        assert_eq!(summary.state, PipelineState::Done);
        assert!(summary.state.is_terminal());
        assert_eq!(engine.sessions_opened(), vec!["job".to_string()]);
        assert_eq!(engine.sessions_closed(), 1);
        assert_eq!(broker.resolved_topics(), vec![TOPIC.to_string()]);
        assert_eq!(broker.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_touches_nothing() {
        let engine = engine_with_rows(1);
        let broker = MemoryBroker::new();

        let err = pipeline(&engine, &broker)
            .run(&OperationRequest::new("job", "SELECT id", "a/b/c", "DELETE"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(engine.sessions_opened().is_empty());
        assert!(broker.resolved_topics().is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_closes_session() {
        let engine = engine_with_rows(1).fail_execute("Syntax error at [1:1]");
        let broker = MemoryBroker::new();

        let err = pipeline(&engine, &broker)
            .run(&OperationRequest::new("job", "SELEC", TOPIC, "DELETE"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::QueryExecutionFailed);
        assert_eq!(engine.sessions_closed(), 1);
        assert!(broker.resolved_topics().is_empty());
    }

    #[tokio::test]
    async fn test_broker_connect_failure() {
        let engine = engine_with_rows(2);
        let broker = MemoryBroker::new().fail_resolve("permission denied");

        let err = pipeline(&engine, &broker)
            .run(&OperationRequest::new("job", "SELECT id", TOPIC, "DELETE"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BrokerConnectFailed);
        assert!(broker.published().is_empty());
        assert_eq!(engine.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn test_row_read_failure_stops_stream() {
        let engine = engine_with_rows(3).fail_read_at(1, "connection reset");
        let broker = MemoryBroker::new();

        let err = pipeline(&engine, &broker)
            .run(&OperationRequest::new("job", "SELECT id", TOPIC, "DELETE"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RowReadFailed);
        assert_eq!(broker.published().len(), 1);
        assert_eq!(broker.shutdowns(), 1);
        assert_eq!(engine.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn test_empty_result_is_done() {
        let engine = engine_with_rows(0);
        let broker = MemoryBroker::new();

        let summary = pipeline(&engine, &broker)
            .run(&OperationRequest::new("job", "SELECT id", TOPIC, "DELETE"))
            .await
            .unwrap();

        assert_eq!(summary.rows_published, 0);
        assert_eq!(summary.state, PipelineState::Done);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::Streaming.to_string(), "streaming");
        assert_eq!(
            PipelineState::Failed(ErrorKind::PublishFailed).to_string(),
            "failed(PublishFailed)"
        );
        assert!(!PipelineState::Executing.is_terminal());
    }
}
