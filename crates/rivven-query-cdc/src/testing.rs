//! In-memory collaborators for testing pipelines
//!
//! [`MemoryQueryEngine`] serves a fixed result set and [`MemoryBroker`]
//! records every publish. Both can be told to fail at a chosen step, and
//! both are cheap to clone: clones share the same recorded state.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_query_cdc::testing::{MemoryBroker, MemoryQueryEngine};
//!
//! let engine = MemoryQueryEngine::new(Schema::from_names(["id"]), rows);
//! let broker = MemoryBroker::new().fail_publish_at(1, "deadline exceeded");
//! let pipeline = Pipeline::new(Arc::new(engine.clone()), Arc::new(broker.clone()));
//!
//! pipeline.run(&request).await.unwrap_err();
//! assert_eq!(broker.published().len(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{PipelineError, Result};
use crate::publisher::{Broker, DeliveryId, TopicHandle};
use crate::query::{QueryEngine, QuerySession, RowCursor};
use crate::request::TopicLocator;
use crate::schema::{Row, Schema, SharedSchema};

// ============================================================================
// Query engine
// ============================================================================

#[derive(Debug, Default)]
struct EngineState {
    sessions_opened: Vec<String>,
    sessions_closed: usize,
    queries: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct EngineFaults {
    open: Option<String>,
    execute: Option<String>,
    read_at: Option<(usize, String)>,
}

/// Query engine serving a fixed result set
#[derive(Debug, Clone)]
pub struct MemoryQueryEngine {
    schema: SharedSchema,
    rows: Arc<Vec<Row>>,
    faults: EngineFaults,
    state: Arc<Mutex<EngineState>>,
}

impl MemoryQueryEngine {
    pub fn new(schema: Schema, rows: Vec<Row>) -> Self {
        Self {
            schema: Arc::new(schema),
            rows: Arc::new(rows),
            faults: EngineFaults::default(),
            state: Arc::new(Mutex::new(EngineState::default())),
        }
    }

    /// Fail when a session is opened
    pub fn fail_open(mut self, message: impl Into<String>) -> Self {
        self.faults.open = Some(message.into());
        self
    }

    /// Fail the query job
    pub fn fail_execute(mut self, message: impl Into<String>) -> Self {
        self.faults.execute = Some(message.into());
        self
    }

    /// Fail when reading the row at `index` (zero-based)
    pub fn fail_read_at(mut self, index: usize, message: impl Into<String>) -> Self {
        self.faults.read_at = Some((index, message.into()));
        self
    }

    /// Project ids of every session opened, in order
    pub fn sessions_opened(&self) -> Vec<String> {
        self.state.lock().sessions_opened.clone()
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.lock().sessions_closed
    }

    /// SQL text of every query executed, in order
    pub fn queries(&self) -> Vec<String> {
        self.state.lock().queries.clone()
    }
}

#[async_trait]
impl QueryEngine for MemoryQueryEngine {
    async fn open_session(&self, project_id: &str) -> Result<Box<dyn QuerySession>> {
        if let Some(ref message) = self.faults.open {
            return Err(PipelineError::query("memory.connect", message));
        }
        self.state
            .lock()
            .sessions_opened
            .push(project_id.to_string());
        Ok(Box::new(MemorySession {
            engine: self.clone(),
        }))
    }
}

struct MemorySession {
    engine: MemoryQueryEngine,
}

#[async_trait]
impl QuerySession for MemorySession {
    async fn execute(&mut self, sql: &str) -> Result<Box<dyn RowCursor>> {
        self.engine.state.lock().queries.push(sql.to_string());
        if let Some(ref message) = self.engine.faults.execute {
            return Err(PipelineError::query("memory.wait", message));
        }
        Ok(Box::new(MemoryCursor {
            schema: Arc::clone(&self.engine.schema),
            rows: self.engine.rows.iter().cloned().collect(),
            position: 0,
            fail_at: self.engine.faults.read_at.clone(),
        }))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.engine.state.lock().sessions_closed += 1;
        Ok(())
    }
}

struct MemoryCursor {
    schema: SharedSchema,
    rows: VecDeque<Row>,
    position: usize,
    fail_at: Option<(usize, String)>,
}

#[async_trait]
impl RowCursor for MemoryCursor {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn next_row(&mut self) -> Result<Option<Row>> {
        if let Some((index, ref message)) = self.fail_at {
            if index == self.position {
                return Err(PipelineError::row_read("memory.next", message));
            }
        }
        self.position += 1;
        Ok(self.rows.pop_front())
    }
}

// ============================================================================
// Broker
// ============================================================================

#[derive(Debug, Default)]
struct BrokerState {
    resolved: Vec<String>,
    published: Vec<Vec<u8>>,
    attempts: usize,
    in_flight: usize,
    max_in_flight: usize,
    shutdowns: usize,
}

/// Broker recording every resolve, publish, and shutdown
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    fail_resolve: Option<String>,
    fail_publish_at: Option<(usize, String)>,
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail to connect to any topic
    pub fn fail_resolve(mut self, message: impl Into<String>) -> Self {
        self.fail_resolve = Some(message.into());
        self
    }

    /// Fail the publish attempt at `index` (zero-based)
    pub fn fail_publish_at(mut self, index: usize, message: impl Into<String>) -> Self {
        self.fail_publish_at = Some((index, message.into()));
        self
    }

    /// Topic locators resolved, in order
    pub fn resolved_topics(&self) -> Vec<String> {
        self.state.lock().resolved.clone()
    }

    /// Acknowledged payloads, in publish order
    pub fn published(&self) -> Vec<Vec<u8>> {
        self.state.lock().published.clone()
    }

    /// Acknowledged payloads decoded as JSON
    pub fn published_json(&self) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .published
            .iter()
            .filter_map(|p| serde_json::from_slice(p).ok())
            .collect()
    }

    /// Publish attempts, failed ones included
    pub fn publish_attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// Highest number of publishes awaiting acknowledgment at once
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    pub fn shutdowns(&self) -> usize {
        self.state.lock().shutdowns
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn resolve(&self, topic: &TopicLocator) -> Result<Box<dyn TopicHandle>> {
        if let Some(ref message) = self.fail_resolve {
            return Err(PipelineError::broker_connect("memory.connect", message));
        }
        self.state.lock().resolved.push(topic.to_string());
        Ok(Box::new(MemoryTopic {
            broker: self.clone(),
            topic: topic.topic_name().to_string(),
        }))
    }
}

struct MemoryTopic {
    broker: MemoryBroker,
    topic: String,
}

#[async_trait]
impl TopicHandle for MemoryTopic {
    async fn publish(&mut self, payload: Vec<u8>) -> Result<DeliveryId> {
        let attempt = {
            let mut state = self.broker.state.lock();
            state.attempts += 1;
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.attempts - 1
        };

        tokio::task::yield_now().await;

        let mut state = self.broker.state.lock();
        state.in_flight -= 1;
        if let Some((index, ref message)) = self.broker.fail_publish_at {
            if index == attempt {
                return Err(PipelineError::publish("memory.publish", message));
            }
        }
        state.published.push(payload);
        Ok(format!("{}-{}", self.topic, state.published.len()))
    }

    async fn shutdown(self: Box<Self>) {
        self.broker.state.lock().shutdowns += 1;
    }
}
