//! rivven-query-cdc - Publish SQL query results as CDC events
//!
//! Runs a query, turns every result row into a JSON event tagged with a
//! `_CHANGE_TYPE` marker (`UPSERT` or `DELETE`), and publishes the events to
//! a topic one at a time so downstream consumers can replay the mutation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   request    │──▶│ QueryEngine  │──▶│  CdcEvent    │──▶│   Broker     │
//! │  (validate)  │   │ (BigQuery)   │   │  (JSON)      │   │  (Pub/Sub)   │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! # Library Usage
//!
//! ```rust,ignore
//! use rivven_query_cdc::gcp::{BigQueryEngine, PubSubBroker};
//! use rivven_query_cdc::{GcpConfig, OperationRequest, Pipeline};
//! use std::sync::Arc;
//!
//! let gcp = GcpConfig::default();
//! let pipeline = Pipeline::new(
//!     Arc::new(BigQueryEngine::new(gcp.clone())),
//!     Arc::new(PubSubBroker::new(gcp)),
//! );
//!
//! let request = OperationRequest::new(
//!     "billing-project",
//!     "SELECT id FROM dataset.deleted_users",
//!     "projects/target/topics/users-cdc",
//!     "DELETE",
//! );
//! let summary = pipeline.run(&request).await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # One-shot run
//! rivven-query-cdc -job_project_id=billing -query="SELECT id FROM ds.t" \
//!     -topic=projects/target/topics/cdc -operation=DELETE
//!
//! # HTTP endpoint on :8080
//! rivven-query-cdc -webserver
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod publisher;
pub mod query;
pub mod request;
pub mod schema;
pub mod server;
pub mod telemetry;
pub mod testing;

#[cfg(feature = "gcp")]
pub mod gcp;

pub use config::{AppConfig, GcpConfig, RunMode, ServerConfig};
pub use error::{ErrorKind, PipelineError, Result};
pub use event::{encode_event, CdcEvent, CHANGE_TYPE_KEY};
pub use pipeline::{Pipeline, PipelineState, RunSummary};
pub use publisher::{Broker, DeliveryId, TopicHandle};
pub use query::{QueryEngine, QuerySession, RowCursor};
pub use request::{ChangeType, OperationRequest, TopicLocator, ValidatedRequest};
pub use schema::{Column, ColumnMode, ColumnType, Row, Schema, SharedSchema, Value};
pub use server::QueryCdcServer;
