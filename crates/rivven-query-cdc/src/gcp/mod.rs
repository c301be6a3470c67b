//! Google Cloud backends
//!
//! - [`BigQueryEngine`]: runs queries as BigQuery jobs and pages through
//!   their results
//! - [`PubSubBroker`]: publishes events to Pub/Sub topics
//!
//! Both authenticate with the service account key in
//! [`GcpConfig::credentials_file`](crate::config::GcpConfig) when set, and
//! with Application Default Credentials otherwise.

mod bigquery;
mod pubsub;

pub use bigquery::BigQueryEngine;
pub use pubsub::PubSubBroker;
